//! Interned strings used for port names and blackboard keys.
//!
//! Two symbols created from the same text share one leaked `&'static str`, so
//! equality and hashing only look at the address.

use ::once_cell::sync::Lazy;
use std::collections::HashSet;
use std::fmt::{Debug, Display, Formatter, Result as FmtResult};
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Mutex;

static SYMBOL_HEAP: Lazy<Mutex<HashSet<&'static str>>> = Lazy::new(|| Mutex::new(HashSet::new()));

#[derive(Clone, Copy, Eq)]
pub struct Symbol {
    s: &'static str,
}

impl Symbol {
    pub fn intern(s: &str) -> Self {
        // A poisoned heap only means another thread panicked mid-insert; the set
        // itself is still consistent.
        let mut heap = SYMBOL_HEAP.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = heap.get(s) {
            return Symbol { s: *existing };
        }
        let leaked: &'static str = Box::leak(s.to_owned().into_boxed_str());
        heap.insert(leaked);
        Symbol { s: leaked }
    }

    pub fn addr(self) -> usize {
        self.s.as_ptr() as usize
    }

    pub fn as_str(self) -> &'static str {
        self.s
    }

    /// Number of distinct symbols interned so far.
    pub fn count() -> usize {
        SYMBOL_HEAP.lock().map(|heap| heap.len()).unwrap_or(0)
    }
}

impl Debug for Symbol {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        Debug::fmt(self.s, fmt)
    }
}

impl Display for Symbol {
    fn fmt(&self, fmt: &mut Formatter) -> FmtResult {
        fmt.write_str(self.s)
    }
}

impl Deref for Symbol {
    type Target = str;
    fn deref(&self) -> &str {
        self.s
    }
}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state)
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl PartialEq<str> for Symbol {
    fn eq(&self, other: &str) -> bool {
        self.s == other
    }
}

impl PartialEq<&str> for Symbol {
    fn eq(&self, other: &&str) -> bool {
        self.s == *other
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self::intern(s)
    }
}

impl From<&String> for Symbol {
    fn from(s: &String) -> Self {
        Self::intern(s)
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Self::intern(&s)
    }
}

impl serde::Serialize for Symbol {
    fn serialize<S: serde::Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(self.s)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn same_text_same_address() {
        let a = Symbol::from("symbol_test_key");
        let b = Symbol::from(String::from("symbol_test_key"));
        assert_eq!(a, b);
        assert_eq!(a.addr(), b.addr());
        assert_eq!(a, "symbol_test_key");
        assert_ne!(a, Symbol::from("symbol_test_other"));
    }
}
