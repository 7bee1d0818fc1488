//! Scoped key/value store shared by the nodes of a tree.
//!
//! Every subtree gets its own `Blackboard` whose parent is the enclosing
//! scope. Lookups that miss locally are forwarded to the parent when the key
//! is explicitly remapped or when auto-remapping is on and the key is not
//! private (does not start with `_`). A leading `@` always addresses the root.

use crate::{
    any::{Any, TypeInfo},
    error::{Error, Result},
};
use std::collections::{HashMap, HashSet};
use std::fmt::Write;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard, Weak,
};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

#[cfg(test)]
mod test;

pub fn is_private_key(key: &str) -> bool {
    key.starts_with('_')
}

fn now() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Timestamp {
    /// Incremented on every write to the entry.
    pub seq: u64,
    /// Wall clock time of the last write.
    pub time: Duration,
}

#[derive(Clone, Debug)]
pub struct StampedValue<T> {
    pub value: T,
    pub stamp: Timestamp,
}

#[derive(Debug)]
pub struct EntryData {
    pub value: Any,
    pub type_info: TypeInfo,
    pub sequence_id: u64,
    pub stamp: Duration,
}

impl EntryData {
    /// Stores `value` and bumps the write stamp.
    pub fn assign(&mut self, value: Any) {
        self.value = value;
        self.touch();
    }

    fn touch(&mut self) {
        self.sequence_id += 1;
        self.stamp = now();
    }
}

#[derive(Debug)]
pub struct Entry {
    data: Mutex<EntryData>,
}

impl Entry {
    fn new(type_info: TypeInfo) -> Self {
        Self {
            data: Mutex::new(EntryData {
                value: Any::empty(),
                type_info,
                sequence_id: 0,
                stamp: Duration::ZERO,
            }),
        }
    }

    pub fn lock(&self) -> MutexGuard<EntryData> {
        lock(&self.data)
    }

    pub fn value(&self) -> Any {
        self.lock().value.clone()
    }

    pub fn type_info(&self) -> TypeInfo {
        self.lock().type_info.clone()
    }
}

#[derive(Default)]
struct Inner {
    storage: Mutex<HashMap<String, Arc<Entry>>>,
    parent: Option<Weak<Inner>>,
    internal_to_external: Mutex<HashMap<String, String>>,
    auto_remapping: AtomicBool,
}

/// Cheaply clonable handle. Clones refer to the same scope.
#[derive(Clone, Default)]
pub struct Blackboard {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Blackboard {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Blackboard")
            .field("keys", &self.keys())
            .field("has_parent", &self.inner.parent.is_some())
            .finish()
    }
}

impl Blackboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new scope. Only a weak reference to `parent` is kept.
    pub fn create(parent: Option<&Blackboard>) -> Self {
        Self {
            inner: Arc::new(Inner {
                parent: parent.map(|p| Arc::downgrade(&p.inner)),
                ..Inner::default()
            }),
        }
    }

    pub fn enable_auto_remapping(&self, enabled: bool) {
        self.inner.auto_remapping.store(enabled, Ordering::Relaxed);
    }

    pub fn auto_remapping(&self) -> bool {
        self.inner.auto_remapping.load(Ordering::Relaxed)
    }

    /// Makes `internal` in this scope an alias of `external` in the parent.
    pub fn add_subtree_remapping(&self, internal: &str, external: &str) {
        lock(&self.inner.internal_to_external).insert(internal.to_owned(), external.to_owned());
    }

    pub fn parent(&self) -> Option<Blackboard> {
        self.inner
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Blackboard { inner })
    }

    pub fn root(&self) -> Blackboard {
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    pub fn same_scope(&self, other: &Blackboard) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn remapped(&self, key: &str) -> Option<String> {
        lock(&self.inner.internal_to_external).get(key).cloned()
    }

    pub fn get_entry(&self, key: &str) -> Option<Arc<Entry>> {
        if let Some(root_key) = key.strip_prefix('@') {
            return self.root().get_entry(root_key);
        }
        if let Some(entry) = lock(&self.inner.storage).get(key) {
            return Some(entry.clone());
        }
        let parent = self.parent()?;
        if let Some(external) = self.remapped(key) {
            return parent.get_entry(&external);
        }
        if self.auto_remapping() && !is_private_key(key) {
            return parent.get_entry(key);
        }
        None
    }

    pub fn entry_info(&self, key: &str) -> Option<TypeInfo> {
        self.get_entry(key).map(|entry| entry.type_info())
    }

    pub fn get_any(&self, key: &str) -> Option<Any> {
        self.get_entry(key).map(|entry| entry.value())
    }

    /// Declares `key` with the given type, following remapping to the scope
    /// that owns it. Re-declaring with a different strong type is a logic
    /// error; re-declaring with a compatible one returns the existing entry.
    pub fn create_entry(&self, key: &str, info: TypeInfo) -> Result<Arc<Entry>> {
        match key.strip_prefix('@') {
            Some(root_key) => self.root().create_entry_impl(root_key, info),
            None => self.create_entry_impl(key, info),
        }
    }

    fn create_entry_impl(&self, key: &str, info: TypeInfo) -> Result<Arc<Entry>> {
        {
            let storage = lock(&self.inner.storage);
            if let Some(entry) = storage.get(key) {
                let previous = entry.type_info();
                if previous.is_strongly_typed()
                    && info.is_strongly_typed()
                    && previous != info
                {
                    return Err(Error::logic(format!(
                        "Blackboard entry [{}]: once declared, the type of a port shall not \
                         change. Previously declared type [{}], current type [{}]",
                        key,
                        previous.type_name(),
                        info.type_name()
                    )));
                }
                return Ok(entry.clone());
            }
        }

        let external = self.remapped(key);
        let forward = external.clone().or_else(|| {
            (self.auto_remapping() && !is_private_key(key)).then(|| key.to_owned())
        });
        if let Some(parent_key) = forward {
            let parent = self
                .parent()
                .ok_or_else(|| Error::runtime("Missing parent blackboard"))?;
            return parent.create_entry_impl(&parent_key, info);
        }

        let mut storage = lock(&self.inner.storage);
        // Another thread may have raced us between the two locks.
        let entry = storage
            .entry(key.to_owned())
            .or_insert_with(|| Arc::new(Entry::new(info)))
            .clone();
        Ok(entry)
    }

    /// Writes `value` under `key`, creating the entry if needed.
    ///
    /// Weakly typed entries take whatever they are given. Strongly typed
    /// entries accept the same type, a string their converter can parse, or
    /// a number that fits; anything else is a logic error.
    pub fn set<T: Send + Sync + 'static>(&self, key: &str, value: T) -> Result<()> {
        if let Some(root_key) = key.strip_prefix('@') {
            return self.root().set(root_key, value);
        }
        let value = Any::new(value);
        let entry = match self.get_entry(key) {
            Some(entry) => entry,
            None => self.create_entry_impl(key, TypeInfo::of_value(&value))?,
        };
        let mut data = entry.lock();
        if !data.type_info.is_strongly_typed() {
            if !value.is_string() && !value.is_empty() {
                data.type_info = TypeInfo::of_value(&value);
            }
            data.assign(value);
            return Ok(());
        }
        if data.type_info.matches(&value) {
            data.assign(value);
            return Ok(());
        }
        let converted = match value.downcast_ref::<String>() {
            Some(text) if data.type_info.converter().is_some() => {
                Some(data.type_info.parse_string(text)?)
            }
            _ => value.cast_numeric_to(&data.type_info),
        };
        match converted {
            Some(converted) => {
                data.assign(converted);
                Ok(())
            }
            None => {
                let msg = format!(
                    "Blackboard::set({}): once declared, the type of a port shall not change. \
                     Previously declared type [{}], current type [{}]",
                    key,
                    data.type_info.type_name(),
                    value.type_name()
                );
                drop(data);
                debug!("{}", self.debug_message());
                Err(Error::logic(msg))
            }
        }
    }

    pub fn get<T: Clone + 'static>(&self, key: &str) -> Result<T> {
        Ok(self.get_stamped::<T>(key)?.value)
    }

    pub fn get_stamped<T: Clone + 'static>(&self, key: &str) -> Result<StampedValue<T>> {
        let entry = self.get_entry(key).ok_or_else(|| {
            Error::runtime(format!("Blackboard::get() error. Missing key [{}]", key))
        })?;
        let data = entry.lock();
        if data.value.is_empty() {
            return Err(Error::runtime(format!(
                "Blackboard::get() error. Entry [{}] hasn't been initialized, yet",
                key
            )));
        }
        Ok(StampedValue {
            value: data.value.cast::<T>()?,
            stamp: Timestamp {
                seq: data.sequence_id,
                time: data.stamp,
            },
        })
    }

    /// Removes a local entry. Missing keys are ignored.
    pub fn unset(&self, key: &str) {
        lock(&self.inner.storage).remove(key);
    }

    pub fn keys(&self) -> Vec<String> {
        lock(&self.inner.storage).keys().cloned().collect()
    }

    pub fn clear(&self) {
        lock(&self.inner.storage).clear();
    }

    /// Makes `dst` hold a copy of every entry of `self`. Entries already in
    /// `dst` are updated in place; entries not present in `self` are removed.
    /// Remapping and parent of `dst` are left untouched.
    ///
    /// Locks the source storage before the destination storage.
    pub fn clone_into(&self, dst: &Blackboard) {
        if self.same_scope(dst) {
            return;
        }
        let src_storage = lock(&self.inner.storage);
        let mut dst_storage = lock(&dst.inner.storage);

        let mut stale: HashSet<String> = dst_storage.keys().cloned().collect();
        for (key, src_entry) in src_storage.iter() {
            stale.remove(key);
            let src = src_entry.lock();
            match dst_storage.get(key) {
                Some(dst_entry) => {
                    let mut dst = dst_entry.lock();
                    dst.type_info = src.type_info.clone();
                    dst.assign(src.value.clone());
                }
                None => {
                    let entry = Entry::new(src.type_info.clone());
                    entry.lock().value = src.value.clone();
                    dst_storage.insert(key.clone(), Arc::new(entry));
                }
            }
        }
        for key in stale {
            dst_storage.remove(&key);
        }
    }

    /// Human readable dump of the local entries and remappings.
    pub fn debug_message(&self) -> String {
        let mut out = String::new();
        for (key, entry) in lock(&self.inner.storage).iter() {
            let data = entry.lock();
            let type_name = if data.type_info.type_id().is_some() {
                data.type_info.type_name()
            } else {
                data.value.type_name()
            };
            let _ = writeln!(out, "{} ({})", key, type_name);
        }
        for (from, to) in lock(&self.inner.internal_to_external).iter() {
            let _ = writeln!(out, "[{}] remapped to port of parent tree [{}]", from, to);
        }
        out
    }
}
