//! Type-erased values stored in the blackboard.
//!
//! An [`Any`] is cheap to clone: the payload lives behind an `Arc`, the same
//! trick the blackboard has always used to hand values across subtree
//! boundaries without requiring `Clone` on every stored type.

use crate::{
    convert::ConvertFromString,
    error::{Error, Result},
    NodeStatus,
};
use std::any::{Any as StdAny, TypeId};
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

pub type StringConverter = Arc<dyn Fn(&str) -> Result<Any> + Send + Sync>;

/// Declared type of a port or blackboard entry.
///
/// A `TypeInfo` without a type id accepts anything ("weakly typed"). The
/// converter, when present, turns the textual form of a value into an `Any`
/// of the declared type.
#[derive(Clone)]
pub struct TypeInfo {
    type_id: Option<TypeId>,
    type_name: &'static str,
    converter: Option<StringConverter>,
}

impl TypeInfo {
    pub fn any() -> Self {
        Self {
            type_id: None,
            type_name: "AnyTypeAllowed",
            converter: None,
        }
    }

    pub fn of<T>() -> Self
    where
        T: ConvertFromString + Send + Sync + 'static,
    {
        Self {
            type_id: Some(TypeId::of::<T>()),
            type_name: std::any::type_name::<T>(),
            converter: Some(Arc::new(|s: &str| T::convert_from_string(s).map(Any::new))),
        }
    }

    /// Strongly typed, but with no way to build the value from a string.
    pub fn opaque<T: 'static>() -> Self {
        Self {
            type_id: Some(TypeId::of::<T>()),
            type_name: std::any::type_name::<T>(),
            converter: None,
        }
    }

    pub fn with_converter(mut self, converter: StringConverter) -> Self {
        self.converter = Some(converter);
        self
    }

    pub fn type_id(&self) -> Option<TypeId> {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is_strongly_typed(&self) -> bool {
        matches!(self.type_id, Some(id) if id != TypeId::of::<Any>())
    }

    pub fn converter(&self) -> Option<&StringConverter> {
        self.converter.as_ref()
    }

    /// Builds a value of this type from its textual form. Weakly typed infos
    /// keep the text as a `String`.
    pub fn parse_string(&self, text: &str) -> Result<Any> {
        match (&self.converter, self.is_strongly_typed()) {
            (Some(converter), _) => converter(text),
            (None, false) => Ok(Any::new(text.to_owned())),
            (None, true) => Err(Error::logic(format!(
                "no string converter registered for type [{}]",
                self.type_name
            ))),
        }
    }

    /// The `TypeInfo` a blackboard entry gets when it is first created by a
    /// write of `value`. Strings and empty values stay weakly typed.
    pub fn of_value(value: &Any) -> Self {
        macro_rules! known {
            ($($t:ty),*) => {
                $(
                    if value.is::<$t>() {
                        return Self::of::<$t>();
                    }
                )*
            };
        }
        if value.is_empty() || value.is_string() {
            return Self::any();
        }
        known!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64, bool, NodeStatus);
        known!(Vec<i32>, Vec<f64>, Vec<String>);
        Self {
            type_id: value.type_id(),
            type_name: value.type_name(),
            converter: None,
        }
    }

    pub(crate) fn matches(&self, value: &Any) -> bool {
        match self.type_id {
            None => true,
            Some(id) => value.type_id() == Some(id),
        }
    }
}

impl Default for TypeInfo {
    fn default() -> Self {
        Self::any()
    }
}

impl PartialEq for TypeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Debug for TypeInfo {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("TypeInfo")
            .field("type_name", &self.type_name)
            .field("has_converter", &self.converter.is_some())
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum Number {
    Int(i64),
    UInt(u64),
    Real(f64),
    Bool(bool),
}

impl Number {
    fn to_i128(self) -> Option<i128> {
        match self {
            Number::Int(v) => Some(v as i128),
            Number::UInt(v) => Some(v as i128),
            Number::Real(v) if v.fract() == 0.0 && v.is_finite() => Some(v as i128),
            Number::Real(_) => None,
            Number::Bool(b) => Some(b as i128),
        }
    }

    fn to_f64(self) -> Option<f64> {
        match self {
            Number::Int(v) => Some(v as f64),
            Number::UInt(v) => Some(v as f64),
            Number::Real(v) => Some(v),
            Number::Bool(_) => None,
        }
    }

    fn to_bool(self) -> Option<bool> {
        match self {
            Number::Bool(b) => Some(b),
            other => match other.to_i128()? {
                0 => Some(false),
                1 => Some(true),
                _ => None,
            },
        }
    }
}

/// Type-erased, cheaply clonable value holder.
#[derive(Clone, Default)]
pub struct Any {
    value: Option<Arc<dyn StdAny + Send + Sync>>,
    type_name: &'static str,
}

fn boxed_as<T: 'static, U: 'static>(value: U) -> Option<T> {
    let boxed: Box<dyn StdAny> = Box::new(value);
    boxed.downcast::<T>().ok().map(|b| *b)
}

impl Any {
    pub fn new<T: Send + Sync + 'static>(value: T) -> Self {
        // An Any wrapping an Any is flattened.
        let mut slot = Some(value);
        if let Some(inner) = (&mut slot as &mut dyn StdAny).downcast_mut::<Option<Any>>() {
            return inner.take().unwrap_or_default();
        }
        match slot {
            Some(value) => Self {
                value: Some(Arc::new(value)),
                type_name: std::any::type_name::<T>(),
            },
            None => Self::default(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }

    pub fn type_id(&self) -> Option<TypeId> {
        self.value.as_deref().map(StdAny::type_id)
    }

    pub fn type_name(&self) -> &'static str {
        if self.value.is_some() {
            self.type_name
        } else {
            "empty"
        }
    }

    pub fn is<T: 'static>(&self) -> bool {
        self.type_id() == Some(TypeId::of::<T>())
    }

    pub fn is_string(&self) -> bool {
        self.is::<String>()
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.value.as_deref()?.downcast_ref::<T>()
    }

    pub(crate) fn as_number(&self) -> Option<Number> {
        let v = self.value.as_deref()?;
        macro_rules! try_cast {
            ($variant:ident as $repr:ty: $($t:ty),*) => {
                $(
                    if let Some(x) = v.downcast_ref::<$t>() {
                        return Some(Number::$variant(*x as $repr));
                    }
                )*
            };
        }
        try_cast!(Int as i64: i8, i16, i32, i64, isize);
        try_cast!(UInt as u64: u8, u16, u32, u64, usize);
        try_cast!(Real as f64: f32, f64);
        v.downcast_ref::<bool>().map(|b| Number::Bool(*b))
    }

    /// Safe cast to `T`: exact type first, then range-checked numeric
    /// conversion, then textual rendering when `T` is `String`.
    pub fn cast<T: Clone + 'static>(&self) -> Result<T> {
        if self.is_empty() {
            return Err(Error::runtime("Any::cast() on an empty value"));
        }
        if let Some(value) = self.downcast_ref::<T>() {
            return Ok(value.clone());
        }
        if let Some(number) = self.as_number() {
            if let Some(value) = number_into::<T>(number) {
                return Ok(value);
            }
        }
        Err(Error::logic(format!(
            "cannot cast [{}] into [{}]",
            self.type_name(),
            std::any::type_name::<T>()
        )))
    }

    /// Like [`Any::cast`], but string values are parsed with
    /// [`ConvertFromString`] when the stored type differs.
    pub fn cast_or_parse<T>(&self) -> Result<T>
    where
        T: ConvertFromString + Clone + 'static,
    {
        if TypeId::of::<T>() != TypeId::of::<String>() {
            if let Some(text) = self.downcast_ref::<String>() {
                return T::convert_from_string(text);
            }
        }
        self.cast()
    }

    /// Range-checked numeric conversion into the runtime type described by
    /// `info`. `None` when either side is not numeric or the value does not fit.
    pub fn cast_numeric_to(&self, info: &TypeInfo) -> Option<Any> {
        let number = self.as_number()?;
        let target = info.type_id()?;
        macro_rules! numeric {
            ($($t:ty),*) => {
                $(
                    if target == TypeId::of::<$t>() {
                        return number_into::<$t>(number).map(Any::new);
                    }
                )*
            };
        }
        numeric!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64, bool);
        None
    }
}

fn number_into<T: 'static>(number: Number) -> Option<T> {
    let target = TypeId::of::<T>();
    macro_rules! integral {
        ($($t:ty),*) => {
            $(
                if target == TypeId::of::<$t>() {
                    let v = <$t>::try_from(number.to_i128()?).ok()?;
                    return boxed_as::<T, $t>(v);
                }
            )*
        };
    }
    integral!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);
    if target == TypeId::of::<f64>() {
        return boxed_as::<T, f64>(number.to_f64()?);
    }
    if target == TypeId::of::<f32>() {
        return boxed_as::<T, f32>(number.to_f64()? as f32);
    }
    if target == TypeId::of::<bool>() {
        return boxed_as::<T, bool>(number.to_bool()?);
    }
    if target == TypeId::of::<String>() {
        let text = match number {
            Number::Int(v) => v.to_string(),
            Number::UInt(v) => v.to_string(),
            Number::Real(v) => v.to_string(),
            Number::Bool(v) => v.to_string(),
        };
        return boxed_as::<T, String>(text);
    }
    None
}

impl Debug for Any {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match (self.as_number(), self.downcast_ref::<String>()) {
            (Some(number), _) => write!(f, "Any({:?})", number),
            (None, Some(text)) => write!(f, "Any({:?})", text),
            _ => write!(f, "Any<{}>", self.type_name()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn numeric_casts_are_range_checked() {
        let v = Any::new(300i32);
        assert_eq!(v.cast::<i64>().unwrap(), 300);
        assert_eq!(v.cast::<f64>().unwrap(), 300.0);
        assert!(v.cast::<u8>().is_err());
        assert!(Any::new(-1i64).cast::<u32>().is_err());
        assert_eq!(Any::new(2.0f64).cast::<i32>().unwrap(), 2);
        assert!(Any::new(2.5f64).cast::<i32>().is_err());
    }

    #[test]
    fn bool_and_int_interconvert() {
        assert!(Any::new(1u8).cast::<bool>().unwrap());
        assert!(!Any::new(false).cast::<bool>().unwrap());
        assert!(Any::new(7i32).cast::<bool>().is_err());
        assert_eq!(Any::new(true).cast::<i32>().unwrap(), 1);
    }

    #[test]
    fn strings_are_parsed_on_demand() {
        let v = Any::new("42".to_string());
        assert!(v.is_string());
        assert!(v.cast::<i32>().is_err());
        assert_eq!(v.cast_or_parse::<i32>().unwrap(), 42);
        assert_eq!(Any::new(42u16).cast::<String>().unwrap(), "42");
    }

    #[test]
    fn nested_any_is_flattened() {
        let inner = Any::new(5u32);
        let outer = Any::new(inner);
        assert!(outer.is::<u32>());
    }

    #[test]
    fn empty_cast_is_an_error() {
        assert!(Any::empty().is_empty());
        assert!(matches!(Any::empty().cast::<i32>(), Err(Error::Runtime(_))));
    }

    #[test]
    fn opaque_types_downcast() {
        #[derive(Clone, Debug, PartialEq)]
        struct Pose(i32, i32);
        let v = Any::new(Pose(1, 2));
        assert_eq!(v.cast::<Pose>().unwrap(), Pose(1, 2));
        assert!(v.cast::<i32>().is_err());
        assert!(TypeInfo::opaque::<Pose>().matches(&v));
        assert!(!TypeInfo::opaque::<Pose>().matches(&Any::new(1i32)));
    }
}
