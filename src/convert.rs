//! Conversion from the textual form used in port remappings and defaults.

use crate::{
    any::Any,
    error::{Error, Result},
    NodeStatus,
};
use nom::{
    bytes::complete::take_till, character::complete::char, combinator::all_consuming,
    multi::separated_list0, IResult,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// A queue stored in the blackboard and consumed in place by
/// [`crate::DecoratorNode::loop_queue`].
pub type SharedQueue<T> = Arc<Mutex<VecDeque<T>>>;

/// Types that can be built from the literal text of an input port.
pub trait ConvertFromString: Sized {
    fn convert_from_string(text: &str) -> Result<Self>;
}

fn parse_error<T>(text: &str) -> Error {
    Error::runtime(format!(
        "cannot convert \"{}\" into [{}]",
        text,
        std::any::type_name::<T>()
    ))
}

macro_rules! impl_convert_via_parse {
    ($($t:ty),*) => {
        $(
            impl ConvertFromString for $t {
                fn convert_from_string(text: &str) -> Result<Self> {
                    text.trim().parse::<$t>().map_err(|_| parse_error::<$t>(text))
                }
            }
        )*
    };
}

impl_convert_via_parse!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64);

impl ConvertFromString for String {
    fn convert_from_string(text: &str) -> Result<Self> {
        Ok(text.to_owned())
    }
}

impl ConvertFromString for bool {
    fn convert_from_string(text: &str) -> Result<Self> {
        match text.trim() {
            "1" | "true" | "TRUE" | "True" => Ok(true),
            "0" | "false" | "FALSE" | "False" => Ok(false),
            _ => Err(parse_error::<bool>(text)),
        }
    }
}

impl ConvertFromString for NodeStatus {
    fn convert_from_string(text: &str) -> Result<Self> {
        match text.trim() {
            "IDLE" => Ok(NodeStatus::Idle),
            "RUNNING" => Ok(NodeStatus::Running),
            "SUCCESS" => Ok(NodeStatus::Success),
            "FAILURE" => Ok(NodeStatus::Failure),
            "SKIPPED" => Ok(NodeStatus::Skipped),
            _ => Err(parse_error::<NodeStatus>(text)),
        }
    }
}

/// A weakly typed port keeps whatever text it was given.
impl ConvertFromString for Any {
    fn convert_from_string(text: &str) -> Result<Self> {
        Ok(Any::new(text.to_owned()))
    }
}

fn list_items(input: &str) -> IResult<&str, Vec<&str>> {
    all_consuming(separated_list0(char(';'), take_till(|c| c == ';')))(input)
}

/// Splits a `;`-separated list. An empty string is an empty list.
pub fn split_list(text: &str) -> Result<Vec<&str>> {
    if text.trim().is_empty() {
        return Ok(vec![]);
    }
    list_items(text)
        .map(|(_, items)| items)
        .map_err(|e| Error::runtime(format!("malformed list \"{}\": {:?}", text, e)))
}

impl<T: ConvertFromString> ConvertFromString for Vec<T> {
    fn convert_from_string(text: &str) -> Result<Self> {
        split_list(text)?
            .into_iter()
            .map(T::convert_from_string)
            .collect()
    }
}

impl<T: ConvertFromString> ConvertFromString for SharedQueue<T> {
    fn convert_from_string(text: &str) -> Result<Self> {
        let items = Vec::<T>::convert_from_string(text)?;
        Ok(Arc::new(Mutex::new(items.into())))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn booleans() {
        for t in ["1", "true", "TRUE", "True"] {
            assert!(bool::convert_from_string(t).unwrap());
        }
        for f in ["0", "false", "FALSE", "False"] {
            assert!(!bool::convert_from_string(f).unwrap());
        }
        assert!(bool::convert_from_string("yes").is_err());
    }

    #[test]
    fn numbers() {
        assert_eq!(i32::convert_from_string("-12").unwrap(), -12);
        assert_eq!(f64::convert_from_string("1.5").unwrap(), 1.5);
        assert!(u8::convert_from_string("256").is_err());
        assert!(i32::convert_from_string("abc").is_err());
    }

    #[test]
    fn lists() {
        assert_eq!(
            Vec::<i32>::convert_from_string("1;2;3").unwrap(),
            vec![1, 2, 3]
        );
        assert_eq!(
            Vec::<String>::convert_from_string("a;b").unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
        assert_eq!(
            Vec::<f64>::convert_from_string("0.5;2").unwrap(),
            vec![0.5, 2.0]
        );
        assert!(Vec::<i32>::convert_from_string("").unwrap().is_empty());
        assert!(Vec::<i32>::convert_from_string("1;;2").is_err());

        let queue = SharedQueue::<i32>::convert_from_string("4;5").unwrap();
        assert_eq!(*queue.lock().unwrap(), VecDeque::from([4, 5]));
    }

    #[test]
    fn statuses() {
        assert_eq!(
            NodeStatus::convert_from_string("SUCCESS").unwrap(),
            NodeStatus::Success
        );
        assert!(NodeStatus::convert_from_string("success").is_err());
    }
}
