//! Contract with an external script evaluator.
//!
//! This crate never parses scripts itself. A [`ScriptParser`] turns text into
//! a [`ScriptFunction`] which is later evaluated against a node's blackboard.

use crate::{
    any::Any,
    blackboard::Blackboard,
    error::{Error, Result},
};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

pub type ScriptingEnums = HashMap<String, i32>;

pub struct Environment<'a> {
    pub blackboard: &'a Blackboard,
    pub enums: Option<&'a ScriptingEnums>,
}

pub type ScriptFunction = Arc<dyn Fn(&Environment) -> Result<Any> + Send + Sync>;

pub fn script_fn<F>(f: F) -> ScriptFunction
where
    F: Fn(&Environment) -> Result<Any> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub trait ScriptParser: Send + Sync {
    /// Validates `script` and returns its evaluator, or a message explaining
    /// why it was rejected.
    fn parse(&self, script: &str) -> std::result::Result<ScriptFunction, String>;
}

impl<F> ScriptParser for F
where
    F: Fn(&str) -> std::result::Result<ScriptFunction, String> + Send + Sync,
{
    fn parse(&self, script: &str) -> std::result::Result<ScriptFunction, String> {
        self(script)
    }
}

pub(crate) fn parse_script(parser: Option<&dyn ScriptParser>, text: &str) -> Result<ScriptFunction> {
    let parser = parser.ok_or_else(|| {
        Error::logic(format!("no script parser installed to evaluate \"{}\"", text))
    })?;
    parser
        .parse(text)
        .map_err(|msg| Error::runtime(format!("invalid script \"{}\": {}", text, msg)))
}

/// Interprets the result of a script as a condition.
pub fn is_truthy(value: &Any) -> Result<bool> {
    if let Some(text) = value.downcast_ref::<String>() {
        return match text.as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(Error::runtime(format!("script result \"{}\" is not a boolean", text))),
        };
    }
    if let Ok(b) = value.cast::<bool>() {
        return Ok(b);
    }
    value
        .cast::<f64>()
        .map(|v| v != 0.0)
        .map_err(|_| Error::runtime(format!("script result [{}] is not a boolean", value.type_name())))
}

/// Scripts evaluated before ticking a node, in this order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PreCond {
    FailureIf,
    SuccessIf,
    SkipIf,
    WhileTrue,
}

impl PreCond {
    pub fn attribute_name(self) -> &'static str {
        match self {
            PreCond::FailureIf => "_failureIf",
            PreCond::SuccessIf => "_successIf",
            PreCond::SkipIf => "_skipIf",
            PreCond::WhileTrue => "_while",
        }
    }
}

/// Scripts evaluated after a node completes or is halted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PostCond {
    OnHalted,
    OnFailure,
    OnSuccess,
    Always,
}

impl PostCond {
    pub fn attribute_name(self) -> &'static str {
        match self {
            PostCond::OnHalted => "_onHalted",
            PostCond::OnFailure => "_onFailure",
            PostCond::OnSuccess => "_onSuccess",
            PostCond::Always => "_post",
        }
    }
}

impl Display for PreCond {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        f.write_str(self.attribute_name())
    }
}

impl Display for PostCond {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        f.write_str(self.attribute_name())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn truthiness() {
        assert!(is_truthy(&Any::new(true)).unwrap());
        assert!(!is_truthy(&Any::new(0i32)).unwrap());
        assert!(is_truthy(&Any::new(2.5f64)).unwrap());
        assert!(is_truthy(&Any::new("true".to_string())).unwrap());
        assert!(is_truthy(&Any::new("maybe".to_string())).is_err());
    }

    #[test]
    fn closures_are_parsers() {
        let parser = |text: &str| -> std::result::Result<ScriptFunction, String> {
            if text == "ok" {
                Ok(script_fn(|_| Ok(Any::new(true))))
            } else {
                Err("unknown".to_owned())
            }
        };
        let bb = Blackboard::new();
        let env = Environment {
            blackboard: &bb,
            enums: None,
        };
        let f = parse_script(Some(&parser), "ok").unwrap();
        assert!(is_truthy(&f(&env).unwrap()).unwrap());
        assert!(matches!(parse_script(Some(&parser), "bad"), Err(Error::Runtime(_))));
        assert!(matches!(parse_script(None, "ok"), Err(Error::Logic(_))));
    }
}
