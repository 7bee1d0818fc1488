use crate::{
    any::{Any, TypeInfo},
    blackboard::{Blackboard, StampedValue, Timestamp},
    convert::ConvertFromString,
    error::{Error, Result},
    script::{PostCond, PreCond, ScriptingEnums},
    Symbol,
};
use nom::{
    bytes::complete::take_till1,
    character::complete::{char, space0},
    combinator::all_consuming,
    sequence::delimited,
    IResult,
};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum PortDirection {
    Input,
    Output,
    InOut,
}

#[derive(Debug, Clone)]
pub struct PortSpec {
    pub direction: PortDirection,
    pub name: Symbol,
    pub type_info: TypeInfo,
    /// Textual default used when the port is not remapped.
    pub default_value: Option<String>,
    pub description: String,
}

impl PortSpec {
    fn new(direction: PortDirection, name: Symbol, type_info: TypeInfo) -> Self {
        Self {
            direction,
            name,
            type_info,
            default_value: None,
            description: String::new(),
        }
    }

    pub fn input<T: ConvertFromString + Send + Sync + 'static>(name: impl Into<Symbol>) -> Self {
        Self::new(PortDirection::Input, name.into(), TypeInfo::of::<T>())
    }

    pub fn output<T: ConvertFromString + Send + Sync + 'static>(name: impl Into<Symbol>) -> Self {
        Self::new(PortDirection::Output, name.into(), TypeInfo::of::<T>())
    }

    pub fn inout<T: ConvertFromString + Send + Sync + 'static>(name: impl Into<Symbol>) -> Self {
        Self::new(PortDirection::InOut, name.into(), TypeInfo::of::<T>())
    }

    /// Port of any type. Blackboard entries behind it stay weakly typed.
    pub fn new_in(name: impl Into<Symbol>) -> Self {
        Self::new(PortDirection::Input, name.into(), TypeInfo::any())
    }

    pub fn new_out(name: impl Into<Symbol>) -> Self {
        Self::new(PortDirection::Output, name.into(), TypeInfo::any())
    }

    pub fn new_inout(name: impl Into<Symbol>) -> Self {
        Self::new(PortDirection::InOut, name.into(), TypeInfo::any())
    }

    pub fn with_type_info(mut self, type_info: TypeInfo) -> Self {
        self.type_info = type_info;
        self
    }

    pub fn with_default(mut self, value: impl ToString) -> Self {
        self.default_value = Some(value.to_string());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn is_input(&self) -> bool {
        matches!(self.direction, PortDirection::Input | PortDirection::InOut)
    }

    pub fn is_output(&self) -> bool {
        matches!(self.direction, PortDirection::Output | PortDirection::InOut)
    }
}

pub type PortsList = Vec<PortSpec>;

fn pointer(input: &str) -> IResult<&str, &str> {
    all_consuming(delimited(
        space0,
        delimited(char('{'), take_till1(|c| c == '}'), char('}')),
        space0,
    ))(input)
}

/// Returns the key inside `{key}`, if `text` is a blackboard pointer.
pub fn blackboard_pointer(text: &str) -> Option<&str> {
    pointer(text).ok().map(|(_, key)| key.trim())
}

/// What the remapped value of a port refers to.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PortValue<'a> {
    /// A blackboard key.
    Pointer(&'a str),
    Literal(&'a str),
}

impl<'a> PortValue<'a> {
    /// `{=}` and `=` mean "the blackboard key with the same name as the port".
    pub fn parse(port_name: &'a str, remapped: &'a str) -> Self {
        match remapped.trim() {
            "=" => PortValue::Pointer(port_name),
            _ => match blackboard_pointer(remapped) {
                Some("=") => PortValue::Pointer(port_name),
                Some(key) => PortValue::Pointer(key),
                None => PortValue::Literal(remapped),
            },
        }
    }
}

/// Everything a node instance needs beyond its behavior: where its ports
/// point, which blackboard it sees and which scripts wrap its tick.
#[derive(Clone, Default)]
pub struct NodeConfig {
    pub blackboard: Blackboard,
    pub enums: Option<Arc<ScriptingEnums>>,
    pub input_ports: HashMap<Symbol, String>,
    pub output_ports: HashMap<Symbol, String>,
    /// Declared ports of the node, by name.
    pub manifest: HashMap<Symbol, PortSpec>,
    pub uid: u16,
    pub path: String,
    pub pre_conditions: HashMap<PreCond, String>,
    pub post_conditions: HashMap<PostCond, String>,
}

impl std::fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("NodeConfig")
            .field("uid", &self.uid)
            .field("path", &self.path)
            .field("input_ports", &self.input_ports)
            .field("output_ports", &self.output_ports)
            .finish()
    }
}

impl NodeConfig {
    pub fn new(blackboard: Blackboard) -> Self {
        Self {
            blackboard,
            ..Self::default()
        }
    }

    fn declared(&self, name: Symbol, what: &str) -> Result<&PortSpec> {
        self.manifest.get(&name).ok_or_else(|| {
            Error::runtime(format!(
                "{}() of node '{}' failed because the manifest doesn't contain the key: [{}]",
                what, self.path, name
            ))
        })
    }

    /// The raw remapped text of an input port, falling back to its default.
    pub fn raw_input(&self, name: &str) -> Result<String> {
        let name = Symbol::from(name);
        if let Some(remapped) = self.input_ports.get(&name) {
            return Ok(remapped.clone());
        }
        self.declared(name, "get_input")?
            .default_value
            .clone()
            .ok_or_else(|| {
                Error::runtime(format!(
                    "get_input() of node '{}' failed: port [{}] is neither remapped nor has a default",
                    self.path, name
                ))
            })
    }

    pub fn get_input<T>(&self, name: &str) -> Result<T>
    where
        T: ConvertFromString + Clone + 'static,
    {
        Ok(self.get_input_stamped::<T>(name)?.value)
    }

    /// Like [`NodeConfig::get_input`]. Literals carry a default stamp.
    pub fn get_input_stamped<T>(&self, name: &str) -> Result<StampedValue<T>>
    where
        T: ConvertFromString + Clone + 'static,
    {
        let symbol = Symbol::from(name);
        if !self.manifest.is_empty() {
            self.declared(symbol, "get_input")?;
        }
        let remapped = self.raw_input(name)?;
        match PortValue::parse(symbol.as_str(), &remapped) {
            PortValue::Literal(text) => {
                let value = match self.enums.as_ref().and_then(|enums| enums.get(text)) {
                    Some(&number) if std::any::TypeId::of::<T>() != std::any::TypeId::of::<String>() => {
                        Any::new(number).cast::<T>()?
                    }
                    _ => T::convert_from_string(text)?,
                };
                Ok(StampedValue {
                    value,
                    stamp: Timestamp::default(),
                })
            }
            PortValue::Pointer(key) => {
                let entry = self.blackboard.get_entry(key).ok_or_else(|| {
                    Error::runtime(format!(
                        "get_input() of node '{}' failed: blackboard entry [{}] not found",
                        self.path, key
                    ))
                })?;
                let data = entry.lock();
                if data.value.is_empty() {
                    return Err(Error::runtime(format!(
                        "get_input() of node '{}' failed: blackboard entry [{}] hasn't been \
                         initialized, yet",
                        self.path, key
                    )));
                }
                Ok(StampedValue {
                    value: data.value.cast_or_parse::<T>()?,
                    stamp: Timestamp {
                        seq: data.sequence_id,
                        time: data.stamp,
                    },
                })
            }
        }
    }

    pub fn set_output<T: Send + Sync + 'static>(&self, name: &str, value: T) -> Result<()> {
        let symbol = Symbol::from(name);
        if !self.manifest.is_empty() {
            self.declared(symbol, "set_output")?;
        }
        let remapped = self.output_ports.get(&symbol).ok_or_else(|| {
            Error::runtime(format!(
                "set_output() of node '{}' failed: port [{}] is not remapped",
                self.path, name
            ))
        })?;
        match PortValue::parse(symbol.as_str(), remapped) {
            PortValue::Pointer(key) => self.blackboard.set(key, value),
            PortValue::Literal(text) => Err(Error::runtime(format!(
                "set_output() of node '{}' failed: port [{}] is remapped to the literal \"{}\" \
                 instead of a blackboard pointer",
                self.path, name, text
            ))),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn config_with(ports: Vec<PortSpec>) -> NodeConfig {
        let mut config = NodeConfig::new(Blackboard::new());
        config.path = "test_node".to_owned();
        config.manifest = ports.into_iter().map(|p| (p.name, p)).collect();
        config
    }

    #[test]
    fn pointer_syntax() {
        assert_eq!(blackboard_pointer("{goal}"), Some("goal"));
        assert_eq!(blackboard_pointer("  { goal } "), Some("goal"));
        assert_eq!(blackboard_pointer("{}"), None);
        assert_eq!(blackboard_pointer("goal"), None);
        assert_eq!(blackboard_pointer("{a}b"), None);
        assert_eq!(PortValue::parse("p", "{=}"), PortValue::Pointer("p"));
        assert_eq!(PortValue::parse("p", "="), PortValue::Pointer("p"));
        assert_eq!(PortValue::parse("p", "42"), PortValue::Literal("42"));
    }

    #[test]
    fn literal_and_default() {
        let mut config = config_with(vec![
            PortSpec::input::<i32>("value"),
            PortSpec::input::<f64>("ratio").with_default(0.5),
            PortSpec::input::<i32>("nothing"),
        ]);
        config.input_ports.insert("value".into(), "12".to_owned());
        assert_eq!(config.get_input::<i32>("value").unwrap(), 12);
        assert_eq!(config.get_input::<f64>("ratio").unwrap(), 0.5);
        assert!(matches!(
            config.get_input::<i32>("nothing"),
            Err(Error::Runtime(_))
        ));
        assert!(matches!(
            config.get_input::<i32>("undeclared"),
            Err(Error::Runtime(_))
        ));
    }

    #[test]
    fn pointer_ports_use_blackboard() {
        let mut config = config_with(vec![
            PortSpec::input::<i32>("in"),
            PortSpec::output::<i32>("out"),
        ]);
        config.input_ports.insert("in".into(), "{shared}".to_owned());
        config.output_ports.insert("out".into(), "{shared}".to_owned());

        assert!(config.get_input::<i32>("in").is_err());
        config.set_output("out", 77i32).unwrap();
        let stamped = config.get_input_stamped::<i32>("in").unwrap();
        assert_eq!(stamped.value, 77);
        assert_eq!(stamped.stamp.seq, 1);
    }

    #[test]
    fn string_entries_are_parsed_on_read() {
        let mut config = config_with(vec![PortSpec::input::<u32>("n")]);
        config.input_ports.insert("n".into(), "{n}".to_owned());
        config.blackboard.set("n", "31".to_string()).unwrap();
        assert_eq!(config.get_input::<u32>("n").unwrap(), 31);
    }

    #[test]
    fn enums_resolve_literals() {
        let mut config = config_with(vec![PortSpec::input::<i32>("color")]);
        config.enums = Some(Arc::new(
            [("RED".to_owned(), 1), ("BLUE".to_owned(), 3)]
                .into_iter()
                .collect(),
        ));
        config.input_ports.insert("color".into(), "BLUE".to_owned());
        assert_eq!(config.get_input::<i32>("color").unwrap(), 3);
    }

    #[test]
    fn output_to_literal_fails() {
        let mut config = config_with(vec![PortSpec::output::<i32>("out")]);
        config.output_ports.insert("out".into(), "5".to_owned());
        assert!(config.set_output("out", 1i32).is_err());
    }
}
