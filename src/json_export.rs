//! Conversion of blackboard values to and from JSON.
//!
//! Primitives are handled out of the box. Other types have to be registered
//! once with [`JsonExporter::register`]; their JSON form carries a `__type`
//! field naming the registered type.

use crate::{
    any::{Any, Number, TypeInfo},
    blackboard::Blackboard,
    error::{Error, Result},
};
use once_cell::sync::Lazy;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard};
use tracing::debug;

const TYPE_FIELD: &str = "__type";
const VALUE_FIELD: &str = "value";

type ToJson = Box<dyn Fn(&Any) -> Option<Value> + Send + Sync>;
type FromJson = Box<dyn Fn(Value) -> Option<Any> + Send + Sync>;

struct Converter {
    from_json: FromJson,
    type_info: TypeInfo,
}

#[derive(Default)]
pub struct JsonExporter {
    to_json: HashMap<TypeId, ToJson>,
    from_json: HashMap<String, Converter>,
}

static EXPORTER: Lazy<RwLock<JsonExporter>> = Lazy::new(Default::default);

impl JsonExporter {
    /// The process-wide registry.
    pub fn get() -> RwLockReadGuard<'static, JsonExporter> {
        EXPORTER.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Makes `T` exportable under `type_name`. Registering a name again
    /// replaces the previous converters.
    pub fn register<T>(type_name: &str)
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let name = type_name.to_owned();
        let to_json: ToJson = Box::new(move |value| {
            let json = serde_json::to_value(value.downcast_ref::<T>()?).ok()?;
            let mut object = match json {
                Value::Object(object) => object,
                other => {
                    let mut object = Map::new();
                    object.insert(VALUE_FIELD.to_owned(), other);
                    object
                }
            };
            object.insert(TYPE_FIELD.to_owned(), Value::String(name.clone()));
            Some(Value::Object(object))
        });
        let from_json: FromJson = Box::new(|json| {
            if let Ok(value) = serde_json::from_value::<T>(json.clone()) {
                return Some(Any::new(value));
            }
            let inner = json.get(VALUE_FIELD)?.clone();
            serde_json::from_value::<T>(inner).ok().map(Any::new)
        });

        let mut exporter = EXPORTER.write().unwrap_or_else(|e| e.into_inner());
        exporter.to_json.insert(TypeId::of::<T>(), to_json);
        exporter.from_json.insert(
            type_name.to_owned(),
            Converter {
                from_json,
                type_info: TypeInfo::opaque::<T>().with_converter(Arc::new(parse_json_text::<T>)),
            },
        );
        debug!(type_name, "registered JSON converter");
    }

    pub fn to_json(&self, value: &Any) -> Option<Value> {
        if let Some(text) = value.downcast_ref::<String>() {
            return Some(Value::String(text.clone()));
        }
        if let Some(number) = value.as_number() {
            return Some(match number {
                Number::Int(v) => Value::from(v),
                Number::UInt(v) => Value::from(v),
                Number::Real(v) => Value::from(v),
                Number::Bool(v) => Value::Bool(v),
            });
        }
        let convert = self.to_json.get(&value.type_id()?)?;
        convert(value)
    }

    /// The value and the type its blackboard entry should have.
    pub fn from_json(&self, json: &Value) -> Option<(Any, TypeInfo)> {
        match json {
            Value::String(text) => Some((Any::new(text.clone()), TypeInfo::of::<String>())),
            Value::Bool(b) => Some((Any::new(*b), TypeInfo::of::<bool>())),
            Value::Number(n) => {
                if let Some(v) = n.as_i64() {
                    Some((Any::new(v), TypeInfo::of::<i64>()))
                } else if let Some(v) = n.as_u64() {
                    Some((Any::new(v), TypeInfo::of::<u64>()))
                } else {
                    n.as_f64().map(|v| (Any::new(v), TypeInfo::of::<f64>()))
                }
            }
            Value::Object(object) => {
                let type_name = object.get(TYPE_FIELD)?.as_str()?;
                let converter = self.from_json.get(type_name)?;
                let mut object = object.clone();
                object.remove(TYPE_FIELD);
                let value = (converter.from_json)(Value::Object(object))?;
                Some((value, converter.type_info.clone()))
            }
            _ => None,
        }
    }
}

/// Lets entries of a registered type be written from their JSON text.
fn parse_json_text<T>(text: &str) -> Result<Any>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    serde_json::from_str::<T>(text)
        .map(Any::new)
        .map_err(|e| Error::runtime(format!("can't parse [{}] as JSON: {}", text, e)))
}

/// Every entry of `bb` (local scope only) that can be converted, by key.
pub fn export_blackboard_to_json(bb: &Blackboard) -> Value {
    let exporter = JsonExporter::get();
    let mut out = Map::new();
    let mut keys = bb.keys();
    keys.sort();
    for key in keys {
        let Some(value) = bb.get_any(&key) else {
            continue;
        };
        match exporter.to_json(&value) {
            Some(json) => {
                out.insert(key, json);
            }
            None => debug!(key = %key, type_name = value.type_name(), "entry not exportable"),
        }
    }
    Value::Object(out)
}

/// Writes every member of the `json` object to `bb`, creating entries with
/// the type implied by the JSON value where they don't exist yet.
pub fn import_blackboard_from_json(json: &Value, bb: &Blackboard) -> Result<()> {
    let object = json
        .as_object()
        .ok_or_else(|| Error::runtime("blackboard JSON must be an object"))?;
    let exporter = JsonExporter::get();
    for (key, value) in object {
        let (value, type_info) = exporter.from_json(value).ok_or_else(|| {
            Error::runtime(format!("can't convert JSON value of entry [{}]", key))
        })?;
        if bb.get_entry(key).is_none() {
            bb.create_entry(key, type_info)?;
        }
        bb.set(key, value)?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Pose {
        x: f64,
        y: f64,
    }

    #[test]
    fn primitives_round_trip() {
        let src = Blackboard::new();
        src.set("name", "robot".to_string()).unwrap();
        src.set("count", 3i32).unwrap();
        src.set("big", u64::MAX).unwrap();
        src.set("ratio", 0.25f64).unwrap();
        src.set("flag", true).unwrap();

        let json = export_blackboard_to_json(&src);
        assert_eq!(json["name"], "robot");
        assert_eq!(json["count"], 3);

        let dst = Blackboard::new();
        import_blackboard_from_json(&json, &dst).unwrap();
        assert_eq!(dst.get::<String>("name").unwrap(), "robot");
        assert_eq!(dst.get::<i32>("count").unwrap(), 3);
        assert_eq!(dst.get::<u64>("big").unwrap(), u64::MAX);
        assert_eq!(dst.get::<f64>("ratio").unwrap(), 0.25);
        assert!(dst.get::<bool>("flag").unwrap());
    }

    #[test]
    fn registered_type_carries_its_name() {
        JsonExporter::register::<Pose>("Pose");
        let bb = Blackboard::new();
        bb.set("pose", Pose { x: 1.0, y: -2.0 }).unwrap();

        let json = export_blackboard_to_json(&bb);
        assert_eq!(json["pose"][TYPE_FIELD], "Pose");

        let fresh = Blackboard::new();
        import_blackboard_from_json(&json, &fresh).unwrap();
        assert_eq!(fresh.get::<Pose>("pose").unwrap(), Pose { x: 1.0, y: -2.0 });

        // The imported entry is typed and accepts JSON text
        fresh.set("pose", r#"{"x": 3.0, "y": 4.0}"#.to_string()).unwrap();
        assert_eq!(fresh.get::<Pose>("pose").unwrap(), Pose { x: 3.0, y: 4.0 });
        assert!(fresh.set("pose", "not json".to_string()).is_err());
    }

    #[test]
    fn unknown_types_are_skipped_on_export() {
        struct Opaque;
        let bb = Blackboard::new();
        bb.set("opaque", Opaque).unwrap();
        bb.set("n", 1u8).unwrap();
        let json = export_blackboard_to_json(&bb);
        assert!(json.get("opaque").is_none());
        assert_eq!(json["n"], 1);
    }

    #[test]
    fn import_rejects_non_objects() {
        let bb = Blackboard::new();
        assert!(import_blackboard_from_json(&Value::from(3), &bb).is_err());
        let unknown = serde_json::json!({ "x": { "__type": "NoSuchType" } });
        assert!(import_blackboard_from_json(&unknown, &bb).is_err());
    }
}
