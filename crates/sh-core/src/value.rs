//! Item types and the cast rules applied on every update

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::Value;

/// A value could not be cast to an item's declared type
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("cannot cast {value} to {item_type}")]
pub struct CastError {
    pub item_type: ItemType,
    pub value: String,
}

impl CastError {
    fn new(item_type: ItemType, value: &Value) -> Self {
        let mut value = value.to_string();
        if value.len() > 64 {
            value.truncate(64);
            value.push_str("...");
        }
        Self { item_type, value }
    }
}

/// Error for unknown item type names
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown item type '{0}' (expected one of bool, num, str, list, dict, foo, scene)")]
pub struct ItemTypeError(pub String);

/// The declared type of an item
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Bool,
    Num,
    Str,
    List,
    Dict,
    /// Escape hatch: accepts anything unchanged
    #[default]
    Foo,
    Scene,
}

impl ItemType {
    /// Get the config name of this type
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Bool => "bool",
            ItemType::Num => "num",
            ItemType::Str => "str",
            ItemType::List => "list",
            ItemType::Dict => "dict",
            ItemType::Foo => "foo",
            ItemType::Scene => "scene",
        }
    }
}

impl FromStr for ItemType {
    type Err = ItemTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bool" => Ok(ItemType::Bool),
            "num" => Ok(ItemType::Num),
            "str" => Ok(ItemType::Str),
            "list" => Ok(ItemType::List),
            "dict" => Ok(ItemType::Dict),
            "foo" => Ok(ItemType::Foo),
            "scene" => Ok(ItemType::Scene),
            other => Err(ItemTypeError(other.to_string())),
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cast a value to the given item type
///
/// - `bool`: booleans, numeric 0/1, or case-insensitive
///   `0/false/no/off` and `1/true/yes/on`
/// - `num`: floats pass through; otherwise integer parse, then float parse
/// - `str`, `list`, `dict`: exact type match only
/// - `scene`: integer parse
/// - `foo`: anything, unchanged
pub fn cast(item_type: ItemType, value: &Value) -> Result<Value, CastError> {
    let cast = match item_type {
        ItemType::Bool => cast_bool(value),
        ItemType::Num => cast_num(value),
        ItemType::Str => value.is_string().then(|| value.clone()),
        ItemType::List => value.is_array().then(|| value.clone()),
        ItemType::Dict => value.is_object().then(|| value.clone()),
        ItemType::Scene => cast_scene(value),
        ItemType::Foo => Some(value.clone()),
    };
    cast.ok_or_else(|| CastError::new(item_type, value))
}

/// The value an item of this type holds when nothing is configured
pub fn type_default(item_type: ItemType) -> Value {
    match item_type {
        ItemType::Bool => Value::Bool(false),
        ItemType::Num | ItemType::Scene => Value::from(0),
        ItemType::Str => Value::String(String::new()),
        ItemType::List => Value::Array(Vec::new()),
        ItemType::Dict => Value::Object(serde_json::Map::new()),
        ItemType::Foo => Value::Null,
    }
}

fn cast_bool(value: &Value) -> Option<Value> {
    match value {
        Value::Bool(b) => Some(Value::Bool(*b)),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f == 0.0 => Some(Value::Bool(false)),
            Some(f) if f == 1.0 => Some(Value::Bool(true)),
            _ => None,
        },
        Value::String(s) => match s.to_lowercase().as_str() {
            "0" | "false" | "no" | "off" => Some(Value::Bool(false)),
            "1" | "true" | "yes" | "on" => Some(Value::Bool(true)),
            _ => None,
        },
        _ => None,
    }
}

fn cast_num(value: &Value) -> Option<Value> {
    match value {
        Value::Number(_) => Some(value.clone()),
        Value::Bool(b) => Some(Value::from(i64::from(*b))),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(i) = s.parse::<i64>() {
                return Some(Value::from(i));
            }
            s.parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
        }
        _ => None,
    }
}

fn cast_scene(value: &Value) -> Option<Value> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Value::from(i))
            } else {
                n.as_f64()
                    .filter(|f| f.is_finite())
                    .map(|f| Value::from(f.trunc() as i64))
            }
        }
        Value::Bool(b) => Some(Value::from(i64::from(*b))),
        Value::String(s) => s.trim().parse::<i64>().ok().map(Value::from),
        _ => None,
    }
}

/// Compare two values the way item change detection does
///
/// Numbers compare by numeric value regardless of integer/float
/// representation, and booleans compare equal to 0/1.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        (Value::Bool(x), Value::Number(n)) | (Value::Number(n), Value::Bool(x)) => {
            n.as_f64() == Some(if *x { 1.0 } else { 0.0 })
        }
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_item_type() {
        assert_eq!("num".parse::<ItemType>().unwrap(), ItemType::Num);
        assert_eq!("scene".parse::<ItemType>().unwrap(), ItemType::Scene);
        assert!("number".parse::<ItemType>().is_err());
        assert_eq!(ItemType::default(), ItemType::Foo);
    }

    #[test]
    fn test_cast_bool() {
        assert_eq!(cast(ItemType::Bool, &json!(true)).unwrap(), json!(true));
        assert_eq!(cast(ItemType::Bool, &json!(0)).unwrap(), json!(false));
        assert_eq!(cast(ItemType::Bool, &json!(1.0)).unwrap(), json!(true));
        assert_eq!(cast(ItemType::Bool, &json!("ON")).unwrap(), json!(true));
        assert_eq!(cast(ItemType::Bool, &json!("No")).unwrap(), json!(false));
        assert!(cast(ItemType::Bool, &json!("maybe")).is_err());
        assert!(cast(ItemType::Bool, &json!(2)).is_err());
        assert!(cast(ItemType::Bool, &json!([1])).is_err());
    }

    #[test]
    fn test_cast_num() {
        assert_eq!(cast(ItemType::Num, &json!(21.5)).unwrap(), json!(21.5));
        assert_eq!(cast(ItemType::Num, &json!(42)).unwrap(), json!(42));
        assert_eq!(cast(ItemType::Num, &json!("42")).unwrap(), json!(42));
        assert_eq!(cast(ItemType::Num, &json!("4.2")).unwrap(), json!(4.2));
        assert_eq!(cast(ItemType::Num, &json!(true)).unwrap(), json!(1));
        assert!(cast(ItemType::Num, &json!("abc")).is_err());
        assert!(cast(ItemType::Num, &json!(null)).is_err());
    }

    #[test]
    fn test_cast_exact_types() {
        assert_eq!(cast(ItemType::Str, &json!("x")).unwrap(), json!("x"));
        assert!(cast(ItemType::Str, &json!(42)).is_err());
        assert_eq!(cast(ItemType::List, &json!([1, 2])).unwrap(), json!([1, 2]));
        assert!(cast(ItemType::List, &json!("[1, 2]")).is_err());
        assert_eq!(cast(ItemType::Dict, &json!({"a": 1})).unwrap(), json!({"a": 1}));
        assert!(cast(ItemType::Dict, &json!([])).is_err());
    }

    #[test]
    fn test_cast_scene_and_foo() {
        assert_eq!(cast(ItemType::Scene, &json!("3")).unwrap(), json!(3));
        assert_eq!(cast(ItemType::Scene, &json!(3.7)).unwrap(), json!(3));
        assert!(cast(ItemType::Scene, &json!("3.5")).is_err());
        assert_eq!(cast(ItemType::Foo, &json!({"x": [1]})).unwrap(), json!({"x": [1]}));
    }

    #[test]
    fn test_cast_is_idempotent() {
        let samples = [
            (ItemType::Bool, json!("yes")),
            (ItemType::Bool, json!(0)),
            (ItemType::Num, json!("17")),
            (ItemType::Num, json!("1.25")),
            (ItemType::Num, json!(false)),
            (ItemType::Str, json!("hello")),
            (ItemType::List, json!([1, "a"])),
            (ItemType::Dict, json!({"k": "v"})),
            (ItemType::Scene, json!(4.9)),
            (ItemType::Foo, json!(null)),
        ];
        for (item_type, value) in samples {
            let once = cast(item_type, &value).unwrap();
            let twice = cast(item_type, &once).unwrap();
            assert_eq!(once, twice, "{item_type} not idempotent for {value}");
        }
    }

    #[test]
    fn test_type_defaults_satisfy_cast() {
        for item_type in [
            ItemType::Bool,
            ItemType::Num,
            ItemType::Str,
            ItemType::List,
            ItemType::Dict,
            ItemType::Foo,
            ItemType::Scene,
        ] {
            let default = type_default(item_type);
            assert_eq!(cast(item_type, &default).unwrap(), default);
        }
    }

    #[test]
    fn test_values_equal() {
        assert!(values_equal(&json!(42), &json!(42.0)));
        assert!(values_equal(&json!(true), &json!(1)));
        assert!(!values_equal(&json!(42), &json!(43)));
        assert!(!values_equal(&json!("42"), &json!(42)));
        assert!(values_equal(&json!([1, 2]), &json!([1, 2])));
    }
}
