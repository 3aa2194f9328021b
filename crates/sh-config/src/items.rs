//! Item tree definitions from `items/*.yaml`
//!
//! Within an item mapping, a mapping value declares a child item and any
//! other value is an attribute of the item. The key `value` is always an
//! attribute, so dict-typed items can carry a mapping as initial value.

use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use serde_yaml::{Mapping, Value};
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::loader::{yaml_files, YamlLoader};

/// Directory inside the config dir holding item files
pub const ITEMS_DIR: &str = "items";

/// One node of the configured item tree
#[derive(Debug, Clone, PartialEq)]
pub struct ItemDefinition {
    /// Full dotted path, e.g. `house.living.temp`
    pub path: String,
    /// Attributes in config order
    pub attributes: IndexMap<String, JsonValue>,
    /// Child items in config order
    pub children: Vec<ItemDefinition>,
}

impl ItemDefinition {
    /// Last path segment
    pub fn key(&self) -> &str {
        self.path.rsplit('.').next().unwrap_or(&self.path)
    }

    pub fn attribute(&self, name: &str) -> Option<&JsonValue> {
        self.attributes.get(name)
    }

    /// Build a definition from the mapping found at `path`
    pub fn from_mapping(path: &str, mapping: &Mapping) -> ConfigResult<Self> {
        let mut attributes = IndexMap::new();
        let mut children = Vec::new();

        for (k, v) in mapping {
            let key = key_string(k).ok_or_else(|| ConfigError::InvalidItem {
                path: path.to_string(),
                reason: format!("unsupported key {k:?}"),
            })?;
            match v {
                Value::Mapping(child) if key != "value" => {
                    if key.contains('.') {
                        return Err(ConfigError::InvalidItem {
                            path: format!("{path}.{key}"),
                            reason: "item names must not contain '.'".to_string(),
                        });
                    }
                    let child_path = format!("{path}.{key}");
                    children.push(Self::from_mapping(&child_path, child)?);
                }
                _ => {
                    attributes.insert(key, yaml_to_json(v));
                }
            }
        }

        Ok(Self {
            path: path.to_string(),
            attributes,
            children,
        })
    }

    /// Visit this node and its descendants in pre-order
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a ItemDefinition)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }
}

/// Parse a top-level item document into root definitions
pub fn parse_items(yaml: &Value) -> ConfigResult<Vec<ItemDefinition>> {
    let Some(mapping) = yaml.as_mapping() else {
        if yaml.is_null() {
            return Ok(Vec::new());
        }
        return Err(ConfigError::InvalidValue {
            key: ITEMS_DIR.to_string(),
            reason: "item file must be a mapping".to_string(),
        });
    };

    let mut roots = Vec::new();
    for (k, v) in mapping {
        let key = key_string(k).ok_or_else(|| ConfigError::InvalidValue {
            key: ITEMS_DIR.to_string(),
            reason: format!("unsupported item key {k:?}"),
        })?;
        match v {
            Value::Mapping(m) => roots.push(ItemDefinition::from_mapping(&key, m)?),
            Value::Null => roots.push(ItemDefinition::from_mapping(&key, &Mapping::new())?),
            other => warn!(item = %key, value = ?other, "Ignoring top-level attribute outside any item"),
        }
    }
    Ok(roots)
}

/// Load and merge every item file of `<config_dir>/items`
///
/// Files are read in name order; a root item that appears in several files
/// is merged recursively, later files winning on attribute conflicts.
pub fn load_items(config_dir: impl AsRef<Path>) -> ConfigResult<Vec<ItemDefinition>> {
    let config_dir = config_dir.as_ref();
    let dir = config_dir.join(ITEMS_DIR);
    if !dir.is_dir() {
        debug!(dir = %dir.display(), "No items directory");
        return Ok(Vec::new());
    }

    let mut loader = YamlLoader::new(config_dir)?;
    let mut merged = Mapping::new();
    for file in yaml_files(&dir)? {
        if let Value::Mapping(map) = loader.load_file(&file)? {
            merge_mapping(&mut merged, map);
        }
    }
    let roots = parse_items(&Value::Mapping(merged))?;
    debug!(count = roots.len(), "Loaded item tree roots");
    Ok(roots)
}

fn merge_mapping(into: &mut Mapping, from: Mapping) {
    for (k, v) in from {
        match (into.get_mut(&k), v) {
            (Some(Value::Mapping(existing)), Value::Mapping(incoming)) => {
                merge_mapping(existing, incoming)
            }
            (_, v) => {
                into.insert(k, v);
            }
        }
    }
}

fn key_string(key: &Value) -> Option<String> {
    match key {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Convert a YAML value to the engine's JSON value
///
/// Non-string keys are stringified; unknown tags keep their inner value.
pub fn yaml_to_json(value: &Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                JsonValue::from(i)
            } else if let Some(u) = n.as_u64() {
                JsonValue::from(u)
            } else {
                n.as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map(JsonValue::Number)
                    .unwrap_or(JsonValue::Null)
            }
        }
        Value::String(s) => JsonValue::String(s.clone()),
        Value::Sequence(seq) => JsonValue::Array(seq.iter().map(yaml_to_json).collect()),
        Value::Mapping(map) => JsonValue::Object(
            map.iter()
                .filter_map(|(k, v)| Some((key_string(k)?, yaml_to_json(v))))
                .collect(),
        ),
        Value::Tagged(tagged) => yaml_to_json(&tagged.value),
    }
}

/// Read a string-or-list attribute as a list of strings
///
/// Scalars are stringified, `null` is empty.
pub fn string_list(value: &JsonValue) -> Vec<String> {
    match value {
        JsonValue::Null => Vec::new(),
        JsonValue::String(s) => vec![s.clone()],
        JsonValue::Array(items) => items.iter().flat_map(string_list).collect(),
        other => vec![other.to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_children_and_attributes() {
        let yaml: Value = serde_yaml::from_str(
            r#"
living:
  name: Living room
  temp:
    type: num
    value: 21.5
    cache: true
  presets:
    type: dict
    value:
      day: 21
      night: 17
"#,
        )
        .unwrap();

        let roots = parse_items(&yaml).unwrap();
        assert_eq!(roots.len(), 1);
        let living = &roots[0];
        assert_eq!(living.path, "living");
        assert_eq!(living.attribute("name"), Some(&json!("Living room")));
        assert_eq!(living.children.len(), 2);

        let temp = &living.children[0];
        assert_eq!(temp.path, "living.temp");
        assert_eq!(temp.key(), "temp");
        assert_eq!(temp.attribute("value"), Some(&json!(21.5)));
        assert_eq!(temp.attribute("cache"), Some(&json!(true)));

        let presets = &living.children[1];
        assert!(presets.children.is_empty());
        assert_eq!(presets.attribute("value"), Some(&json!({"day": 21, "night": 17})));
    }

    #[test]
    fn test_walk_is_preorder() {
        let yaml: Value = serde_yaml::from_str("a:\n  b:\n    c: {}\n  d: {}\ne: {}\n").unwrap();
        let roots = parse_items(&yaml).unwrap();
        let mut paths = Vec::new();
        for root in &roots {
            root.walk(&mut |def| paths.push(def.path.clone()));
        }
        assert_eq!(paths, vec!["a", "a.b", "a.b.c", "a.d", "e"]);
    }

    #[test]
    fn test_load_items_merges_files() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "items/10_base.yaml", "house:\n  light:\n    type: bool\n");
        write_file(
            dir.path(),
            "items/20_extra.yaml",
            "house:\n  light:\n    cache: true\n  temp:\n    type: num\n",
        );

        let roots = load_items(dir.path()).unwrap();
        assert_eq!(roots.len(), 1);
        let house = &roots[0];
        assert_eq!(house.children.len(), 2);
        let light = &house.children[0];
        assert_eq!(light.attribute("type"), Some(&json!("bool")));
        assert_eq!(light.attribute("cache"), Some(&json!(true)));
    }

    #[test]
    fn test_missing_items_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(load_items(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_string_list() {
        assert_eq!(string_list(&json!("0 * * *")), vec!["0 * * *"]);
        assert_eq!(string_list(&json!(["a", "b"])), vec!["a", "b"]);
        assert_eq!(string_list(&json!(60)), vec!["60"]);
        assert!(string_list(&JsonValue::Null).is_empty());
    }
}
