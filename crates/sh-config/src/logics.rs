//! Logic and plugin definitions from `logic.yaml` and `plugin.yaml`

use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use serde_yaml::Value;
use std::path::Path;
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::items::{string_list, yaml_to_json};
use crate::loader::YamlLoader;

pub const LOGIC_FILE: &str = "logic.yaml";
pub const PLUGIN_FILE: &str = "plugin.yaml";

/// Default run-queue priority of a logic
pub const DEFAULT_LOGIC_PRIO: i32 = 3;

/// One entry of `logic.yaml`
#[derive(Debug, Clone, PartialEq)]
pub struct LogicDefinition {
    pub name: String,
    /// Script file, relative to the logics directory
    pub filename: Option<String>,
    /// Program used to run the script
    pub interpreter: Option<String>,
    pub prio: i32,
    pub crontab: Vec<String>,
    /// Raw `cycle` attribute: seconds or `"seconds=value"`
    pub cycle: Option<JsonValue>,
    /// Item path patterns whose changes trigger the logic
    pub watch_item: Vec<String>,
    /// Every attribute, including the recognised ones
    pub conf: IndexMap<String, JsonValue>,
}

impl LogicDefinition {
    /// Build a definition from its name and attribute mapping
    pub fn from_attributes(name: &str, conf: IndexMap<String, JsonValue>) -> ConfigResult<Self> {
        let prio = match conf.get("prio") {
            None => DEFAULT_LOGIC_PRIO,
            Some(v) => as_int(v).ok_or_else(|| ConfigError::InvalidValue {
                key: format!("{name}.prio"),
                reason: format!("expected an integer, got {v}"),
            })?,
        };

        Ok(Self {
            name: name.to_string(),
            filename: conf.get("filename").and_then(|v| v.as_str()).map(String::from),
            interpreter: conf
                .get("interpreter")
                .and_then(|v| v.as_str())
                .map(String::from),
            prio,
            crontab: conf.get("crontab").map(string_list).unwrap_or_default(),
            cycle: conf.get("cycle").filter(|v| !v.is_null()).cloned(),
            watch_item: conf.get("watch_item").map(string_list).unwrap_or_default(),
            conf,
        })
    }
}

/// One entry of `plugin.yaml`
#[derive(Debug, Clone, PartialEq)]
pub struct PluginDefinition {
    pub name: String,
    /// Implementation selector, `class` in the file
    pub class: String,
    pub conf: IndexMap<String, JsonValue>,
}

fn as_int(value: &JsonValue) -> Option<i32> {
    match value {
        JsonValue::Number(n) => n.as_i64().and_then(|i| i32::try_from(i).ok()),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Read a `name -> {attributes}` document into ordered sections
fn load_sections(
    config_dir: &Path,
    file: &str,
) -> ConfigResult<Vec<(String, IndexMap<String, JsonValue>)>> {
    let mut loader = YamlLoader::new(config_dir)?;
    let Some(yaml) = loader.load_optional(file)? else {
        return Ok(Vec::new());
    };
    sections(&yaml, file)
}

fn sections(yaml: &Value, file: &str) -> ConfigResult<Vec<(String, IndexMap<String, JsonValue>)>> {
    if yaml.is_null() {
        return Ok(Vec::new());
    }
    let Some(root) = yaml.as_mapping() else {
        return Err(ConfigError::InvalidValue {
            key: file.to_string(),
            reason: "expected a mapping of names to sections".to_string(),
        });
    };

    let mut out = Vec::with_capacity(root.len());
    for (name, section) in root {
        let name = match yaml_to_json(name) {
            JsonValue::String(s) => s,
            other => other.to_string(),
        };
        let conf = match section {
            Value::Mapping(map) => map
                .iter()
                .map(|(k, v)| {
                    let key = match yaml_to_json(k) {
                        JsonValue::String(s) => s,
                        other => other.to_string(),
                    };
                    (key, yaml_to_json(v))
                })
                .collect(),
            Value::Null => IndexMap::new(),
            other => {
                return Err(ConfigError::InvalidValue {
                    key: format!("{file}:{name}"),
                    reason: format!("expected a mapping, got {other:?}"),
                })
            }
        };
        out.push((name, conf));
    }
    Ok(out)
}

/// Load every logic of `<config_dir>/logic.yaml`
pub fn load_logics(config_dir: impl AsRef<Path>) -> ConfigResult<Vec<LogicDefinition>> {
    let logics = load_sections(config_dir.as_ref(), LOGIC_FILE)?
        .into_iter()
        .map(|(name, conf)| LogicDefinition::from_attributes(&name, conf))
        .collect::<ConfigResult<Vec<_>>>()?;
    debug!(count = logics.len(), "Loaded logic definitions");
    Ok(logics)
}

/// Load every plugin of `<config_dir>/plugin.yaml`
pub fn load_plugins(config_dir: impl AsRef<Path>) -> ConfigResult<Vec<PluginDefinition>> {
    load_sections(config_dir.as_ref(), PLUGIN_FILE)?
        .into_iter()
        .map(|(name, conf)| {
            let class = conf
                .get("class")
                .and_then(|v| v.as_str())
                .map(String::from)
                .ok_or_else(|| ConfigError::InvalidValue {
                    key: format!("{PLUGIN_FILE}:{name}"),
                    reason: "missing 'class'".to_string(),
                })?;
            Ok(PluginDefinition { name, class, conf })
        })
        .collect()
}
