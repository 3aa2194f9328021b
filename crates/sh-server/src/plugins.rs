//! Built-in plugins

use serde_json::Value;
use sh_config::PluginDefinition;
use sh_core::{cast, ItemType, Trigger};
use sh_engine::{display_value, method_hook, Item, MethodHook, Plugin, SharedPlugin};
use std::sync::Arc;
use tracing::{info, warn};

/// Log target of changelog entries
pub const CHANGELOG_TARGET: &str = "sh::changelog";

/// Logs every change of items configured with `changelog: true`
#[derive(Debug, Default)]
pub struct ChangelogPlugin {
    /// Attribute selecting the logged items
    attribute: String,
}

impl ChangelogPlugin {
    pub const CLASS: &'static str = "changelog";

    pub fn new() -> Self {
        Self {
            attribute: Self::CLASS.to_string(),
        }
    }

    /// Select items by another attribute, e.g. `conf: {attribute: history}`
    pub fn with_attribute(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
        }
    }

    fn enabled_for(&self, item: &Item) -> bool {
        item.conf()
            .get(&self.attribute)
            .and_then(|v| cast(ItemType::Bool, v).ok())
            .is_some_and(|v| v == Value::Bool(true))
    }
}

impl Plugin for ChangelogPlugin {
    fn name(&self) -> &str {
        Self::CLASS
    }

    fn parse_item(&self, item: &Arc<Item>) -> Option<MethodHook> {
        if !self.enabled_for(item) {
            return None;
        }
        Some(method_hook(|item: &Item, update: &Trigger| {
            info!(
                target: CHANGELOG_TARGET,
                item = %item.path(),
                value = %update.value.as_ref().map(display_value).unwrap_or_default(),
                changed_by = %update.changed_by(),
                "{}",
                item.name()
            );
            Ok(())
        }))
    }
}

/// Instantiate the plugins of `plugin.yaml` this binary knows about
pub fn from_definitions(definitions: &[PluginDefinition]) -> Vec<SharedPlugin> {
    let mut plugins: Vec<SharedPlugin> = Vec::new();
    for def in definitions {
        match def.class.as_str() {
            ChangelogPlugin::CLASS => {
                let plugin = match def.conf.get("attribute").and_then(Value::as_str) {
                    Some(attribute) => ChangelogPlugin::with_attribute(attribute),
                    None => ChangelogPlugin::new(),
                };
                plugins.push(Arc::new(plugin));
            }
            other => warn!(plugin = %def.name, class = %other, "Unknown plugin class, skipping"),
        }
    }
    plugins
}
