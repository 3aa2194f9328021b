//! YAML configuration for smarthome
//!
//! A config directory holds:
//!
//! - `smarthome.yaml` - location, directories, scheduler and logging settings
//! - `items/*.yaml` - the item tree, merged across files
//! - `logic.yaml` - logic definitions
//! - `plugin.yaml` - plugin definitions
//! - `secrets.yaml` - values for the `!secret` tag
//!
//! Every file supports the `!include`, `!include_dir_*`, `!secret` and
//! `!env_var` tags.
//!
//! # Example
//!
//! ```ignore
//! use sh_config::{load_items, SmartHomeConfig};
//!
//! let settings = SmartHomeConfig::load("/etc/smarthome")?;
//! let items = load_items("/etc/smarthome")?;
//! ```

mod error;
mod items;
mod loader;
mod logics;
mod secrets;
mod settings;

pub use error::{ConfigError, ConfigResult};
pub use items::{load_items, parse_items, string_list, yaml_to_json, ItemDefinition, ITEMS_DIR};
pub use loader::{load_yaml, YamlLoader};
pub use logics::{
    load_logics, load_plugins, LogicDefinition, PluginDefinition, DEFAULT_LOGIC_PRIO, LOGIC_FILE,
    PLUGIN_FILE,
};
pub use secrets::Secrets;
pub use settings::{
    CoreSettings, LoggingConfig, SchedulerSettings, SmartHomeConfig, SETTINGS_FILE,
};
