//! YAML loader with include and substitution tags
//!
//! Recognised tags:
//! - `!include file` - splice another YAML file in place
//! - `!include_dir_list dir` - every file in `dir` as one list element
//! - `!include_dir_merge_list dir` - concatenate the lists of every file
//! - `!include_dir_named dir` - mapping of file stem to file content
//! - `!include_dir_merge_named dir` - merge the mappings of every file
//! - `!secret key` - value from `secrets.yaml`
//! - `!env_var VAR` - value of an environment variable
//!
//! Relative include paths resolve against the including file.

use crate::error::{ConfigError, ConfigResult};
use crate::secrets::Secrets;
use serde_yaml::{Mapping, Value};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// How the files of an `!include_dir_*` directory are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DirMode {
    List,
    MergeList,
    Named,
    MergeNamed,
}

impl DirMode {
    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "!include_dir_list" => Some(DirMode::List),
            "!include_dir_merge_list" => Some(DirMode::MergeList),
            "!include_dir_named" => Some(DirMode::Named),
            "!include_dir_merge_named" => Some(DirMode::MergeNamed),
            _ => None,
        }
    }
}

/// YAML loader bound to one config directory
pub struct YamlLoader {
    config_dir: PathBuf,
    secrets: Secrets,
    /// Files currently being loaded, for cycle detection
    loading: HashSet<PathBuf>,
}

impl YamlLoader {
    /// Create a loader for the given config directory, reading its secrets
    pub fn new(config_dir: impl Into<PathBuf>) -> ConfigResult<Self> {
        let config_dir = config_dir.into();
        let secrets = Secrets::load(&config_dir)?;
        Ok(Self::with_secrets(config_dir, secrets))
    }

    /// Create a loader with pre-loaded secrets
    pub fn with_secrets(config_dir: impl Into<PathBuf>, secrets: Secrets) -> Self {
        Self {
            config_dir: config_dir.into(),
            secrets,
            loading: HashSet::new(),
        }
    }

    /// Load a file relative to the config directory
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> ConfigResult<Value> {
        let path = self.resolve(path.as_ref());
        if !self.loading.insert(path.clone()) {
            return Err(ConfigError::CircularInclude { path });
        }
        debug!(file = %path.display(), "Loading YAML");

        let result = fs::read_to_string(&path)
            .map_err(|source| ConfigError::ReadFile {
                path: path.clone(),
                source,
            })
            .and_then(|content| self.load_string(&content, &path));

        self.loading.remove(&path);
        result
    }

    /// Load the file if it exists, `None` otherwise
    pub fn load_optional(&mut self, path: impl AsRef<Path>) -> ConfigResult<Option<Value>> {
        let resolved = self.resolve(path.as_ref());
        if !resolved.is_file() {
            debug!(file = %resolved.display(), "Optional config file absent");
            return Ok(None);
        }
        self.load_file(resolved).map(Some)
    }

    /// Parse YAML text, resolving tags relative to `source_path`
    pub fn load_string(&mut self, content: &str, source_path: &Path) -> ConfigResult<Value> {
        let value: Value =
            serde_yaml::from_str(content).map_err(|source| ConfigError::ParseYaml {
                path: source_path.to_path_buf(),
                source,
            })?;
        self.expand(value, source_path)
    }

    fn expand(&mut self, value: Value, source_path: &Path) -> ConfigResult<Value> {
        match value {
            Value::Tagged(tagged) => {
                let serde_yaml::value::TaggedValue { tag, value } = *tagged;
                let name = tag.to_string();
                trace!(tag = %name, "Expanding tag");

                if let Some(mode) = DirMode::from_tag(&name) {
                    let dir = self.include_path(&value, source_path)?;
                    return self.include_dir(&dir, mode);
                }
                match name.as_str() {
                    "!include" => {
                        let file = self.include_path(&value, source_path)?;
                        self.load_file(file)
                    }
                    "!secret" => {
                        let key = tag_argument("!secret", &value)?;
                        Ok(Value::String(self.secrets.get(key)?.to_string()))
                    }
                    "!env_var" => {
                        let var = tag_argument("!env_var", &value)?;
                        std::env::var(var)
                            .map(Value::String)
                            .map_err(|_| ConfigError::EnvVarNotFound {
                                var: var.to_string(),
                            })
                    }
                    _ => {
                        let value = self.expand(value, source_path)?;
                        Ok(Value::Tagged(Box::new(serde_yaml::value::TaggedValue {
                            tag,
                            value,
                        })))
                    }
                }
            }
            Value::Mapping(map) => {
                let mut out = Mapping::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k, self.expand(v, source_path)?);
                }
                Ok(Value::Mapping(out))
            }
            Value::Sequence(seq) => seq
                .into_iter()
                .map(|v| self.expand(v, source_path))
                .collect::<ConfigResult<Vec<_>>>()
                .map(Value::Sequence),
            other => Ok(other),
        }
    }

    fn include_dir(&mut self, dir: &Path, mode: DirMode) -> ConfigResult<Value> {
        debug!(dir = %dir.display(), ?mode, "Including directory");
        let files = yaml_files(dir)?;

        match mode {
            DirMode::List | DirMode::MergeList => {
                let mut out = Vec::new();
                for file in files {
                    match (mode, self.load_file(&file)?) {
                        (DirMode::MergeList, Value::Sequence(seq)) => out.extend(seq),
                        (_, other) => out.push(other),
                    }
                }
                Ok(Value::Sequence(out))
            }
            DirMode::Named | DirMode::MergeNamed => {
                let mut out = Mapping::new();
                for file in files {
                    let content = self.load_file(&file)?;
                    if mode == DirMode::Named {
                        let stem = file
                            .file_stem()
                            .and_then(|s| s.to_str())
                            .unwrap_or_default()
                            .to_string();
                        out.insert(Value::String(stem), content);
                    } else if let Value::Mapping(map) = content {
                        out.extend(map);
                    }
                }
                Ok(Value::Mapping(out))
            }
        }
    }

    fn include_path(&self, value: &Value, source_path: &Path) -> ConfigResult<PathBuf> {
        let Some(raw) = value.as_str() else {
            return Err(ConfigError::InvalidIncludePath {
                path: format!("{value:?}"),
                reason: "path must be a string".to_string(),
            });
        };
        let raw = Path::new(raw);
        if raw.is_absolute() {
            return Ok(raw.to_path_buf());
        }
        let base = source_path.parent().unwrap_or(&self.config_dir);
        Ok(base.join(raw))
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config_dir.join(path)
        }
    }

    /// The config directory this loader resolves against
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }
}

fn tag_argument<'a>(tag: &str, value: &'a Value) -> ConfigResult<&'a str> {
    value.as_str().ok_or_else(|| ConfigError::InvalidValue {
        key: tag.to_string(),
        reason: "argument must be a string".to_string(),
    })
}

/// All `.yaml`/`.yml` files of a directory, sorted by name
pub(crate) fn yaml_files(dir: &Path) -> ConfigResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(ConfigError::DirectoryNotFound {
            path: dir.to_path_buf(),
        });
    }

    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|source| ConfigError::ReadFile {
            path: dir.to_path_buf(),
            source,
        })?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext == "yaml" || ext == "yml")
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Load one YAML file of a config directory with full tag processing
pub fn load_yaml(config_dir: impl Into<PathBuf>, file: impl AsRef<Path>) -> ConfigResult<Value> {
    YamlLoader::new(config_dir)?.load_file(file)
}
