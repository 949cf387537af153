use std::path::Path;

use serde_json::Value;

use super::{Error, Result};

const DEFAULT_CNI_VERSION: &str = "0.3.1";

/// An ordered chain of plugin configurations for one network.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkConfigList {
    pub name: String,
    pub cni_version: String,
    pub plugins: Vec<Value>,
}

impl NetworkConfigList {
    /// Loads the configuration of `network` from `dir`.
    ///
    /// `<network>.conflist` is preferred; a single-plugin `<network>.conf` is wrapped into a
    /// chain of one.
    pub fn load(dir: &Path, network: &str) -> Result<Self> {
        if network.is_empty() || network.contains('/') || network.starts_with('.') {
            return Err(Error::InvalidNetworkName(network.to_owned()));
        }

        let list_path = dir.join(format!("{network}.conflist"));
        if let Some(raw) = read_json(&list_path)? {
            return Self::from_list(&list_path, raw, network);
        }

        let single_path = dir.join(format!("{network}.conf"));
        if let Some(raw) = read_json(&single_path)? {
            return Self::from_single(&single_path, raw, network);
        }

        Err(Error::ConfigNotFound {
            network: network.to_owned(),
            dir: dir.to_path_buf(),
        })
    }

    fn from_list(path: &Path, raw: Value, network: &str) -> Result<Self> {
        let plugins = match raw.get("plugins") {
            Some(Value::Array(plugins)) if !plugins.is_empty() => plugins.clone(),
            _ => {
                return Err(Error::ConfigInvalid {
                    path: path.to_path_buf(),
                    reason: "`plugins` must be a non-empty list",
                });
            }
        };
        let list = Self {
            name: string_field(&raw, "name").unwrap_or(network).to_owned(),
            cni_version: string_field(&raw, "cniVersion")
                .unwrap_or(DEFAULT_CNI_VERSION)
                .to_owned(),
            plugins,
        };
        list.validate(path)?;
        Ok(list)
    }

    fn from_single(path: &Path, raw: Value, network: &str) -> Result<Self> {
        let list = Self {
            name: string_field(&raw, "name").unwrap_or(network).to_owned(),
            cni_version: string_field(&raw, "cniVersion")
                .unwrap_or(DEFAULT_CNI_VERSION)
                .to_owned(),
            plugins: vec![raw],
        };
        list.validate(path)?;
        Ok(list)
    }

    fn validate(&self, path: &Path) -> Result<()> {
        for plugin in &self.plugins {
            if !plugin.is_object() {
                return Err(Error::ConfigInvalid {
                    path: path.to_path_buf(),
                    reason: "plugin configuration must be an object",
                });
            }
            match string_field(plugin, "type") {
                Some(kind) if !kind.is_empty() && !kind.contains('/') => {}
                _ => {
                    return Err(Error::ConfigInvalid {
                        path: path.to_path_buf(),
                        reason: "plugin `type` must name a binary",
                    });
                }
            }
        }
        Ok(())
    }

    /// Builds the stdin document of the plugin at `index`.
    ///
    /// The network name and version are copied into every plugin; `prev_result` is passed on to
    /// every plugin after the first during ADD.
    pub fn plugin_config(&self, index: usize, prev_result: Option<&Value>) -> Option<Value> {
        let mut conf = self.plugins.get(index)?.clone();
        let object = conf.as_object_mut()?;
        object.insert("name".to_owned(), Value::String(self.name.clone()));
        object.insert(
            "cniVersion".to_owned(),
            Value::String(self.cni_version.clone()),
        );
        if let Some(prev) = prev_result {
            object.insert("prevResult".to_owned(), prev.clone());
        }
        Some(conf)
    }

    /// Binary name of the plugin at `index`.
    pub fn plugin_type(&self, index: usize) -> Option<&str> {
        string_field(self.plugins.get(index)?, "type")
    }
}

fn string_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key)?.as_str()
}

fn read_json(path: &Path) -> Result<Option<Value>> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(Error::ConfigRead {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    serde_json::from_slice(&data)
        .map(Some)
        .map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
}
