//! Configuración global de pipeline.
//!
//! Mapa plano clave -> JSON. Cada stage declara qué claves le afectan
//! (`Stage::relevant_config_keys`) y sólo esas entran en su `config_hash`,
//! así un cambio en una clave ajena no invalida sus artifacts.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineConfig {
    values: BTreeMap<String, Value>,
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(values: BTreeMap<String, Value>) -> Self {
        Self { values }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.get(key).and_then(Value::as_bool)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    /// Proyección sobre `keys`; las ausentes aparecen como `null` para que
    /// añadir una clave nueva sí cambie el hash.
    pub fn subset(&self, keys: &[String]) -> BTreeMap<String, Value> {
        keys.iter()
            .map(|k| (k.clone(), self.values.get(k).cloned().unwrap_or(Value::Null)))
            .collect()
    }

    /// Carga un objeto JSON plano desde archivo.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(),
                                                                               source })?;
        let value: Value = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse { path: path.to_path_buf(),
                                                                                             source })?;
        match value {
            Value::Object(map) => Ok(Self { values: map.into_iter().collect() }),
            other => Err(ConfigError::Invalid(format!("{} must contain a JSON object, found {other}", path.display()))),
        }
    }

    /// Lee variables `{prefix}CLAVE=valor`. La clave se pasa a minúsculas y
    /// `__` se traduce a `.`; el valor se interpreta como JSON si parsea y como
    /// string si no.
    pub fn from_env_prefix(prefix: &str) -> Self {
        let values = env::vars().filter_map(|(k, v)| {
                                    let key = k.strip_prefix(prefix)?;
                                    if key.is_empty() {
                                        return None;
                                    }
                                    let key = key.to_ascii_lowercase().replace("__", ".");
                                    let value = serde_json::from_str(&v).unwrap_or(Value::String(v));
                                    Some((key, value))
                                })
                                .collect();
        Self { values }
    }

    /// `other` tiene prioridad sobre `self`.
    pub fn merged(mut self, other: PipelineConfig) -> Self {
        self.values.extend(other.values);
        self
    }
}
