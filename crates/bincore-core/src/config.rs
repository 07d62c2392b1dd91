//! Engine configuration variables
//!
//! A flat map of dotted keys to typed values. The engine owns one shared
//! `Config` behind its own subsystem lock; Isolated contexts work on a
//! deep copy and hand back only the keys they wrote, which commit merges
//! key by key (last committer wins per key).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::errors::{BincoreError, Result};
use crate::lock::SubsystemLock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl ConfigValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            ConfigValue::Bool(_) => "bool",
            ConfigValue::Int(_) => "int",
            ConfigValue::Str(_) => "string",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::Str(s) => Some(s),
            _ => None,
        }
    }

    fn same_type(&self, other: &ConfigValue) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Bool(b) => write!(f, "{}", b),
            ConfigValue::Int(i) => write!(f, "{}", i),
            ConfigValue::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        ConfigValue::Bool(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        ConfigValue::Int(value)
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        ConfigValue::Str(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        ConfigValue::Str(value)
    }
}

/// Parse an integer in decimal or `0x` hexadecimal
pub fn parse_int(text: &str) -> Option<i64> {
    let text = text.trim();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let value = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) => i64::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<i64>().ok()?,
    };
    Some(if negative { -value } else { value })
}

/// Notified after a configuration key changes in the shared configuration
///
/// Observers run outside the configuration lock, in write order, so a key
/// with side effects (e.g. one that reconfigures another subsystem) sees
/// its changes applied in the same order as the values themselves.
pub trait ConfigObserver: Send + Sync {
    fn on_change(&self, key: &str, value: &ConfigValue);
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Config {
    vars: BTreeMap<String, ConfigValue>,
}

impl Config {
    /// Configuration with the engine's built-in variables
    pub fn with_defaults() -> Self {
        let mut config = Self::default();
        for (key, value) in [
            ("asm.arch", ConfigValue::from("x86")),
            ("asm.bits", ConfigValue::Int(64)),
            ("cfg.bigendian", ConfigValue::Bool(false)),
            ("hex.cols", ConfigValue::Int(16)),
            ("scr.color", ConfigValue::Bool(false)),
            ("anal.maxsize", ConfigValue::Int(4096)),
        ] {
            config.vars.insert(key.to_string(), value);
        }
        config
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.vars.get(key)
    }

    /// Set `key`, enforcing the type of an existing value
    ///
    /// Unknown keys are created with whatever type they are first given.
    pub fn set(&mut self, key: &str, value: ConfigValue) -> Result<Option<ConfigValue>> {
        if let Some(existing) = self.vars.get(key) {
            if !existing.same_type(&value) {
                return Err(BincoreError::ConfigTypeMismatch {
                    key: key.to_string(),
                    expected: existing.type_name().to_string(),
                    actual: value.type_name().to_string(),
                });
            }
        }
        Ok(self.vars.insert(key.to_string(), value))
    }

    /// Parse `text` according to the type of the existing value
    pub fn parse_for(&self, key: &str, text: &str) -> Result<ConfigValue> {
        let mismatch = |expected: &str| BincoreError::ConfigTypeMismatch {
            key: key.to_string(),
            expected: expected.to_string(),
            actual: format!("'{}'", text),
        };
        match self.vars.get(key) {
            Some(ConfigValue::Bool(_)) => match text.trim() {
                "true" | "1" | "on" => Ok(ConfigValue::Bool(true)),
                "false" | "0" | "off" => Ok(ConfigValue::Bool(false)),
                _ => Err(mismatch("bool")),
            },
            Some(ConfigValue::Int(_)) => parse_int(text)
                .map(ConfigValue::Int)
                .ok_or_else(|| mismatch("int")),
            Some(ConfigValue::Str(_)) | None => Ok(ConfigValue::Str(text.to_string())),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.vars.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ConfigValue)> {
        self.vars.iter()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Copy the listed keys from `source`, returning the entries that changed
    ///
    /// Keys are applied in ascending order. A key missing from `source` is
    /// skipped. The incoming value always wins.
    pub fn merge_keys(
        &mut self,
        source: &Config,
        keys: &BTreeSet<String>,
    ) -> Vec<(String, ConfigValue)> {
        let mut changed = Vec::new();
        for key in keys {
            let Some(value) = source.vars.get(key) else {
                continue;
            };
            if self.vars.get(key) != Some(value) {
                self.vars.insert(key.clone(), value.clone());
                changed.push((key.clone(), value.clone()));
            }
        }
        changed
    }
}

/// The engine's shared configuration: one lock plus change observers
///
/// Every write holds `publish` until its observers have run, so observers
/// see changes in the same order the config lock applied them.
pub struct SharedConfig {
    lock: SubsystemLock<Config>,
    publish: Mutex<()>,
    observers: RwLock<Vec<Arc<dyn ConfigObserver>>>,
}

impl fmt::Debug for SharedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedConfig")
            .field("lock", &self.lock)
            .field("observers", &self.observers.read().len())
            .finish()
    }
}

impl SharedConfig {
    pub fn new(config: Config) -> Self {
        Self {
            lock: SubsystemLock::new("config", config),
            publish: Mutex::new(()),
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn add_observer(&self, observer: Arc<dyn ConfigObserver>) {
        self.observers.write().push(observer);
    }

    pub fn get(&self, key: &str) -> Option<ConfigValue> {
        self.lock.read(|c| c.get(key).cloned())
    }

    pub fn parse_for(&self, key: &str, text: &str) -> Result<ConfigValue> {
        self.lock.read(|c| c.parse_for(key, text))
    }

    /// Deep copy of the current configuration
    pub fn snapshot(&self) -> Config {
        self.lock.read(|c| c.clone())
    }

    /// Write one key, then notify observers outside the config lock
    pub fn set(&self, key: &str, value: ConfigValue) -> Result<()> {
        let _publish = self.publish.lock();
        let previous = self.lock.write(|c| c.set(key, value.clone()))?;
        if previous.as_ref() != Some(&value) {
            self.notify(&[(key.to_string(), value)]);
        }
        Ok(())
    }

    /// Key-level merge of `keys` from `source`; returns the keys that changed
    pub fn merge_from(&self, source: &Config, keys: &BTreeSet<String>) -> Vec<String> {
        let _publish = self.publish.lock();
        let changed = self.lock.write(|c| c.merge_keys(source, keys));
        self.notify(&changed);
        changed.into_iter().map(|(key, _)| key).collect()
    }

    fn notify(&self, changed: &[(String, ConfigValue)]) {
        if changed.is_empty() {
            return;
        }
        let observers = self.observers.read().clone();
        for (key, value) in changed {
            for observer in &observers {
                observer.on_change(key, value);
            }
        }
    }
}
