//! Settings file
//!
//! ```toml
//! [engine]
//! block_size = 64
//!
//! [eval]
//! "hex.cols" = 8
//! "asm.arch" = "arm"
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use bincore_core::{CommandEngine, ConfigValue, EngineOptions, ExError, ExErrorKind};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub engine: EngineOptions,
    /// Initial configuration values, applied before any command runs
    pub eval: BTreeMap<String, toml::Value>,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, ExError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ExError::new(ExErrorKind::Io)
                .with_op("settings_load")
                .with_message(format!("{}: {}", path.display(), e))
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ExError> {
        toml::from_str(text).map_err(|e| {
            ExError::new(ExErrorKind::Serialization)
                .with_op("settings_parse")
                .with_message(e.to_string())
        })
    }

    /// Write every `[eval]` entry into the engine's configuration
    pub fn apply_eval(&self, engine: &CommandEngine) -> Result<(), ExError> {
        for (key, value) in &self.eval {
            let value = match value {
                toml::Value::Boolean(b) => ConfigValue::Bool(*b),
                toml::Value::Integer(i) => ConfigValue::Int(*i),
                toml::Value::String(s) => ConfigValue::Str(s.clone()),
                other => {
                    return Err(ExError::new(ExErrorKind::InvalidInput)
                        .with_op("settings_eval")
                        .with_message(format!(
                            "'{}' must be a bool, integer or string, not {}",
                            key,
                            other.type_str()
                        )))
                }
            };
            engine.config().set(key, value)?;
            tracing::debug!(key = %key, "configuration seeded from settings");
        }
        Ok(())
    }
}
