//! Resolution of per-key command configuration.

use std::collections::HashMap;
use std::fmt;

use guardrail_core::OperationKey;
use serde::Deserialize;

use crate::command::config::{CommandConfig, ConfigError};

/// Supplies the configuration used when a key is first executed.
pub trait PropertiesStrategy: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn command_config(&self, key: &OperationKey) -> CommandConfig;
}

/// Defaults plus per-key overrides, fixed at construction.
#[derive(Debug, Clone, Default)]
pub struct StaticProperties {
    defaults: CommandConfig,
    overrides: HashMap<OperationKey, CommandConfig>,
}

/// On-disk shape accepted by [`StaticProperties::from_json`].
///
/// ```json
/// { "defaults": { "executionTimeoutMs": 2000 },
///   "commands": { "licenseByOrg": { "coreSize": 30, "maxQueueSize": 10 } } }
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PropertiesFile {
    defaults: Option<serde_json::Value>,
    commands: HashMap<String, serde_json::Value>,
}

impl StaticProperties {
    #[must_use]
    pub fn new(defaults: CommandConfig) -> Self {
        Self {
            defaults,
            overrides: HashMap::new(),
        }
    }

    /// Adds a full configuration for `key`.
    #[must_use]
    pub fn with_override(mut self, key: impl Into<OperationKey>, config: CommandConfig) -> Self {
        self.overrides.insert(key.into(), config);
        self
    }

    /// Parses defaults and per-command overrides from JSON.
    ///
    /// Fields absent from a command entry inherit from `defaults`, and fields
    /// absent from `defaults` take the built-in defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Malformed` for unparseable input and the
    /// validation error of the first invalid configuration.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let file: PropertiesFile =
            serde_json::from_str(json).map_err(|e| ConfigError::Malformed(e.to_string()))?;

        let base = file.defaults.unwrap_or_else(|| serde_json::json!({}));
        let defaults: CommandConfig = serde_json::from_value(base.clone())
            .map_err(|e| ConfigError::Malformed(e.to_string()))?;
        defaults.validate()?;

        let mut properties = Self::new(defaults);
        for (name, entry) in file.commands {
            let merged = merge(&base, &entry);
            let config: CommandConfig = serde_json::from_value(merged)
                .map_err(|e| ConfigError::Malformed(format!("{name}: {e}")))?;
            config.validate()?;
            properties.overrides.insert(OperationKey::from(name), config);
        }
        Ok(properties)
    }

    #[must_use]
    pub fn defaults(&self) -> &CommandConfig {
        &self.defaults
    }
}

impl PropertiesStrategy for StaticProperties {
    fn name(&self) -> &'static str {
        "static"
    }

    fn command_config(&self, key: &OperationKey) -> CommandConfig {
        self.overrides
            .get(key)
            .cloned()
            .unwrap_or_else(|| self.defaults.clone())
    }
}

/// Shallow merge of two JSON objects, `over` winning.
fn merge(base: &serde_json::Value, over: &serde_json::Value) -> serde_json::Value {
    let mut merged = base.clone();
    if let (Some(target), Some(source)) = (merged.as_object_mut(), over.as_object()) {
        for (k, v) in source {
            target.insert(k.clone(), v.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_key_gets_defaults() {
        let props = StaticProperties::default();
        let config = props.command_config(&OperationKey::new("anything"));
        assert_eq!(config, CommandConfig::default());
    }

    #[test]
    fn override_wins_for_its_key() {
        let tuned = CommandConfig {
            core_size: 30,
            ..CommandConfig::default()
        };
        let props = StaticProperties::default().with_override("licenseByOrg", tuned.clone());
        assert_eq!(props.command_config(&OperationKey::new("licenseByOrg")), tuned);
        assert_eq!(
            props.command_config(&OperationKey::new("other")).core_size,
            10
        );
    }

    #[test]
    fn json_commands_inherit_defaults() {
        let json = r#"{
            "defaults": { "executionTimeoutMs": 2000 },
            "commands": {
                "licenseByOrg": { "coreSize": 30, "maxQueueSize": 10, "requestVolumeThreshold": 10 }
            }
        }"#;
        let props = StaticProperties::from_json(json).unwrap();
        assert_eq!(props.defaults().execution_timeout_ms, 2000);

        let config = props.command_config(&OperationKey::new("licenseByOrg"));
        assert_eq!(config.core_size, 30);
        assert_eq!(config.max_queue_size, 10);
        assert_eq!(config.request_volume_threshold, 10);
        assert_eq!(config.execution_timeout_ms, 2000);
    }

    #[test]
    fn json_with_invalid_command_is_rejected() {
        let json = r#"{ "commands": { "bad": { "coreSize": 0 } } }"#;
        assert_eq!(
            StaticProperties::from_json(json).unwrap_err(),
            ConfigError::ZeroCoreSize
        );
    }

    #[test]
    fn malformed_json_is_reported() {
        let err = StaticProperties::from_json("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::Malformed(_)));
    }
}
