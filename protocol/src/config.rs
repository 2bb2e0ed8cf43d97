//! Protocol parameters

use serde::{Deserialize, Serialize};

use crate::errors::{ProtocolError, ProtocolResult};
use crate::types::RecordKind;

/// Tunable parameters of one protocol instance
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Minimum seconds between two actions of the same class by one caller
    pub cooldown_secs: u64,
    /// Markers a batch may hold
    pub max_markers_per_batch: u32,
    /// Commands a batch may hold
    pub max_commands_per_batch: u32,
    /// Inclusive upper bound for x/y coordinates (lower bound is 0)
    pub coordinate_max: u64,
    /// Inclusive lower bound for command types
    pub command_type_min: u64,
    /// Inclusive upper bound for command types
    pub command_type_max: u64,
    /// Decryption context retention
    pub retention: RetentionPolicy,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 60,
            max_markers_per_batch: 100,
            max_commands_per_batch: 100,
            coordinate_max: 1000,
            command_type_min: 1,
            command_type_max: 5,
            retention: RetentionPolicy::default(),
        }
    }
}

impl ProtocolConfig {
    /// Check every parameter; returns the first violation
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.cooldown_secs == 0 {
            return Err(ProtocolError::InvalidCooldown);
        }
        if self.max_markers_per_batch == 0 {
            return Err(ProtocolError::InvalidCapacity(RecordKind::Marker));
        }
        if self.max_commands_per_batch == 0 {
            return Err(ProtocolError::InvalidCapacity(RecordKind::Command));
        }
        if self.command_type_min > self.command_type_max {
            return Err(ProtocolError::InvalidBounds(format!(
                "command type range {}..={} is empty",
                self.command_type_min, self.command_type_max
            )));
        }
        self.retention.validate()
    }

    /// Capacity for one record kind
    pub fn capacity(&self, kind: RecordKind) -> u32 {
        match kind {
            RecordKind::Marker => self.max_markers_per_batch,
            RecordKind::Command => self.max_commands_per_batch,
        }
    }
}

/// How long decryption contexts are kept
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    /// Contexts kept once pruning runs; only processed ones are evicted by count
    pub max_contexts: usize,
    /// Contexts older than this are evicted whether processed or not
    pub max_age_secs: Option<u64>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_contexts: 1024,
            max_age_secs: Some(86_400),
        }
    }
}

impl RetentionPolicy {
    fn validate(&self) -> ProtocolResult<()> {
        if self.max_contexts == 0 {
            return Err(ProtocolError::InvalidRetention(
                "max_contexts must be at least one".into(),
            ));
        }
        if self.max_age_secs == Some(0) {
            return Err(ProtocolError::InvalidRetention(
                "max_age_secs must be positive when set".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = ProtocolConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.coordinate_max, 1000);
        assert_eq!((config.command_type_min, config.command_type_max), (1, 5));
    }

    #[test]
    fn test_each_violation_has_its_own_error() {
        let zero_cooldown = ProtocolConfig {
            cooldown_secs: 0,
            ..Default::default()
        };
        assert_eq!(zero_cooldown.validate(), Err(ProtocolError::InvalidCooldown));

        let zero_commands = ProtocolConfig {
            max_commands_per_batch: 0,
            ..Default::default()
        };
        assert_eq!(
            zero_commands.validate(),
            Err(ProtocolError::InvalidCapacity(RecordKind::Command))
        );

        let inverted = ProtocolConfig {
            command_type_min: 6,
            ..Default::default()
        };
        assert!(matches!(inverted.validate(), Err(ProtocolError::InvalidBounds(_))));

        let no_retention = ProtocolConfig {
            retention: RetentionPolicy {
                max_contexts: 0,
                max_age_secs: None,
            },
            ..Default::default()
        };
        assert!(matches!(no_retention.validate(), Err(ProtocolError::InvalidRetention(_))));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: ProtocolConfig = toml::from_str("cooldown_secs = 5").unwrap();
        assert_eq!(config.cooldown_secs, 5);
        assert_eq!(config.max_markers_per_batch, 100);
    }
}
