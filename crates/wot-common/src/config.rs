//! Engine configuration (§6).

use serde::{Deserialize, Serialize};

/// Length and count limits enforced by the entity model (C1) when
/// constructing or mutating [`crate::types::Identity`]/[`crate::types::Trust`]
/// rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    pub nickname_max_length: usize,
    pub comment_max_length: usize,
    pub context_max_length: usize,
    pub property_name_max_length: usize,
    pub property_value_max_length: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            nickname_max_length: 50,
            comment_max_length: 256,
            context_max_length: 32,
            property_name_max_length: 64,
            property_value_max_length: 256,
        }
    }
}

/// Engine-wide configuration, enumerated exactly per spec.md §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Filesystem path for the durable store (opaque to the core engine;
    /// interpreted only by a concrete `Store` implementation).
    pub store_path: String,
    /// 32-byte value generated at first run, stable across restarts.
    pub constant_random_pad: [u8; 32],
    pub max_trust_list_entries: usize,
    pub max_identity_file_bytes: usize,
    pub limits: Limits,
    pub capacities: [i64; 6],
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_path: "web-of-trust.store".to_string(),
            constant_random_pad: [0u8; 32],
            max_trust_list_entries: 128,
            max_identity_file_bytes: 1 << 20,
            limits: Limits::default(),
            capacities: crate::types::CAPACITIES,
        }
    }
}

impl Config {
    /// Load configuration, optionally layered over a config file at
    /// `path` (any format the `config` crate recognizes from its
    /// extension), with `WOT_`-prefixed environment variables taking
    /// precedence. Falls back to [`Config::default`] when neither source
    /// overrides a field.
    pub fn load(path: Option<&str>) -> crate::error::Result<Self> {
        let defaults = Self::default();
        let mut builder = ::config::Config::builder().add_source(
            ::config::Config::try_from(&defaults)
                .map_err(|e| crate::error::WotError::Store(e.to_string()))?,
        );
        if let Some(path) = path {
            builder = builder.add_source(::config::File::with_name(path).required(false));
        }
        builder = builder.add_source(::config::Environment::with_prefix("WOT").separator("_"));
        let merged = builder
            .build()
            .map_err(|e| crate::error::WotError::Store(e.to_string()))?;
        merged
            .try_deserialize()
            .map_err(|e| crate::error::WotError::Store(e.to_string()))
    }

    /// Convenience wrapper around [`Config::load`] for the common case of
    /// no config file, just environment overrides.
    pub fn from_env() -> Self {
        Self::load(None).unwrap_or_else(|_| Self::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = Config::default();
        assert_eq!(config.max_trust_list_entries, 128);
        assert_eq!(config.max_identity_file_bytes, 1 << 20);
        assert_eq!(config.limits.nickname_max_length, 50);
        assert_eq!(config.limits.comment_max_length, 256);
        assert_eq!(config.capacities, [100, 40, 16, 6, 2, 1]);
    }
}
