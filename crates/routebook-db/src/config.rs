//! Engine configuration module.
//!
//! Configuration is loaded from environment variables with fallback to defaults.
//!
//! | Variable | Default |
//! |---|---|
//! | `ROUTEBOOK_DATABASE_PATH` | `./routebook.db` |
//! | `ROUTEBOOK_MAX_CONNECTIONS` | `5` |
//! | `ROUTEBOOK_DEFAULT_CATEGORY_MAX_DISCOUNT` | `5` |
//! | `ROUTEBOOK_BRANCH_ID` | unset (all branches) |
//! | `ROUTEBOOK_RECONCILE_DRY_RUN` | `false` |

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

use routebook_core::{Percent, DEFAULT_CATEGORY_MAX_DISCOUNT_PERCENT};

use crate::pool::DbConfig;

/// RouteBook engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// SQLite database file
    pub database_path: PathBuf,

    /// Pool size
    pub max_connections: u32,

    /// Discount limit for categories without a configured limit
    pub default_category_max_discount: Percent,

    /// Restricts the reconciliation job to one branch
    pub branch_id: Option<String>,

    /// Reconciliation reports what it would delete without deleting
    pub reconcile_dry_run: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            database_path: PathBuf::from("./routebook.db"),
            max_connections: 5,
            default_category_max_discount: Percent::from_units(DEFAULT_CATEGORY_MAX_DISCOUNT_PERCENT),
            branch_id: None,
            reconcile_dry_run: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn load_from<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = EngineConfig::default();

        let config = EngineConfig {
            database_path: lookup("ROUTEBOOK_DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),

            max_connections: match lookup("ROUTEBOOK_MAX_CONNECTIONS") {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("ROUTEBOOK_MAX_CONNECTIONS".to_string()))?,
                None => defaults.max_connections,
            },

            default_category_max_discount: match lookup("ROUTEBOOK_DEFAULT_CATEGORY_MAX_DISCOUNT") {
                Some(raw) => Percent::from_storage(&raw)
                    .ok()
                    .filter(|pct| !pct.is_negative() && *pct <= Percent::hundred())
                    .ok_or_else(|| {
                        ConfigError::InvalidValue("ROUTEBOOK_DEFAULT_CATEGORY_MAX_DISCOUNT".to_string())
                    })?,
                None => defaults.default_category_max_discount,
            },

            branch_id: lookup("ROUTEBOOK_BRANCH_ID").filter(|b| !b.trim().is_empty()),

            reconcile_dry_run: match lookup("ROUTEBOOK_RECONCILE_DRY_RUN") {
                Some(raw) => parse_flag(&raw)
                    .ok_or_else(|| ConfigError::InvalidValue("ROUTEBOOK_RECONCILE_DRY_RUN".to_string()))?,
                None => defaults.reconcile_dry_run,
            },
        };

        if config.max_connections == 0 {
            return Err(ConfigError::InvalidValue("ROUTEBOOK_MAX_CONNECTIONS".to_string()));
        }

        Ok(config)
    }

    /// Pool configuration for this engine.
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(&self.database_path).max_connections(self.max_connections)
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}")]
    InvalidValue(String),

    #[error("Missing value for flag {0}")]
    MissingFlagValue(String),

    #[error("Unknown argument: {0}")]
    UnknownArgument(String),
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = EngineConfig::load_from(lookup(&[])).unwrap();
        assert_eq!(config.database_path, PathBuf::from("./routebook.db"));
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.default_category_max_discount, Percent::from_units(5));
        assert!(config.branch_id.is_none());
        assert!(!config.reconcile_dry_run);
    }

    #[test]
    fn test_overrides_are_parsed() {
        let config = EngineConfig::load_from(lookup(&[
            ("ROUTEBOOK_DATABASE_PATH", "/var/lib/routebook/lhr.db"),
            ("ROUTEBOOK_MAX_CONNECTIONS", "8"),
            ("ROUTEBOOK_DEFAULT_CATEGORY_MAX_DISCOUNT", "7.5"),
            ("ROUTEBOOK_BRANCH_ID", "lhr"),
            ("ROUTEBOOK_RECONCILE_DRY_RUN", "yes"),
        ]))
        .unwrap();

        assert_eq!(config.max_connections, 8);
        assert_eq!(config.default_category_max_discount.to_storage(), "7.5");
        assert_eq!(config.branch_id.as_deref(), Some("lhr"));
        assert!(config.reconcile_dry_run);
        assert_eq!(config.db_config().max_connections, 8);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        for (name, value) in [
            ("ROUTEBOOK_MAX_CONNECTIONS", "many"),
            ("ROUTEBOOK_MAX_CONNECTIONS", "0"),
            ("ROUTEBOOK_DEFAULT_CATEGORY_MAX_DISCOUNT", "150"),
            ("ROUTEBOOK_RECONCILE_DRY_RUN", "maybe"),
        ] {
            let err = EngineConfig::load_from(lookup(&[(name, value)])).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidValue(ref n) if n == name));
        }
    }
}
