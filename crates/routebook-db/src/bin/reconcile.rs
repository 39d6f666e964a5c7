//! # Ledger Reconciliation Job
//!
//! Out-of-band batch that removes duplicate SALE_DELIVERED entries.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      reconcile [--db PATH] [--branch ID] [--dry-run]    │
//! │                                                                         │
//! │  EngineConfig::load() ◄── ROUTEBOOK_* env vars                          │
//! │       │  flags override env                                            │
//! │       ▼                                                                 │
//! │  Database::new() ── runs pending migrations                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  OrderWorkflow::reconcile_ledger()                                     │
//! │       ├── keep earliest complete SALE per order                        │
//! │       ├── delete the rest (skipped on --dry-run)                       │
//! │       └── RETURN / PAYMENT / ADJUSTMENT never touched                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Log level follows `RUST_LOG` (default `info`).

use std::path::PathBuf;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use routebook_db::{ConfigError, Database, EngineConfig, OrderWorkflow};

const USAGE: &str = "usage: reconcile [--db PATH] [--branch BRANCH_ID] [--dry-run]";

/// Applies command-line flags on top of the environment configuration.
///
/// Returns `None` when `--help` was given.
fn apply_args<I>(mut config: EngineConfig, args: I) -> Result<Option<EngineConfig>, ConfigError>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--db" => {
                let path = args.next().ok_or_else(|| ConfigError::MissingFlagValue(arg.clone()))?;
                config.database_path = PathBuf::from(path);
            }
            "--branch" => {
                let branch = args.next().ok_or_else(|| ConfigError::MissingFlagValue(arg.clone()))?;
                config.branch_id = Some(branch);
            }
            "--dry-run" => config.reconcile_dry_run = true,
            "-h" | "--help" => return Ok(None),
            _ => return Err(ConfigError::UnknownArgument(arg)),
        }
    }
    Ok(Some(config))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    let Some(config) = apply_args(EngineConfig::load()?, std::env::args().skip(1))? else {
        println!("{USAGE}");
        return Ok(());
    };

    info!(
        path = %config.database_path.display(),
        branch = config.branch_id.as_deref().unwrap_or("all"),
        dry_run = config.reconcile_dry_run,
        "Starting ledger reconciliation"
    );

    let db = Database::new(config.db_config()).await?;
    let workflow = OrderWorkflow::from_config(db.clone(), &config);

    let result = workflow
        .reconcile_ledger(config.branch_id.as_deref(), config.reconcile_dry_run)
        .await;
    db.close().await;

    match result {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Ledger reconciliation failed");
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_flags_override_environment() {
        let config = apply_args(
            EngineConfig::default(),
            args(&["--db", "/tmp/lhr.db", "--branch", "lhr", "--dry-run"]),
        )
        .unwrap()
        .unwrap();

        assert_eq!(config.database_path, PathBuf::from("/tmp/lhr.db"));
        assert_eq!(config.branch_id.as_deref(), Some("lhr"));
        assert!(config.reconcile_dry_run);
    }

    #[test]
    fn test_bad_arguments_are_rejected() {
        assert!(matches!(
            apply_args(EngineConfig::default(), args(&["--branch"])),
            Err(ConfigError::MissingFlagValue(_))
        ));
        assert!(matches!(
            apply_args(EngineConfig::default(), args(&["--force"])),
            Err(ConfigError::UnknownArgument(_))
        ));
        assert!(apply_args(EngineConfig::default(), args(&["--help"])).unwrap().is_none());
    }
}
