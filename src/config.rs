use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Environment variable that overrides where the farm database lives.
pub const DB_PATH_ENV: &str = "FLUPSY_INTEGRITY_DB";
/// Environment variable holding the `tracing` filter directive.
pub const LOG_FILTER_ENV: &str = "FLUPSY_INTEGRITY_LOG";
pub const DEFAULT_LOG_FILTER: &str = "flupsy_integrity=info,sqlx=warn";

const APP_DIR_NAME: &str = "flupsy";
const DB_FILE_NAME: &str = "farm.sqlite3";

/// How repairs are grouped into transactions.
///
/// `PerCheck` commits each check on its own, so a failure in a later check
/// leaves earlier repairs on disk. `WholeScan` runs every check in a single
/// transaction and rolls all of them back if any check fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../target/ts-bindings/")]
#[serde(rename_all = "snake_case")]
pub enum TransactionScope {
    #[default]
    PerCheck,
    WholeScan,
}

impl TransactionScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionScope::PerCheck => "per_check",
            TransactionScope::WholeScan => "whole_scan",
        }
    }
}

/// How many rows a single repair statement touches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../target/ts-bindings/")]
#[serde(rename_all = "snake_case")]
pub enum RepairGranularity {
    /// `WHERE id IN (...)` over chunks of violating ids.
    #[default]
    Batched,
    /// One statement per violating row, each logged with its id.
    PerRow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanOptions {
    pub fix: bool,
    pub scope: TransactionScope,
    pub granularity: RepairGranularity,
    /// Check that every table and column the catalog touches exists first.
    pub verify_schema: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            fix: false,
            scope: TransactionScope::default(),
            granularity: RepairGranularity::default(),
            verify_schema: true,
        }
    }
}

impl ScanOptions {
    pub fn report() -> Self {
        Self::default()
    }

    pub fn fix() -> Self {
        Self {
            fix: true,
            ..Self::default()
        }
    }

    pub fn with_scope(mut self, scope: TransactionScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_granularity(mut self, granularity: RepairGranularity) -> Self {
        self.granularity = granularity;
        self
    }

    pub fn without_schema_check(mut self) -> Self {
        self.verify_schema = false;
        self
    }
}

/// Resolve the database path: explicit argument, then `FLUPSY_INTEGRITY_DB`,
/// then the platform data directory.
pub fn resolve_db_path(explicit: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    if let Ok(path) = std::env::var(DB_PATH_ENV) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }

    let base = dirs::data_dir()
        .or_else(|| std::env::current_dir().ok())
        .ok_or_else(|| anyhow::anyhow!("failed to resolve application data directory"))?;
    Ok(base.join(APP_DIR_NAME).join(DB_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_report_only_and_per_check() {
        let options = ScanOptions::default();
        assert!(!options.fix);
        assert_eq!(options.scope, TransactionScope::PerCheck);
        assert_eq!(options.granularity, RepairGranularity::Batched);
        assert!(options.verify_schema);
    }

    #[test]
    fn builders_compose() {
        let options = ScanOptions::fix()
            .with_scope(TransactionScope::WholeScan)
            .with_granularity(RepairGranularity::PerRow)
            .without_schema_check();
        assert!(options.fix);
        assert_eq!(options.scope, TransactionScope::WholeScan);
        assert_eq!(options.granularity, RepairGranularity::PerRow);
        assert!(!options.verify_schema);
    }

    #[test]
    fn explicit_path_wins() {
        let path = resolve_db_path(Some(PathBuf::from("/tmp/farm.sqlite3"))).unwrap();
        assert_eq!(path, PathBuf::from("/tmp/farm.sqlite3"));
    }

    #[test]
    fn scope_serialises_snake_case() {
        let json = serde_json::to_string(&TransactionScope::WholeScan).unwrap();
        assert_eq!(json, "\"whole_scan\"");
        assert_eq!(TransactionScope::WholeScan.as_str(), "whole_scan");
    }
}
