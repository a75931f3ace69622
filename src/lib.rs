//! Referential integrity verification and repair for the FLUPSY farm
//! database.
//!
//! The engine walks the farm's foreign-key graph, reports violations per
//! check and, when asked, repairs them. Report mode never writes.

pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod integrity;
pub mod logging;

pub use config::{RepairGranularity, ScanOptions, TransactionScope};
pub use error::{AppError, AppResult};
pub use integrity::catalog::CheckKey;
pub use integrity::report::{format_human_summary, IntegrityReport, IssueCounts, ScanMode};
pub use integrity::{run_integrity_check, IntegrityEngine};
