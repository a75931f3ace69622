//! Caller-facing entry points: turn a raw `fix` flag into a scan and map
//! failures onto a status-coded envelope.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use thiserror::Error;
use ts_rs::TS;

use crate::integrity::report::IntegrityReport;
use crate::integrity::run_integrity_check as run_scan;
use crate::AppError;

pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_INTERNAL_ERROR: u16 = 500;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("fix must be `true` or `false`, got `{0}`")]
    InvalidFixFlag(String),
}

impl From<RequestError> for AppError {
    fn from(error: RequestError) -> Self {
        match &error {
            RequestError::InvalidFixFlag(raw) => {
                AppError::new(AppError::INVALID_FIX_FLAG_CODE, error.to_string())
                    .with_context("fix", raw.clone())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../target/ts-bindings/")]
pub struct IntegrityRequest {
    #[serde(default)]
    pub fix: bool,
}

impl IntegrityRequest {
    /// Parse the `fix` query value. Absent means report mode.
    pub fn from_query(raw: Option<&str>) -> Result<Self, RequestError> {
        let Some(raw) = raw else {
            return Ok(Self::default());
        };
        let value = raw.trim();
        let fix = if value.eq_ignore_ascii_case("true") {
            true
        } else if value.eq_ignore_ascii_case("false") {
            false
        } else {
            return Err(RequestError::InvalidFixFlag(raw.to_string()));
        };
        Ok(Self { fix })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../target/ts-bindings/")]
pub struct ErrorEnvelope {
    pub status: u16,
    pub error: AppError,
}

impl ErrorEnvelope {
    pub fn bad_request(error: impl Into<AppError>) -> Self {
        Self {
            status: STATUS_BAD_REQUEST,
            error: error.into(),
        }
    }

    pub fn internal(error: impl Into<AppError>) -> Self {
        Self {
            status: STATUS_INTERNAL_ERROR,
            error: error.into(),
        }
    }
}

/// Run the scan for a parsed request. Any failure is a 500; repairs already
/// committed by earlier checks are not undone.
pub async fn run_integrity_check(
    pool: &SqlitePool,
    request: IntegrityRequest,
) -> Result<IntegrityReport, ErrorEnvelope> {
    run_scan(pool, request.fix)
        .await
        .map_err(ErrorEnvelope::internal)
}

/// Parse the raw flag and run the scan. A malformed flag never reaches the
/// store.
pub async fn handle_integrity_query(
    pool: &SqlitePool,
    fix: Option<&str>,
) -> Result<IntegrityReport, ErrorEnvelope> {
    let request = IntegrityRequest::from_query(fix).map_err(|err| {
        tracing::warn!(
            target: "flupsy_integrity",
            event = "integrity_request_rejected",
            fix = fix.unwrap_or_default()
        );
        ErrorEnvelope::bad_request(err)
    })?;
    run_integrity_check(pool, request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_flag_defaults_to_report() {
        assert!(!IntegrityRequest::from_query(None).unwrap().fix);
    }

    #[test]
    fn accepts_booleans_in_any_case() {
        assert!(IntegrityRequest::from_query(Some("true")).unwrap().fix);
        assert!(IntegrityRequest::from_query(Some("TRUE")).unwrap().fix);
        assert!(!IntegrityRequest::from_query(Some(" False ")).unwrap().fix);
    }

    #[test]
    fn rejects_anything_else() {
        for raw in ["1", "yes", "", "fix"] {
            let err = IntegrityRequest::from_query(Some(raw)).unwrap_err();
            assert_eq!(err, RequestError::InvalidFixFlag(raw.to_string()));
            let app: AppError = err.into();
            assert_eq!(app.code(), AppError::INVALID_FIX_FLAG_CODE);
            assert_eq!(app.context().get("fix"), Some(&raw.to_string()));
        }
    }

    #[test]
    fn request_deserialises_with_default() {
        let request: IntegrityRequest = serde_json::from_str("{}").unwrap();
        assert!(!request.fix);
        let request: IntegrityRequest = serde_json::from_str(r#"{"fix":true}"#).unwrap();
        assert!(request.fix);
    }

    #[tokio::test]
    async fn malformed_flag_is_a_bad_request() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let envelope = handle_integrity_query(&pool, Some("maybe"))
            .await
            .unwrap_err();
        assert_eq!(envelope.status, STATUS_BAD_REQUEST);
        assert_eq!(envelope.error.code(), AppError::INVALID_FIX_FLAG_CODE);
    }

    #[tokio::test]
    async fn store_failure_is_an_internal_error() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        // Empty database: schema verification fails before any check runs.
        let envelope = handle_integrity_query(&pool, Some("false"))
            .await
            .unwrap_err();
        assert_eq!(envelope.status, STATUS_INTERNAL_ERROR);
        assert_eq!(envelope.error.code(), AppError::SCHEMA_MISMATCH_CODE);
    }
}
