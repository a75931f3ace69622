use std::collections::BTreeSet;

use serde::Serialize;
use sqlx::SqliteConnection;

use super::graph::required_columns;
use crate::{AppError, AppResult};

/// Tables and columns the checks need but the store lacks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaGaps {
    pub missing_tables: Vec<String>,
    /// `table.column` pairs on tables that do exist.
    pub missing_columns: Vec<String>,
}

impl SchemaGaps {
    pub fn is_empty(&self) -> bool {
        self.missing_tables.is_empty() && self.missing_columns.is_empty()
    }

    fn into_error(self) -> AppError {
        let mut error = AppError::new(
            AppError::SCHEMA_MISMATCH_CODE,
            "Database schema is missing tables or columns required by the integrity checks",
        )
        .with_context("operation", "verify_schema");
        if !self.missing_tables.is_empty() {
            error = error.with_context("missing_tables", self.missing_tables.join(","));
        }
        if !self.missing_columns.is_empty() {
            error = error.with_context("missing_columns", self.missing_columns.join(","));
        }
        error
    }
}

/// Compare the live schema against what the graph requires.
pub async fn inspect_schema(conn: &mut SqliteConnection) -> AppResult<SchemaGaps> {
    let mut gaps = SchemaGaps::default();
    for (table, required) in required_columns() {
        let present: BTreeSet<String> =
            sqlx::query_scalar::<_, String>("SELECT name FROM pragma_table_info(?1)")
                .bind(table)
                .fetch_all(&mut *conn)
                .await
                .map_err(|err| {
                    AppError::from(err)
                        .with_context("operation", "table_info")
                        .with_context("table", table)
                })?
                .into_iter()
                .collect();

        if present.is_empty() {
            gaps.missing_tables.push(table.to_string());
            continue;
        }
        gaps.missing_columns.extend(
            required
                .iter()
                .filter(|column| !present.contains(**column))
                .map(|column| format!("{table}.{column}")),
        );
    }
    Ok(gaps)
}

/// Fail with `INTEGRITY/SCHEMA_MISMATCH` unless every required table and
/// column exists.
pub async fn verify_schema(conn: &mut SqliteConnection) -> AppResult<()> {
    let gaps = inspect_schema(conn).await?;
    if gaps.is_empty() {
        return Ok(());
    }
    tracing::error!(
        target: "flupsy_integrity",
        event = "schema_mismatch",
        missing_tables = ?gaps.missing_tables,
        missing_columns = ?gaps.missing_columns
    );
    Err(gaps.into_error())
}
