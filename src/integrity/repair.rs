use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use super::graph::{Entity, Relation};
use super::scanner::quote_ident;
use crate::config::RepairGranularity;
use crate::{AppError, AppResult};

/// Ids bound per statement in batched mode; stays well under SQLite's
/// host-parameter limit.
pub const MAX_BATCH: usize = 500;

/// Corrective action paired with a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RepairPolicy {
    /// Delete the violating rows. Rows in `cascade` that point at them are
    /// deleted first so the deletion does not leave new orphans behind.
    Delete {
        entity: Entity,
        cascade: &'static [Relation],
    },
    /// Set the listed columns to NULL on the violating rows.
    Nullify {
        entity: Entity,
        columns: &'static [&'static str],
    },
    /// Move the violating rows to a terminal status.
    SetStatus {
        entity: Entity,
        column: &'static str,
        value: &'static str,
    },
    ReportOnly,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairOutcome {
    /// Violating rows actually changed or removed.
    pub repaired: u64,
    /// Dependent rows removed on the way.
    pub cascaded: u64,
}

impl RepairPolicy {
    pub fn label(&self) -> &'static str {
        match self {
            RepairPolicy::Delete { .. } => "delete",
            RepairPolicy::Nullify { .. } => "nullify",
            RepairPolicy::SetStatus { .. } => "set_status",
            RepairPolicy::ReportOnly => "report_only",
        }
    }

    pub fn mutates(&self) -> bool {
        !matches!(self, RepairPolicy::ReportOnly)
    }

    /// Apply the policy to `ids` and return how many rows it touched.
    ///
    /// Every statement is keyed by id, so ids that vanished since the scan
    /// are skipped without error and simply not counted.
    pub async fn apply(
        &self,
        conn: &mut SqliteConnection,
        ids: &[i64],
        granularity: RepairGranularity,
    ) -> AppResult<RepairOutcome> {
        let mut outcome = RepairOutcome::default();
        if ids.is_empty() || !self.mutates() {
            return Ok(outcome);
        }

        let chunk_size = match granularity {
            RepairGranularity::Batched => MAX_BATCH,
            RepairGranularity::PerRow => 1,
        };

        for chunk in ids.chunks(chunk_size) {
            if granularity == RepairGranularity::PerRow {
                tracing::debug!(
                    target: "flupsy_integrity",
                    event = "integrity_repair_row",
                    policy = self.label(),
                    table = self.table().unwrap_or_default(),
                    id = chunk[0]
                );
            }

            match self {
                RepairPolicy::Delete { entity, cascade } => {
                    for relation in cascade.iter() {
                        let mut qb = QueryBuilder::<Sqlite>::new(format!(
                            "DELETE FROM {}",
                            quote_ident(relation.child.table())
                        ));
                        push_in_clause(&mut qb, relation.column, chunk);
                        outcome.cascaded += execute(conn, qb, relation.child, "cascade").await?;
                    }
                    let mut qb = QueryBuilder::<Sqlite>::new(format!(
                        "DELETE FROM {}",
                        quote_ident(entity.table())
                    ));
                    push_in_clause(&mut qb, "id", chunk);
                    outcome.repaired += execute(conn, qb, *entity, "delete").await?;
                }
                RepairPolicy::Nullify { entity, columns } => {
                    let assignments = columns
                        .iter()
                        .map(|column| format!("{} = NULL", quote_ident(column)))
                        .collect::<Vec<_>>()
                        .join(", ");
                    let mut qb = QueryBuilder::<Sqlite>::new(format!(
                        "UPDATE {} SET {assignments}",
                        quote_ident(entity.table())
                    ));
                    push_in_clause(&mut qb, "id", chunk);
                    outcome.repaired += execute(conn, qb, *entity, "nullify").await?;
                }
                RepairPolicy::SetStatus {
                    entity,
                    column,
                    value,
                } => {
                    let mut qb = QueryBuilder::<Sqlite>::new(format!(
                        "UPDATE {} SET {} = ",
                        quote_ident(entity.table()),
                        quote_ident(column)
                    ));
                    qb.push_bind(*value);
                    push_in_clause(&mut qb, "id", chunk);
                    outcome.repaired += execute(conn, qb, *entity, "set_status").await?;
                }
                RepairPolicy::ReportOnly => {}
            }
        }

        Ok(outcome)
    }

    fn table(&self) -> Option<&'static str> {
        match self {
            RepairPolicy::Delete { entity, .. }
            | RepairPolicy::Nullify { entity, .. }
            | RepairPolicy::SetStatus { entity, .. } => Some(entity.table()),
            RepairPolicy::ReportOnly => None,
        }
    }
}

fn push_in_clause(qb: &mut QueryBuilder<'_, Sqlite>, column: &str, ids: &[i64]) {
    qb.push(format!(" WHERE {} IN (", quote_ident(column)));
    let mut separated = qb.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(")");
}

async fn execute(
    conn: &mut SqliteConnection,
    mut qb: QueryBuilder<'_, Sqlite>,
    entity: Entity,
    step: &str,
) -> AppResult<u64> {
    let result = qb.build().execute(&mut *conn).await.map_err(|err| {
        AppError::from(err)
            .with_context("operation", "integrity_repair")
            .with_context("step", step)
            .with_context("table", entity.table())
    })?;
    Ok(result.rows_affected())
}
