//! Read-only orphan detection: LEFT JOIN child to parent and keep the rows
//! whose non-null reference found no parent.

use std::collections::BTreeSet;

use sqlx::SqliteConnection;

use super::graph::Relation;
use crate::{AppError, AppResult};

const OPERATION: &str = "orphan_scan";

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn orphan_query(select: &str, child_table: &str, column: &str, parent_table: &str) -> String {
    let child = quote_ident(child_table);
    let parent = quote_ident(parent_table);
    let column = quote_ident(column);
    format!(
        "SELECT {select} FROM {child} AS c \
         LEFT JOIN {parent} AS p ON p.id = c.{column} \
         WHERE c.{column} IS NOT NULL AND p.id IS NULL"
    )
}

fn scan_error(err: sqlx::Error, child_table: &str, column: &str, parent_table: &str) -> AppError {
    AppError::from(err).with_contexts([
        ("operation", OPERATION),
        ("child", child_table),
        ("column", column),
        ("parent", parent_table),
    ])
}

/// Ids of `child_table` rows whose `column` points at a missing `parent_table`
/// row, in ascending order. Null references are never reported.
///
/// Table and column names are interpolated into SQL, so callers must pass
/// names from the static graph only.
pub async fn find_orphans(
    conn: &mut SqliteConnection,
    child_table: &str,
    column: &str,
    parent_table: &str,
) -> AppResult<Vec<i64>> {
    let sql = format!(
        "{} ORDER BY c.id",
        orphan_query("c.id", child_table, column, parent_table)
    );
    sqlx::query_scalar::<_, i64>(&sql)
        .fetch_all(&mut *conn)
        .await
        .map_err(|err| scan_error(err, child_table, column, parent_table))
}

pub async fn find_orphans_for(
    conn: &mut SqliteConnection,
    relation: &Relation,
) -> AppResult<Vec<i64>> {
    find_orphans(
        conn,
        relation.child.table(),
        relation.column,
        relation.parent.table(),
    )
    .await
}

/// Like [`find_orphans_for`] but only counts, for scans that will not repair.
pub async fn count_orphans(conn: &mut SqliteConnection, relation: &Relation) -> AppResult<u64> {
    let child_table = relation.child.table();
    let parent_table = relation.parent.table();
    let sql = orphan_query("COUNT(*)", child_table, relation.column, parent_table);
    let count = sqlx::query_scalar::<_, i64>(&sql)
        .fetch_one(&mut *conn)
        .await
        .map_err(|err| scan_error(err, child_table, relation.column, parent_table))?;
    Ok(count.max(0) as u64)
}

/// Result of scanning several edges of the same child table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrphanScan {
    /// Distinct violating ids, ascending.
    pub ids: Vec<i64>,
    /// Per-edge hit counts, in scan order.
    pub sub_counts: Vec<(Relation, u64)>,
}

impl OrphanScan {
    /// Sum of the per-edge counts. A row broken on two edges counts twice.
    pub fn found(&self) -> u64 {
        self.sub_counts.iter().map(|(_, count)| count).sum()
    }
}

/// Scan each relation in turn and merge the hits.
pub async fn scan_relations<'r>(
    conn: &mut SqliteConnection,
    relations: impl IntoIterator<Item = &'r Relation>,
) -> AppResult<OrphanScan> {
    let mut ids = BTreeSet::new();
    let mut sub_counts = Vec::new();
    for relation in relations {
        let hits = find_orphans_for(conn, relation).await?;
        sub_counts.push((*relation, hits.len() as u64));
        ids.extend(hits);
    }
    Ok(OrphanScan {
        ids: ids.into_iter().collect(),
        sub_counts,
    })
}
