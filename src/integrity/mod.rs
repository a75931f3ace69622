//! Referential integrity scan over the farm database.
//!
//! [`IntegrityEngine::run`] walks [`catalog::CATALOG`] in order. Each check
//! queries the live store, and in fix mode applies its repair policy on the
//! same connection before the next check runs, so later checks always see
//! the effect of earlier repairs.

use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use sqlx::{Connection, SqliteConnection, SqlitePool};
use tracing::{error, info};

pub mod catalog;
pub mod graph;
pub mod repair;
pub mod report;
pub mod scanner;
pub mod schema;

use crate::config::{ScanOptions, TransactionScope};
use crate::{AppError, AppResult};
use catalog::{CheckKey, CheckSpec, Detection, Edges, CATALOG};
use graph::{
    Entity, Relation, ScreeningStatus, DESTINATION_SCREENING, POSITION_BASKET, POSITION_END_COLUMN,
    SCREENING_STATUS_COLUMN, SOURCE_SCREENING,
};
use report::{CheckOutcome, IntegrityReport, IssueCounts, ScanMode, SubCount};
use scanner::quote_ident;

const LOG_TARGET: &str = "flupsy_integrity";

/// Rows flagged by one detection, before any repair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Detected {
    /// Distinct ids in the detection's subject table, ascending. Empty when
    /// an orphan scan only counted.
    pub ids: Vec<i64>,
    /// Reported count; sums sub-checks, so it can exceed `ids.len()`.
    pub found: u64,
    pub sub_counts: Vec<SubCount>,
}

impl Detected {
    fn from_ids(ids: Vec<i64>) -> Self {
        let found = ids.len() as u64;
        Detected {
            ids,
            found,
            sub_counts: Vec::new(),
        }
    }
}

/// Run one detection against the current state of `conn`.
pub async fn detect(conn: &mut SqliteConnection, detection: &Detection) -> AppResult<Detected> {
    match detection {
        Detection::Orphans(edges) => {
            let scan = scanner::scan_relations(conn, edges.iter()).await?;
            let found = scan.found();
            Ok(Detected {
                ids: scan.ids,
                found,
                sub_counts: breakdown(edges, &scan.sub_counts),
            })
        }
        Detection::IncompleteScreenings { status } => {
            incomplete_screenings(conn, *status).await.map(Detected::from_ids)
        }
        Detection::UnlinkedScreenings => unlinked_screenings(conn).await.map(Detected::from_ids),
        Detection::MissingActivePosition => {
            baskets_without_active_position(conn).await.map(Detected::from_ids)
        }
    }
}

/// Counts what [`detect`] would find without collecting orphan ids.
///
/// Used when nothing will be repaired. `ids` is left empty for orphan scans.
pub async fn tally(conn: &mut SqliteConnection, detection: &Detection) -> AppResult<Detected> {
    let Detection::Orphans(edges) = detection else {
        return detect(conn, detection).await;
    };
    let mut counts = Vec::new();
    for relation in edges.iter() {
        counts.push((*relation, scanner::count_orphans(conn, relation).await?));
    }
    Ok(Detected {
        ids: Vec::new(),
        found: counts.iter().map(|(_, count)| count).sum(),
        sub_counts: breakdown(edges, &counts),
    })
}

// Single-edge checks carry no breakdown.
fn breakdown(edges: &Edges, counts: &[(Relation, u64)]) -> Vec<SubCount> {
    if edges.is_single() {
        return Vec::new();
    }
    counts
        .iter()
        .map(|(relation, count)| SubCount {
            relation: relation.to_string(),
            count: *count,
        })
        .collect()
}

async fn incomplete_screenings(
    conn: &mut SqliteConnection,
    status: ScreeningStatus,
) -> AppResult<Vec<i64>> {
    let sql = format!(
        "SELECT s.id FROM {screenings} AS s \
         LEFT JOIN {links} AS l ON l.{link_column} = s.id \
         WHERE s.{status_column} = ?1 \
         GROUP BY s.id \
         HAVING COUNT(l.id) = 0 \
         ORDER BY s.id",
        screenings = quote_ident(Entity::Screening.table()),
        links = quote_ident(SOURCE_SCREENING.child.table()),
        link_column = quote_ident(SOURCE_SCREENING.column),
        status_column = quote_ident(SCREENING_STATUS_COLUMN),
    );
    sqlx::query_scalar::<_, i64>(&sql)
        .bind(status.as_str())
        .fetch_all(&mut *conn)
        .await
        .map_err(|err| AppError::from(err).with_context("table", Entity::Screening.table()))
}

/// Link counts are read per screening at call time, so links removed by
/// earlier checks in the same pass are already gone from the totals.
async fn unlinked_screenings(conn: &mut SqliteConnection) -> AppResult<Vec<i64>> {
    let sql = format!(
        "SELECT s.id, \
           (SELECT COUNT(*) FROM {sources} AS src WHERE src.{source_column} = s.id), \
           (SELECT COUNT(*) FROM {destinations} AS dst WHERE dst.{destination_column} = s.id) \
         FROM {screenings} AS s \
         ORDER BY s.id",
        sources = quote_ident(SOURCE_SCREENING.child.table()),
        source_column = quote_ident(SOURCE_SCREENING.column),
        destinations = quote_ident(DESTINATION_SCREENING.child.table()),
        destination_column = quote_ident(DESTINATION_SCREENING.column),
        screenings = quote_ident(Entity::Screening.table()),
    );
    let rows: Vec<(i64, i64, i64)> = sqlx::query_as(&sql)
        .fetch_all(&mut *conn)
        .await
        .map_err(|err| AppError::from(err).with_context("table", Entity::Screening.table()))?;

    Ok(rows
        .into_iter()
        .filter(|(_, sources, destinations)| *sources == 0 && *destinations == 0)
        .map(|(id, _, _)| id)
        .collect())
}

async fn baskets_without_active_position(conn: &mut SqliteConnection) -> AppResult<Vec<i64>> {
    let sql = format!(
        "SELECT b.id FROM {baskets} AS b \
         WHERE b.{flupsy_column} IS NOT NULL \
           AND NOT EXISTS ( \
             SELECT 1 FROM {positions} AS h \
             WHERE h.{position_basket} = b.id AND h.{end_column} IS NULL \
           ) \
         ORDER BY b.id",
        baskets = quote_ident(Entity::Basket.table()),
        flupsy_column = quote_ident(graph::BASKET_FLUPSY.column),
        positions = quote_ident(POSITION_BASKET.child.table()),
        position_basket = quote_ident(POSITION_BASKET.column),
        end_column = quote_ident(POSITION_END_COLUMN),
    );
    sqlx::query_scalar::<_, i64>(&sql)
        .fetch_all(&mut *conn)
        .await
        .map_err(|err| AppError::from(err).with_context("table", Entity::Basket.table()))
}

fn check_error(err: AppError, key: CheckKey, step: &str) -> AppError {
    err.with_contexts([
        ("operation", "integrity_scan"),
        ("check", key.as_str()),
        ("step", step),
    ])
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}

/// Runs the check catalog against an injected pool.
pub struct IntegrityEngine<'a> {
    pool: &'a SqlitePool,
    options: ScanOptions,
}

impl<'a> IntegrityEngine<'a> {
    pub fn new(pool: &'a SqlitePool, options: ScanOptions) -> Self {
        IntegrityEngine { pool, options }
    }

    /// Run all twelve checks and build the report.
    ///
    /// A failing check aborts the scan and no report is returned. Under
    /// [`TransactionScope::PerCheck`] repairs from checks that already
    /// finished stay committed; under [`TransactionScope::WholeScan`] they
    /// are rolled back with the rest.
    pub async fn run(&self) -> AppResult<IntegrityReport> {
        let mode = ScanMode::from_fix(self.options.fix);
        info!(
            target: LOG_TARGET,
            event = "integrity_scan_start",
            mode = mode.as_str(),
            scope = self.options.scope.as_str()
        );

        match self.run_inner(mode).await {
            Ok(report) => {
                info!(
                    target: LOG_TARGET,
                    event = "integrity_scan_complete",
                    mode = mode.as_str(),
                    total_issues = report.total_issues,
                    total_fixed = report.total_fixed,
                    duration_ms = report.duration_ms
                );
                Ok(report)
            }
            Err(err) => {
                error!(
                    target: LOG_TARGET,
                    event = "integrity_scan_failed",
                    mode = mode.as_str(),
                    code = %err.code(),
                    error = %err
                );
                Err(err)
            }
        }
    }

    async fn run_inner(&self, mode: ScanMode) -> AppResult<IntegrityReport> {
        let started = Instant::now();
        let mut pooled = self.pool.acquire().await.map_err(|err| {
            AppError::from(err).with_contexts([("operation", "integrity_scan"), ("step", "acquire")])
        })?;
        let conn: &mut SqliteConnection = &mut pooled;

        if self.options.verify_schema {
            schema::verify_schema(conn).await?;
        }

        let mut checks = Vec::with_capacity(CATALOG.len());
        match self.options.scope {
            TransactionScope::PerCheck => {
                for spec in CATALOG.iter() {
                    let mut tx = conn
                        .begin()
                        .await
                        .map_err(|err| check_error(err.into(), spec.key, "begin"))?;
                    let outcome = self.run_check(&mut tx, spec).await?;
                    self.finish(tx, spec.key).await?;
                    checks.push(outcome);
                }
            }
            TransactionScope::WholeScan => {
                let mut tx = conn.begin().await.map_err(|err| {
                    AppError::from(err)
                        .with_contexts([("operation", "integrity_scan"), ("step", "begin")])
                })?;
                for spec in CATALOG.iter() {
                    checks.push(self.run_check(&mut tx, spec).await?);
                }
                self.finish(tx, CheckKey::BasketsWithoutActivePosition).await?;
            }
        }

        let mut issues = IssueCounts::default();
        for outcome in &checks {
            issues.set(outcome.key, outcome.found);
        }
        let total_fixed = if mode == ScanMode::Fix {
            checks.iter().map(|outcome| outcome.fixed).sum()
        } else {
            0
        };

        Ok(IntegrityReport {
            mode,
            total_issues: issues.total(),
            issues,
            total_fixed,
            checks,
            transaction_scope: self.options.scope,
            generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            duration_ms: elapsed_ms(started),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    /// Commit in fix mode; report mode always rolls back.
    async fn finish(
        &self,
        tx: sqlx::Transaction<'_, sqlx::Sqlite>,
        last: CheckKey,
    ) -> AppResult<()> {
        let result = if self.options.fix {
            tx.commit().await
        } else {
            tx.rollback().await
        };
        result.map_err(|err| check_error(err.into(), last, "commit"))
    }

    async fn run_check(
        &self,
        conn: &mut SqliteConnection,
        spec: &CheckSpec,
    ) -> AppResult<CheckOutcome> {
        let started = Instant::now();
        let repairs = self.options.fix && spec.repair.mutates();
        let detected = if repairs {
            detect(conn, &spec.detection).await
        } else {
            tally(conn, &spec.detection).await
        }
        .map_err(|err| check_error(err, spec.key, "scan"))?;

        let mut fixed = 0;
        let mut cascaded = 0;
        if repairs && !detected.ids.is_empty() {
            let outcome = spec
                .repair
                .apply(conn, &detected.ids, self.options.granularity)
                .await
                .map_err(|err| check_error(err, spec.key, "repair"))?;
            fixed = outcome.repaired;
            cascaded = outcome.cascaded;
        }

        let duration_ms = elapsed_ms(started);
        info!(
            target: LOG_TARGET,
            event = "integrity_check",
            check = spec.key.as_str(),
            found = detected.found,
            fixed,
            cascaded,
            policy = spec.repair.label(),
            duration_ms,
            "{}: {} found",
            spec.key.title(),
            detected.found
        );

        Ok(CheckOutcome {
            key: spec.key,
            title: spec.key.title().to_string(),
            policy: spec.repair.label().to_string(),
            found: detected.found,
            fixed,
            cascaded,
            sub_counts: detected.sub_counts,
            duration_ms,
        })
    }
}

/// Scan with default options, repairing when `fix` is set.
pub async fn run_integrity_check(pool: &SqlitePool, fix: bool) -> AppResult<IntegrityReport> {
    let options = if fix {
        ScanOptions::fix()
    } else {
        ScanOptions::report()
    };
    IntegrityEngine::new(pool, options).run().await
}
