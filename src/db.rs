use std::path::Path;

use anyhow::{Context, Result as AnyResult};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{ConnectOptions, Pool, Sqlite, SqlitePool};

use crate::integrity::report::ScanMode;

/// Open the farm database for an integrity scan.
///
/// The database must already exist; the scan never creates schema. A single
/// connection is enough since checks run sequentially.
///
/// Report mode opens the file read-only and leaves its journal mode as
/// found. Only fix mode switches to WAL with full sync.
pub async fn open_sqlite_pool(db_path: &Path, mode: ScanMode) -> AnyResult<SqlitePool> {
    if !db_path.exists() {
        anyhow::bail!("database not found: {}", db_path.display());
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(false)
        .log_statements(log::LevelFilter::Off);
    let options = match mode {
        ScanMode::Fix => options
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full),
        ScanMode::Report => options.read_only(true),
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .after_connect(|conn, _| {
            Box::pin(async move {
                sqlx::query("PRAGMA busy_timeout = 5000;")
                    .execute(&mut *conn)
                    .await?;
                Ok::<_, sqlx::Error>(())
            })
        })
        .connect_with(options)
        .await
        .with_context(|| format!("open sqlite database at {}", db_path.display()))?;

    tracing::info!(
        target: "flupsy_integrity",
        event = "db_path",
        path = %db_path.display(),
        mode = mode.as_str()
    );
    log_effective_pragmas(&pool, mode).await;

    Ok(pool)
}

async fn log_effective_pragmas(pool: &Pool<Sqlite>, mode: ScanMode) {
    use tracing::{info, warn};

    let (sqlite_ver,): (String,) = sqlx::query_as("select sqlite_version()")
        .fetch_one(pool)
        .await
        .unwrap_or((String::from("unknown"),));

    let jm: (String,) = sqlx::query_as("PRAGMA journal_mode;")
        .fetch_one(pool)
        .await
        .unwrap_or((String::from("unknown"),));

    let fks: (i64,) = sqlx::query_as("PRAGMA foreign_keys;")
        .fetch_one(pool)
        .await
        .unwrap_or((i64::MIN,));

    let busy: (i64,) = sqlx::query_as("PRAGMA busy_timeout;")
        .fetch_one(pool)
        .await
        .unwrap_or((i64::MIN,));

    info!(
        target: "flupsy_integrity",
        event = "db_open",
        sqlite_version = %sqlite_ver,
        journal_mode = %jm.0,
        foreign_keys = %fks.0,
        busy_timeout_ms = %busy.0
    );

    if mode == ScanMode::Fix && !jm.0.eq_ignore_ascii_case("wal") {
        warn!(
            target: "flupsy_integrity",
            event = "db_open_warning",
            msg = "journal_mode != WAL; repairs run with reduced crash safety"
        );
    }
}
