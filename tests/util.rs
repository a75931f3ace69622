#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;

use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use flupsy_integrity::integrity::graph::Entity;

/// Farm tables as the CRUD layer creates them. No FOREIGN KEY clauses: the
/// production store does not enforce them either, which is why the scan
/// exists.
pub const FARM_SCHEMA: &[&str] = &[
    "CREATE TABLE flupsys (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
    "CREATE TABLE baskets (
        id INTEGER PRIMARY KEY,
        physical_number INTEGER NOT NULL,
        flupsy_id INTEGER,
        \"row\" TEXT,
        position INTEGER
    )",
    "CREATE TABLE cycles (id INTEGER PRIMARY KEY, basket_id INTEGER NOT NULL, start_date TEXT)",
    "CREATE TABLE sizes (id INTEGER PRIMARY KEY, code TEXT NOT NULL)",
    "CREATE TABLE lots (id INTEGER PRIMARY KEY, supplier TEXT)",
    "CREATE TABLE operations (
        id INTEGER PRIMARY KEY,
        basket_id INTEGER NOT NULL,
        type TEXT NOT NULL DEFAULT 'misura',
        size_id INTEGER,
        lot_id INTEGER
    )",
    "CREATE TABLE screening_operations (
        id INTEGER PRIMARY KEY,
        screening_number INTEGER,
        status TEXT NOT NULL DEFAULT 'in_progress'
    )",
    "CREATE TABLE screening_source_baskets (
        id INTEGER PRIMARY KEY,
        screening_id INTEGER NOT NULL,
        basket_id INTEGER NOT NULL
    )",
    "CREATE TABLE screening_destination_baskets (
        id INTEGER PRIMARY KEY,
        screening_id INTEGER NOT NULL,
        basket_id INTEGER NOT NULL
    )",
    "CREATE TABLE screening_basket_history (
        id INTEGER PRIMARY KEY,
        screening_id INTEGER NOT NULL,
        source_basket_id INTEGER NOT NULL,
        destination_basket_id INTEGER NOT NULL
    )",
    "CREATE TABLE basket_position_history (
        id INTEGER PRIMARY KEY,
        basket_id INTEGER NOT NULL,
        flupsy_id INTEGER NOT NULL,
        \"row\" TEXT,
        position INTEGER,
        start_date TEXT,
        end_date TEXT
    )",
];

/// A small farm with every reference resolving.
pub const CLEAN_FARM: &[&str] = &[
    "INSERT INTO flupsys (id, name) VALUES (1, 'Ca Pisani'), (2, 'Delta Futuro')",
    "INSERT INTO baskets (id, physical_number, flupsy_id, \"row\", position) VALUES
        (1, 101, 1, 'DX', 1),
        (2, 102, 1, 'SX', 2),
        (3, 103, NULL, NULL, NULL)",
    "INSERT INTO basket_position_history (id, basket_id, flupsy_id, \"row\", position, start_date, end_date) VALUES
        (1, 1, 2, 'DX', 4, '2026-01-01', '2026-03-01'),
        (2, 1, 1, 'DX', 1, '2026-03-01', NULL),
        (3, 2, 1, 'SX', 2, '2026-03-01', NULL)",
    "INSERT INTO sizes (id, code) VALUES (1, 'TP-500'), (2, 'TP-1000')",
    "INSERT INTO lots (id, supplier) VALUES (1, 'Zeeland')",
    "INSERT INTO cycles (id, basket_id, start_date) VALUES (1, 1, '2026-03-01'), (2, 2, '2026-03-02')",
    "INSERT INTO operations (id, basket_id, type, size_id, lot_id) VALUES
        (1, 1, 'prima-attivazione', 1, 1),
        (2, 1, 'misura', 2, NULL),
        (3, 2, 'prima-attivazione', NULL, 1)",
    "INSERT INTO screening_operations (id, screening_number, status) VALUES (1, 1, 'completed')",
    "INSERT INTO screening_source_baskets (id, screening_id, basket_id) VALUES (1, 1, 1)",
    "INSERT INTO screening_destination_baskets (id, screening_id, basket_id) VALUES (1, 1, 2)",
    "INSERT INTO screening_basket_history (id, screening_id, source_basket_id, destination_basket_id) VALUES (1, 1, 1, 2)",
];

pub async fn temp_pool() -> SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("connect sqlite::memory:")
}

/// In-memory pool with the farm schema and no rows.
pub async fn farm_pool() -> SqlitePool {
    let pool = temp_pool().await;
    exec_all(&pool, FARM_SCHEMA).await;
    pool
}

/// In-memory pool with the farm schema and [`CLEAN_FARM`] loaded.
pub async fn clean_farm() -> SqlitePool {
    let pool = farm_pool().await;
    exec_all(&pool, CLEAN_FARM).await;
    pool
}

/// Create a file database with the farm schema, then run `extra`.
pub async fn create_farm_file(path: &Path, extra: &[&str]) {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Delete);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("create farm database");
    exec_all(&pool, FARM_SCHEMA).await;
    exec_all(&pool, CLEAN_FARM).await;
    exec_all(&pool, extra).await;
    pool.close().await;
}

pub async fn open_file(path: &Path) -> SqlitePool {
    let options = SqliteConnectOptions::new().filename(path);
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("open farm database")
}

/// Journal mode recorded in the file header, read without changing it.
pub async fn journal_mode(path: &Path) -> String {
    let pool = open_file(path).await;
    let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
        .fetch_one(&pool)
        .await
        .expect("read journal_mode");
    pool.close().await;
    mode.to_lowercase()
}

pub async fn exec(pool: &SqlitePool, sql: &str) {
    sqlx::query(sql)
        .execute(pool)
        .await
        .unwrap_or_else(|err| panic!("{sql}: {err}"));
}

pub async fn exec_all(pool: &SqlitePool, statements: &[&str]) {
    for sql in statements {
        exec(pool, sql).await;
    }
}

pub async fn count(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await
        .unwrap()
}

pub async fn row_exists(pool: &SqlitePool, table: &str, id: i64) -> bool {
    sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {table} WHERE id = ?1"))
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap()
        == 1
}

pub async fn screening_status(pool: &SqlitePool, id: i64) -> String {
    sqlx::query_scalar("SELECT status FROM screening_operations WHERE id = ?1")
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap()
}

/// SHA-256 over every row of every farm table, in id order.
pub async fn farm_checksum(pool: &SqlitePool) -> String {
    let mut hasher = Sha256::new();
    for entity in Entity::ALL {
        let table = entity.table();
        let columns: Vec<String> =
            sqlx::query_scalar("SELECT name FROM pragma_table_info(?1) ORDER BY cid")
                .bind(table)
                .fetch_all(pool)
                .await
                .unwrap();
        let projection = columns
            .iter()
            .map(|column| format!("quote(\"{column}\")"))
            .collect::<Vec<_>>()
            .join(" || '|' || ");
        let rows: Vec<String> =
            sqlx::query_scalar(&format!("SELECT {projection} FROM {table} ORDER BY id"))
                .fetch_all(pool)
                .await
                .unwrap();
        hasher.update(table.as_bytes());
        for row in rows {
            hasher.update(row.as_bytes());
            hasher.update(b"\n");
        }
    }
    format!("{:x}", hasher.finalize())
}

/// Rows whose mandatory reference does not resolve, summed over every
/// mandatory edge.
pub async fn mandatory_violations(pool: &SqlitePool) -> i64 {
    use flupsy_integrity::integrity::graph::{Cardinality, RELATIONS};

    let mut total = 0;
    for relation in RELATIONS
        .iter()
        .filter(|rel| rel.cardinality == Cardinality::Mandatory)
    {
        let sql = format!(
            "SELECT COUNT(*) FROM {child} AS c LEFT JOIN {parent} AS p ON p.id = c.{column} \
             WHERE c.{column} IS NOT NULL AND p.id IS NULL",
            child = relation.child.table(),
            parent = relation.parent.table(),
            column = relation.column,
        );
        let hits: i64 = sqlx::query_scalar(&sql).fetch_one(pool).await.unwrap();
        total += hits;
    }
    total
}

/// Loaded on top of [`CLEAN_FARM`]; trips every check at least once.
///
/// Report-mode counts: orphanedEvents 1, orphanedCycles 1,
/// basketsWithInvalidFlupsy 1, orphanedPositions 2, orphanedSourceLinks 1,
/// orphanedDestinationLinks 1, orphanedHistoryEntries 3,
/// screeningsIncomplete 1, orphanedScreenings 1, danglingSizeReferences 1,
/// danglingLotReferences 1, basketsWithoutActivePosition 1.
pub const MESSY_FARM: &[&str] = &[
    "INSERT INTO operations (id, basket_id, size_id, lot_id) VALUES
        (10, 9999, NULL, NULL),
        (11, 1, 42, NULL),
        (12, 2, NULL, 77)",
    "INSERT INTO cycles (id, basket_id) VALUES (10, 500)",
    "INSERT INTO baskets (id, physical_number, flupsy_id, \"row\", position) VALUES (4, 104, 99, 'DX', 7)",
    "INSERT INTO basket_position_history (id, basket_id, flupsy_id, end_date) VALUES
        (10, 600, 1, NULL),
        (11, 2, 88, '2026-02-01')",
    "INSERT INTO screening_operations (id, screening_number, status) VALUES
        (2, 2, 'in_progress'),
        (3, 3, 'completed')",
    "INSERT INTO screening_source_baskets (id, screening_id, basket_id) VALUES (10, 404, 1)",
    "INSERT INTO screening_destination_baskets (id, screening_id, basket_id) VALUES
        (10, 2, 2),
        (11, 1, 700)",
    "INSERT INTO screening_basket_history (id, screening_id, source_basket_id, destination_basket_id) VALUES
        (10, 404, 1, 2),
        (11, 1, 800, 801)",
];

pub const MESSY_TOTAL_ISSUES: u64 = 15;

/// In-memory pool with [`CLEAN_FARM`] and [`MESSY_FARM`] loaded.
pub async fn messy_farm() -> SqlitePool {
    let pool = clean_farm().await;
    exec_all(&pool, MESSY_FARM).await;
    pool
}
