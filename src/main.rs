use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::json;

use flupsy_integrity::commands::ErrorEnvelope;
use flupsy_integrity::config::resolve_db_path;
use flupsy_integrity::db::open_sqlite_pool;
use flupsy_integrity::integrity::catalog::CATALOG;
use flupsy_integrity::integrity::graph::{
    relations_from, relations_to, Cardinality, Entity, RELATIONS,
};
use flupsy_integrity::integrity::schema::inspect_schema;
use flupsy_integrity::{
    format_human_summary, IntegrityEngine, IntegrityReport, RepairGranularity, ScanMode,
    ScanOptions, TransactionScope,
};

/// Exit code when a report-mode scan or schema check finds problems.
const FINDINGS_EXIT_CODE: i32 = 2;

#[derive(Debug, Parser)]
#[command(
    name = "flupsy-integrity",
    about = "Referential integrity checks for the FLUPSY farm database",
    version
)]
struct Cli {
    /// Also write JSON logs to a daily-rolling file in this directory.
    #[arg(long, value_name = "PATH", global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the twelve integrity checks, optionally repairing what they find.
    Check(CheckArgs),
    /// Print the entity graph and the check catalog.
    Graph {
        #[arg(long)]
        json: bool,
    },
    /// Verify that every table and column the checks need exists.
    Schema {
        #[arg(long, value_name = "PATH")]
        db: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Args)]
struct CheckArgs {
    #[arg(long, value_name = "PATH")]
    db: Option<PathBuf>,

    /// Apply repairs. Without this flag the store is never written.
    #[arg(long)]
    fix: bool,

    /// Emit the raw JSON report instead of the summary table.
    #[arg(long)]
    json: bool,

    /// Run every check in one transaction; any failure rolls back all repairs.
    #[arg(long)]
    single_transaction: bool,

    /// Issue one statement per repaired row and log each id.
    #[arg(long)]
    per_row: bool,

    #[arg(long)]
    skip_schema_check: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = {
        let _guard = match flupsy_integrity::logging::init(cli.log_dir.as_deref()) {
            Ok(guard) => guard,
            Err(err) => {
                eprintln!("Error: {err:#}");
                process::exit(1);
            }
        };
        match handle_cli(cli.command).await {
            Ok(code) => code,
            Err(err) => {
                eprintln!("Error: {err:#}");
                1
            }
        }
    };

    process::exit(code);
}

async fn handle_cli(command: Command) -> Result<i32> {
    match command {
        Command::Check(args) => handle_check(args).await,
        Command::Graph { json } => handle_graph(json),
        Command::Schema { db, json } => handle_schema(db, json).await,
    }
}

async fn handle_check(args: CheckArgs) -> Result<i32> {
    let db_path = resolve_db_path(args.db).context("determine database path")?;
    let pool = open_sqlite_pool(&db_path, ScanMode::from_fix(args.fix)).await?;

    let mut options = if args.fix {
        ScanOptions::fix()
    } else {
        ScanOptions::report()
    };
    if args.single_transaction {
        options = options.with_scope(TransactionScope::WholeScan);
    }
    if args.per_row {
        options = options.with_granularity(RepairGranularity::PerRow);
    }
    if args.skip_schema_check {
        options = options.without_schema_check();
    }

    let result = IntegrityEngine::new(&pool, options).run().await;
    pool.close().await;

    let report = match result {
        Ok(report) => report,
        Err(err) => {
            if args.json {
                let envelope = ErrorEnvelope::internal(err);
                let json = serde_json::to_string_pretty(&envelope)
                    .context("serialize error envelope")?;
                println!("{json}");
            } else {
                eprintln!("Error: {err}");
            }
            return Ok(1);
        }
    };

    if args.json {
        print_report_json(&report)?;
    } else {
        print!("{}", format_human_summary(&report));
    }

    Ok(exit_code(&report))
}

fn exit_code(report: &IntegrityReport) -> i32 {
    match report.mode {
        ScanMode::Report if !report.is_clean() => FINDINGS_EXIT_CODE,
        _ => 0,
    }
}

fn print_report_json(report: &IntegrityReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("serialize integrity report")?;
    println!("{json}");
    Ok(())
}

fn handle_graph(as_json: bool) -> Result<i32> {
    if as_json {
        let entities: Vec<_> = Entity::ALL
            .iter()
            .map(|entity| {
                json!({
                    "entity": entity,
                    "table": entity.table(),
                    "label": entity.label(),
                    "references": relations_from(*entity)
                        .map(|rel| rel.to_string())
                        .collect::<Vec<_>>(),
                    "referencedBy": relations_to(*entity).count(),
                })
            })
            .collect();
        let checks: Vec<_> = CATALOG
            .iter()
            .map(|spec| {
                json!({
                    "key": spec.key,
                    "title": spec.key.title(),
                    "subject": spec.detection.subject().table(),
                    "repair": spec.repair,
                })
            })
            .collect();
        let value = json!({
            "entities": entities,
            "relations": RELATIONS,
            "checks": checks,
        });
        let json = serde_json::to_string_pretty(&value).context("serialize entity graph")?;
        println!("{json}");
        return Ok(0);
    }

    println!("Relations:");
    for entity in Entity::ALL {
        for relation in relations_from(entity) {
            let cardinality = match relation.cardinality {
                Cardinality::Mandatory => "mandatory",
                Cardinality::Optional => "optional",
            };
            println!("  {:<58} {}", relation.to_string(), cardinality);
        }
    }

    println!("\nReferenced by:");
    for entity in Entity::ALL {
        let incoming = relations_to(entity).count();
        if incoming > 0 {
            println!("  {:<30} {incoming}", entity.table());
        }
    }

    println!("\nChecks:");
    println!("  {:>2}  {:<30} {:<26} Repair", "#", "Key", "Table");
    for (index, spec) in CATALOG.iter().enumerate() {
        println!(
            "  {:>2}  {:<30} {:<26} {}",
            index + 1,
            spec.key.as_str(),
            spec.detection.subject().table(),
            spec.repair.label()
        );
    }
    Ok(0)
}

async fn handle_schema(db: Option<PathBuf>, as_json: bool) -> Result<i32> {
    let db_path = resolve_db_path(db).context("determine database path")?;
    let pool = open_sqlite_pool(&db_path, ScanMode::Report).await?;
    let gaps = {
        let mut conn = pool.acquire().await.context("acquire connection")?;
        inspect_schema(&mut conn).await?
    };
    pool.close().await;

    if as_json {
        let json = serde_json::to_string_pretty(&gaps).context("serialize schema gaps")?;
        println!("{json}");
    } else if gaps.is_empty() {
        println!("schema OK");
    } else {
        for table in &gaps.missing_tables {
            println!("missing table:  {table}");
        }
        for column in &gaps.missing_columns {
            println!("missing column: {column}");
        }
    }

    Ok(if gaps.is_empty() { 0 } else { FINDINGS_EXIT_CODE })
}
