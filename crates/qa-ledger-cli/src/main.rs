use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use qa_ledger_core::SyncConfig;
use qa_ledger_store_sqlite::SqliteStore;
use qa_ledger_sync::{CancelFlag, RunOutcome, SnapshotSource, SourceClient, Synchronizer};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";
const LOG_ENV: &str = "QAL_LOG";

#[derive(Debug, Parser)]
#[command(name = "qal")]
#[command(about = "QA Ledger: test-management synchronization CLI")]
struct Cli {
    #[arg(long, default_value = "./qa_ledger.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    Sync(SyncArgs),
    Report {
        #[command(subcommand)]
        command: ReportCommand,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
    IntegrityCheck,
    Export(DbExportArgs),
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct DbExportArgs {
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Args)]
struct SyncArgs {
    /// JSON snapshot of one source system.
    #[arg(long)]
    snapshot: PathBuf,
    /// YAML sync configuration; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Project keys to synchronize; overrides the configuration.
    #[arg(long = "project")]
    projects: Vec<String>,
}

#[derive(Debug, Subcommand)]
enum ReportCommand {
    Counts,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Command::Db { command } => {
            let mut store = SqliteStore::open(&cli.db)?;
            run_db(command, &mut store)
        }
        Command::Sync(args) => run_sync(&cli.db, &args),
        Command::Report { command } => {
            let mut store = SqliteStore::open(&cli.db)?;
            run_report(&command, &mut store)
        }
    }
}

fn run_db(command: DbCommand, store: &mut SqliteStore) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => run_db_schema_version(store),
        DbCommand::Migrate(args) => run_db_migrate(&args, store),
        DbCommand::IntegrityCheck => run_db_integrity_check(store),
        DbCommand::Export(args) => run_db_export(&args, store),
    }
}

fn run_db_schema_version(store: &SqliteStore) -> Result<()> {
    let status = store.schema_status()?;
    emit_json(serde_json::json!({
        "current_version": status.current_version,
        "target_version": status.target_version,
        "pending_versions": status.pending_versions,
        "up_to_date": status.pending_versions.is_empty()
    }))
}

fn run_db_migrate(args: &DbMigrateArgs, store: &mut SqliteStore) -> Result<()> {
    let before = store.schema_status()?;
    if args.dry_run {
        return emit_json(serde_json::json!({
            "dry_run": true,
            "current_version": before.current_version,
            "target_version": before.target_version,
            "would_apply_versions": before.pending_versions
        }));
    }

    store.migrate()?;
    let after = store.schema_status()?;
    emit_json(serde_json::json!({
        "dry_run": false,
        "before_version": before.current_version,
        "applied_versions": before.pending_versions,
        "after_version": after.current_version,
        "up_to_date": after.pending_versions.is_empty()
    }))
}

fn run_db_integrity_check(store: &SqliteStore) -> Result<()> {
    let report = store.integrity_check()?;
    emit_json(serde_json::to_value(&report).context("failed to serialize integrity report")?)
}

fn run_db_export(args: &DbExportArgs, store: &mut SqliteStore) -> Result<()> {
    store.migrate()?;
    let manifest = store.export_snapshot(&args.out)?;
    emit_json(serde_json::json!({
        "out_dir": args.out,
        "manifest": manifest
    }))
}

fn load_config(args: &SyncArgs, source: &SnapshotSource) -> Result<SyncConfig> {
    let mut config = match args.config.as_ref() {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            SyncConfig::from_yaml_str(&raw)
                .with_context(|| format!("invalid config {}", path.display()))?
        }
        None => SyncConfig::default(),
    };

    if !args.projects.is_empty() {
        config.projects.clone_from(&args.projects);
    }
    if config.projects.is_empty() {
        config.projects = source.project_keys();
    }
    Ok(config)
}

fn run_sync(db: &Path, args: &SyncArgs) -> Result<()> {
    let source = SnapshotSource::from_path(&args.snapshot)?;
    let config = load_config(args, &source)?;
    tracing::debug!(snapshot = %args.snapshot.display(), system = %source.system(), projects = ?config.projects, "sync configured");
    let synchronizer = Synchronizer::new(db, config)?;

    let report = synchronizer.run(&source, &CancelFlag::new())?;
    emit_json(serde_json::to_value(&report).context("failed to serialize run report")?)?;

    if report.outcome == RunOutcome::Failed {
        return Err(anyhow!(
            "sync run {} failed: {}",
            report.run_id,
            report
                .error
                .as_deref()
                .or_else(|| report.units.iter().find_map(|unit| unit.error.as_deref()))
                .unwrap_or("unknown error")
        ));
    }
    Ok(())
}

fn run_report(command: &ReportCommand, store: &mut SqliteStore) -> Result<()> {
    store.migrate()?;
    match command {
        ReportCommand::Counts => {
            let counts = store
                .counts()?
                .into_iter()
                .map(|(kind, count)| (kind.as_str().to_string(), Value::from(count)))
                .collect::<serde_json::Map<_, _>>();
            emit_json(serde_json::json!({ "counts": counts }))
        }
    }
}
