//! # Flussu Timed Call
//!
//! Fires due timed calls against the Flussu workflow engine. Meant to be run
//! by a system timer; each invocation makes one pass and exits.
//!
//! Usage:
//!   flussu run                                   # One dispatcher pass (cron entry point)
//!   flussu add --workflow 123 --delay 10         # Schedule a call
//!   flussu list --limit 20                       # Show recent calls
//!   flussu session --id S1 --expires-in 30       # Register a session expiry
//!   flussu config timedcall.base_url             # Dot-notation config lookup

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use flussu_core::FlussuConfig;
use flussu_scheduler::record::{offset_minutes, parse_timestamp};
use flussu_scheduler::{
    DispatchSettings, Dispatcher, FileAuditSink, NewWorkRecord, SqliteStore, TransportRegistry,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flussu", version, about = "⏰ Flussu timed-call dispatcher")]
struct Cli {
    /// Config file (default: $FLUSSU_CONFIG or ~/.flussu/config.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines (for journald / log shippers)
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Dispatch every due call once, then exit
    Run {
        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Schedule a new timed call
    Add {
        /// Workflow to start
        #[arg(long)]
        workflow: Option<String>,
        /// Session to resume (wins over --workflow)
        #[arg(long)]
        session: Option<String>,
        /// Block to jump to
        #[arg(long)]
        block: Option<String>,
        /// Extra query data, e.g. '$name=John'
        #[arg(long)]
        data: Option<String>,
        /// Minutes to wait after --at
        #[arg(long, default_value = "0")]
        delay: i64,
        /// Baseline time (RFC 3339, default: now)
        #[arg(long)]
        at: Option<String>,
    },
    /// List recent timed calls
    List {
        #[arg(long, default_value = "20")]
        limit: usize,
        /// One JSON object per line
        #[arg(long)]
        json: bool,
    },
    /// Register or refresh a session expiry
    Session {
        #[arg(long)]
        id: String,
        /// Minutes from now until the session expires
        #[arg(long)]
        expires_in: i64,
    },
    /// Print a config value by dotted key
    Config { key: String },
}

fn load_config(path: Option<&str>) -> Result<FlussuConfig> {
    let config = match path {
        Some(p) => FlussuConfig::load_from(&PathBuf::from(shellexpand::tilde(p).to_string()))?,
        None => FlussuConfig::load()?,
    };
    Ok(config)
}

fn open_store(config: &FlussuConfig) -> Result<Arc<SqliteStore>> {
    let db_path = config.database.expanded_path();
    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("cannot open work-record store {}", db_path.display()))?;
    Ok(Arc::new(store))
}

/// Due time for `add`; rejects delays past the supported time range.
fn due_time(scheduled_at: DateTime<Utc>, delay: i64) -> Result<DateTime<Utc>> {
    offset_minutes(scheduled_at, delay).with_context(|| {
        format!(
            "--delay {delay} minutes from {} is out of range",
            scheduled_at.to_rfc3339()
        )
    })
}

/// Session expiry `expires_in` minutes after `now`.
fn session_expiry(now: DateTime<Utc>, expires_in: i64) -> Result<DateTime<Utc>> {
    offset_minutes(now, expires_in)
        .with_context(|| format!("--expires-in {expires_in} minutes is out of range"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "flussu=debug,flussu_scheduler=debug"
    } else {
        "flussu=info,flussu_scheduler=info"
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    if cli.log_json {
        tracing_subscriber::fmt().json().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    let config = load_config(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Run { json: false }) {
        Command::Run { json } => {
            let store = open_store(&config)?;
            let registry = TransportRegistry::from_config(&config.timedcall)?;
            let transport = registry.get(&config.timedcall.transport)?;
            let audit = Arc::new(FileAuditSink::new(&config.timedcall.expanded_log_path()));

            let dispatcher = Dispatcher::new(
                store.clone(),
                store,
                transport,
                audit,
                DispatchSettings::from_config(&config.timedcall),
            );
            let report = dispatcher.run_once().await?;

            if json {
                println!("{}", serde_json::to_string(&report)?);
            } else {
                println!(
                    "⏰ {} candidate(s): {} dispatched ({} ok, {} error), {} not due, {} skipped",
                    report.candidates,
                    report.claimed,
                    report.dispatched_ok,
                    report.dispatched_err,
                    report.skipped_not_due,
                    report.already_claimed + report.claim_failed
                );
            }
        }
        Command::Add {
            workflow,
            session,
            block,
            data,
            delay,
            at,
        } => {
            if workflow.is_none() && session.is_none() {
                anyhow::bail!("either --workflow or --session is required");
            }
            let scheduled_at = match at.as_deref() {
                Some(raw) => {
                    parse_timestamp(raw).with_context(|| format!("invalid --at timestamp '{raw}'"))?
                }
                None => Utc::now(),
            };
            let due = due_time(scheduled_at, delay)?;
            let store = open_store(&config)?;
            let id = store.insert(&NewWorkRecord {
                scheduled_at: Some(scheduled_at),
                delay_minutes: delay,
                session_ref: session,
                workflow_ref: workflow,
                block_ref: block,
                extra_data: data,
            })?;
            tracing::info!("📅 Timed call scheduled: {} (due {})", id, due.to_rfc3339());
            println!("{id}");
        }
        Command::List { limit, json } => {
            let store = open_store(&config)?;
            for rec in store.list(limit)? {
                if json {
                    println!("{}", serde_json::to_string(&rec)?);
                    continue;
                }
                let target = match (&rec.session_ref, &rec.workflow_ref) {
                    (Some(sid), _) => format!("session {sid}"),
                    (None, Some(wid)) => format!("workflow {wid}"),
                    (None, None) => "-".to_string(),
                };
                let due = rec
                    .due_at()
                    .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "out of range".to_string());
                println!(
                    "#{:<6} due {:<16}  {:<24} {:<8} {}",
                    rec.sequence_id,
                    due,
                    target,
                    if rec.enabled { "pending" } else { "done" },
                    rec.result.as_deref().unwrap_or("")
                );
            }
        }
        Command::Session { id, expires_in } => {
            let store = open_store(&config)?;
            let expires_at = session_expiry(Utc::now(), expires_in)?;
            store.upsert_session(&id, expires_at)?;
            println!("✅ Session {id} expires at {}", expires_at.to_rfc3339());
        }
        Command::Config { key } => {
            let value = config
                .lookup(&key)
                .with_context(|| format!("no config value at '{key}'"))?;
            match value {
                toml::Value::String(s) => println!("{s}"),
                other => println!("{other}"),
            }
        }
    }

    Ok(())
}
