//! Command-line runner for the AmoebaCRM contact sync.
//!
//! Usage:
//!   amoeba --config amoeba.toml push
//!   amoeba --config amoeba.toml pull --page-size 100
//!   amoeba import leads.json

use amoeba_store::{LeadStore, SqliteStore};
use amoeba_sync::{
    AmoebaConnector, CrmConnector, IntegrationConfig, LeadFieldInfo, PullParams, PullReport,
    PushReport, ReqwestClient, engine_from_config,
};
use amoeba_types::{FieldSet, LocalId, LocalRecord};
use anyhow::{Context, Result, bail};
use clap::builder::RangedU64ValueParser;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "amoeba")]
#[command(about = "Sync local leads with AmoebaCRM contacts")]
pub struct Args {
    /// Path to the integration config
    #[arg(short, long, default_value = "amoeba.toml")]
    pub config: PathBuf,

    /// Enable verbose debug logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Push every lead that is new or already linked
    Push,
    /// Pull contacts into the local store
    Pull {
        /// Contacts per page, overriding sync.pull_page_size
        #[arg(long, value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
        page_size: Option<usize>,
    },
    /// Push one stored lead
    PushLead { id: LocalId },
    /// List the lead fields the CRM exposes
    Fields,
    /// Insert local leads from a JSON array of objects
    Import { file: PathBuf },
}

/// Installs the fmt subscriber. `RUST_LOG` wins unless `--verbose` is set.
pub fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

pub async fn run(args: Args) -> Result<()> {
    let config = IntegrationConfig::from_file(&args.config)?;
    let store = open_store(&config)?;

    if let Command::Import { file } = &args.command {
        let count = import_leads(store.as_ref(), file)?;
        println!("imported {count} leads");
        return Ok(());
    }

    let connector = build_connector(&config, store.clone())?;
    match args.command {
        Command::Push => {
            let report = cancel_on_interrupt(&connector, connector.push_leads()).await?;
            println!("{}", render_push(&report));
        }
        Command::Pull { page_size } => {
            let params = PullParams { page_size };
            let report = cancel_on_interrupt(&connector, connector.get_leads(params)).await?;
            println!("{}", render_pull(&report));
        }
        Command::PushLead { id } => {
            let lead = store
                .get_lead(id)?
                .with_context(|| format!("no lead with id {id}"))?;
            if !connector.push_lead(LocalRecord::Managed(lead)).await {
                bail!("lead {id} was not confirmed by the CRM");
            }
            println!("lead {id} synced");
        }
        Command::Fields => {
            let fields = connector.available_lead_fields().await;
            if fields.is_empty() {
                bail!("the CRM returned no lead fields");
            }
            print!("{}", render_fields(&fields));
        }
        Command::Import { .. } => {}
    }
    Ok(())
}

/// Opens the SQLite store named by `database.path`.
pub fn open_store(config: &IntegrationConfig) -> Result<Arc<SqliteStore>> {
    let path = &config.database.path;
    let path_str = path
        .to_str()
        .with_context(|| format!("database path {} is not valid UTF-8", path.display()))?;
    let store = SqliteStore::new(path_str)
        .with_context(|| format!("failed to open database {}", path.display()))?;
    Ok(Arc::new(store))
}

pub fn build_connector(
    config: &IntegrationConfig,
    store: Arc<SqliteStore>,
) -> Result<AmoebaConnector> {
    let http = ReqwestClient::new(config.sync.timeout(), config.keys.access_token.clone())
        .context("failed to build HTTP client")?;
    let engine = engine_from_config(config, Arc::new(http), store);
    info!(instance = config.instance_url(), "connector ready");
    Ok(AmoebaConnector::new(Arc::new(engine)))
}

/// Runs `pass`, cancelling the engine on Ctrl-C. Records not yet started
/// are counted as ignored.
async fn cancel_on_interrupt<F, T>(connector: &AmoebaConnector, pass: F) -> T
where
    F: Future<Output = T>,
{
    let engine = connector.engine().clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling pass");
            engine.cancel();
        }
    });
    let out = pass.await;
    watcher.abort();
    out
}

// ── Import ───────────────────────────────────────────────────────

/// Parses an import file: a JSON array of flat objects.
///
/// Strings are kept, numbers and booleans are stringified and nulls are
/// skipped. Nested values and empty objects are rejected.
pub fn parse_import(text: &str) -> Result<Vec<FieldSet>> {
    let value: Value = serde_json::from_str(text).context("import file is not valid JSON")?;
    let Value::Array(items) = value else {
        bail!("import file must hold a JSON array of objects");
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            let Value::Object(map) = item else {
                bail!("entry {index} is not an object");
            };
            let mut fields = FieldSet::new();
            for (key, value) in map {
                let text = match value {
                    Value::Null => continue,
                    Value::String(s) => s,
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => bail!("entry {index}: field {key} is not a scalar"),
                };
                fields.insert(key, text);
            }
            if fields.is_empty() {
                bail!("entry {index} has no fields");
            }
            Ok(fields)
        })
        .collect()
}

/// Inserts every lead in the file in one batch. Nothing is inserted if the
/// file is invalid or the store rejects any lead.
pub fn import_leads(store: &dyn LeadStore, path: &Path) -> Result<usize> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let leads = parse_import(&text).with_context(|| format!("invalid import file {}", path.display()))?;
    let inserted = store
        .insert_leads(leads)
        .with_context(|| format!("failed to import {}", path.display()))?;
    info!(count = inserted.len(), "imported leads");
    Ok(inserted.len())
}

// ── Output ───────────────────────────────────────────────────────

pub fn render_push(report: &PushReport) -> String {
    format!(
        "push: total={} updated={} created={} errors={} ignored={}",
        report.total, report.updated, report.created, report.errors, report.ignored
    )
}

pub fn render_pull(report: &PullReport) -> String {
    let mut line = format!(
        "pull: fetched={} updated={} created={} unchanged={} errors={} ignored={}",
        report.fetched,
        report.updated,
        report.created,
        report.unchanged,
        report.errors,
        report.ignored
    );
    if report.truncated {
        line.push_str(" (truncated)");
    }
    line
}

/// One line per field: key, label, and `*` for required fields.
pub fn render_fields(fields: &BTreeMap<String, LeadFieldInfo>) -> String {
    fields
        .iter()
        .map(|(key, info)| {
            let marker = if info.required { " *" } else { "" };
            format!("{key:<24} {}{marker}\n", info.label)
        })
        .collect()
}
