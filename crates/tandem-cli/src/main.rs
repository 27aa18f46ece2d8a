//! CLI for tandem.
//!
//! Handles single register/decide/record requests, batch replay of recorded
//! requests, the out-of-band parameter update, and read-only inspection of
//! the store. Command output goes to stdout; logs go to stderr.

mod config;
mod logging;
mod replay;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tandem_core::{short_id, DecisionKey, Policy, PolicyParameters};
use tandem_service::{
    seed_priors, Api, ApiResponse, DecisionSink, HttpForwarder, NoopSink, Operation,
    ServiceOptions, Services,
};
use tandem_store::{EntityStore, LocalStore};
use tandem_training::UpdateJob;
use time::OffsetDateTime;

use crate::config::AppConfig;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the JSON config file (missing file = defaults)
    #[arg(long, global = true, default_value = "tandem.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Seed the policy's prior parameters if the store has none
    Init,
    /// Register a participant unit
    Register {
        /// Request body file (default: stdin)
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Request a decision
    Decide {
        /// Request body file (default: stdin)
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Record the outcome of a decision
    Record {
        /// Request body file (default: stdin)
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Replay recorded requests from a JSON-lines file
    Replay {
        /// Input file path
        #[arg(long)]
        path: PathBuf,

        /// Start from line number (0-based) - overrides state
        #[arg(long)]
        line_offset: Option<u64>,

        /// Path to the state file
        #[arg(long, default_value = "data/tandem.replay.state.json")]
        state_file: PathBuf,
    },
    /// Compute new policy parameters from recorded outcomes
    Update {
        /// Who asked for the update (kept in the audit trail)
        #[arg(long, default_value = "cli")]
        requested_by: String,
    },
    /// Print stored records
    Show {
        #[command(subcommand)]
        target: ShowTarget,
    },
}

#[derive(Subcommand)]
enum ShowTarget {
    /// A stored decision
    Decision {
        #[arg(long)]
        unit: String,
        #[arg(long)]
        index: u64,
    },
    /// A stored outcome
    Outcome {
        #[arg(long)]
        unit: String,
        #[arg(long)]
        index: u64,
    },
    /// The latest parameter snapshot
    Parameters,
    /// The audit trail of parameter updates
    Updates,
}

struct App {
    config: AppConfig,
    store: Arc<LocalStore>,
    policy: Arc<dyn Policy>,
}

impl App {
    fn open(config: AppConfig) -> Result<Self> {
        let store = LocalStore::open_json(&config.store_path)
            .with_context(|| format!("Failed to open store {}", config.store_path.display()))?;
        let policy: Arc<dyn Policy> = Arc::from(config.policy.kind.build(config.policy.rl_seed));
        Ok(Self {
            config,
            store: Arc::new(store),
            policy,
        })
    }

    /// Builds the request API. The returned forwarder, if any, must be
    /// waited on before the process exits.
    fn api(&self) -> Result<(Api, Option<Arc<HttpForwarder>>)> {
        let forwarder = match &self.config.forward_url {
            Some(url) => Some(Arc::new(
                HttpForwarder::new(url, self.config.forward_token.clone())
                    .context("Invalid forward configuration")?,
            )),
            None => None,
        };
        let sink: Arc<dyn DecisionSink> = match &forwarder {
            Some(f) => Arc::clone(f) as Arc<dyn DecisionSink>,
            None => Arc::new(NoopSink),
        };
        let options = ServiceOptions {
            require_prior_decision: self.config.require_prior_decision,
            schema: self.config.schema.clone(),
        };
        let services = Services::new(self.store.clone(), Arc::clone(&self.policy), sink, options);
        Ok((Api::new(services), forwarder))
    }

    fn init(&self) -> Result<bool> {
        match &self.config.priors {
            Some(priors) => {
                if self.store.latest_parameters()?.is_some() {
                    return Ok(false);
                }
                self.store
                    .insert_parameters(PolicyParameters::new(priors.clone()))?;
                Ok(true)
            }
            None => Ok(seed_priors(self.store.as_ref(), self.policy.as_ref())?),
        }
    }

    fn backup(&self) -> Result<PathBuf> {
        let stem = self
            .config
            .store_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("store");
        let dest = self.config.backup_dir().join(format!(
            "{stem}.{}.{}.json",
            OffsetDateTime::now_utc().unix_timestamp(),
            short_id()
        ));
        self.store
            .backup_to(&dest)
            .with_context(|| format!("Failed to back up store to {}", dest.display()))?;
        Ok(dest)
    }
}

fn read_body(input: Option<&Path>) -> Result<Value> {
    match input {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("Failed to open input {}", path.display()))?;
            serde_json::from_reader(file).context("Input is not valid JSON")
        }
        None => {
            let mut raw = String::new();
            io::stdin()
                .read_to_string(&mut raw)
                .context("Failed to read stdin")?;
            serde_json::from_str(&raw).context("Input is not valid JSON")
        }
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn handle_request(app: &App, op: Operation, input: Option<&Path>) -> Result<()> {
    let body = read_body(input)?;
    let (api, forwarder) = app.api()?;
    let response: ApiResponse = api.handle(op, &body);
    if let Some(f) = forwarder {
        f.wait();
    }
    print_json(&response)?;
    if !response.is_success() {
        anyhow::bail!("{} failed with status {}", op.as_str(), response.status);
    }
    Ok(())
}

fn show(app: &App, target: ShowTarget) -> Result<()> {
    match target {
        ShowTarget::Decision { unit, index } => {
            let record = app
                .store
                .decision(&DecisionKey::new(unit.clone(), index))?
                .with_context(|| format!("No decision for unit {unit} at index {index}"))?;
            print_json(&record)
        }
        ShowTarget::Outcome { unit, index } => {
            let record = app
                .store
                .interaction(&DecisionKey::new(unit.clone(), index))?
                .with_context(|| format!("No outcome for unit {unit} at index {index}"))?;
            print_json(&record)
        }
        ShowTarget::Parameters => {
            let snapshot = app
                .store
                .latest_parameters()?
                .context("No parameter snapshot; run `tandem init` first")?;
            print_json(&snapshot)
        }
        ShowTarget::Updates => print_json(&app.store.update_requests()?),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(&cli.config)?;
    config.apply_env();
    logging::init_tracing(&config.log_filter)?;

    let app = App::open(config)?;

    match cli.command {
        Commands::Init => {
            let seeded = app.init()?;
            let snapshot = app
                .store
                .latest_parameters()?
                .context("Store has no parameter snapshot after init")?;
            print_json(&serde_json::json!({
                "seeded": seeded,
                "policy": app.policy.name(),
                "parameters": snapshot,
            }))?;
        }
        Commands::Register { input } => handle_request(&app, Operation::Register, input.as_deref())?,
        Commands::Decide { input } => handle_request(&app, Operation::Decide, input.as_deref())?,
        Commands::Record { input } => handle_request(&app, Operation::Record, input.as_deref())?,
        Commands::Replay {
            path,
            line_offset,
            state_file,
        } => {
            let mut offset = line_offset.unwrap_or(0);
            if line_offset.is_none() {
                if let Some(state) = replay::ReplayState::load(&state_file, &path)? {
                    offset = state.line_offset;
                    tracing::info!(offset, "resuming replay from state");
                }
            }

            let (api, forwarder) = app.api()?;
            let result = replay::run(&api, &path, offset, &state_file);
            if let Some(f) = forwarder {
                f.wait();
            }
            print_json(&result?)?;
        }
        Commands::Update { requested_by } => {
            if app.config.backup_before_update {
                let dest = app.backup()?;
                tracing::info!(backup = %dest.display(), "store backed up");
            }
            let job = UpdateJob::new(app.store.clone(), Arc::clone(&app.policy));
            let report = job.run(&requested_by).context("Parameter update failed")?;
            print_json(&report)?;
        }
        Commands::Show { target } => show(&app, target)?,
    }

    Ok(())
}
