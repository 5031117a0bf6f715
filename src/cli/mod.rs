//! Command-line interface for formflow.
//!
//! Thin wrapper over the orchestrator library: starting runs, checking
//! status, validating account configs, and resolving paused runs.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use uuid::Uuid;

use crate::adapters::{DriverAdapter, FormAdapter, ScriptedAdapter};
use crate::config::AccountConfig;
use crate::core::{CancelToken, Orchestrator, SignupFlow};
use crate::domain::{ErrorKind, RunState, RunStatus};

/// formflow - Resumable form-fill-and-submit automation engine
#[derive(Parser, Debug)]
#[command(name = "formflow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a new signup run
    CreateAccount {
        /// Account configuration file (JSON field values)
        config: PathBuf,

        /// Flow name (will look for <flows-dir>/<name>.yaml)
        #[arg(short, long, default_value = "aws-signup")]
        flow: String,

        /// Run ID (generated if not provided)
        #[arg(long)]
        run_id: Option<Uuid>,

        /// Execute against a scripted adapter instead of the driver
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate an account configuration file
    Validate {
        /// Account configuration file
        config: PathBuf,
    },

    /// Check the status of a run
    Status {
        /// Run ID (UUID)
        run_id: Uuid,
    },

    /// List recent runs
    Runs {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Resolve a paused run's unconfirmed outcome
    Resolve {
        /// Run ID to resolve
        run_id: Uuid,

        /// Whether the unconfirmed action is safe to retry (transient)
        /// or must not be repeated (terminal)
        #[arg(value_enum)]
        resolution: Resolution,
    },

    /// Resume a paused or interrupted run
    Resume {
        /// Run ID to resume
        run_id: Uuid,

        /// Account configuration file (JSON field values)
        config: PathBuf,

        /// Flow name
        #[arg(short, long, default_value = "aws-signup")]
        flow: String,

        /// Execute against a scripted adapter instead of the driver
        #[arg(long)]
        dry_run: bool,
    },

    /// Show resolved configuration (debug)
    Config,
}

/// External resolution of an `Unknown` outcome
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Resolution {
    /// The action did not take effect; retrying is safe
    Transient,
    /// The action must not be repeated; fail the run
    Terminal,
}

impl From<Resolution> for ErrorKind {
    fn from(resolution: Resolution) -> Self {
        match resolution {
            Resolution::Transient => ErrorKind::Transient,
            Resolution::Terminal => ErrorKind::Terminal,
        }
    }
}

impl Cli {
    /// Execute the parsed command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::CreateAccount {
                config,
                flow,
                run_id,
                dry_run,
            } => {
                let run_id = run_id.unwrap_or_else(Uuid::new_v4);
                run_flow(run_id, &config, &flow, dry_run).await
            }

            Commands::Validate { config } => {
                AccountConfig::from_file(&config)?;
                println!("Configuration valid: {}", config.display());
                Ok(())
            }

            Commands::Status { run_id } => {
                let orchestrator = Orchestrator::new()?;
                let run = orchestrator.status(run_id)?;
                print_run(&run);
                Ok(())
            }

            Commands::Runs { limit } => {
                let orchestrator = Orchestrator::new()?;
                let runs = orchestrator.list_runs(limit)?;

                if runs.is_empty() {
                    println!("No runs found");
                    return Ok(());
                }

                for run in runs {
                    println!(
                        "{}  {:<9}  {}  {} step(s) completed",
                        run.run_id,
                        status_label(&run.status),
                        run.flow_name,
                        run.completed_steps.len(),
                    );
                }
                Ok(())
            }

            Commands::Resolve { run_id, resolution } => {
                let orchestrator = Orchestrator::new()?;
                let run = orchestrator.resolve(run_id, resolution.into())?;
                println!("Run {} resolved; resume it to continue", run.run_id);
                print_run(&run);
                Ok(())
            }

            Commands::Resume {
                run_id,
                config,
                flow,
                dry_run,
            } => run_flow(run_id, &config, &flow, dry_run).await,

            Commands::Config => {
                let config = crate::config::config()?;
                println!("home:   {}", config.home.display());
                println!("flows:  {}", config.flows.display());
                match &config.config_file {
                    Some(path) => println!("config: {}", path.display()),
                    None => println!("config: (none found)"),
                }
                match &config.driver {
                    Some(driver) => println!("driver: {} {}", driver.command, driver.args.join(" ")),
                    None => println!("driver: (not configured)"),
                }
                Ok(())
            }
        }
    }
}

/// Load the flow and account config, pick an adapter, and drive the run
/// to its next stop. Ctrl-C pauses at the next step boundary.
async fn run_flow(run_id: Uuid, config: &PathBuf, flow_name: &str, dry_run: bool) -> Result<()> {
    let account = AccountConfig::from_file(config)?;
    let flow = load_flow(flow_name)?;
    let adapter = build_adapter(dry_run)?;

    let cancel = CancelToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupt received; pausing at the next step boundary");
            signal_token.cancel();
        }
    });

    let orchestrator = Orchestrator::new()?;
    let run = orchestrator
        .execute(run_id, &flow, &account, adapter.as_ref(), &cancel)
        .await?;

    print_run(&run);
    Ok(())
}

/// Look up a flow definition by name under the flows directory
fn load_flow(name: &str) -> Result<SignupFlow> {
    let path = crate::config::flows_dir()?.join(format!("{}.yaml", name));
    let flow = SignupFlow::from_file(&path)
        .with_context(|| format!("Flow '{}' not found at {}", name, path.display()))?;
    flow.validate()?;
    Ok(flow)
}

fn build_adapter(dry_run: bool) -> Result<Box<dyn FormAdapter>> {
    if dry_run {
        return Ok(Box::new(ScriptedAdapter::always_success()));
    }

    let driver = crate::config::config()?
        .driver
        .clone()
        .context("No driver configured; set driver.command in .formflow/config.yaml or use --dry-run")?;

    Ok(Box::new(
        DriverAdapter::new(driver.command).with_args(driver.args),
    ))
}

fn status_label(status: &RunStatus) -> &'static str {
    match status {
        RunStatus::Pending => "pending",
        RunStatus::Running => "running",
        RunStatus::Paused { .. } => "paused",
        RunStatus::Succeeded => "succeeded",
        RunStatus::Failed { .. } => "failed",
    }
}

/// Print the terminal run report as JSON for the surrounding tooling
fn print_run(run: &RunState) {
    match serde_json::to_string_pretty(&run.report()) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to render run report: {}", e),
    }
}
