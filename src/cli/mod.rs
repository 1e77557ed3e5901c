//! Command-line interface for k8helper.
//!
//! Provides commands for asking questions in natural language, running
//! explicit kubectl commands under supervision, validating commands
//! against the safety policy, and managing that policy.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::adapters::{HttpPlanner, Planner, StaticPlanner};
use crate::config::{self, load_policy_overrides, save_policy_overrides};
use crate::core::{Orchestrator, Policy, PolicyOverrides, SubmitOptions};
use crate::domain::TaskStatus;

pub mod render;

/// k8helper - natural-language Kubernetes assistant
#[derive(Parser, Debug)]
#[command(name = "k8helper")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ask a question; the planner turns it into kubectl commands
    Ask {
        /// The request, e.g. "show pods in prod that are not ready"
        #[arg(required = true)]
        query: Vec<String>,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Run explicit command lines as a plan (one argument per step)
    Exec {
        #[arg(required = true)]
        commands: Vec<String>,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Classify a command without running it
    Validate {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,

        /// Print the verdict as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show or update the safety policy
    Policy {
        #[command(subcommand)]
        command: PolicyCommands,
    },

    /// Show resolved configuration (debug)
    Config,
}

/// Options shared by `ask` and `exec`
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Task id (random if not given)
    #[arg(long)]
    pub task_id: Option<String>,

    /// Corrected re-attempts allowed per step
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Continue with later steps after a step fails
    #[arg(long)]
    pub keep_going: bool,

    /// Print the task result as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum PolicyCommands {
    /// Print the effective policy
    Show {
        #[arg(long)]
        json: bool,
    },

    /// Replace custom additions; defaults are never removed
    Set {
        /// Extra dangerous commands
        #[arg(long = "dangerous", value_delimiter = ',', num_args = 1..)]
        dangerous: Option<Vec<String>>,

        /// Extra always-allowed kubectl verbs
        #[arg(long = "safe", value_delimiter = ',', num_args = 1..)]
        safe: Option<Vec<String>>,

        /// Extra resources `create` may target
        #[arg(long = "create", value_delimiter = ',', num_args = 1..)]
        create: Option<Vec<String>>,

        /// Extra resources `apply` may target
        #[arg(long = "apply", value_delimiter = ',', num_args = 1..)]
        apply: Option<Vec<String>>,

        /// Extra resources `scale` may target
        #[arg(long = "scale", value_delimiter = ',', num_args = 1..)]
        scale: Option<Vec<String>>,

        /// Extra shell utilities allowed in pipelines
        #[arg(long = "shell-utility", value_delimiter = ',', num_args = 1..)]
        shell_utility: Option<Vec<String>>,

        /// Allow every command
        #[arg(long)]
        super_admin: Option<bool>,

        /// Allow compound shell lines
        #[arg(long)]
        shell_commands: Option<bool>,
    },
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Ask { query, run } => ask(&query.join(" "), run).await,
            Commands::Exec { commands, run } => exec(commands, run).await,
            Commands::Validate { command, json } => validate(&command.join(" "), json),
            Commands::Policy { command } => match command {
                PolicyCommands::Show { json } => show_policy(json),
                PolicyCommands::Set {
                    dangerous,
                    safe,
                    create,
                    apply,
                    scale,
                    shell_utility,
                    super_admin,
                    shell_commands,
                } => set_policy(PolicyOverrides {
                    dangerous_commands: dangerous,
                    safe_commands: safe,
                    create_resources: create,
                    apply_resources: apply,
                    scale_resources: scale,
                    safe_shell_utilities: shell_utility,
                    super_admin_mode: super_admin,
                    shell_commands_enabled: shell_commands,
                }),
            },
            Commands::Config => show_config(),
        }
    }
}

/// Plan with the configured HTTP planner and run the task
async fn ask(query: &str, run: RunArgs) -> Result<()> {
    let cfg = config::config()?;
    let planner = HttpPlanner::from_settings(&cfg.planner)?;
    run_task(Arc::new(planner), query, run).await
}

/// Run the given commands as a fixed plan
async fn exec(commands: Vec<String>, run: RunArgs) -> Result<()> {
    let query = commands.join("\n");
    let planner = StaticPlanner::from_commands(&commands);
    run_task(Arc::new(planner), &query, run).await
}

async fn run_task(planner: Arc<dyn Planner>, query: &str, run: RunArgs) -> Result<()> {
    let cfg = config::config()?;
    let orchestrator = Orchestrator::from_config(cfg, planner);

    let task_id = run.task_id.unwrap_or_else(Orchestrator::new_task_id);
    let options = SubmitOptions {
        max_retries: run.max_retries,
        stop_on_first_failure: run.keep_going.then_some(false),
    };

    let submit = orchestrator.submit_with(query, &task_id, options);
    tokio::pin!(submit);

    let result = tokio::select! {
        result = &mut submit => result,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\n[Cancelling task {}]", task_id);
            orchestrator.cancel(&task_id);
            submit.await
        }
    };
    let result = result.with_context(|| format!("Task {} failed", task_id))?;

    if run.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("Failed to serialize task result")?
        );
    } else {
        render::print_result(&result);
    }

    match result.status {
        TaskStatus::Completed if result.success => {
            eprintln!("[Task {} completed]", result.task_id);
        }
        TaskStatus::Cancelled => {
            eprintln!("[Task {} cancelled]", result.task_id);
            std::process::exit(1);
        }
        _ => {
            eprintln!("[Task {} failed]", result.task_id);
            std::process::exit(1);
        }
    }

    Ok(())
}

fn current_policy() -> Result<Policy> {
    let cfg = config::config()?;
    Ok(Policy::from_overrides(&cfg.policy))
}

fn validate(command: &str, json: bool) -> Result<()> {
    let verdict = current_policy()?.classify(command);

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&verdict).context("Failed to serialize verdict")?
        );
    } else {
        render::print_verdict(&verdict);
    }

    if !verdict.is_allowed() {
        std::process::exit(1);
    }
    Ok(())
}

fn show_policy(json: bool) -> Result<()> {
    let policy = current_policy()?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&policy).context("Failed to serialize policy")?
        );
    } else {
        render::print_policy(&policy);
    }
    Ok(())
}

/// Merge `update` into the saved overrides and persist them
fn set_policy(update: PolicyOverrides) -> Result<()> {
    if update.is_empty() {
        anyhow::bail!("Nothing to update. See `k8helper policy set --help`");
    }

    let cfg = config::config()?;
    let path = cfg.policy_path();

    let saved = load_policy_overrides(&path)?.merged_with(&update);
    save_policy_overrides(&path, &saved)?;

    let policy = Policy::from_overrides(&cfg.policy).with_update(&update);
    render::print_policy(&policy);
    eprintln!("\n[Policy saved to {}]", path.display());
    Ok(())
}

fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("k8helper configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!("Policy file: {}", cfg.policy_path().display());
    println!();
    print!(
        "{}",
        serde_yaml::to_string(cfg).context("Failed to serialize configuration")?
    );
    Ok(())
}
