//! CLI argument parsing with clap derive

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::app::{AppContext, AppFlags, OutputFlags};
use crate::commands;
use crate::infra::fs::DEFAULT_ROOT;

/// Cell agent for uvn virtual networks
#[derive(Parser)]
#[command(
    name = "uvn-agent",
    version,
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Agent root directory
    #[arg(long, global = true, env = "UVN_AGENT_ROOT", default_value = DEFAULT_ROOT)]
    pub root: PathBuf,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Extract an agent package into the agent root
    Install(commands::install::InstallArgs),

    /// Converge the node once
    Sync(commands::sync::SyncArgs),

    /// Keep the node converged until interrupted
    Run,

    /// Pick up a newer configuration and apply it
    Update,

    /// Inspect key identities
    #[command(subcommand)]
    Key(commands::key::KeyCommand),
}

impl Cli {
    /// Execute the CLI command.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn run(self) -> Result<ExitCode> {
        let Cli {
            root,
            quiet,
            no_color,
            command,
        } = self;
        let app = AppContext::new(&AppFlags {
            output: OutputFlags { no_color, quiet },
            root,
        })?;
        match command {
            Command::Install(args) => commands::install::run(&app, &args).await,
            Command::Sync(args) => commands::sync::run(&app, &args).await,
            Command::Run => commands::run::run(&app).await,
            Command::Update => commands::update::run(&app).await,
            Command::Key(cmd) => commands::key::run(cmd),
        }
    }
}
