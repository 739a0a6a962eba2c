//! Sync command

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::Args;

use crate::app::AppContext;
use crate::application::services::runtime::{AgentAction, Runtime};
use crate::commands::report;

/// Arguments for the sync command.
#[derive(Args)]
pub struct SyncArgs {
    /// Give up after this many seconds
    #[arg(long, value_name = "SECONDS", default_value_t = 60)]
    pub max_spin_time: u64,

    /// Only install keys and configuration files; leave routes and
    /// interfaces alone
    #[arg(long)]
    pub config_only: bool,
}

/// Run the sync command.
///
/// # Errors
///
/// Returns an error if the agent cannot open or a corrective action fails
/// permanently.
pub async fn run(app: &AppContext, args: &SyncArgs) -> Result<ExitCode> {
    let (node, store, resources) = (app.node(), app.store(), app.resources());
    let runtime = Runtime::new(&node, &store, &resources, app.engine_config());
    let outcome = runtime
        .run(&AgentAction::Sync {
            max_spin_time: Duration::from_secs(args.max_spin_time),
            config_only: args.config_only,
        })
        .await?;
    Ok(report(&app.output, &outcome))
}
