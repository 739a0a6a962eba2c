//! Update command

use std::process::ExitCode;

use anyhow::Result;

use crate::app::AppContext;
use crate::application::services::runtime::{AgentAction, Runtime};
use crate::commands::report;

/// Run the update command.
///
/// # Errors
///
/// Returns an error if the agent cannot open or a corrective action fails
/// permanently.
pub async fn run(app: &AppContext) -> Result<ExitCode> {
    let (node, store, resources) = (app.node(), app.store(), app.resources());
    let runtime = Runtime::new(&node, &store, &resources, app.engine_config());
    let outcome = runtime.run(&AgentAction::Update).await?;
    if outcome.reloads == 0 {
        app.output.info("no newer configuration found");
    }
    Ok(report(&app.output, &outcome))
}
