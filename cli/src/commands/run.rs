//! Run command — keeps the node converged until Ctrl-C.

use std::process::ExitCode;

use anyhow::Result;
use tokio::sync::watch;

use crate::app::AppContext;
use crate::application::services::runtime::{AgentAction, Runtime};
use crate::commands::report;

/// Run the run command.
///
/// # Errors
///
/// Returns an error if the agent cannot open or a corrective action fails
/// permanently.
pub async fn run(app: &AppContext) -> Result<ExitCode> {
    let (stop_tx, stop_rx) = watch::channel(false);
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping");
            let _ = stop_tx.send(true);
        } else {
            // Keep the sender alive: a closed channel reads as a stop request.
            std::future::pending::<()>().await;
        }
    });

    let (node, store, resources) = (app.node(), app.store(), app.resources());
    let runtime = Runtime::new(&node, &store, &resources, app.engine_config());
    app.output.info(&format!(
        "converging every {}s, press Ctrl-C to stop",
        app.settings.spin_interval_secs
    ));
    let outcome = runtime.run(&AgentAction::Run { stop: stop_rx }).await;
    interrupt.abort();
    Ok(report(&app.output, &outcome?))
}
