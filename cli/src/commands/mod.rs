//! Command implementations

pub mod install;
pub mod key;
pub mod run;
pub mod sync;
pub mod update;

use std::process::ExitCode;

use crate::application::services::convergence::Convergence;
use crate::application::services::runtime::{ActionOutcome, ActionResult};
use crate::output::OutputContext;

/// Exit code of an action that ended with the node not yet consistent.
pub const EXIT_TIMED_OUT: u8 = 2;

/// Print the outcome of an agent action and map it to an exit code.
pub fn report(ctx: &OutputContext, outcome: &ActionOutcome) -> ExitCode {
    if outcome.reloads > 0 {
        ctx.info(&format!(
            "absorbed {} reload(s), now at {}",
            outcome.reloads, outcome.version
        ));
    }
    match &outcome.result {
        ActionResult::Stopped => {
            ctx.success(&format!("agent stopped at {}", outcome.version));
            ExitCode::SUCCESS
        }
        ActionResult::Converged(convergence) | ActionResult::Updated(convergence) => {
            report_convergence(ctx, outcome, convergence)
        }
    }
}

fn report_convergence(
    ctx: &OutputContext,
    outcome: &ActionOutcome,
    convergence: &Convergence,
) -> ExitCode {
    match convergence {
        Convergence::Consistent { rounds, actions } => {
            ctx.success(&format!(
                "node consistent with {} ({actions} action(s) in {rounds} round(s))",
                outcome.version
            ));
            ExitCode::SUCCESS
        }
        Convergence::TimedOut { outstanding } => {
            ctx.warn(&format!(
                "timed out with {} outstanding action(s) for {}",
                outstanding.len(),
                outcome.version
            ));
            for item in outstanding {
                ctx.detail(&item.to_string());
            }
            ExitCode::from(EXIT_TIMED_OUT)
        }
    }
}
