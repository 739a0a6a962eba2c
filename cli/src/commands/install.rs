//! Install command

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Args;

use crate::app::AppContext;
use crate::application::services::install::install_agent;
use crate::output::TerminalReporter;

/// Arguments for the install command.
#[derive(Args)]
pub struct InstallArgs {
    /// Agent package (.tar.xz) produced by the registry
    pub package: PathBuf,
}

/// Run the install command.
///
/// # Errors
///
/// Returns an error if the package cannot be extracted or is invalid.
pub async fn run(app: &AppContext, args: &InstallArgs) -> Result<ExitCode> {
    let reporter = TerminalReporter::new(&app.output);
    let snapshot = install_agent(
        &app.packager(),
        &app.store(),
        &reporter,
        &args.package,
        app.root.path(),
    )
    .await?;
    app.output.kv("root", &app.root.path().display().to_string());
    app.output.kv("links", &snapshot.links.len().to_string());
    Ok(ExitCode::SUCCESS)
}
