//! Key command — build and inspect key descriptions.
//!
//! Output goes to stdout unconditionally so other tooling can consume it.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Subcommand;
use uvn_common::KeyId;

#[derive(Subcommand)]
pub enum KeyCommand {
    /// Print the embeddable description of a key id
    Describe {
        /// Key kind: ROOT, CELL or PARTICLE
        kind: String,
        /// Owner email
        owner: String,
        /// Uvn, cell or particle name
        target: String,
    },
    /// Extract the key id from text containing a description
    Parse {
        /// Text containing `(<record>)`
        description: String,
    },
}

/// Run a key subcommand.
///
/// # Errors
///
/// Returns an error naming the offending value when the key kind or the
/// description is invalid.
pub fn run(cmd: KeyCommand) -> Result<ExitCode> {
    match cmd {
        KeyCommand::Describe {
            kind,
            owner,
            target,
        } => {
            let id = KeyId::parse(&kind, owner, target)?;
            println!("{}", id.to_description());
        }
        KeyCommand::Parse { description } => {
            let id = KeyId::parse_description(&description)?;
            let record = serde_yaml::to_string(&id.serialize()).context("rendering key record")?;
            print!("{record}");
        }
    }
    Ok(ExitCode::SUCCESS)
}
