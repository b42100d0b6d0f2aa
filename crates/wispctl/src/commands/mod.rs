// Command handlers. Each module owns one operational surface and prints
// either a table or `--json` output.

mod expiry;
mod health;
mod jobs;
mod migrate;
mod run;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;
use crate::services::Services;

pub async fn dispatch(
    command: Command,
    services: &Services,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match command {
        Command::Health { force } => health::handle(services, global, force).await,
        Command::Expiry { action } => expiry::handle(services, global, action).await,
        Command::Jobs { action } => jobs::handle(services, global, action).await,
        Command::Migrate { direction } => migrate::handle_migrate(services, global, direction).await,
        Command::Fix { customer } => migrate::handle_fix(services, global, customer).await,
        Command::FixAll => migrate::handle_fix_all(services, global).await,
        Command::Debug { customer } => migrate::handle_debug(services, global, customer).await,
        Command::Run => run::handle(services).await,
        // Completions are handled in main before services are built.
        Command::Completions { .. } => Ok(()),
    }
}
