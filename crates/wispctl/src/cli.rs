// Command-line surface. Every manual/administrative entrypoint of the
// engine hangs off a subcommand here; these are the only synchronous,
// caller-blocking surfaces the system exposes.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "wispctl",
    about = "Keep billing entitlement and router enforcement in agreement",
    version
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Path to the config file (defaults to the platform config dir).
    #[arg(long, global = true, env = "WISPCTL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Emit machine-readable JSON instead of tables.
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Probe router reachability.
    Health {
        /// Bypass the probe throttle.
        #[arg(long)]
        force: bool,
    },

    /// Expiry reconciliation controls.
    Expiry {
        #[command(subcommand)]
        action: ExpiryAction,
    },

    /// Operational monitoring jobs.
    Jobs {
        #[command(subcommand)]
        action: JobsAction,
    },

    /// Move a customer between billing modes.
    Migrate {
        #[command(subcommand)]
        direction: MigrateDirection,
    },

    /// Reconcile one prepaid customer's router state.
    Fix {
        /// Customer id.
        customer: u64,
    },

    /// Reconcile every prepaid customer's router state.
    FixAll,

    /// Read-only diagnosis of a customer's migration state.
    Debug {
        /// Customer id.
        customer: u64,
    },

    /// Run the schedulers in the foreground until interrupted.
    Run,

    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Debug, Subcommand)]
pub enum ExpiryAction {
    /// Run one reconciliation pass now.
    Run,
    /// Show scheduler state and the last pass.
    Status,
}

#[derive(Debug, Subcommand)]
pub enum JobsAction {
    /// Run one monitoring job now (e.g. `reachability-sweep`).
    Run { job: String },
    /// List jobs and their next fire times.
    Status,
}

#[derive(Debug, Subcommand)]
pub enum MigrateDirection {
    /// Postpaid -> prepaid.
    ToPrepaid {
        customer: u64,
        /// Acting administrator id for the audit trail.
        #[arg(long)]
        admin: Option<u64>,
    },
    /// Prepaid -> postpaid.
    ToPostpaid {
        customer: u64,
        #[arg(long)]
        admin: Option<u64>,
    },
}
