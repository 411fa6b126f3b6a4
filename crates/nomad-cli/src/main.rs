//! Nomad operator CLI.
//!
//! Drives configuration changes through the two-phase protocol on a node
//! stored in a project directory.
//!
//! # Quick Start
//!
//! ```bash
//! # Describe the local node
//! nomad init --name n1 --hostname host1 --port 9410
//!
//! # Activate a cluster and change a setting
//! nomad activate --cluster cluster.toml
//! nomad set offheap 512MB
//!
//! # Bring another node in line with this one
//! nomad export payload.bin
//! nomad --dir ../n2 sync payload.bin
//! ```

mod commands;
mod node;
mod style;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use nomad_config::ConfigLoader;
use tracing_subscriber::EnvFilter;

/// Nomad - coordinated configuration changes for clustered servers.
#[derive(Parser)]
#[command(name = "nomad")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory holding nomad.toml and the node's data.
    #[arg(short, long, global = true, default_value = ".")]
    dir: PathBuf,

    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version information.
    Version,

    /// Describe the local node and create its data directory.
    Init {
        /// Node name, unique in the cluster.
        #[arg(long)]
        name: String,

        /// Hostname other nodes reach this one at.
        #[arg(long, default_value = "localhost")]
        hostname: String,

        /// Port other nodes reach this one at.
        #[arg(long, default_value = "9410")]
        port: u16,

        /// Overwrite an existing nomad.toml.
        #[arg(long)]
        force: bool,
    },

    /// Activate a cluster on this node.
    Activate {
        /// TOML file describing the cluster. Defaults to a cluster of this
        /// node alone.
        #[arg(short, long)]
        cluster: Option<PathBuf>,

        /// Cluster name when activating this node alone.
        #[arg(long, default_value = "cluster")]
        name: String,
    },

    /// Set a configuration value.
    Set {
        setting: String,
        value: String,
        #[command(flatten)]
        target: Target,
    },

    /// Remove a configuration value.
    Unset {
        setting: String,
        #[command(flatten)]
        target: Target,
    },

    /// Attach a node to a stripe.
    Attach {
        #[arg(long)]
        stripe: String,

        #[arg(long)]
        name: String,

        #[arg(long)]
        hostname: String,

        #[arg(long)]
        port: u16,
    },

    /// Detach a node from a stripe.
    Detach {
        #[arg(long)]
        stripe: String,

        #[arg(long)]
        node: String,
    },

    /// Show the node's coordination state.
    Discover {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// List the node's change history.
    History {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Complete a change left prepared.
    Repair {
        /// Outcome to force when it cannot be inferred.
        #[arg(long, value_enum)]
        force: Option<RepairAction>,
    },

    /// Claim the node for this operator.
    Takeover,

    /// Write the node's history to a sync payload file.
    Export { path: PathBuf },

    /// Reconcile the node's history with a sync payload from another node.
    Sync { path: PathBuf },
}

/// Which part of the cluster a setting applies to.
#[derive(clap::Args)]
struct Target {
    /// Apply to a stripe.
    #[arg(long)]
    stripe: Option<String>,

    /// Apply to a node (requires --stripe).
    #[arg(long, requires = "stripe")]
    node: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum RepairAction {
    Commit,
    Rollback,
}

fn init_logging(cli: &Cli) {
    let level = ConfigLoader::new()
        .with_project_dir(&cli.dir)
        .load()
        .map_or_else(|_| "info".to_string(), |c| c.logging.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    style::set_no_color(cli.no_color);
    init_logging(&cli);

    if let Err(e) = run(cli) {
        style::print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let dir = cli.dir;
    match cli.command {
        Commands::Version => {
            commands::version::run();
            Ok(())
        }
        Commands::Init {
            name,
            hostname,
            port,
            force,
        } => commands::init::run(&dir, &name, &hostname, port, force),
        Commands::Activate { cluster, name } => {
            commands::change::activate(&dir, cluster.as_deref(), &name)
        }
        Commands::Set {
            setting,
            value,
            target,
        } => commands::change::set(&dir, &setting, &value, target.stripe, target.node),
        Commands::Unset { setting, target } => {
            commands::change::unset(&dir, &setting, target.stripe, target.node)
        }
        Commands::Attach {
            stripe,
            name,
            hostname,
            port,
        } => commands::change::attach(&dir, &stripe, &name, &hostname, port),
        Commands::Detach { stripe, node } => commands::change::detach(&dir, &stripe, &node),
        Commands::Discover { json } => commands::inspect::discover(&dir, json),
        Commands::History { json } => commands::inspect::history(&dir, json),
        Commands::Repair { force } => commands::repair::repair(&dir, force.map(Into::into)),
        Commands::Takeover => commands::repair::takeover(&dir),
        Commands::Export { path } => commands::transfer::export(&dir, &path),
        Commands::Sync { path } => commands::transfer::sync(&dir, &path),
    }
}

impl From<RepairAction> for nomad_types::ChangeRequestState {
    fn from(action: RepairAction) -> Self {
        match action {
            RepairAction::Commit => Self::Committed,
            RepairAction::Rollback => Self::RolledBack,
        }
    }
}
