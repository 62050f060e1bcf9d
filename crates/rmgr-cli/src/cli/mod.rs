//! CLI for the RMGR resource manager.

mod commands;
mod control_socket;
mod framing;
mod rpc_client;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use rmgr_core::config;
use rmgr_core::context::QuotaPhase;
use rmgr_core::dump::DumpKind;
use std::path::PathBuf;

use commands::{
    run_dump, run_history, run_member, run_ping, run_queues, run_quota_control, run_segment_down,
    run_segments, run_serve,
};

/// Top-level CLI for the RMGR resource manager.
#[derive(Debug, Parser)]
#[command(name = "rmgr")]
#[command(about = "RMGR: cluster resource manager for query sessions", long_about = None)]
pub struct Cli {
    /// Config file to use instead of $XDG_CONFIG_HOME/rmgr/config.toml.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Server address for admin commands (default: the configured listen address).
    #[arg(long, global = true, value_name = "ADDR")]
    pub server: Option<String>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DumpTarget {
    /// Connection tracks and their requests.
    Tracks,
    /// Resource queues and ratio trackers.
    Queues,
    /// Segment hosts and their capacity.
    Hosts,
}

impl From<DumpTarget> for DumpKind {
    fn from(t: DumpTarget) -> Self {
        match t {
            DumpTarget::Tracks => DumpKind::ConnectionTracks,
            DumpTarget::Queues => DumpKind::QueueStatus,
            DumpTarget::Hosts => DumpKind::PoolHosts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PhaseArg {
    /// New acquire requests are held back.
    Admission,
    /// Requests queue but nothing is granted.
    Allocation,
}

impl From<PhaseArg> for QuotaPhase {
    fn from(p: PhaseArg) -> Self {
        match p {
            PhaseArg::Admission => QuotaPhase::Admission,
            PhaseArg::Allocation => QuotaPhase::Allocation,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Run the resource manager server.
    Serve {
        /// Address to listen on, overriding `listen_addr` from the config.
        #[arg(long, value_name = "ADDR")]
        listen: Option<String>,
    },

    /// Check that the server answers.
    Ping,

    /// Ask the server to write a status dump to a file.
    Dump {
        /// What to dump.
        #[arg(value_enum)]
        kind: DumpTarget,
        /// File the server writes to.
        path: PathBuf,
    },

    /// Show resource queue usage.
    Queues,

    /// Report segment hosts as unreachable so they get probed.
    SegmentDown {
        /// Hostnames.
        #[arg(required = true)]
        hosts: Vec<String>,
    },

    /// Pause a quota phase.
    Pause {
        #[arg(value_enum)]
        phase: PhaseArg,
    },

    /// Resume a paused quota phase.
    Resume {
        #[arg(value_enum)]
        phase: PhaseArg,
    },

    /// List segment status rows from the catalog.
    Segments,

    /// Show the status history of one segment host.
    History {
        /// Hostname.
        host: String,
    },

    /// Send a membership change to a running server (no value = departure).
    Member {
        /// Membership store key, e.g. /rmgr/segments/sdw1.
        key: String,
        /// JSON segment report.
        value: Option<String>,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = match &cli.config {
            Some(path) => config::load_from_path(path)?,
            None => config::load_or_init()?,
        };
        tracing::debug!("loaded config: {:?}", cfg);
        let addr = cli
            .server
            .clone()
            .unwrap_or_else(|| rpc_client::client_addr(&cfg.listen_addr));

        match cli.command {
            CliCommand::Serve { listen } => run_serve(cfg, listen).await?,
            CliCommand::Ping => run_ping(&addr).await?,
            CliCommand::Dump { kind, path } => run_dump(&addr, kind.into(), &path).await?,
            CliCommand::Queues => run_queues(&addr).await?,
            CliCommand::SegmentDown { hosts } => run_segment_down(&addr, hosts).await?,
            CliCommand::Pause { phase } => run_quota_control(&addr, phase.into(), true).await?,
            CliCommand::Resume { phase } => run_quota_control(&addr, phase.into(), false).await?,
            CliCommand::Segments => run_segments(&cfg).await?,
            CliCommand::History { host } => run_history(&cfg, &host).await?,
            CliCommand::Member { key, value } => run_member(&cfg, &key, value.as_deref()).await?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
