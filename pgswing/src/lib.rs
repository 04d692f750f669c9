//! Snapshot an Oracle database's protection group on a block-storage
//! array, record the database's settings as tags on the snapshot, then
//! swing the snapshot onto a (possibly differently provisioned) target
//! volume set and bring a target instance up on it.
//!
//! Destructive operations sit behind a safety lock that is engaged by
//! default: without `--execute` a run reports what it would do and
//! creates nothing.

pub mod config;
pub mod error;
pub mod facts;
pub mod lifecycle;
pub mod reconcile;
pub mod run;
pub mod snapshot;
pub mod volumes;

#[cfg(test)]
pub(crate) mod testing;

pub use error::Error;
pub use run::Outcome;

use lifecycle::TargetMode;
use std::path::PathBuf;

#[derive(Debug, clap::Parser)]
#[clap(name = "pgswing", version)]
pub struct CliArgs {
    /// Source protection group holding the database's volumes.
    #[clap(short = 's', long)]
    pub source_pg: Option<String>,

    /// Target protection group to swing the snapshot onto.
    #[clap(short = 't', long)]
    pub target_pg: Option<String>,

    /// Name of the snapshot to create, or to reuse when it already exists.
    #[clap(short = 'n', long)]
    pub snapshot_name: String,

    /// Terminal state of the target instance: down, started, mounted or
    /// open.
    #[clap(short = 'o', long)]
    pub target_mode: Option<TargetMode>,

    /// JSON config document.
    #[clap(short = 'f', long)]
    pub config: PathBuf,

    /// Ignore the mapping tags persisted on the target volumes and pair
    /// from scratch.
    #[clap(short = 'i', long)]
    pub ignore_mapping: bool,

    /// Replicate the snapshot to the target array.
    #[clap(short = 'r', long)]
    pub replicate: bool,

    /// Put the source database in hot backup mode around the snapshot.
    #[clap(short = 'b', long)]
    pub backup_mode: bool,

    /// Disengage the safety lock: actually snapshot and overwrite.
    #[clap(short = 'x', long)]
    pub execute: bool,

    /// How many times the sync pass is attempted while the snapshot is
    /// still replicating.
    #[clap(long, default_value = "20")]
    pub sync_attempts: u32,

    /// Pause between sync attempts.
    #[clap(long, default_value = "2s")]
    pub sync_interval: humantime::Duration,

    /// How many times the replica is polled for the replicated snapshot.
    #[clap(long, default_value = "10")]
    pub replication_attempts: u32,

    /// Pause between replication polls.
    #[clap(long, default_value = "5s")]
    pub replication_interval: humantime::Duration,
}

/// Initialise the tracing subscriber; `RUST_LOG` overrides the default
/// `info` filter.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
