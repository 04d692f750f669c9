use array_client::ArrayError;
use ora_admin::AdminError;
use snafu::Snafu;
use std::path::PathBuf;

/// Any program error.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("Failed to read the config file {}: {}", path.display(), source))]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Failed to parse the config file {}: {}", path.display(), source))]
    ConfigParse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[snafu(display("Config option '{key}' is not set and no fallback is available"))]
    ConfigMissing { key: &'static str },
    #[snafu(display("'{mode}' is not a valid target instance state"))]
    InvalidTargetMode { mode: String },
    #[snafu(display("Failed to connect to the array at {host}: {source}"))]
    ArrayConnect { host: String, source: ArrayError },
    #[snafu(display("Failed to query the protection group {pg}: {source}"))]
    PgQuery { pg: String, source: ArrayError },
    #[snafu(display("Failed to read the array's identity: {source}"))]
    ArrayIdentity { source: ArrayError },
    #[snafu(display("Protection group {pg} has no replication targets configured"))]
    NotReplicated { pg: String },
    #[snafu(display("Failed to list the snapshots of protection group {pg}: {source}"))]
    ListPgSnapshots { pg: String, source: ArrayError },
    #[snafu(display("Failed to snapshot the protection group {pg} as '{name}': {source}"))]
    CreateSnapshot {
        pg: String,
        name: String,
        source: ArrayError,
    },
    #[snafu(display("Failed to list the volumes of protection group {pg}: {source}"))]
    PgMembers { pg: String, source: ArrayError },
    #[snafu(display("Failed to list the volume snapshots on the array: {source}"))]
    ListVolumeSnapshots { source: ArrayError },
    #[snafu(display("Failed to query the target volumes: {source}"))]
    TargetVolumeQuery { source: ArrayError },
    #[snafu(display("Failed to read the tags of snapshot {name}: {source}"))]
    ReadSnapshotTags { name: String, source: ArrayError },
    #[snafu(display("Failed to tag the snapshot volumes: {source}"))]
    TagSnapshot { source: ArrayError },
    #[snafu(display("Failed to tag the target volume {volume}: {source}"))]
    TagVolume { volume: String, source: ArrayError },
    #[snafu(display("Failed to sync volume {target} from {source_name}: {source}"))]
    VolumeSync {
        target: String,
        source_name: String,
        source: ArrayError,
    },
    #[snafu(display(
        "Snapshot '{snapshot}' did not finish replicating after {attempts} checks"
    ))]
    ReplicationTimeout { snapshot: String, attempts: u32 },
    #[snafu(display(
        "Snapshot '{snapshot}' holds {sources} volumes but the target group only has {targets}"
    ))]
    TargetCapacity {
        snapshot: String,
        sources: usize,
        targets: usize,
    },
    #[snafu(display("{count} snapshot volume(s) have no matching target volume"))]
    UnmatchedVolumes { count: usize },
    #[snafu(display("The target instance is running (status {status}), refusing to continue"))]
    InstanceRunning { status: String },
    #[snafu(display("The target instance status query returned no output"))]
    InstanceStatus,
    #[snafu(display("{count} target diskgroup(s) are still mounted: {groups}"))]
    DiskGroupsMounted { count: usize, groups: String },
    #[snafu(display("Diskgroup {group} did not mount on the target"))]
    DiskGroupMount { group: String },
    #[snafu(display("Database administration failed during {stage}: {source}"))]
    Admin {
        stage: &'static str,
        source: AdminError,
    },
    #[snafu(display("Failed to rescan the scsi bus on the target: {source}"))]
    Rescan { source: AdminError },
}

impl Error {
    /// True when a volume sync was refused because the snapshot is still
    /// replicating onto this array. The sync pass retries on this.
    pub fn is_pending_replication(&self) -> bool {
        matches!(self, Error::VolumeSync { source, .. } if source.is_pending_replication())
    }
}
