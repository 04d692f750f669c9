//! Client for a block-storage array control plane: protection groups,
//! protection-group snapshots, per-volume snapshot objects and key/value
//! tags, over the array's REST interface.
//!
//! Consumers should depend on the [`ArrayOps`] trait rather than the
//! concrete [`ArrayClient`] so the orchestration logic can be exercised
//! against an in-memory array.

mod client;
pub mod error;
pub mod models;

pub use client::ArrayClient;
pub use error::ArrayError;

use models::{PgMember, PgSnapshot, ProtectionGroup, Tag, Volume, VolumeSnapshot};

/// The array control-plane operations the orchestrator relies on.
#[async_trait::async_trait]
pub trait ArrayOps: Send + Sync {
    /// The array's own name, used to resolve replicated resource names.
    async fn array_name(&self) -> Result<String, ArrayError>;

    /// Cheap call that proves connectivity and authentication.
    async fn check_connectivity(&self) -> Result<(), ArrayError>;

    /// All snapshots taken of the given protection group.
    async fn pg_snapshots(&self, pg: &str) -> Result<Vec<PgSnapshot>, ArrayError>;

    /// Take a new snapshot of the protection group. Eradication is left
    /// to manual control.
    async fn create_pg_snapshot(
        &self,
        pg: &str,
        suffix: &str,
        replicate: bool,
    ) -> Result<(), ArrayError>;

    /// The member volumes of the protection group.
    async fn pg_members(&self, pg: &str) -> Result<Vec<PgMember>, ArrayError>;

    /// Per-volume snapshot objects, optionally filtered by their source
    /// volume names. `None` scans the whole array (needed on a replica,
    /// where the source-name linkage is not queryable).
    async fn volume_snapshots(
        &self,
        source_names: Option<&[String]>,
    ) -> Result<Vec<VolumeSnapshot>, ArrayError>;

    /// Capacity details for the named volumes.
    async fn volumes_space(&self, names: &[String]) -> Result<Vec<Volume>, ArrayError>;

    /// Tags on a volume.
    async fn volume_tags(&self, name: &str) -> Result<Vec<Tag>, ArrayError>;

    /// Write tags onto the named volumes.
    async fn tag_volumes(&self, names: &[String], tags: &[Tag]) -> Result<(), ArrayError>;

    /// Tags on a per-volume snapshot object.
    async fn snapshot_tags(&self, name: &str) -> Result<Vec<Tag>, ArrayError>;

    /// Write tags onto the named per-volume snapshot objects.
    async fn tag_snapshots(&self, names: &[String], tags: &[Tag]) -> Result<(), ArrayError>;

    /// Replace the target volume's content with the source snapshot
    /// volume's content. Destructive.
    async fn overwrite_volume(&self, target: &str, source_snapshot: &str)
        -> Result<(), ArrayError>;

    /// Protection-group details (replication target count).
    async fn protection_groups(&self, names: &[String]) -> Result<Vec<ProtectionGroup>, ArrayError>;
}
