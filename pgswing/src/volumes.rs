//! Source and target volume tables for the reconciliation pass.

use crate::error::{
    Error, ListVolumeSnapshotsSnafu, TargetCapacitySnafu, TargetVolumeQuerySnafu,
};
use array_client::ArrayOps;
use indexmap::IndexMap;
use snafu::{ensure, ResultExt};
use std::collections::HashSet;
use tracing::{debug, info};

/// Tag written on a target volume recording which source volume it was last
/// synced from. Survives across runs and drives re-pairing.
pub const MAPPING_TAG: &str = "snapshot_mapping";

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// A volume captured in the snapshot, identified by the id of the volume it
/// was taken from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceVolume {
    /// Id of the volume the snapshot object was taken from.
    pub id: String,
    /// Name of the snapshot object itself.
    pub name: String,
    /// Provisioned size of the captured volume.
    pub size_bytes: u64,
    /// Id of the paired target volume once reconciled.
    pub target: Option<String>,
}

/// A volume in the target protection group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetVolume {
    pub id: String,
    pub name: String,
    pub size_bytes: u64,
    /// Source volume id persisted on this target by a previous run.
    pub source: Option<String>,
}

/// The two tables the reconciliation works over. Iteration follows the
/// order volumes were collected in, which keeps runs deterministic.
#[derive(Debug, Default)]
pub struct VolumeTables {
    sources: IndexMap<String, SourceVolume>,
    targets: IndexMap<String, TargetVolume>,
}

impl VolumeTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    pub fn sources(&self) -> impl Iterator<Item = &SourceVolume> {
        self.sources.values()
    }

    pub fn targets(&self) -> impl Iterator<Item = &TargetVolume> {
        self.targets.values()
    }

    pub fn insert_source(&mut self, volume: SourceVolume) {
        self.sources.insert(volume.id.clone(), volume);
    }

    pub fn insert_target(&mut self, volume: TargetVolume) {
        self.targets.insert(volume.id.clone(), volume);
    }

    pub(crate) fn source_ids(&self) -> Vec<String> {
        self.sources.keys().cloned().collect()
    }

    pub(crate) fn get_source(&self, id: &str) -> Option<&SourceVolume> {
        self.sources.get(id)
    }

    pub(crate) fn get_target(&self, id: &str) -> Option<&TargetVolume> {
        self.targets.get(id)
    }

    /// Record a source→target pairing on both sides.
    pub(crate) fn pair(&mut self, source_id: &str, target_id: &str) {
        if let Some(source) = self.sources.get_mut(source_id) {
            source.target = Some(target_id.to_string());
        }
        if let Some(target) = self.targets.get_mut(target_id) {
            target.source = Some(source_id.to_string());
        }
    }

    /// A target whose persisted mapping tag names this source, if any.
    pub(crate) fn tag_hinted_target(&self, source_id: &str) -> Option<String> {
        self.targets
            .values()
            .find(|target| target.source.as_deref() == Some(source_id))
            .map(|target| target.id.clone())
    }

    /// The first still-unpaired target satisfying the predicate.
    pub(crate) fn first_unmatched_target(
        &self,
        predicate: impl Fn(&TargetVolume) -> bool,
    ) -> Option<String> {
        self.targets
            .values()
            .find(|target| target.source.is_none() && predicate(target))
            .map(|target| target.id.clone())
    }

    /// Fill the source table with the snapshot's member volumes: every
    /// snapshot object on the array whose name carries `<pg>.<snapshot>.`,
    /// minus the excluded volume ids. Returns how many were collected.
    pub async fn collect_sources(
        &mut self,
        array: &dyn ArrayOps,
        pg: &str,
        snapshot: &str,
        excluded: &HashSet<String>,
    ) -> Result<usize, Error> {
        let needle = format!("{pg}.{snapshot}.");
        let objects = array
            .volume_snapshots(None)
            .await
            .context(ListVolumeSnapshotsSnafu)?;
        let mut collected = 0;
        for object in objects {
            if !object.name.contains(&needle) {
                continue;
            }
            let Some(id) = object.source.id.clone() else {
                continue;
            };
            if excluded.contains(&id) {
                info!(volume = %object.name, id = %id, "volume is excluded from mapping");
                continue;
            }
            debug!(
                volume = %object.name,
                size_gb = object.space.total_provisioned as f64 / GIB,
                "snapshot volume"
            );
            self.insert_source(SourceVolume {
                id,
                name: object.name,
                size_bytes: object.space.total_provisioned,
                target: None,
            });
            collected += 1;
        }
        Ok(collected)
    }

    /// Fill the target table from the target group's member volumes,
    /// pre-seeding each entry with its persisted mapping tag unless
    /// `ignore_mapping` is set.
    pub async fn collect_targets(
        &mut self,
        array: &dyn ArrayOps,
        members: &[String],
        ignore_mapping: bool,
    ) -> Result<(), Error> {
        let volumes = array
            .volumes_space(members)
            .await
            .context(TargetVolumeQuerySnafu)?;
        for volume in volumes {
            let mut source = None;
            if !ignore_mapping {
                let tags = array
                    .volume_tags(&volume.name)
                    .await
                    .context(TargetVolumeQuerySnafu)?;
                source = tags
                    .into_iter()
                    .find(|tag| tag.key == MAPPING_TAG)
                    .map(|tag| tag.value);
            }
            if let Some(source_id) = &source {
                info!(target = %volume.name, source = %source_id, "target has a persisted mapping");
            }
            debug!(
                target = %volume.name,
                size_gb = volume.space.total_provisioned as f64 / GIB,
                "target volume"
            );
            self.insert_target(TargetVolume {
                id: volume.id,
                name: volume.name,
                size_bytes: volume.space.total_provisioned,
                source,
            });
        }
        Ok(())
    }
}

/// The snapshot must fit in the target group, volume for volume. Checked
/// before reconciliation so that nothing is mutated on an undersized group.
pub fn check_capacity(snapshot: &str, sources: usize, targets: usize) -> Result<(), Error> {
    ensure!(
        sources <= targets,
        TargetCapacitySnafu {
            snapshot,
            sources,
            targets
        }
    );
    Ok(())
}
