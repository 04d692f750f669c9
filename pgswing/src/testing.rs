//! In-memory array and admin surfaces for exercising the orchestration
//! without a real array or a real instance.

use array_client::{
    models::{PgMember, PgSnapshot, ProtectionGroup, Reference, Tag, Volume, VolumeSnapshot},
    ArrayError, ArrayOps,
};
use ora_admin::{AdminError, AdminExec};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// An in-memory array. State mutates through [`ArrayOps`] the same way the
/// real one does, so tests can assert on what a run left behind.
#[derive(Default)]
pub(crate) struct FakeArray {
    pub name: String,
    /// `(protection group, snapshot)` pairs.
    pub pg_snapshots: Mutex<Vec<(String, PgSnapshot)>>,
    /// `(protection group, member volume name)` pairs.
    pub members: Mutex<Vec<(String, String)>>,
    pub volume_snapshots: Mutex<Vec<VolumeSnapshot>>,
    pub volumes: Mutex<Vec<Volume>>,
    pub volume_tags: Mutex<HashMap<String, Vec<Tag>>>,
    pub snapshot_tags: Mutex<HashMap<String, Vec<Tag>>>,
    /// `(target, source snapshot)` pairs, in call order.
    pub overwrites: Mutex<Vec<(String, String)>>,
    /// Protection groups with replication targets.
    pub groups: Mutex<Vec<ProtectionGroup>>,
    /// Fail this many overwrite calls with a pending-replication error
    /// before letting them through.
    pub pending_overwrites: Mutex<u32>,
}

impl FakeArray {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn add_pg_snapshot(&self, pg: &str, suffix: &str) {
        self.pg_snapshots.lock().unwrap().push((
            pg.to_string(),
            PgSnapshot {
                name: format!("{pg}.{suffix}"),
                suffix: suffix.to_string(),
            },
        ));
    }

    pub fn add_member(&self, pg: &str, volume: &str) {
        self.members
            .lock()
            .unwrap()
            .push((pg.to_string(), volume.to_string()));
    }

    pub fn add_volume_snapshot(&self, object: VolumeSnapshot) {
        self.volume_snapshots.lock().unwrap().push(object);
    }

    /// Synthesize the per-volume snapshot objects a group snapshot leaves
    /// behind, one `<pg>.<suffix>.<member>` object per member volume.
    pub fn add_snapshot_objects(&self, pg: &str, suffix: &str) {
        let members: Vec<String> = self
            .members
            .lock()
            .unwrap()
            .iter()
            .filter(|(group, _)| group == pg)
            .map(|(_, volume)| volume.clone())
            .collect();
        let volumes = self.volumes.lock().unwrap().clone();
        let mut objects = self.volume_snapshots.lock().unwrap();
        for member in members {
            let volume = volumes.iter().find(|volume| volume.name == member);
            objects.push(VolumeSnapshot {
                name: format!("{pg}.{suffix}.{member}"),
                source: Reference {
                    id: volume.map(|volume| volume.id.clone()),
                    name: Some(member),
                },
                space: volume.map(|volume| volume.space.clone()).unwrap_or_default(),
            });
        }
    }

    pub fn add_volume(&self, volume: Volume) {
        self.volumes.lock().unwrap().push(volume);
    }

    pub fn set_volume_tag(&self, volume: &str, key: &str, value: &str) {
        self.volume_tags
            .lock()
            .unwrap()
            .entry(volume.to_string())
            .or_default()
            .push(Tag::new(key, value));
    }

    pub fn set_snapshot_tag(&self, object: &str, key: &str, value: &str) {
        self.snapshot_tags
            .lock()
            .unwrap()
            .entry(object.to_string())
            .or_default()
            .push(Tag::new(key, value));
    }

    pub fn volume_tag(&self, volume: &str, key: &str) -> Option<String> {
        self.volume_tags
            .lock()
            .unwrap()
            .get(volume)
            .and_then(|tags| tags.iter().rev().find(|tag| tag.key == key))
            .map(|tag| tag.value.clone())
    }

    pub fn snapshot_tag(&self, object: &str, key: &str) -> Option<String> {
        self.snapshot_tags
            .lock()
            .unwrap()
            .get(object)
            .and_then(|tags| tags.iter().rev().find(|tag| tag.key == key))
            .map(|tag| tag.value.clone())
    }

    fn pending_replication() -> ArrayError {
        ArrayError::Api {
            call: "post_volumes",
            status: 400,
            message: "Snapshot is still being replicated.".to_string(),
        }
    }
}

#[async_trait::async_trait]
impl ArrayOps for FakeArray {
    async fn array_name(&self) -> Result<String, ArrayError> {
        Ok(self.name.clone())
    }

    async fn check_connectivity(&self) -> Result<(), ArrayError> {
        Ok(())
    }

    async fn pg_snapshots(&self, pg: &str) -> Result<Vec<PgSnapshot>, ArrayError> {
        Ok(self
            .pg_snapshots
            .lock()
            .unwrap()
            .iter()
            .filter(|(group, _)| group == pg)
            .map(|(_, snap)| snap.clone())
            .collect())
    }

    async fn create_pg_snapshot(
        &self,
        pg: &str,
        suffix: &str,
        _replicate: bool,
    ) -> Result<(), ArrayError> {
        self.add_pg_snapshot(pg, suffix);
        self.add_snapshot_objects(pg, suffix);
        Ok(())
    }

    async fn pg_members(&self, pg: &str) -> Result<Vec<PgMember>, ArrayError> {
        Ok(self
            .members
            .lock()
            .unwrap()
            .iter()
            .filter(|(group, _)| group == pg)
            .map(|(_, volume)| PgMember {
                member: Reference {
                    id: None,
                    name: Some(volume.clone()),
                },
            })
            .collect())
    }

    async fn volume_snapshots(
        &self,
        source_names: Option<&[String]>,
    ) -> Result<Vec<VolumeSnapshot>, ArrayError> {
        let objects = self.volume_snapshots.lock().unwrap();
        Ok(objects
            .iter()
            .filter(|object| match source_names {
                None => true,
                Some(names) => object
                    .source
                    .name
                    .as_ref()
                    .map(|name| names.contains(name))
                    .unwrap_or(false),
            })
            .cloned()
            .collect())
    }

    async fn volumes_space(&self, names: &[String]) -> Result<Vec<Volume>, ArrayError> {
        let volumes = self.volumes.lock().unwrap();
        // preserve the caller's name order, like the real endpoint
        Ok(names
            .iter()
            .filter_map(|name| volumes.iter().find(|volume| &volume.name == name))
            .cloned()
            .collect())
    }

    async fn volume_tags(&self, name: &str) -> Result<Vec<Tag>, ArrayError> {
        Ok(self
            .volume_tags
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default())
    }

    async fn tag_volumes(&self, names: &[String], tags: &[Tag]) -> Result<(), ArrayError> {
        let mut store = self.volume_tags.lock().unwrap();
        for name in names {
            store
                .entry(name.clone())
                .or_default()
                .extend(tags.iter().cloned());
        }
        Ok(())
    }

    async fn snapshot_tags(&self, name: &str) -> Result<Vec<Tag>, ArrayError> {
        Ok(self
            .snapshot_tags
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default())
    }

    async fn tag_snapshots(&self, names: &[String], tags: &[Tag]) -> Result<(), ArrayError> {
        let mut store = self.snapshot_tags.lock().unwrap();
        for name in names {
            store
                .entry(name.clone())
                .or_default()
                .extend(tags.iter().cloned());
        }
        Ok(())
    }

    async fn overwrite_volume(
        &self,
        target: &str,
        source_snapshot: &str,
    ) -> Result<(), ArrayError> {
        {
            let mut pending = self.pending_overwrites.lock().unwrap();
            if *pending > 0 {
                *pending -= 1;
                return Err(Self::pending_replication());
            }
        }
        self.overwrites
            .lock()
            .unwrap()
            .push((target.to_string(), source_snapshot.to_string()));
        Ok(())
    }

    async fn protection_groups(
        &self,
        names: &[String],
    ) -> Result<Vec<ProtectionGroup>, ArrayError> {
        Ok(self
            .groups
            .lock()
            .unwrap()
            .iter()
            .filter(|group| names.contains(&group.name))
            .cloned()
            .collect())
    }
}

/// A scripted admin surface: records every batch, answers each one with
/// the next canned response (or nothing).
#[derive(Default)]
pub(crate) struct FakeAdmin {
    /// `(connect string, statements)` per batch, in call order.
    pub batches: Mutex<Vec<(String, Vec<String>)>>,
    pub responses: Mutex<VecDeque<Vec<String>>>,
    pub os_commands: Mutex<Vec<String>>,
}

impl FakeAdmin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, lines: &[&str]) {
        self.responses
            .lock()
            .unwrap()
            .push_back(lines.iter().map(|line| line.to_string()).collect());
    }

    pub fn batch_statements(&self, index: usize) -> Vec<String> {
        self.batches.lock().unwrap()[index].1.clone()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl AdminExec for FakeAdmin {
    async fn run_batch(
        &self,
        connect: &str,
        statements: &[String],
    ) -> Result<Vec<String>, AdminError> {
        self.batches
            .lock()
            .unwrap()
            .push((connect.to_string(), statements.to_vec()));
        Ok(self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }

    async fn run_os(&self, command: &str) -> Result<Vec<String>, AdminError> {
        self.os_commands.lock().unwrap().push(command.to_string());
        Ok(Vec::new())
    }
}
