//! Protection-group snapshot creation and the fact tags carried on its
//! per-volume snapshot objects.

use crate::{
    error::{
        CreateSnapshotSnafu, Error, ListPgSnapshotsSnafu, ListVolumeSnapshotsSnafu,
        ReadSnapshotTagsSnafu, ReplicationTimeoutSnafu, TagSnapshotSnafu,
    },
    facts::{FactKey, FactSet},
};
use array_client::{
    models::{Tag, VolumeSnapshot},
    ArrayOps,
};
use snafu::ResultExt;
use std::time::Duration;
use tracing::{info, warn};

/// Whether a snapshot with exactly this suffix already exists on the group.
pub async fn snapshot_exists(
    array: &dyn ArrayOps,
    pg: &str,
    name: &str,
) -> Result<bool, Error> {
    let snapshots = array
        .pg_snapshots(pg)
        .await
        .context(ListPgSnapshotsSnafu { pg })?;
    Ok(snapshots.iter().any(|snapshot| snapshot.suffix == name))
}

/// Snapshot the protection group. Under the safety lock nothing is created
/// and `None` comes back; everything downstream of snapshot creation keys
/// off that.
pub async fn create_snapshot(
    array: &dyn ArrayOps,
    pg: &str,
    name: &str,
    replicate: bool,
    dry_run: bool,
) -> Result<Option<String>, Error> {
    if dry_run {
        info!(pg, snapshot = name, "safety lock engaged - snapshot would be created");
        return Ok(None);
    }
    array
        .create_pg_snapshot(pg, name, replicate)
        .await
        .context(CreateSnapshotSnafu { pg, name })?;
    info!(pg, snapshot = name, replicate, "snapshot created");
    Ok(Some(name.to_string()))
}

/// Strip a vvol datastore prefix, `<datastore>:<container>:`, off a member
/// volume name. `None` when the name carries no such prefix.
fn strip_datastore_prefix(name: &str) -> Option<&str> {
    let (_, rest) = name.split_once(':')?;
    let (_, rest) = rest.split_once(':')?;
    Some(rest)
}

/// The snapshot objects belonging to this snapshot, one per member volume.
/// An object is named `<pg>.<snapshot>.<volume>`, with the source array
/// name prepended on a replica, so matching is on the name's tail. vvol
/// members carry a datastore prefix on the volume side only, retried
/// stripped when the full member name matches nothing.
pub fn match_snapshot_objects(
    objects: &[VolumeSnapshot],
    members: &[String],
    pg: &str,
    name: &str,
) -> Vec<String> {
    let mut matched = Vec::new();
    for member in members {
        let suffix = format!("{pg}.{name}.{member}");
        let mut hits: Vec<&VolumeSnapshot> = objects
            .iter()
            .filter(|object| object.name.ends_with(&suffix))
            .collect();
        if hits.is_empty() {
            if let Some(stripped) = strip_datastore_prefix(member) {
                let suffix = format!("{pg}.{name}.{stripped}");
                hits = objects
                    .iter()
                    .filter(|object| object.name.ends_with(&suffix))
                    .collect();
            }
        }
        matched.extend(hits.into_iter().map(|object| object.name.clone()));
    }
    matched
}

/// Carry the facts on the snapshot's per-volume objects.
///
/// For a pre-existing snapshot the facts are read back off the first
/// matched object into `facts`. For a fresh snapshot every key is written
/// onto every matched object, missing values as the placeholder. On a
/// replica (`remote_scan`) the whole array is scanned, since the replica
/// cannot resolve objects by source volume name.
pub async fn apply_fact_tags(
    array: &dyn ArrayOps,
    pre_exists: bool,
    members: &[String],
    pg: &str,
    name: &str,
    facts: &mut FactSet,
    dry_run: bool,
    remote_scan: bool,
) -> Result<(), Error> {
    let filter = if remote_scan { None } else { Some(members) };
    let objects = array
        .volume_snapshots(filter)
        .await
        .context(ListVolumeSnapshotsSnafu)?;
    let matched = match_snapshot_objects(&objects, members, pg, name);
    if matched.is_empty() {
        warn!(snapshot = name, "no snapshot objects matched for tagging");
        return Ok(());
    }

    if pre_exists {
        let tags = array
            .snapshot_tags(&matched[0])
            .await
            .context(ReadSnapshotTagsSnafu { name: &matched[0] })?;
        for tag in tags {
            if let Ok(key) = tag.key.parse::<FactKey>() {
                info!(key = %key, value = %tag.value, "fact read back from the snapshot");
                facts.set(key, tag.value);
            }
        }
        return Ok(());
    }
    if dry_run {
        info!(snapshot = name, "safety lock engaged - facts would be tagged");
        return Ok(());
    }

    for key in FactKey::all() {
        let value = facts.value_or_default(key).to_string();
        info!(key = %key, value = %value, "tagging the snapshot");
        array
            .tag_snapshots(&matched, &[Tag::new(key.to_string(), value)])
            .await
            .context(TagSnapshotSnafu)?;
    }
    Ok(())
}

/// Poll the replica array until the replicated snapshot shows up under
/// `<source array>:<pg>`, bounded by `attempts`.
pub async fn wait_replication(
    array: &dyn ArrayOps,
    source_array: &str,
    pg: &str,
    name: &str,
    attempts: u32,
    interval: Duration,
) -> Result<(), Error> {
    let replica_pg = format!("{source_array}:{pg}");
    let attempts = attempts.max(1);
    for attempt in 1..=attempts {
        let snapshots = array
            .pg_snapshots(&replica_pg)
            .await
            .context(ListPgSnapshotsSnafu { pg: &replica_pg })?;
        if snapshots.iter().any(|snapshot| snapshot.suffix == name) {
            info!(snapshot = name, "snapshot replication complete");
            return Ok(());
        }
        info!(attempt, attempts, "waiting for the snapshot to replicate");
        if attempt < attempts {
            tokio::time::sleep(interval).await;
        }
    }
    ReplicationTimeoutSnafu {
        snapshot: name,
        attempts,
    }
    .fail()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeArray;
    use array_client::models::{Reference, Space};

    fn object(name: &str) -> VolumeSnapshot {
        // the source volume name is the object name's last dotted segment
        let member = name.rsplit('.').next().unwrap_or(name);
        VolumeSnapshot {
            name: name.to_string(),
            source: Reference {
                id: None,
                name: Some(member.to_string()),
            },
            space: Space::default(),
        }
    }

    #[tokio::test]
    async fn exists_matches_the_exact_suffix_only() {
        let array = FakeArray::new("array-a");
        array.add_pg_snapshot("pg1", "gct10");
        assert!(!snapshot_exists(&array, "pg1", "gct1").await.unwrap());
        array.add_pg_snapshot("pg1", "gct1");
        assert!(snapshot_exists(&array, "pg1", "gct1").await.unwrap());
    }

    #[tokio::test]
    async fn safety_lock_creates_nothing() {
        let array = FakeArray::new("array-a");
        let created = create_snapshot(&array, "pg1", "gct1", false, true)
            .await
            .unwrap();
        assert_eq!(created, None);
        assert!(array.pg_snapshots.lock().unwrap().is_empty());

        let created = create_snapshot(&array, "pg1", "gct1", false, false)
            .await
            .unwrap();
        assert_eq!(created.as_deref(), Some("gct1"));
        assert!(snapshot_exists(&array, "pg1", "gct1").await.unwrap());
    }

    #[test]
    fn objects_match_on_the_name_tail() {
        let objects = vec![
            object("pg1.gct1.data01"),
            // replica objects carry the source array name up front
            object("array-a:pg1.gct1.data02"),
            object("pg1.gct1.data02.extra"),
            object("pg1.other.data01"),
        ];
        let members = vec!["data01".to_string(), "data02".to_string()];
        let matched = match_snapshot_objects(&objects, &members, "pg1", "gct1");
        assert_eq!(matched, vec!["pg1.gct1.data01", "array-a:pg1.gct1.data02"]);
    }

    #[test]
    fn vvol_members_match_with_the_datastore_prefix_stripped() {
        let objects = vec![object("pg1.gct1.data01")];
        let members = vec!["vvol-ds:container:data01".to_string()];
        let matched = match_snapshot_objects(&objects, &members, "pg1", "gct1");
        assert_eq!(matched, vec!["pg1.gct1.data01"]);
        assert_eq!(strip_datastore_prefix("plain-name"), None);
    }

    #[tokio::test]
    async fn fresh_snapshot_gets_every_key_on_every_object() {
        let array = FakeArray::new("array-a");
        array.add_volume_snapshot(object("pg1.gct1.data01"));
        array.add_volume_snapshot(object("pg1.gct1.data02"));
        let members = vec!["data01".to_string(), "data02".to_string()];
        let mut facts = FactSet::default();
        facts.set(FactKey::DbName, "ORCL");

        apply_fact_tags(&array, false, &members, "pg1", "gct1", &mut facts, false, false)
            .await
            .unwrap();
        assert_eq!(
            array.snapshot_tag("pg1.gct1.data01", "db_name").as_deref(),
            Some("ORCL")
        );
        assert_eq!(
            array.snapshot_tag("pg1.gct1.data02", "db_name").as_deref(),
            Some("ORCL")
        );
        assert_eq!(
            array.snapshot_tag("pg1.gct1.data01", "db_role").as_deref(),
            Some(crate::facts::NOT_DEFINED)
        );
    }

    #[tokio::test]
    async fn pre_existing_snapshot_reads_facts_back() {
        let array = FakeArray::new("array-a");
        array.add_volume_snapshot(object("pg1.gct1.data01"));
        array.set_snapshot_tag("pg1.gct1.data01", "db_name", "ORCL");
        array.set_snapshot_tag("pg1.gct1.data01", "unrelated", "x");
        let members = vec!["data01".to_string()];
        let mut facts = FactSet::default();

        apply_fact_tags(&array, true, &members, "pg1", "gct1", &mut facts, false, false)
            .await
            .unwrap();
        assert_eq!(facts.get(FactKey::DbName), Some("ORCL"));
        // nothing written back while reading
        assert_eq!(array.snapshot_tag("pg1.gct1.data01", "db_role"), None);
    }

    #[tokio::test]
    async fn replication_wait_polls_the_replica_group() {
        let array = FakeArray::new("array-b");
        array.add_pg_snapshot("array-a:pg1", "gct1");
        wait_replication(&array, "array-a", "pg1", "gct1", 3, Duration::from_millis(1))
            .await
            .unwrap();

        let error = wait_replication(&array, "array-a", "pg1", "missing", 2, Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(matches!(error, Error::ReplicationTimeout { attempts: 2, .. }));
    }
}
