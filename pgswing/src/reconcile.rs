//! Pairing of snapshot volumes with target volumes, and the destructive
//! sync pass that applies the pairing.

use crate::{
    error::{Error, TagVolumeSnafu, VolumeSyncSnafu},
    volumes::{VolumeTables, MAPPING_TAG},
};
use array_client::{models::Tag, ArrayOps};
use snafu::ResultExt;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Outcome of a reconciliation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub matched: usize,
    pub unmatched: usize,
}

/// Outcome of a sync pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Targets actually overwritten.
    pub synced: usize,
    /// Pairings refused because the source outgrew its tagged target.
    pub skipped_oversize: usize,
    /// Pairings reported but not applied under the safety lock.
    pub dry_run: usize,
    /// Sources that ended the reconciliation without a target.
    pub unmapped: usize,
}

/// Pair every snapshot volume with a target volume. For each source, in
/// collection order:
///
/// 1. a target whose persisted mapping tag names this source, whatever
///    its size, so an established pairing survives volume resizes;
/// 2. otherwise the first unpaired target of exactly the same size;
/// 3. otherwise the first unpaired target large enough to hold it.
///
/// Targets claimed by a mapping tag stay reserved even when their source
/// is not in this snapshot, so a stale pairing is never silently recycled.
pub fn reconcile(tables: &mut VolumeTables) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    for source_id in tables.source_ids() {
        let Some(source) = tables.get_source(&source_id) else {
            continue;
        };
        if source.target.is_some() {
            report.matched += 1;
            continue;
        }
        let source_name = source.name.clone();
        let size = source.size_bytes;
        debug!(source = %source_name, size, "looking for a target volume");

        let found = tables
            .tag_hinted_target(&source_id)
            .or_else(|| tables.first_unmatched_target(|target| target.size_bytes == size))
            .or_else(|| tables.first_unmatched_target(|target| target.size_bytes >= size));

        match found {
            Some(target_id) => {
                if let Some(target) = tables.get_target(&target_id) {
                    info!(source = %source_name, target = %target.name, "volume pairing found");
                }
                tables.pair(&source_id, &target_id);
                report.matched += 1;
            }
            None => {
                warn!(source = %source_name, "no matching target volume found");
                report.unmatched += 1;
            }
        }
    }
    report
}

/// Overwrite each paired target volume from its source snapshot volume and
/// persist the pairing as the target's mapping tag. Destructive. A pairing
/// whose source no longer fits its target is skipped and reported instead
/// of failing the whole pass. Under the safety lock nothing is written.
pub async fn apply_mapping(
    array: &dyn ArrayOps,
    tables: &VolumeTables,
    dry_run: bool,
) -> Result<SyncReport, Error> {
    let mut report = SyncReport::default();
    for source in tables.sources() {
        let Some(target) = source
            .target
            .as_ref()
            .and_then(|target_id| tables.get_target(target_id))
        else {
            info!(source = %source.name, "there is no mapping for this volume");
            report.unmapped += 1;
            continue;
        };
        if source.size_bytes > target.size_bytes {
            error!(
                source = %source.name,
                source_size = source.size_bytes,
                target = %target.name,
                target_size = target.size_bytes,
                "source volume no longer fits its mapped target, skipping"
            );
            report.skipped_oversize += 1;
            continue;
        }
        if dry_run {
            info!(
                source = %source.name,
                target = %target.name,
                "safety lock engaged - target volume would be overwritten"
            );
            report.dry_run += 1;
            continue;
        }
        info!(source = %source.name, target = %target.name, "overwriting the target volume");
        array
            .overwrite_volume(&target.name, &source.name)
            .await
            .context(VolumeSyncSnafu {
                target: &target.name,
                source_name: &source.name,
            })?;
        array
            .tag_volumes(
                &[target.name.clone()],
                &[Tag::new(MAPPING_TAG, source.id.clone())],
            )
            .await
            .context(TagVolumeSnafu {
                volume: &target.name,
            })?;
        report.synced += 1;
    }
    Ok(report)
}

/// [`apply_mapping`], retried while the array still reports the snapshot
/// as replicating. Any other failure aborts immediately.
pub async fn apply_mapping_with_retry(
    array: &dyn ArrayOps,
    tables: &VolumeTables,
    dry_run: bool,
    attempts: u32,
    interval: Duration,
) -> Result<SyncReport, Error> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match apply_mapping(array, tables, dry_run).await {
            Ok(report) => return Ok(report),
            Err(error) if attempt < attempts && error.is_pending_replication() => {
                warn!(attempt, attempts, "snapshot still replicating, retrying the sync");
                attempt += 1;
                tokio::time::sleep(interval).await;
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeArray;
    use crate::volumes::{SourceVolume, TargetVolume};
    use array_client::models::{Space, Volume};

    const GIB: u64 = 1024 * 1024 * 1024;

    fn source(id: &str, name: &str, gib: u64) -> SourceVolume {
        SourceVolume {
            id: id.to_string(),
            name: name.to_string(),
            size_bytes: gib * GIB,
            target: None,
        }
    }

    fn target(id: &str, name: &str, gib: u64, source: Option<&str>) -> TargetVolume {
        TargetVolume {
            id: id.to_string(),
            name: name.to_string(),
            size_bytes: gib * GIB,
            source: source.map(str::to_string),
        }
    }

    fn pairing_of(tables: &VolumeTables, source_id: &str) -> Option<String> {
        tables
            .sources()
            .find(|s| s.id == source_id)
            .and_then(|s| s.target.clone())
    }

    #[test]
    fn equal_size_pairing_wins_over_first_fit() {
        // 100g and 50g sources onto a 100g and a 60g target: the 50g source
        // must land on the 60g target, leaving the 100g pair intact.
        let mut tables = VolumeTables::new();
        tables.insert_source(source("s1", "pg.n.data01", 100));
        tables.insert_source(source("s2", "pg.n.data02", 50));
        tables.insert_target(target("t1", "tgt01", 100, None));
        tables.insert_target(target("t2", "tgt02", 60, None));

        let report = reconcile(&mut tables);
        assert_eq!(report, ReconcileReport { matched: 2, unmatched: 0 });
        assert_eq!(pairing_of(&tables, "s1").as_deref(), Some("t1"));
        assert_eq!(pairing_of(&tables, "s2").as_deref(), Some("t2"));
    }

    #[test]
    fn larger_first_fit_when_no_equal_size() {
        let mut tables = VolumeTables::new();
        tables.insert_source(source("s1", "pg.n.data01", 50));
        tables.insert_target(target("t1", "tgt01", 40, None));
        tables.insert_target(target("t2", "tgt02", 200, None));

        let report = reconcile(&mut tables);
        assert_eq!(report.matched, 1);
        assert_eq!(pairing_of(&tables, "s1").as_deref(), Some("t2"));
    }

    #[test]
    fn too_small_targets_leave_the_source_unmatched() {
        // a 100g source with only a 40g target available cannot pair
        let mut tables = VolumeTables::new();
        tables.insert_source(source("s1", "pg.n.data01", 100));
        tables.insert_target(target("t1", "tgt01", 40, None));

        let report = reconcile(&mut tables);
        assert_eq!(report, ReconcileReport { matched: 0, unmatched: 1 });
        assert_eq!(pairing_of(&tables, "s1"), None);
    }

    #[test]
    fn tag_hint_wins_regardless_of_size() {
        // t2 is smaller than the equal-size candidate t1 but carries the
        // persisted mapping for s1, so it still wins.
        let mut tables = VolumeTables::new();
        tables.insert_source(source("s1", "pg.n.data01", 100));
        tables.insert_target(target("t1", "tgt01", 100, None));
        tables.insert_target(target("t2", "tgt02", 60, Some("s1")));

        reconcile(&mut tables);
        assert_eq!(pairing_of(&tables, "s1").as_deref(), Some("t2"));
    }

    #[test]
    fn stale_tag_still_reserves_the_target() {
        // t1 is tagged for a source that is not in this snapshot; s1 must
        // fall through to t2 rather than recycle the reserved target.
        let mut tables = VolumeTables::new();
        tables.insert_source(source("s1", "pg.n.data01", 100));
        tables.insert_target(target("t1", "tgt01", 100, Some("gone")));
        tables.insert_target(target("t2", "tgt02", 100, None));

        reconcile(&mut tables);
        assert_eq!(pairing_of(&tables, "s1").as_deref(), Some("t2"));
    }

    #[test]
    fn pairing_is_injective() {
        let mut tables = VolumeTables::new();
        for i in 0..5 {
            tables.insert_source(source(&format!("s{i}"), &format!("pg.n.d{i}"), 10));
            tables.insert_target(target(&format!("t{i}"), &format!("tgt{i}"), 10, None));
        }
        let report = reconcile(&mut tables);
        assert_eq!(report.matched, 5);
        let mut targets: Vec<_> = tables.sources().filter_map(|s| s.target.clone()).collect();
        targets.sort();
        targets.dedup();
        assert_eq!(targets.len(), 5);
    }

    #[tokio::test]
    async fn sync_overwrites_and_tags_in_order() {
        let array = FakeArray::new("array-b");
        let mut tables = VolumeTables::new();
        tables.insert_source(source("s1", "pg.n.data01", 10));
        tables.insert_source(source("s2", "pg.n.data02", 10));
        tables.insert_target(target("t1", "tgt01", 10, None));
        tables.insert_target(target("t2", "tgt02", 10, None));
        reconcile(&mut tables);

        let report = apply_mapping(&array, &tables, false).await.unwrap();
        assert_eq!(report.synced, 2);
        let overwrites = array.overwrites.lock().unwrap().clone();
        assert_eq!(
            overwrites,
            vec![
                ("tgt01".to_string(), "pg.n.data01".to_string()),
                ("tgt02".to_string(), "pg.n.data02".to_string()),
            ]
        );
        assert_eq!(array.volume_tag("tgt01", MAPPING_TAG).as_deref(), Some("s1"));
        assert_eq!(array.volume_tag("tgt02", MAPPING_TAG).as_deref(), Some("s2"));
    }

    #[tokio::test]
    async fn safety_lock_keeps_the_array_untouched() {
        let array = FakeArray::new("array-b");
        let mut tables = VolumeTables::new();
        tables.insert_source(source("s1", "pg.n.data01", 10));
        tables.insert_target(target("t1", "tgt01", 10, None));
        reconcile(&mut tables);

        let report = apply_mapping(&array, &tables, true).await.unwrap();
        assert_eq!(report.dry_run, 1);
        assert_eq!(report.synced, 0);
        assert!(array.overwrites.lock().unwrap().is_empty());
        assert_eq!(array.volume_tag("tgt01", MAPPING_TAG), None);
    }

    #[tokio::test]
    async fn oversize_tag_pairing_is_skipped_not_synced() {
        // a resized source paired by its tag onto a now-too-small target
        let array = FakeArray::new("array-b");
        let mut tables = VolumeTables::new();
        tables.insert_source(source("s1", "pg.n.data01", 100));
        tables.insert_source(source("s2", "pg.n.data02", 10));
        tables.insert_target(target("t1", "tgt01", 60, Some("s1")));
        tables.insert_target(target("t2", "tgt02", 10, None));
        reconcile(&mut tables);

        let report = apply_mapping(&array, &tables, false).await.unwrap();
        assert_eq!(report.skipped_oversize, 1);
        assert_eq!(report.synced, 1);
        let overwrites = array.overwrites.lock().unwrap().clone();
        assert_eq!(overwrites, vec![("tgt02".to_string(), "pg.n.data02".to_string())]);
    }

    #[tokio::test]
    async fn retry_rides_out_pending_replication() {
        let array = FakeArray::new("array-b");
        *array.pending_overwrites.lock().unwrap() = 2;
        let mut tables = VolumeTables::new();
        tables.insert_source(source("s1", "pg.n.data01", 10));
        tables.insert_target(target("t1", "tgt01", 10, None));
        reconcile(&mut tables);

        let report =
            apply_mapping_with_retry(&array, &tables, false, 5, Duration::from_millis(1))
                .await
                .unwrap();
        assert_eq!(report.synced, 1);
        assert_eq!(array.overwrites.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn retry_gives_up_after_the_last_attempt() {
        let array = FakeArray::new("array-b");
        *array.pending_overwrites.lock().unwrap() = 10;
        let mut tables = VolumeTables::new();
        tables.insert_source(source("s1", "pg.n.data01", 10));
        tables.insert_target(target("t1", "tgt01", 10, None));
        reconcile(&mut tables);

        let error = apply_mapping_with_retry(&array, &tables, false, 3, Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(error.is_pending_replication());
        assert!(array.overwrites.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn idempotent_rerun_repairs_the_same_pairs() {
        // second run: collect targets with the tags the first run wrote
        let array = FakeArray::new("array-b");
        array.add_volume(Volume {
            id: "t1".to_string(),
            name: "tgt01".to_string(),
            space: Space { total_provisioned: 100 * GIB },
        });
        array.add_volume(Volume {
            id: "t2".to_string(),
            name: "tgt02".to_string(),
            space: Space { total_provisioned: 100 * GIB },
        });
        array.set_volume_tag("tgt02", MAPPING_TAG, "s1");

        let mut tables = VolumeTables::new();
        tables.insert_source(source("s1", "pg.n.data01", 100));
        tables
            .collect_targets(&array, &["tgt01".to_string(), "tgt02".to_string()], false)
            .await
            .unwrap();
        reconcile(&mut tables);
        assert_eq!(pairing_of(&tables, "s1").as_deref(), Some("t2"));
    }
}
