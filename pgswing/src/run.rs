//! The end-to-end swing: snapshot, tag, reconcile, sync, bring up.

use crate::{
    config::Config,
    error::{
        AdminSnafu, ArrayConnectSnafu, ArrayIdentitySnafu, ConfigMissingSnafu, Error,
        NotReplicatedSnafu, PgMembersSnafu, PgQuerySnafu, UnmatchedVolumesSnafu,
    },
    facts::{FactKey, FactSet},
    lifecycle::{InstanceDriver, TargetMode},
    reconcile, snapshot,
    volumes::{self, VolumeTables},
    CliArgs,
};
use array_client::{ArrayClient, ArrayOps};
use ora_admin::{AdminExec, LocalSession, RemoteSession};
use snafu::{ensure, OptionExt, ResultExt};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The safety lock stopped the run before anything was created.
    SafetyLocked,
    /// Snapshot taken and tagged; no target group is configured.
    SnapshotOnly,
    /// Everything up to the destructive sync ran under the safety lock.
    DryRun,
    /// Volumes synced; no target instance is configured.
    Synced,
    /// The full swing completed and the target instance reported this
    /// status.
    Complete { status: String },
}

/// A fully resolved swing: endpoints connected, names and modes decided.
/// Separated from [`run`] so the whole flow can be driven end to end
/// against in-memory surfaces.
pub(crate) struct Swing<'a> {
    pub source_array: &'a dyn ArrayOps,
    /// Same as the source array unless the snapshot replicates.
    pub target_array: &'a dyn ArrayOps,
    pub db: Option<&'a dyn AdminExec>,
    pub asm: Option<&'a dyn AdminExec>,
    /// Connect command for introspecting the source database.
    pub source_session: Option<String>,
    pub source_pg: String,
    pub target_pg: Option<String>,
    pub snapshot_name: String,
    pub target_mode: TargetMode,
    pub backup_mode: bool,
    pub replicate: bool,
    pub ignore_mapping: bool,
    pub dry_run: bool,
    pub excluded: HashSet<String>,
    pub rescan_command: Option<String>,
    pub db_unique_name: Option<String>,
    pub local_listener: Option<String>,
    pub sync_attempts: u32,
    pub sync_interval: Duration,
    pub replication_attempts: u32,
    pub replication_interval: Duration,
}

impl Swing<'_> {
    pub(crate) async fn execute(&self) -> Result<Outcome, Error> {
        if self.replicate {
            // replication must be configured on the source group
            let groups = self
                .source_array
                .protection_groups(&[self.source_pg.clone()])
                .await
                .context(PgQuerySnafu {
                    pg: &self.source_pg,
                })?;
            ensure!(
                groups.iter().any(|group| group.target_count > 0),
                NotReplicatedSnafu {
                    pg: &self.source_pg
                }
            );
        }

        let exists =
            snapshot::snapshot_exists(self.source_array, &self.source_pg, &self.snapshot_name)
                .await?;
        info!(
            snapshot = %self.snapshot_name,
            exists,
            source = %self.source_pg,
            target = self.target_pg.as_deref().unwrap_or("none"),
            "protection groups resolved"
        );

        // a fresh snapshot gets its facts straight from the source instance
        let mut facts = FactSet::default();
        if !exists {
            if let (Some(db), Some(connect)) = (self.db, self.source_session.as_deref()) {
                facts.set(
                    FactKey::BackupMode,
                    if self.backup_mode { "Yes" } else { "No" },
                );
                collect_source_facts(db, connect, &mut facts).await?;
                if self.backup_mode {
                    info!("putting the source database in backup mode");
                    db.run_batch(connect, &["alter database begin backup;".to_string()])
                        .await
                        .context(AdminSnafu {
                            stage: "begin backup",
                        })?;
                }
            }
        }

        let created = if exists {
            Some(self.snapshot_name.clone())
        } else {
            snapshot::create_snapshot(
                self.source_array,
                &self.source_pg,
                &self.snapshot_name,
                self.replicate,
                self.dry_run,
            )
            .await?
        };

        // the source database never stays in backup mode, sentinel or not
        if !exists && self.backup_mode {
            if let (Some(db), Some(connect)) = (self.db, self.source_session.as_deref()) {
                info!("taking the source database out of backup mode");
                db.run_batch(connect, &["alter database end backup;".to_string()])
                    .await
                    .context(AdminSnafu { stage: "end backup" })?;
            }
        }

        let Some(snapshot_name) = created else {
            info!("nothing to tag or reconcile while the safety lock is engaged");
            return Ok(Outcome::SafetyLocked);
        };

        info!(pg = %self.source_pg, "querying the protection group volumes");
        let members: Vec<String> = self
            .source_array
            .pg_members(&self.source_pg)
            .await
            .context(PgMembersSnafu {
                pg: &self.source_pg,
            })?
            .into_iter()
            .filter_map(|member| member.member.name)
            .collect();
        for member in &members {
            debug!(volume = %member);
        }

        snapshot::apply_fact_tags(
            self.source_array,
            exists,
            &members,
            &self.source_pg,
            &snapshot_name,
            &mut facts,
            self.dry_run,
            false,
        )
        .await?;

        // a replicated snapshot must land before its replica can be scanned
        if self.replicate && !exists && !self.dry_run {
            let source_name = self
                .source_array
                .array_name()
                .await
                .context(ArrayIdentitySnafu)?;
            snapshot::wait_replication(
                self.target_array,
                &source_name,
                &self.source_pg,
                &snapshot_name,
                self.replication_attempts,
                self.replication_interval,
            )
            .await?;
            snapshot::apply_fact_tags(
                self.target_array,
                exists,
                &members,
                &self.source_pg,
                &snapshot_name,
                &mut facts,
                self.dry_run,
                true,
            )
            .await?;
        }

        for id in &self.excluded {
            info!(id = %id, "volume excluded from mapping");
        }

        info!(snapshot = %snapshot_name, "listing the volumes in the snapshot");
        let mut tables = VolumeTables::new();
        let source_count = tables
            .collect_sources(
                self.target_array,
                &self.source_pg,
                &snapshot_name,
                &self.excluded,
            )
            .await?;
        info!(volumes = source_count, "snapshot volumes collected");

        let Some(target_pg) = &self.target_pg else {
            info!("no target protection group configured, stopping after the snapshot");
            return Ok(Outcome::SnapshotOnly);
        };

        let driver = self.db.map(|db| match self.asm {
            Some(asm) => InstanceDriver::new(db).with_asm(asm),
            None => InstanceDriver::new(db),
        });
        let diskgroups = facts.csv_values(FactKey::AsmDiskGroup);

        if let Some(driver) = &driver {
            info!("checking the target instance is down");
            driver.ensure_instance_down().await?;
            if !diskgroups.is_empty() {
                info!("checking the target diskgroups are unmounted");
                driver.ensure_diskgroups_unmounted(&diskgroups).await?;
            }
        }

        info!(pg = %target_pg, "querying the target protection group volumes");
        let target_members: Vec<String> = self
            .target_array
            .pg_members(target_pg)
            .await
            .context(PgMembersSnafu { pg: target_pg })?
            .into_iter()
            .filter_map(|member| member.member.name)
            .collect();
        volumes::check_capacity(&snapshot_name, source_count, target_members.len())?;

        info!("querying the target volume details");
        tables
            .collect_targets(self.target_array, &target_members, self.ignore_mapping)
            .await?;

        info!("determining the volume mapping");
        let report = reconcile::reconcile(&mut tables);
        ensure!(
            report.unmatched == 0,
            UnmatchedVolumesSnafu {
                count: report.unmatched
            }
        );

        let sync = reconcile::apply_mapping_with_retry(
            self.target_array,
            &tables,
            self.dry_run,
            self.sync_attempts,
            self.sync_interval,
        )
        .await?;
        info!(
            synced = sync.synced,
            skipped = sync.skipped_oversize,
            "volume sync pass complete"
        );

        if self.dry_run {
            info!("safety lock engaged - disable it to overwrite the target volumes");
            return Ok(Outcome::DryRun);
        }

        let Some(driver) = &driver else {
            info!("no target instance configured, stopping after the sync");
            return Ok(Outcome::Synced);
        };

        if let Some(command) = &self.rescan_command {
            driver.rescan(command).await?;
        }
        if !diskgroups.is_empty() {
            driver.mount_diskgroups(&diskgroups).await?;
        }
        let status = driver
            .bring_up(
                self.target_mode,
                &facts,
                self.db_unique_name.as_deref(),
                self.local_listener.as_deref(),
            )
            .await?;
        info!("swing complete");
        Ok(Outcome::Complete { status })
    }
}

/// Build the database and ASM admin surfaces the config calls for.
fn admin_surfaces(config: &Config) -> (Option<Box<dyn AdminExec>>, Option<Box<dyn AdminExec>>) {
    match &config.remote {
        Some(remote) => {
            let db = config
                .oracle_sid
                .as_ref()
                .zip(config.oracle_home.as_ref())
                .map(|(sid, home)| {
                    let mut session =
                        RemoteSession::new(&remote.host, remote.port, &remote.db_user, sid, home);
                    if let Some(preamble) = &remote.db_preamble {
                        session = session.with_preamble(preamble);
                    }
                    Box::new(session) as Box<dyn AdminExec>
                });
            let asm = config
                .asm_sid
                .as_ref()
                .zip(config.asm_home.as_ref())
                .map(|(sid, home)| {
                    let user = remote.asm_user.as_deref().unwrap_or(&remote.db_user);
                    let mut session =
                        RemoteSession::new(&remote.host, remote.port, user, sid, home);
                    if let Some(preamble) = &remote.asm_preamble {
                        session = session.with_preamble(preamble);
                    }
                    Box::new(session) as Box<dyn AdminExec>
                });
            (db, asm)
        }
        None => {
            let db = config
                .oracle_sid
                .as_ref()
                .zip(config.oracle_home.as_ref())
                .map(|(sid, home)| Box::new(LocalSession::new(sid, home)) as Box<dyn AdminExec>);
            let asm = config
                .asm_sid
                .as_ref()
                .zip(config.asm_home.as_ref())
                .map(|(sid, home)| Box::new(LocalSession::new(sid, home)) as Box<dyn AdminExec>);
            (db, asm)
        }
    }
}

/// Connect command for introspecting the source database, when the config
/// carries credentials for it.
fn source_connect(config: &Config) -> Option<String> {
    let user = config.db_user.as_ref()?;
    let password = config.db_password.as_ref()?;
    let connect = config.db_connect_string.as_ref()?;
    Some(format!("connect {user}/{password}@{connect} as sysdba"))
}

/// Run the marker queries against the source instance and absorb the
/// results, then discover the open pluggable databases when the source
/// runs with them enabled.
async fn collect_source_facts(
    db: &dyn AdminExec,
    connect: &str,
    facts: &mut FactSet,
) -> Result<(), Error> {
    info!("reading the source database settings");
    let queries: Vec<String> = FactKey::all()
        .filter(|key| *key != FactKey::OpenPdbs)
        .filter_map(|key| key.source_query())
        .map(str::to_string)
        .collect();
    let lines = db.run_batch(connect, &queries).await.context(AdminSnafu {
        stage: "source introspection",
    })?;
    facts.absorb_marker_lines(&lines);
    for key in FactKey::all() {
        if let Some(value) = facts.get(key) {
            info!(key = %key, value = %value, "source database setting");
        }
    }
    if facts.pluggable_enabled() {
        info!("identifying the open pluggable databases");
        if let Some(query) = FactKey::OpenPdbs.source_query() {
            let lines = db
                .run_batch(connect, &[query.to_string()])
                .await
                .context(AdminSnafu {
                    stage: "pluggable discovery",
                })?;
            if facts.absorb_marker_lines(&lines) == 0 {
                info!("no open pluggable databases found");
            }
        }
    }
    Ok(())
}

pub async fn run(args: &CliArgs) -> Result<Outcome, Error> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started = %chrono::Utc::now().to_rfc3339(),
        "snapshot swing starting"
    );
    let dry_run = !args.execute;
    if dry_run {
        info!("safety lock engaged - nothing will be created or overwritten");
    }

    let config = Config::load(&args.config)?;
    let source_pg = args
        .source_pg
        .clone()
        .or_else(|| config.source_protection_group.clone())
        .context(ConfigMissingSnafu {
            key: "source_protection_group",
        })?;
    let target_pg = args
        .target_pg
        .clone()
        .or_else(|| config.target_protection_group.clone());
    let target_mode = match args.target_mode {
        Some(mode) => mode,
        None => match &config.target_mode {
            Some(raw) => raw
                .parse::<TargetMode>()
                .map_err(|_| Error::InvalidTargetMode { mode: raw.clone() })?,
            None => TargetMode::Down,
        },
    };

    let (src_host, src_token) = config.source_array()?;
    info!(array = %src_host, "connecting to the source array");
    let source_array = ArrayClient::connect(&src_host, &src_token)
        .await
        .context(ArrayConnectSnafu { host: &src_host })?;
    source_array
        .check_connectivity()
        .await
        .context(ArrayConnectSnafu { host: &src_host })?;

    // replicated swings land on a second array
    let target_array = if args.replicate {
        let (tgt_host, tgt_token) = config.target_array()?;
        info!(array = %tgt_host, "connecting to the target array");
        let target = ArrayClient::connect(&tgt_host, &tgt_token)
            .await
            .context(ArrayConnectSnafu { host: &tgt_host })?;
        target
            .check_connectivity()
            .await
            .context(ArrayConnectSnafu { host: &tgt_host })?;
        target
    } else {
        source_array.clone()
    };

    let (db_exec, asm_exec) = admin_surfaces(&config);

    let swing = Swing {
        source_array: &source_array,
        target_array: &target_array,
        db: db_exec.as_deref(),
        asm: asm_exec.as_deref(),
        source_session: source_connect(&config),
        source_pg,
        target_pg,
        snapshot_name: args.snapshot_name.clone(),
        target_mode,
        backup_mode: args.backup_mode || config.backup_mode,
        replicate: args.replicate,
        ignore_mapping: args.ignore_mapping,
        dry_run,
        excluded: config.excluded_volumes.iter().cloned().collect(),
        rescan_command: config.rescan_command.clone(),
        db_unique_name: config.db_unique_name.clone(),
        local_listener: config.local_listener.clone(),
        sync_attempts: args.sync_attempts,
        sync_interval: *args.sync_interval,
        replication_attempts: args.replication_attempts,
        replication_interval: *args.replication_interval,
    };
    swing.execute().await
}
