//! Bringing the target instance from down to the requested state after its
//! volumes have been overwritten.

use crate::{
    error::{
        AdminSnafu, DiskGroupMountSnafu, DiskGroupsMountedSnafu, Error, InstanceRunningSnafu,
        InstanceStatusSnafu, RescanSnafu,
    },
    facts::{FactKey, FactSet},
};
use ora_admin::AdminExec;
use snafu::{ensure, OptionExt, ResultExt};
use tracing::{info, warn};

/// Requested terminal state of the target instance.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::AsRefStr,
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum TargetMode {
    Down,
    Started,
    Mounted,
    Open,
}

/// Default connect command for the database instance.
pub const DB_CONNECT: &str = "connect / as sysdba";
/// Default connect command for the ASM instance.
pub const ASM_CONNECT: &str = "connect / as sysasm";

/// The status query fails with this when the instance is down.
const DOWN_SENTINEL: &str = "ORA-01034";

/// Batch output lines that are session chatter, not statement output.
fn meaningful(lines: &[String]) -> impl Iterator<Item = &String> {
    lines
        .iter()
        .filter(|line| !line.starts_with("Connected") && !line.starts_with("Disconnected"))
}

/// Drives the target database and (optionally) ASM instance over an
/// administrative surface.
pub struct InstanceDriver<'a> {
    db: &'a dyn AdminExec,
    asm: Option<&'a dyn AdminExec>,
}

impl<'a> InstanceDriver<'a> {
    pub fn new(db: &'a dyn AdminExec) -> Self {
        Self { db, asm: None }
    }

    pub fn with_asm(mut self, asm: &'a dyn AdminExec) -> Self {
        self.asm = Some(asm);
        self
    }

    /// Current status of the instance, `DOWN` when the down sentinel is
    /// seen. A query that yields no status at all is an error, not a
    /// down instance.
    pub async fn instance_status(&self) -> Result<String, Error> {
        let lines = self
            .db
            .run_batch(DB_CONNECT, &["select status from v$instance;".to_string()])
            .await
            .context(AdminSnafu {
                stage: "instance status",
            })?;
        if lines.iter().any(|line| line.contains(DOWN_SENTINEL)) {
            return Ok("DOWN".to_string());
        }
        let status = meaningful(&lines)
            .next()
            .map(|line| line.to_uppercase())
            .context(InstanceStatusSnafu)?;
        Ok(status)
    }

    /// The target instance must not be running before its volumes are
    /// overwritten underneath it.
    pub async fn ensure_instance_down(&self) -> Result<(), Error> {
        let status = self.instance_status().await?;
        ensure!(status == "DOWN", InstanceRunningSnafu { status });
        info!("target instance is not running");
        Ok(())
    }

    /// Which of the given diskgroups ASM currently has mounted. Empty when
    /// no ASM surface is configured.
    pub async fn mounted_diskgroups(&self, groups: &[String]) -> Result<Vec<String>, Error> {
        let Some(asm) = self.asm else {
            return Ok(Vec::new());
        };
        if groups.is_empty() {
            return Ok(Vec::new());
        }
        let lines = asm
            .run_batch(
                ASM_CONNECT,
                &["select name from v$asm_diskgroup where state = 'MOUNTED';".to_string()],
            )
            .await
            .context(AdminSnafu {
                stage: "asm diskgroup query",
            })?;
        Ok(groups
            .iter()
            .filter(|group| meaningful(&lines).any(|line| line == *group))
            .cloned()
            .collect())
    }

    /// The snapshot's diskgroups must not be mounted while their volumes
    /// are overwritten.
    pub async fn ensure_diskgroups_unmounted(&self, groups: &[String]) -> Result<(), Error> {
        let mounted = self.mounted_diskgroups(groups).await?;
        for group in &mounted {
            warn!(group = %group, "diskgroup is mounted on the target");
        }
        ensure!(
            mounted.is_empty(),
            DiskGroupsMountedSnafu {
                count: mounted.len(),
                groups: mounted.join(",")
            }
        );
        info!("no target diskgroups are mounted");
        Ok(())
    }

    /// Mount the diskgroups on the target's ASM instance and verify each
    /// one actually came up.
    pub async fn mount_diskgroups(&self, groups: &[String]) -> Result<(), Error> {
        let Some(asm) = self.asm else {
            return Ok(());
        };
        if groups.is_empty() {
            return Ok(());
        }
        let commands: Vec<String> = groups
            .iter()
            .map(|group| format!("alter diskgroup {group} mount;"))
            .collect();
        for group in groups {
            info!(group = %group, "mounting diskgroup");
        }
        asm.run_batch(ASM_CONNECT, &commands)
            .await
            .context(AdminSnafu {
                stage: "asm diskgroup mount",
            })?;
        let mounted = self.mounted_diskgroups(groups).await?;
        for group in groups {
            ensure!(mounted.contains(group), DiskGroupMountSnafu { group });
        }
        info!("all diskgroups mounted on the target");
        Ok(())
    }

    /// Rescan the scsi bus so freshly overwritten devices are seen.
    pub async fn rescan(&self, command: &str) -> Result<(), Error> {
        info!(command, "rescanning the scsi bus");
        let surface = self.asm.unwrap_or(self.db);
        surface.run_os(command).await.context(RescanSnafu)?;
        Ok(())
    }

    fn spfile_commands(facts: &FactSet, unique_name: Option<&str>) -> Vec<String> {
        let mut commands = Vec::new();
        if let Some(db_name) = facts.get(FactKey::DbName) {
            commands.push(format!(
                "alter system set db_name='{db_name}' sid='*' scope=spfile;"
            ));
        }
        for parameter in FactKey::SPFILE_PARAMETERS {
            let Some(value) = facts.get(parameter) else {
                continue;
            };
            let value = match parameter {
                // one quoted path per control file
                FactKey::ControlFiles => format!("'{}'", value.replace(", ", "','")),
                FactKey::DbRecoveryFileDest => format!("'{value}'"),
                _ => value.to_string(),
            };
            commands.push(format!(
                "alter system set {parameter}={value} sid='*' scope=spfile;"
            ));
        }
        if let Some(unique_name) = unique_name {
            commands.push(format!(
                "alter system set db_unique_name={unique_name} sid='*' scope=spfile;"
            ));
        }
        // bounce so the instance re-reads the spfile
        commands.push("shutdown immediate".to_string());
        commands
    }

    /// Re-point the started instance's spfile at the snapshot's settings,
    /// then shut it down for the real startup.
    pub async fn reset_spfile(
        &self,
        facts: &FactSet,
        unique_name: Option<&str>,
    ) -> Result<(), Error> {
        info!("resetting the target spfile");
        let commands = Self::spfile_commands(facts, unique_name);
        for command in &commands {
            info!(command = %command);
        }
        self.db
            .run_batch(DB_CONNECT, &commands)
            .await
            .context(AdminSnafu {
                stage: "spfile reset",
            })?;
        Ok(())
    }

    fn startup_commands(mode: TargetMode, end_backup: bool) -> Vec<String> {
        let mut commands = vec!["startup nomount;".to_string()];
        if matches!(mode, TargetMode::Mounted | TargetMode::Open) {
            commands.push("alter database mount;".to_string());
            if end_backup {
                commands.push("alter database end backup;".to_string());
            }
        }
        if mode == TargetMode::Open {
            commands.push("alter database open;".to_string());
        }
        commands
    }

    /// Start the instance up to the given mode. A snapshot taken in hot
    /// backup mode needs an end backup once mounted.
    pub async fn start_to(&self, mode: TargetMode, end_backup: bool) -> Result<(), Error> {
        if mode == TargetMode::Down {
            return Ok(());
        }
        info!(mode = %mode, "starting the target instance");
        self.db
            .run_batch(DB_CONNECT, &Self::startup_commands(mode, end_backup))
            .await
            .context(AdminSnafu {
                stage: "instance startup",
            })?;
        Ok(())
    }

    fn pluggable_commands(pdbs: &[String], local_listener: &str) -> Vec<String> {
        let mut commands = Vec::new();
        for pdb in pdbs {
            commands.push(format!("alter pluggable database {pdb} open;"));
            commands.push(format!("alter session set container={pdb};"));
            commands.push(format!("alter system set local_listener='{local_listener}';"));
            commands.push("alter system register;".to_string());
            // back to the root container for the next pdb
            commands.push(DB_CONNECT.to_string());
        }
        commands
    }

    /// Re-open the pluggable databases that were open on the source and
    /// register each with the target's listener.
    pub async fn open_pluggables(
        &self,
        facts: &FactSet,
        local_listener: Option<&str>,
    ) -> Result<(), Error> {
        let pdbs = facts.csv_values(FactKey::OpenPdbs);
        if pdbs.is_empty() {
            info!("no pluggable databases to re-open");
            return Ok(());
        }
        for pdb in &pdbs {
            info!(pdb = %pdb, "opening pluggable database");
        }
        let commands = Self::pluggable_commands(&pdbs, local_listener.unwrap_or(""));
        self.db
            .run_batch(DB_CONNECT, &commands)
            .await
            .context(AdminSnafu {
                stage: "pluggable open",
            })?;
        Ok(())
    }

    /// Bring the instance from down to the requested mode: start it far
    /// enough to own an spfile, re-point the spfile, bounce, start to the
    /// requested mode and re-open pluggables when opening fully. Returns
    /// the instance's reported status.
    pub async fn bring_up(
        &self,
        mode: TargetMode,
        facts: &FactSet,
        unique_name: Option<&str>,
        local_listener: Option<&str>,
    ) -> Result<String, Error> {
        info!(mode = %mode, "requested state of the target instance");
        if mode == TargetMode::Down {
            return Ok(TargetMode::Down.to_string());
        }
        let end_backup = facts.backup_mode();
        self.start_to(TargetMode::Started, end_backup).await?;
        self.reset_spfile(facts, unique_name).await?;
        self.start_to(mode, end_backup).await?;
        let status = self.instance_status().await?;
        if mode == TargetMode::Open && facts.pluggable_enabled() {
            self.open_pluggables(facts, local_listener).await?;
        }
        info!(status = %status, "actual state of the target instance");
        Ok(status)
    }
}
