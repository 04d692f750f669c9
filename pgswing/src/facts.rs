//! The database settings carried from the source instance to the target,
//! persisted on the array as snapshot tags.

use indexmap::{map::Entry, IndexMap};

/// Placeholder tag value for a setting the source database did not report.
pub const NOT_DEFINED: &str = "Not Defined";

/// Every setting recorded against a snapshot. The tag key on the array is
/// the snake_case rendering of the variant.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::EnumIter,
    strum_macros::AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
#[allow(missing_docs)]
pub enum FactKey {
    DbName,
    DbId,
    DbTime,
    DbUniqueName,
    DbRole,
    OpenMode,
    ArchivelogMode,
    FlashbackMode,
    PlatformName,
    Version,
    EncryptedTablespaces,
    BackupMode,
    ControlFiles,
    DbRecoveryFileDest,
    DbRecoveryFileDestSize,
    EnablePluggableDatabase,
    AsmDiskGroup,
    OpenPdbs,
}

impl FactKey {
    /// Instance parameters re-pointed in the target spfile before startup.
    pub const SPFILE_PARAMETERS: [FactKey; 4] = [
        FactKey::ControlFiles,
        FactKey::DbRecoveryFileDest,
        FactKey::DbRecoveryFileDestSize,
        FactKey::EnablePluggableDatabase,
    ];

    /// All keys, in tagging order.
    pub fn all() -> impl Iterator<Item = FactKey> {
        <Self as strum::IntoEnumIterator>::iter()
    }

    /// The marker-prefixed query that derives this setting on the source
    /// instance, or `None` for settings computed by the program itself.
    /// Output lines parse back via [`FactSet::absorb_marker_lines`].
    pub fn source_query(&self) -> Option<&'static str> {
        let query = match self {
            FactKey::DbName => "select 'db_name='||name from v$database;",
            FactKey::DbId => "select 'db_id='||dbid from v$database;",
            FactKey::DbTime => {
                "select 'db_time='||to_char(sysdate, 'YYYY-MM-DD HH24:MI:SS') from dual;"
            }
            FactKey::DbUniqueName => "select 'db_unique_name='||db_unique_name from v$database;",
            FactKey::DbRole => "select 'db_role='||database_role from v$database;",
            FactKey::OpenMode => "select 'open_mode='||open_mode from v$database;",
            FactKey::ArchivelogMode => "select 'archivelog_mode='||log_mode from v$database;",
            FactKey::FlashbackMode => "select 'flashback_mode='||flashback_on from v$database;",
            FactKey::PlatformName => "select 'platform_name='||platform_name from v$database;",
            FactKey::Version => "select 'version='||banner_full from v$version;",
            FactKey::EncryptedTablespaces => {
                "select 'encrypted_tablespaces='||count(*) from v$encrypted_tablespaces;"
            }
            FactKey::BackupMode => return None,
            FactKey::ControlFiles => {
                "select 'control_files='||value from v$parameter where name = 'control_files';"
            }
            FactKey::DbRecoveryFileDest => {
                "select 'db_recovery_file_dest='||value from v$parameter \
                 where name = 'db_recovery_file_dest';"
            }
            FactKey::DbRecoveryFileDestSize => {
                "select 'db_recovery_file_dest_size='||value from v$parameter \
                 where name = 'db_recovery_file_dest_size';"
            }
            FactKey::EnablePluggableDatabase => {
                "select 'enable_pluggable_database='||value from v$parameter \
                 where name = 'enable_pluggable_database';"
            }
            FactKey::AsmDiskGroup => {
                // every connected group, not just the ones holding datafiles
                "select 'asm_disk_group='||name from v$asm_diskgroup \
                 where state = 'CONNECTED';"
            }
            FactKey::OpenPdbs => {
                "select 'open_pdbs='||name from v$pdbs where open_mode = 'READ WRITE';"
            }
        };
        Some(query)
    }
}

/// The collected settings of one snapshot, keyed by [`FactKey`] and kept
/// in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct FactSet {
    facts: IndexMap<FactKey, String>,
}

impl FactSet {
    /// Record a setting, replacing any previous value.
    pub fn set(&mut self, key: FactKey, value: impl Into<String>) {
        self.facts.insert(key, value.into());
    }

    /// The recorded value, if any.
    pub fn get(&self, key: FactKey) -> Option<&str> {
        self.facts.get(&key).map(String::as_str)
    }

    /// The recorded value, or the [`NOT_DEFINED`] placeholder.
    pub fn value_or_default(&self, key: FactKey) -> &str {
        self.get(key).unwrap_or(NOT_DEFINED)
    }

    /// True when no settings have been recorded.
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// Parse `key=value` marker lines out of a query batch's output.
    /// Lines whose prefix is not a known key (errors, sqlplus noise) are
    /// skipped. A repeated key accumulates comma-separated. Returns how
    /// many lines were absorbed.
    pub fn absorb_marker_lines(&mut self, lines: &[String]) -> usize {
        let mut absorbed = 0;
        for line in lines {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let Ok(key) = key.parse::<FactKey>() else {
                continue;
            };
            match self.facts.entry(key) {
                Entry::Occupied(mut entry) => {
                    entry.get_mut().push(',');
                    entry.get_mut().push_str(value);
                }
                Entry::Vacant(entry) => {
                    entry.insert(value.to_string());
                }
            }
            absorbed += 1;
        }
        absorbed
    }

    /// Split a comma-accumulated value back into its parts.
    pub fn csv_values(&self, key: FactKey) -> Vec<String> {
        self.get(key)
            .into_iter()
            .flat_map(|value| value.split(','))
            .map(|part| part.trim().to_string())
            .filter(|part| !part.is_empty() && part != NOT_DEFINED)
            .collect()
    }

    /// Whether the snapshot was taken in hot backup mode.
    pub fn backup_mode(&self) -> bool {
        self.get(FactKey::BackupMode)
            .map(|value| value.trim().eq_ignore_ascii_case("yes"))
            .unwrap_or(false)
    }

    /// Whether the source database runs with pluggable databases enabled.
    pub fn pluggable_enabled(&self) -> bool {
        self.get(FactKey::EnablePluggableDatabase)
            .map(|value| value.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }
}
