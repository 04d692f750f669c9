//! The JSON config document. Everything the command line does not carry
//! lives here; array credentials additionally fall back to the
//! environment so they can stay out of the file.

use crate::error::{ConfigMissingSnafu, ConfigParseSnafu, ConfigReadSnafu, Error};
use serde::Deserialize;
use snafu::{OptionExt, ResultExt};
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Source array management endpoint. Falls back to `FA_HOST`.
    pub src_array_host: Option<String>,
    /// Source array api token. Falls back to `API_TOKEN`.
    pub src_array_api_token: Option<String>,
    /// Target array management endpoint, for replicated swings.
    /// Falls back to `FA_HOST_TGT`.
    pub tgt_array_host: Option<String>,
    /// Target array api token. Falls back to `API_TOKEN_TGT`.
    pub tgt_array_api_token: Option<String>,

    pub source_protection_group: Option<String>,
    pub target_protection_group: Option<String>,

    /// Volume ids left out of the reconciliation.
    #[serde(default)]
    pub excluded_volumes: Vec<String>,

    // credentials for introspecting the source database
    pub db_user: Option<String>,
    pub db_password: Option<String>,
    pub db_connect_string: Option<String>,

    /// Requested terminal state of the target instance.
    pub target_mode: Option<String>,
    /// Put the source database in hot backup mode around the snapshot.
    #[serde(default)]
    pub backup_mode: bool,

    pub oracle_sid: Option<String>,
    pub oracle_home: Option<String>,
    pub asm_sid: Option<String>,
    pub asm_home: Option<String>,

    /// Override for the target's db_unique_name, e.g. for a standby name.
    pub db_unique_name: Option<String>,
    /// Listener the re-opened pluggable databases register with.
    pub local_listener: Option<String>,
    /// Shell command that rescans the scsi bus on the target host.
    pub rescan_command: Option<String>,

    /// When set, the target instance is administered over ssh instead of
    /// locally.
    pub remote: Option<RemoteConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteConfig {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// Operating-system account owning the database instance.
    pub db_user: String,
    /// Operating-system account owning the ASM instance. The database
    /// account doubles up when unset.
    pub asm_user: Option<String>,
    /// Sourced on the remote side before the database session starts.
    pub db_preamble: Option<String>,
    pub asm_preamble: Option<String>,
}

fn default_ssh_port() -> u16 {
    22
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(path).context(ConfigReadSnafu {
            path: path.to_path_buf(),
        })?;
        serde_json::from_str(&raw).context(ConfigParseSnafu {
            path: path.to_path_buf(),
        })
    }

    /// Source array endpoint and token, config first, environment second.
    pub fn source_array(&self) -> Result<(String, String), Error> {
        let host = self
            .src_array_host
            .clone()
            .or_else(|| std::env::var("FA_HOST").ok())
            .context(ConfigMissingSnafu {
                key: "src_array_host",
            })?;
        let token = self
            .src_array_api_token
            .clone()
            .or_else(|| std::env::var("API_TOKEN").ok())
            .context(ConfigMissingSnafu {
                key: "src_array_api_token",
            })?;
        Ok((host, token))
    }

    /// Target array endpoint and token, for replicated swings.
    pub fn target_array(&self) -> Result<(String, String), Error> {
        let host = self
            .tgt_array_host
            .clone()
            .or_else(|| std::env::var("FA_HOST_TGT").ok())
            .context(ConfigMissingSnafu {
                key: "tgt_array_host",
            })?;
        let token = self
            .tgt_array_api_token
            .clone()
            .or_else(|| std::env::var("API_TOKEN_TGT").ok())
            .context(ConfigMissingSnafu {
                key: "tgt_array_api_token",
            })?;
        Ok((host, token))
    }
}
