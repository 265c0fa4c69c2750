//! Repository configuration (`<tbd>/config.yml`, `spec.md` §6).
//!
//! One sub-struct per config section, `#[serde(deny_unknown_fields)]` so a
//! typo in the file is a loud error rather than a silently ignored
//! setting, and a per-field `default = "..."` function for every key so a
//! missing file (or a file missing some keys) degrades to sane defaults
//! rather than a parse error.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Top-level repository configuration.
///
/// Parsed from `<tbd>/config.yml`. A missing file is not an error — it is
/// equivalent to every field taking its default.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct TbdConfig {
    /// Sync branch/remote settings.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Display settings (short-id prefix).
    #[serde(default)]
    pub display: DisplayConfig,

    /// Feature toggles.
    #[serde(default)]
    pub settings: SettingsConfig,
}

impl TbdConfig {
    /// Load `<root>/.tbd/config.yml`, falling back to defaults if the
    /// file does not exist.
    ///
    /// # Errors
    /// Returns [`crate::Error::Validation`] if the file exists but fails
    /// to parse (unknown key, wrong type, etc).
    pub fn load(root: &Path) -> crate::Result<Self> {
        let path = root.join(".tbd").join("config.yml");
        match std::fs::read_to_string(&path) {
            Ok(text) => serde_yaml::from_str(&text).map_err(|e| crate::Error::Validation {
                field: "config.yml".to_owned(),
                reason: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Serialize back to YAML text with stable key order (struct-field
    /// order), for writing during `init`.
    pub fn to_yaml(&self) -> crate::Result<String> {
        serde_yaml::to_string(self).map_err(|e| crate::Error::Validation {
            field: "config.yml".to_owned(),
            reason: e.to_string(),
        })
    }
}

/// Sync branch/remote settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// The branch that carries the data-sync subtree (default `tbd-sync`).
    #[serde(default = "default_branch")]
    pub branch: String,

    /// The git remote to sync against (default `origin`).
    #[serde(default = "default_remote")]
    pub remote: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { branch: default_branch(), remote: default_remote() }
    }
}

fn default_branch() -> String {
    "tbd-sync".to_owned()
}

fn default_remote() -> String {
    "origin".to_owned()
}

/// Display settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DisplayConfig {
    /// Prefix used when rendering a short id as `<prefix>-<short>`.
    #[serde(default = "default_id_prefix")]
    pub id_prefix: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self { id_prefix: default_id_prefix() }
    }
}

fn default_id_prefix() -> String {
    "tbd".to_owned()
}

/// Feature toggles that do not affect the sync/merge/storage semantics
/// but gate optional behavior around them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsConfig {
    /// Run a full sync automatically after local mutations.
    #[serde(default)]
    pub auto_sync: bool,

    /// Maintain the (out-of-scope) documentation/search index.
    #[serde(default)]
    pub index_enabled: bool,

    /// Use the `gh` CLI for GitHub issue mirroring (out of scope here;
    /// the flag is preserved so config round-trips losslessly).
    #[serde(default)]
    pub use_gh_cli: bool,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self { auto_sync: false, index_enabled: false, use_gh_cli: false }
    }
}
