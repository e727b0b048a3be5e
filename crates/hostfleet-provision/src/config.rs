//! Runner configuration.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

/// Configuration for [`AnsibleRunner`](crate::AnsibleRunner).
#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    /// Path or name of the `ansible-playbook` executable.
    #[serde(default = "RunnerConfig::default_playbook_bin")]
    pub ansible_playbook_bin: PathBuf,

    /// Path or name of the `ansible` executable used for ad-hoc modules.
    #[serde(default = "RunnerConfig::default_ansible_bin")]
    pub ansible_bin: PathBuf,

    /// Directory playbook names are resolved against.
    #[serde(default = "RunnerConfig::default_playbook_dir")]
    pub playbook_dir: PathBuf,

    /// Additional environment passed to every runner process.
    #[serde(default)]
    pub extra_env: BTreeMap<String, String>,
}

impl RunnerConfig {
    fn default_playbook_bin() -> PathBuf {
        PathBuf::from("ansible-playbook")
    }

    fn default_ansible_bin() -> PathBuf {
        PathBuf::from("ansible")
    }

    fn default_playbook_dir() -> PathBuf {
        PathBuf::from("playbooks")
    }

    /// Load configuration from environment variables.
    ///
    /// Supported environment variables:
    /// - `ANSIBLE_PLAYBOOK_BIN`: `ansible-playbook` executable
    /// - `ANSIBLE_BIN`: `ansible` executable
    /// - `HOSTFLEET_PLAYBOOK_DIR`: directory containing the playbooks
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("ANSIBLE_PLAYBOOK_BIN") {
            config.ansible_playbook_bin = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("ANSIBLE_BIN") {
            config.ansible_bin = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("HOSTFLEET_PLAYBOOK_DIR") {
            config.playbook_dir = PathBuf::from(val);
        }

        config
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            ansible_playbook_bin: Self::default_playbook_bin(),
            ansible_bin: Self::default_ansible_bin(),
            playbook_dir: Self::default_playbook_dir(),
            extra_env: BTreeMap::new(),
        }
    }
}
