use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::role::{Role, RolePolicy, StaticRoleResolver};

/// Environment variable naming a JSON lifecycle config file.
pub const CONFIG_ENV: &str = "EDC_LIFECYCLE_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid lifecycle config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Tunables of the lifecycle engine. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Minimum trimmed length of a reason-for-change.
    pub min_reason_len: usize,
    /// How long a re-authentication stays valid for signing.
    pub reauth_window_secs: u64,
    pub roles: RolePolicy,
    /// Study whose role assignments decide each actor's role.
    pub study: Option<String>,
    /// User to role within `study`.
    pub assignments: BTreeMap<String, Role>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            min_reason_len: 5,
            reauth_window_secs: 300,
            roles: RolePolicy::default(),
            study: None,
            assignments: BTreeMap::new(),
        }
    }
}

impl LifecycleConfig {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// Resolver over `assignments`, when a study is configured.
    pub fn role_resolver(&self) -> Option<(StaticRoleResolver, String)> {
        let study = self.study.clone()?;
        let resolver = self
            .assignments
            .iter()
            .fold(StaticRoleResolver::new(), |resolver, (user, role)| {
                resolver.assign(user.as_str(), study.as_str(), *role)
            });
        Some((resolver, study))
    }

    /// Explicit path first, then `EDC_LIFECYCLE_CONFIG`, then defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_path(path);
        }
        match std::env::var_os(CONFIG_ENV) {
            Some(path) if !path.is_empty() => Self::from_path(Path::new(&path)),
            _ => Ok(Self::default()),
        }
    }
}
