use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Study role of the acting user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Viewer,
    DataEntry,
    Coordinator,
    Monitor,
    Investigator,
    Admin,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Viewer,
        Role::DataEntry,
        Role::Coordinator,
        Role::Monitor,
        Role::Investigator,
        Role::Admin,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::DataEntry => "data_entry",
            Role::Coordinator => "coordinator",
            Role::Monitor => "monitor",
            Role::Investigator => "investigator",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role '{0}'")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase().replace('-', "_");
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == normalized)
            .ok_or_else(|| UnknownRole(raw.to_string()))
    }
}

/// Grouping of roles used by the transition gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleTier {
    Editor,
    Elevated,
    Highest,
}

impl fmt::Display for RoleTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RoleTier::Editor => "editor",
            RoleTier::Elevated => "elevated",
            RoleTier::Highest => "highest",
        })
    }
}

/// Which roles belong to each tier. Deployments may override any tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RolePolicy {
    pub editors: BTreeSet<Role>,
    pub elevated: BTreeSet<Role>,
    pub highest: BTreeSet<Role>,
}

impl Default for RolePolicy {
    fn default() -> Self {
        Self {
            editors: BTreeSet::from([
                Role::DataEntry,
                Role::Coordinator,
                Role::Investigator,
                Role::Admin,
            ]),
            elevated: BTreeSet::from([Role::Monitor, Role::Investigator, Role::Admin]),
            highest: BTreeSet::from([Role::Investigator, Role::Admin]),
        }
    }
}

impl RolePolicy {
    pub fn members(&self, tier: RoleTier) -> &BTreeSet<Role> {
        match tier {
            RoleTier::Editor => &self.editors,
            RoleTier::Elevated => &self.elevated,
            RoleTier::Highest => &self.highest,
        }
    }

    pub fn permits(&self, tier: RoleTier, role: Role) -> bool {
        self.members(tier).contains(&role)
    }
}

/// Authorization collaborator: resolves a user's role within a study.
pub trait RoleResolver: Send + Sync {
    fn resolve(&self, user: &str, study: &str) -> Option<Role>;
}

/// Fixed role assignments, keyed by (user, study).
#[derive(Debug, Clone, Default)]
pub struct StaticRoleResolver {
    assignments: HashMap<(String, String), Role>,
}

impl StaticRoleResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(mut self, user: impl Into<String>, study: impl Into<String>, role: Role) -> Self {
        self.assignments.insert((user.into(), study.into()), role);
        self
    }
}

impl RoleResolver for StaticRoleResolver {
    fn resolve(&self, user: &str, study: &str) -> Option<Role> {
        self.assignments
            .get(&(user.to_string(), study.to_string()))
            .copied()
    }
}
