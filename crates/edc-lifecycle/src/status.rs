use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::role::RoleTier;

/// Lifecycle state of a stored response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Draft,
    Complete,
    Verified,
    Locked,
    Signed,
}

impl ResponseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseStatus::Draft => "draft",
            ResponseStatus::Complete => "complete",
            ResponseStatus::Verified => "verified",
            ResponseStatus::Locked => "locked",
            ResponseStatus::Signed => "signed",
        }
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A requested lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    SaveDraft,
    Submit,
    Verify,
    Lock,
    Sign,
    Unlock,
    EditCompleted,
}

impl TransitionKind {
    pub const ALL: [TransitionKind; 7] = [
        TransitionKind::SaveDraft,
        TransitionKind::Submit,
        TransitionKind::Verify,
        TransitionKind::Lock,
        TransitionKind::Sign,
        TransitionKind::Unlock,
        TransitionKind::EditCompleted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TransitionKind::SaveDraft => "save_draft",
            TransitionKind::Submit => "submit",
            TransitionKind::Verify => "verify",
            TransitionKind::Lock => "lock",
            TransitionKind::Sign => "sign",
            TransitionKind::Unlock => "unlock",
            TransitionKind::EditCompleted => "edit_completed",
        }
    }

    /// States this transition may start from.
    pub fn sources(self) -> &'static [ResponseStatus] {
        use ResponseStatus::*;
        match self {
            TransitionKind::SaveDraft | TransitionKind::Submit => &[Draft],
            TransitionKind::Verify => &[Complete],
            TransitionKind::Lock => &[Verified],
            TransitionKind::Sign => &[Locked],
            TransitionKind::Unlock => &[Locked, Signed],
            TransitionKind::EditCompleted => &[Complete, Verified, Locked],
        }
    }

    pub fn target(self) -> ResponseStatus {
        match self {
            TransitionKind::SaveDraft | TransitionKind::Unlock | TransitionKind::EditCompleted => {
                ResponseStatus::Draft
            }
            TransitionKind::Submit => ResponseStatus::Complete,
            TransitionKind::Verify => ResponseStatus::Verified,
            TransitionKind::Lock => ResponseStatus::Locked,
            TransitionKind::Sign => ResponseStatus::Signed,
        }
    }

    pub fn tier(self) -> RoleTier {
        match self {
            TransitionKind::SaveDraft | TransitionKind::Submit => RoleTier::Editor,
            TransitionKind::Verify
            | TransitionKind::Lock
            | TransitionKind::Sign
            | TransitionKind::Unlock => RoleTier::Elevated,
            TransitionKind::EditCompleted => RoleTier::Highest,
        }
    }

    /// Transitions that reopen approved data and must carry a reason-for-change.
    pub fn requires_reason(self) -> bool {
        matches!(self, TransitionKind::Unlock | TransitionKind::EditCompleted)
    }

    /// Transitions that replace the stored payload.
    pub fn accepts_payload(self) -> bool {
        matches!(
            self,
            TransitionKind::SaveDraft | TransitionKind::Submit | TransitionKind::EditCompleted
        )
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown transition '{0}'")]
pub struct UnknownTransition(pub String);

impl FromStr for TransitionKind {
    type Err = UnknownTransition;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase().replace('-', "_");
        TransitionKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| UnknownTransition(raw.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_transition_leaves_a_reachable_state() {
        for kind in TransitionKind::ALL {
            assert!(!kind.sources().is_empty(), "{kind}");
        }
        assert_eq!(TransitionKind::Unlock.sources().len(), 2);
        assert!(!TransitionKind::Unlock.sources().contains(&ResponseStatus::Complete));
    }

    #[test]
    fn parses_kebab_and_snake_case() {
        assert_eq!("edit-completed".parse::<TransitionKind>(), Ok(TransitionKind::EditCompleted));
        assert_eq!("save_draft".parse::<TransitionKind>(), Ok(TransitionKind::SaveDraft));
        assert!("approve".parse::<TransitionKind>().is_err());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&ResponseStatus::Verified).expect("serialize");
        assert_eq!(json, "\"verified\"");
    }
}
