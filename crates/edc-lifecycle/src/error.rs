use edc_spec::FieldError;
use thiserror::Error;
use uuid::Uuid;

use crate::role::{Role, RoleTier};
use crate::status::{ResponseStatus, TransitionKind};

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence-layer errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("response {0} not found")]
    NotFound(Uuid),

    #[error("response {0} was modified by another user")]
    Conflict(Uuid),

    #[error("response {0} already exists")]
    Duplicate(Uuid),

    #[error("backend error: {0}")]
    Backend(String),
}

/// A transition's own preconditions are not met.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreconditionError {
    #[error("cannot {kind} a response in status {status}")]
    InvalidState {
        kind: TransitionKind,
        status: ResponseStatus,
    },

    #[error("reason for change must be at least {min} characters")]
    ReasonTooShort { min: usize },

    #[error("{0} requires the current updatedAt token")]
    MissingToken(TransitionKind),

    #[error("{0} requires a payload")]
    MissingPayload(TransitionKind),

    #[error("{0} does not accept a payload")]
    UnexpectedPayload(TransitionKind),

    #[error("payload must be a JSON object")]
    PayloadNotObject,

    #[error("signing requires signature details")]
    MissingSignature,

    #[error("signature meaning must not be empty")]
    EmptyMeaning,

    #[error("re-authentication is older than {window_secs} seconds")]
    StaleReauthentication { window_secs: u64 },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LifecycleError {
    #[error("role {role} may not {kind} (requires {tier} role)")]
    Permission {
        kind: TransitionKind,
        role: Role,
        tier: RoleTier,
    },

    #[error("{actor} has no role in study {study}")]
    Unassigned { actor: String, study: String },

    #[error("response {0} was modified by another user; reload and retry")]
    Conflict(Uuid),

    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    #[error("payload failed validation with {} error(s)", .0.len())]
    Validation(Vec<FieldError>),

    #[error("response {0} not found")]
    NotFound(Uuid),

    #[error("no schema registered for form {form_id} version {version}")]
    UnknownForm { form_id: String, version: String },

    #[error("storage error: {0}")]
    Storage(StoreError),
}

impl LifecycleError {
    /// Only optimistic-lock conflicts are worth retrying after a reload.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LifecycleError::Conflict(_))
    }
}

impl From<StoreError> for LifecycleError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => LifecycleError::NotFound(id),
            StoreError::Conflict(id) => LifecycleError::Conflict(id),
            other => LifecycleError::Storage(other),
        }
    }
}
