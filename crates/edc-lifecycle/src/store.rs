use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreResult;
use crate::record::{AuditEntry, Response, SignatureRecord};

/// Everything one transition writes, applied as a single unit.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseCommit {
    /// Token the caller read; the write is refused if the stored token differs.
    pub expected_updated_at: DateTime<Utc>,
    pub response: Response,
    pub audit: AuditEntry,
    pub signature: Option<SignatureRecord>,
}

/// Persistence collaborator for responses and their trails.
pub trait ResponseStore: Send + Sync {
    fn load(&self, id: Uuid) -> StoreResult<Response>;

    /// Stores a brand-new response together with its creation audit entry.
    fn insert(&self, response: Response, audit: AuditEntry) -> StoreResult<()>;

    /// Compare-and-swap on `updated_at`. On a token mismatch nothing is written
    /// and [`StoreError::Conflict`](crate::StoreError::Conflict) is returned.
    fn commit(&self, commit: ResponseCommit) -> StoreResult<()>;

    /// Audit entries for one response, oldest first.
    fn audit_trail(&self, id: Uuid) -> StoreResult<Vec<AuditEntry>>;

    /// Signature records for one response, oldest first.
    fn signatures(&self, id: Uuid) -> StoreResult<Vec<SignatureRecord>>;
}
