use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::role::Role;
use crate::status::ResponseStatus;

/// One participant's data for one form version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub id: Uuid,
    pub participant_id: String,
    pub form_id: String,
    pub form_version: String,
    pub payload: Value,
    pub status: ResponseStatus,
    pub created_at: DateTime<Utc>,
    /// Optimistic-lock token; every committed transition moves it forward.
    pub updated_at: DateTime<Utc>,
}

/// First save of a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewResponse {
    pub participant_id: String,
    pub form_id: String,
    pub form_version: String,
    #[serde(default)]
    pub payload: Option<Value>,
    pub actor: String,
    pub role: Role,
}

/// Immutable audit trail entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: Uuid,
    pub response_id: Uuid,
    pub actor: String,
    pub role: Role,
    /// `create` or a transition name such as `unlock`.
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<ResponseStatus>,
    pub to: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only electronic signature event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureRecord {
    pub id: Uuid,
    pub response_id: Uuid,
    pub signer: String,
    pub role: Role,
    /// What the signature attests, e.g. "I approve the data in this record".
    pub meaning: String,
    pub signed_at: DateTime<Utc>,
    /// The `updatedAt` token of the record version that was signed.
    pub signed_version: DateTime<Utc>,
}
