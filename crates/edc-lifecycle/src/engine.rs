//! The response state machine.
//!
//! Every transition is checked in a fixed order (role, lock token, source
//! state, request preconditions, validation) and then written through one
//! compare-and-swap commit, so a rejected request never changes anything.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use edc_spec::{FormSchema, StructuralError, Validator};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::config::LifecycleConfig;
use crate::error::{LifecycleError, PreconditionError};
use crate::record::{AuditEntry, NewResponse, Response, SignatureRecord};
use crate::role::{Role, RoleResolver};
use crate::status::{ResponseStatus, TransitionKind};
use crate::store::{ResponseCommit, ResponseStore};

/// Signing details supplied with a `sign` transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureInput {
    pub meaning: String,
    /// When the signer last proved their identity.
    pub reauthenticated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRequest {
    pub kind: TransitionKind,
    pub response_id: Uuid,
    pub actor: String,
    pub role: Role,
    #[serde(default)]
    pub expected_updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub signature: Option<SignatureInput>,
}

impl TransitionRequest {
    pub fn new(kind: TransitionKind, response_id: Uuid, actor: impl Into<String>, role: Role) -> Self {
        Self {
            kind,
            response_id,
            actor: actor.into(),
            role,
            expected_updated_at: None,
            payload: None,
            reason: None,
            signature: None,
        }
    }

    pub fn with_token(mut self, updated_at: DateTime<Utc>) -> Self {
        self.expected_updated_at = Some(updated_at);
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_signature(mut self, signature: SignatureInput) -> Self {
        self.signature = Some(signature);
        self
    }
}

type FormKey = (String, String);

pub struct Lifecycle<S, C = SystemClock> {
    store: S,
    clock: C,
    config: LifecycleConfig,
    forms: HashMap<FormKey, Arc<Validator>>,
    roles: Option<(Arc<dyn RoleResolver>, String)>,
}

impl<S: ResponseStore> Lifecycle<S> {
    pub fn new(store: S, config: LifecycleConfig) -> Self {
        Self::with_clock(store, SystemClock, config)
    }
}

impl<S: ResponseStore, C: Clock> Lifecycle<S, C> {
    pub fn with_clock(store: S, clock: C, config: LifecycleConfig) -> Self {
        Self {
            store,
            clock,
            config,
            forms: HashMap::new(),
            roles: None,
        }
    }

    /// Resolves every actor's role within `study` instead of trusting the
    /// role supplied with the request.
    pub fn with_role_resolver(
        mut self,
        resolver: Arc<dyn RoleResolver>,
        study: impl Into<String>,
    ) -> Self {
        self.roles = Some((resolver, study.into()));
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Compiles and registers the validator for one form version.
    pub fn register_form(
        &mut self,
        form_id: impl Into<String>,
        version: impl Into<String>,
        schema: &FormSchema,
    ) -> Result<(), Vec<StructuralError>> {
        let validator = edc_spec::compile(schema)?;
        self.register_validator(form_id, version, Arc::new(validator));
        Ok(())
    }

    pub fn register_validator(
        &mut self,
        form_id: impl Into<String>,
        version: impl Into<String>,
        validator: Arc<Validator>,
    ) {
        self.forms.insert((form_id.into(), version.into()), validator);
    }

    fn validator(&self, form_id: &str, version: &str) -> Result<&Arc<Validator>, LifecycleError> {
        self.forms
            .get(&(form_id.to_string(), version.to_string()))
            .ok_or_else(|| LifecycleError::UnknownForm {
                form_id: form_id.to_string(),
                version: version.to_string(),
            })
    }

    pub fn load(&self, id: Uuid) -> Result<Response, LifecycleError> {
        Ok(self.store.load(id)?)
    }

    pub fn history(&self, id: Uuid) -> Result<Vec<AuditEntry>, LifecycleError> {
        Ok(self.store.audit_trail(id)?)
    }

    pub fn signatures(&self, id: Uuid) -> Result<Vec<SignatureRecord>, LifecycleError> {
        Ok(self.store.signatures(id)?)
    }

    /// First save: creates the response in `draft`.
    ///
    /// Without a payload the response starts from the form's defaults.
    pub fn create_draft(&self, new: NewResponse) -> Result<Response, LifecycleError> {
        let role = self.resolve_role(&new.actor, new.role)?;
        self.authorize(TransitionKind::SaveDraft, role)?;
        let validator = self.validator(&new.form_id, &new.form_version)?;
        let mut payload = match new.payload {
            Some(payload) if !payload.is_object() => {
                return Err(PreconditionError::PayloadNotObject.into());
            }
            Some(payload) => payload,
            None => validator.initial_payload(),
        };
        validator.apply_calculations(&mut payload);

        let now = self.clock.now();
        let response = Response {
            id: Uuid::new_v4(),
            participant_id: new.participant_id,
            form_id: new.form_id,
            form_version: new.form_version,
            payload,
            status: ResponseStatus::Draft,
            created_at: now,
            updated_at: now,
        };
        let audit = AuditEntry {
            id: Uuid::new_v4(),
            response_id: response.id,
            actor: new.actor,
            role,
            action: "create".to_string(),
            from: None,
            to: ResponseStatus::Draft,
            reason: None,
            recorded_at: now,
        };
        let actor = audit.actor.clone();
        self.store.insert(response.clone(), audit)?;
        info!(
            response_id = %response.id,
            form_id = %response.form_id,
            actor = %actor,
            "response created"
        );
        Ok(response)
    }

    /// Applies one lifecycle transition and returns the stored result.
    pub fn transition(&self, request: TransitionRequest) -> Result<Response, LifecycleError> {
        let kind = request.kind;
        let response_id = request.response_id;
        let actor = request.actor.clone();

        let outcome = self
            .prepare(request)
            .and_then(|commit| {
                let response = commit.response.clone();
                self.store.commit(commit)?;
                Ok(response)
            });

        match &outcome {
            Ok(response) => info!(
                %response_id,
                transition = %kind,
                actor = %actor,
                status = %response.status,
                "transition applied"
            ),
            Err(err @ LifecycleError::Conflict(_)) => {
                warn!(%response_id, transition = %kind, actor = %actor, error = %err, "transition conflict")
            }
            Err(err) => {
                debug!(%response_id, transition = %kind, actor = %actor, error = %err, "transition rejected")
            }
        }
        outcome
    }

    fn resolve_role(&self, actor: &str, claimed: Role) -> Result<Role, LifecycleError> {
        let Some((resolver, study)) = &self.roles else {
            return Ok(claimed);
        };
        resolver
            .resolve(actor, study)
            .ok_or_else(|| LifecycleError::Unassigned {
                actor: actor.to_string(),
                study: study.clone(),
            })
    }

    fn authorize(&self, kind: TransitionKind, role: Role) -> Result<(), LifecycleError> {
        let tier = kind.tier();
        if self.config.roles.permits(tier, role) {
            Ok(())
        } else {
            Err(LifecycleError::Permission { kind, role, tier })
        }
    }

    fn prepare(&self, request: TransitionRequest) -> Result<ResponseCommit, LifecycleError> {
        let kind = request.kind;
        let current = self.store.load(request.response_id)?;

        let role = self.resolve_role(&request.actor, request.role)?;
        self.authorize(kind, role)?;

        match request.expected_updated_at {
            Some(token) if token != current.updated_at => {
                return Err(LifecycleError::Conflict(current.id));
            }
            None if kind != TransitionKind::SaveDraft => {
                return Err(PreconditionError::MissingToken(kind).into());
            }
            _ => {}
        }

        if !kind.sources().contains(&current.status) {
            return Err(PreconditionError::InvalidState {
                kind,
                status: current.status,
            }
            .into());
        }

        let now = self.clock.now();
        let reason = self.check_reason(kind, request.reason.as_deref())?;
        let signature = match kind {
            TransitionKind::Sign => Some(self.check_signature(request.signature, now)?),
            _ => None,
        };
        let replacement = check_payload(kind, request.payload)?;

        let mut payload = replacement.unwrap_or_else(|| current.payload.clone());
        if kind.accepts_payload() {
            let validator = self.validator(&current.form_id, &current.form_version)?;
            validator.apply_calculations(&mut payload);
            if kind == TransitionKind::Submit {
                let outcome = validator.validate(&payload);
                if !outcome.valid {
                    return Err(LifecycleError::Validation(outcome.errors));
                }
            }
        }

        let updated_at = next_token(now, current.updated_at);
        let next = Response {
            payload,
            status: kind.target(),
            updated_at,
            ..current.clone()
        };
        let audit = AuditEntry {
            id: Uuid::new_v4(),
            response_id: current.id,
            actor: request.actor.clone(),
            role,
            action: kind.as_str().to_string(),
            from: Some(current.status),
            to: next.status,
            reason,
            recorded_at: updated_at,
        };
        let signature = signature.map(|meaning| SignatureRecord {
            id: Uuid::new_v4(),
            response_id: current.id,
            signer: request.actor,
            role,
            meaning,
            signed_at: updated_at,
            signed_version: current.updated_at,
        });

        Ok(ResponseCommit {
            expected_updated_at: current.updated_at,
            response: next,
            audit,
            signature,
        })
    }

    fn check_reason(
        &self,
        kind: TransitionKind,
        reason: Option<&str>,
    ) -> Result<Option<String>, PreconditionError> {
        if !kind.requires_reason() {
            return Ok(reason
                .map(str::trim)
                .filter(|reason| !reason.is_empty())
                .map(str::to_string));
        }
        let min = self.config.min_reason_len;
        let reason = reason.map(str::trim).unwrap_or_default();
        if reason.chars().count() < min {
            return Err(PreconditionError::ReasonTooShort { min });
        }
        Ok(Some(reason.to_string()))
    }

    /// Returns the trimmed meaning once the signature input is acceptable.
    fn check_signature(
        &self,
        signature: Option<SignatureInput>,
        now: DateTime<Utc>,
    ) -> Result<String, PreconditionError> {
        let signature = signature.ok_or(PreconditionError::MissingSignature)?;
        let meaning = signature.meaning.trim();
        if meaning.is_empty() {
            return Err(PreconditionError::EmptyMeaning);
        }
        let window_secs = self.config.reauth_window_secs;
        let window = i64::try_from(window_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX);
        let age = now.signed_duration_since(signature.reauthenticated_at);
        if age < Duration::zero() || age > window {
            return Err(PreconditionError::StaleReauthentication { window_secs });
        }
        Ok(meaning.to_string())
    }
}

fn check_payload(
    kind: TransitionKind,
    payload: Option<Value>,
) -> Result<Option<Value>, PreconditionError> {
    match payload {
        Some(_) if !kind.accepts_payload() => Err(PreconditionError::UnexpectedPayload(kind)),
        Some(payload) if !payload.is_object() => Err(PreconditionError::PayloadNotObject),
        None if matches!(kind, TransitionKind::SaveDraft | TransitionKind::EditCompleted) => {
            Err(PreconditionError::MissingPayload(kind))
        }
        payload => Ok(payload),
    }
}

/// New lock tokens are strictly increasing even if the clock stalls or steps back.
fn next_token(now: DateTime<Utc>, previous: DateTime<Utc>) -> DateTime<Utc> {
    if now > previous {
        now
    } else {
        previous + Duration::microseconds(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn token_moves_forward_when_clock_stalls() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(next_token(at, at), at + Duration::microseconds(1));
        assert_eq!(next_token(at - Duration::seconds(3), at), at + Duration::microseconds(1));
        assert_eq!(next_token(at + Duration::seconds(3), at), at + Duration::seconds(3));
    }

    #[test]
    fn payload_rules_per_transition() {
        assert_eq!(
            check_payload(TransitionKind::Verify, Some(serde_json::json!({}))),
            Err(PreconditionError::UnexpectedPayload(TransitionKind::Verify))
        );
        assert_eq!(
            check_payload(TransitionKind::EditCompleted, None),
            Err(PreconditionError::MissingPayload(TransitionKind::EditCompleted))
        );
        assert_eq!(
            check_payload(TransitionKind::SaveDraft, Some(serde_json::json!([1]))),
            Err(PreconditionError::PayloadNotObject)
        );
        assert_eq!(check_payload(TransitionKind::Submit, None), Ok(None));
    }
}
