use std::sync::{Arc, Barrier};

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{Value, json};

use edc_lifecycle::{
    Clock, FixedClock, InMemoryResponseStore, Lifecycle, LifecycleConfig, LifecycleError, NewResponse,
    PreconditionError, Response, ResponseStatus, Role, SignatureInput, StaticRoleResolver,
    TransitionKind, TransitionRequest,
};
use edc_spec::FormSchema;

type Engine = Lifecycle<InMemoryResponseStore, Arc<FixedClock>>;

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 8, 30, 0).unwrap()
}

fn engine_with(config: LifecycleConfig) -> (Engine, Arc<FixedClock>) {
    let clock = Arc::new(FixedClock::new(start()));
    let mut engine = Lifecycle::with_clock(InMemoryResponseStore::new(), clock.clone(), config);
    let schema: FormSchema =
        serde_json::from_str(include_str!("fixtures/adverse_event.json")).expect("schema");
    engine
        .register_form("adverse_event", "2", &schema)
        .expect("register");
    (engine, clock)
}

fn engine() -> (Engine, Arc<FixedClock>) {
    engine_with(LifecycleConfig::default())
}

fn valid_payload() -> Value {
    json!({ "term": "Headache", "severity": "mild", "onset_day": 3, "resolved_day": 5 })
}

fn draft(engine: &Engine) -> Response {
    engine
        .create_draft(NewResponse {
            participant_id: "SUBJ-014".into(),
            form_id: "adverse_event".into(),
            form_version: "2".into(),
            payload: Some(valid_payload()),
            actor: "nina".into(),
            role: Role::DataEntry,
        })
        .expect("create draft")
}

fn step(
    engine: &Engine,
    clock: &FixedClock,
    response: &Response,
    kind: TransitionKind,
    role: Role,
) -> Response {
    clock.advance(Duration::minutes(1));
    engine
        .transition(
            TransitionRequest::new(kind, response.id, "dr_ortiz", role).with_token(response.updated_at),
        )
        .unwrap_or_else(|err| panic!("{kind} failed: {err}"))
}

fn locked(engine: &Engine, clock: &FixedClock) -> Response {
    let response = draft(engine);
    let response = step(engine, clock, &response, TransitionKind::Submit, Role::DataEntry);
    let response = step(engine, clock, &response, TransitionKind::Verify, Role::Monitor);
    step(engine, clock, &response, TransitionKind::Lock, Role::Monitor)
}

#[test]
fn create_draft_applies_defaults_and_calculations() {
    let (engine, _) = engine();
    let response = draft(&engine);
    assert_eq!(response.status, ResponseStatus::Draft);
    assert_eq!(response.payload["duration_days"], json!(3));
    assert_eq!(response.created_at, start());

    let trail = engine.history(response.id).unwrap();
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].action, "create");
    assert_eq!(trail[0].from, None);
}

#[test]
fn create_draft_without_payload_starts_from_defaults() {
    let (engine, _) = engine();
    let response = engine
        .create_draft(NewResponse {
            participant_id: "SUBJ-015".into(),
            form_id: "adverse_event".into(),
            form_version: "2".into(),
            payload: None,
            actor: "nina".into(),
            role: Role::Coordinator,
        })
        .unwrap();
    assert_eq!(response.payload["hospitalized"], json!("no"));
}

#[test]
fn unknown_form_version_is_rejected() {
    let (engine, _) = engine();
    let err = engine
        .create_draft(NewResponse {
            participant_id: "SUBJ-014".into(),
            form_id: "adverse_event".into(),
            form_version: "3".into(),
            payload: None,
            actor: "nina".into(),
            role: Role::DataEntry,
        })
        .unwrap_err();
    assert!(matches!(err, LifecycleError::UnknownForm { .. }));
}

#[test]
fn full_happy_path_reaches_signed() {
    let (engine, clock) = engine();
    let response = locked(&engine, &clock);
    assert_eq!(response.status, ResponseStatus::Locked);

    clock.advance(Duration::minutes(1));
    let signed = engine
        .transition(
            TransitionRequest::new(TransitionKind::Sign, response.id, "dr_ortiz", Role::Investigator)
                .with_token(response.updated_at)
                .with_signature(SignatureInput {
                    meaning: "  I approve this record  ".into(),
                    reauthenticated_at: clock.now() - Duration::seconds(30),
                }),
        )
        .unwrap();
    assert_eq!(signed.status, ResponseStatus::Signed);

    let signatures = engine.signatures(signed.id).unwrap();
    assert_eq!(signatures.len(), 1);
    assert_eq!(signatures[0].meaning, "I approve this record");
    assert_eq!(signatures[0].signed_version, response.updated_at);
    assert_eq!(signatures[0].signer, "dr_ortiz");

    let actions: Vec<_> = engine
        .history(signed.id)
        .unwrap()
        .into_iter()
        .map(|entry| entry.action)
        .collect();
    assert_eq!(actions, vec!["create", "submit", "verify", "lock", "sign"]);
}

#[test]
fn unlock_requires_reason_of_five_characters() {
    let (engine, clock) = engine();
    let response = locked(&engine, &clock);
    let unlock = || {
        TransitionRequest::new(TransitionKind::Unlock, response.id, "mo", Role::Monitor)
            .with_token(response.updated_at)
    };

    let err = engine.transition(unlock().with_reason("  typo  ")).unwrap_err();
    assert_eq!(
        err,
        LifecycleError::Precondition(PreconditionError::ReasonTooShort { min: 5 })
    );
    assert_eq!(engine.load(response.id).unwrap(), response);

    clock.advance(Duration::minutes(1));
    let reopened = engine.transition(unlock().with_reason("fix it")).unwrap();
    assert_eq!(reopened.status, ResponseStatus::Draft);
    assert!(reopened.updated_at > response.updated_at);

    let trail = engine.history(response.id).unwrap();
    let last = trail.last().unwrap();
    assert_eq!(last.action, "unlock");
    assert_eq!(last.reason.as_deref(), Some("fix it"));
    assert_eq!(last.from, Some(ResponseStatus::Locked));
    assert_eq!(last.to, ResponseStatus::Draft);
}

#[test]
fn complete_responses_reopen_through_edit_completed() {
    let (engine, clock) = engine();
    let response = draft(&engine);
    let complete = step(&engine, &clock, &response, TransitionKind::Submit, Role::DataEntry);

    let err = engine
        .transition(
            TransitionRequest::new(TransitionKind::Unlock, complete.id, "mo", Role::Monitor)
                .with_token(complete.updated_at)
                .with_reason("fix it"),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::Precondition(PreconditionError::InvalidState { .. })
    ));

    let mut corrected = valid_payload();
    corrected["resolved_day"] = json!(9);
    let edit = TransitionRequest::new(TransitionKind::EditCompleted, complete.id, "pi", Role::Monitor)
        .with_token(complete.updated_at)
        .with_reason("resolution date corrected")
        .with_payload(corrected.clone());
    let err = engine.transition(edit.clone()).unwrap_err();
    assert!(matches!(err, LifecycleError::Permission { .. }));

    let edit = TransitionRequest {
        role: Role::Investigator,
        ..edit
    };
    let reopened = engine.transition(edit).unwrap();
    assert_eq!(reopened.status, ResponseStatus::Draft);
    assert_eq!(reopened.payload["resolved_day"], json!(9));
    assert_eq!(reopened.payload["duration_days"], json!(7));
}

#[test]
fn role_gate_runs_before_anything_else() {
    let (engine, _) = engine();
    let response = draft(&engine);

    let err = engine
        .transition(TransitionRequest::new(
            TransitionKind::Verify,
            response.id,
            "nina",
            Role::DataEntry,
        ))
        .unwrap_err();
    assert!(matches!(err, LifecycleError::Permission { .. }));

    let err = engine
        .transition(
            TransitionRequest::new(TransitionKind::SaveDraft, response.id, "v", Role::Viewer)
                .with_payload(json!({})),
        )
        .unwrap_err();
    assert!(matches!(err, LifecycleError::Permission { role: Role::Viewer, .. }));
}

#[test]
fn submit_validates_server_side() {
    let (engine, clock) = engine();
    let response = draft(&engine);
    clock.advance(Duration::minutes(1));

    let err = engine
        .transition(
            TransitionRequest::new(TransitionKind::Submit, response.id, "nina", Role::DataEntry)
                .with_token(response.updated_at)
                .with_payload(json!({ "term": "Headache", "severity": "catastrophic" })),
        )
        .unwrap_err();
    let LifecycleError::Validation(errors) = err else {
        panic!("expected validation errors, got {err:?}");
    };
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].field_id, "severity");
    assert_eq!(engine.load(response.id).unwrap().status, ResponseStatus::Draft);
}

#[test]
fn transitions_other_than_save_need_a_token() {
    let (engine, _) = engine();
    let response = draft(&engine);
    let err = engine
        .transition(TransitionRequest::new(
            TransitionKind::Submit,
            response.id,
            "nina",
            Role::DataEntry,
        ))
        .unwrap_err();
    assert_eq!(
        err,
        LifecycleError::Precondition(PreconditionError::MissingToken(TransitionKind::Submit))
    );

    let saved = engine
        .transition(
            TransitionRequest::new(TransitionKind::SaveDraft, response.id, "nina", Role::DataEntry)
                .with_payload(json!({ "term": "Migraine" })),
        )
        .unwrap();
    assert_eq!(saved.payload["term"], json!("Migraine"));
    assert_eq!(saved.status, ResponseStatus::Draft);
}

#[test]
fn stale_token_is_a_retryable_conflict() {
    let (engine, clock) = engine();
    let response = draft(&engine);
    let submitted = step(&engine, &clock, &response, TransitionKind::Submit, Role::DataEntry);
    assert_eq!(submitted.status, ResponseStatus::Complete);

    let err = engine
        .transition(
            TransitionRequest::new(TransitionKind::Submit, response.id, "nina", Role::DataEntry)
                .with_token(response.updated_at),
        )
        .unwrap_err();
    assert_eq!(err, LifecycleError::Conflict(response.id));
    assert!(err.is_retryable());
}

#[test]
fn concurrent_saves_with_same_token_conflict_once() {
    let (engine, _) = engine();
    let response = draft(&engine);
    let barrier = Barrier::new(2);

    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = ["first", "second"]
            .into_iter()
            .map(|term| {
                let engine = &engine;
                let barrier = &barrier;
                let response = &response;
                scope.spawn(move || {
                    barrier.wait();
                    engine.transition(
                        TransitionRequest::new(
                            TransitionKind::SaveDraft,
                            response.id,
                            "nina",
                            Role::DataEntry,
                        )
                        .with_token(response.updated_at)
                        .with_payload(json!({ "term": term })),
                    )
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("thread"))
            .collect()
    });

    let successes = results.iter().filter(|result| result.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|result| matches!(result, Err(LifecycleError::Conflict(_))))
        .count();
    assert_eq!((successes, conflicts), (1, 1), "{results:?}");
    assert_eq!(engine.history(response.id).unwrap().len(), 2);
}

#[test]
fn signing_requires_fresh_reauthentication_and_meaning() {
    let (engine, clock) = engine();
    let response = locked(&engine, &clock);
    let sign = |signature: Option<SignatureInput>| {
        let request =
            TransitionRequest::new(TransitionKind::Sign, response.id, "pi", Role::Investigator)
                .with_token(response.updated_at);
        match signature {
            Some(signature) => engine.transition(request.with_signature(signature)),
            None => engine.transition(request),
        }
    };
    let now = clock.now();

    assert_eq!(
        sign(None).unwrap_err(),
        LifecycleError::Precondition(PreconditionError::MissingSignature)
    );
    assert_eq!(
        sign(Some(SignatureInput {
            meaning: "   ".into(),
            reauthenticated_at: now,
        }))
        .unwrap_err(),
        LifecycleError::Precondition(PreconditionError::EmptyMeaning)
    );
    assert_eq!(
        sign(Some(SignatureInput {
            meaning: "Approved".into(),
            reauthenticated_at: now - Duration::seconds(301),
        }))
        .unwrap_err(),
        LifecycleError::Precondition(PreconditionError::StaleReauthentication { window_secs: 300 })
    );
    assert!(engine.signatures(response.id).unwrap().is_empty());

    let signed = sign(Some(SignatureInput {
        meaning: "Approved".into(),
        reauthenticated_at: now - Duration::seconds(300),
    }))
    .unwrap();
    assert_eq!(signed.status, ResponseStatus::Signed);

    clock.advance(Duration::minutes(1));
    let reopened = engine
        .transition(
            TransitionRequest::new(TransitionKind::Unlock, signed.id, "pi", Role::Investigator)
                .with_token(signed.updated_at)
                .with_reason("late lab result"),
        )
        .unwrap();
    assert_eq!(reopened.status, ResponseStatus::Draft);
    assert_eq!(engine.signatures(signed.id).unwrap().len(), 1);
}

#[test]
fn configured_policy_and_reason_length_apply() {
    let config =
        LifecycleConfig::from_json(r#"{ "min_reason_len": 12, "roles": { "elevated": ["admin"] } }"#)
            .unwrap();
    let (engine, clock) = engine_with(config);
    let response = draft(&engine);
    let complete = step(&engine, &clock, &response, TransitionKind::Submit, Role::DataEntry);

    let err = engine
        .transition(
            TransitionRequest::new(TransitionKind::Verify, complete.id, "mo", Role::Monitor)
                .with_token(complete.updated_at),
        )
        .unwrap_err();
    assert!(matches!(err, LifecycleError::Permission { .. }));

    let verified = step(&engine, &clock, &complete, TransitionKind::Verify, Role::Admin);
    let err = engine
        .transition(
            TransitionRequest::new(TransitionKind::EditCompleted, verified.id, "ad", Role::Admin)
                .with_token(verified.updated_at)
                .with_reason("typo fixed")
                .with_payload(valid_payload()),
        )
        .unwrap_err();
    assert_eq!(
        err,
        LifecycleError::Precondition(PreconditionError::ReasonTooShort { min: 12 })
    );
}

#[test]
fn tokens_increase_even_with_a_frozen_clock() {
    let (engine, _) = engine();
    let response = draft(&engine);
    let saved = engine
        .transition(
            TransitionRequest::new(TransitionKind::SaveDraft, response.id, "nina", Role::DataEntry)
                .with_token(response.updated_at)
                .with_payload(valid_payload()),
        )
        .unwrap();
    assert!(saved.updated_at > response.updated_at);
}

#[test]
fn study_assignments_override_claimed_roles() {
    let (engine, clock) = engine();
    let resolver = StaticRoleResolver::new()
        .assign("nina", "trial_a", Role::DataEntry)
        .assign("mo", "trial_a", Role::Monitor)
        .assign("mo", "trial_b", Role::Admin);
    let engine = engine.with_role_resolver(Arc::new(resolver), "trial_a");

    let response = engine
        .create_draft(NewResponse {
            participant_id: "SUBJ-030".into(),
            form_id: "adverse_event".into(),
            form_version: "2".into(),
            payload: Some(valid_payload()),
            actor: "nina".into(),
            role: Role::Admin,
        })
        .unwrap();
    assert_eq!(engine.history(response.id).unwrap()[0].role, Role::DataEntry);

    let err = engine
        .transition(
            TransitionRequest::new(TransitionKind::Submit, response.id, "mo", Role::DataEntry)
                .with_token(response.updated_at),
        )
        .unwrap_err();
    assert!(matches!(err, LifecycleError::Permission { role: Role::Monitor, .. }));

    let err = engine
        .transition(
            TransitionRequest::new(TransitionKind::Submit, response.id, "stranger", Role::Admin)
                .with_token(response.updated_at),
        )
        .unwrap_err();
    assert_eq!(
        err,
        LifecycleError::Unassigned {
            actor: "stranger".into(),
            study: "trial_a".into()
        }
    );

    clock.advance(Duration::minutes(1));
    let complete = engine
        .transition(
            TransitionRequest::new(TransitionKind::Submit, response.id, "nina", Role::Viewer)
                .with_token(response.updated_at),
        )
        .unwrap();
    assert_eq!(complete.status, ResponseStatus::Complete);
    let trail = engine.history(response.id).unwrap();
    assert_eq!(trail[1].role, Role::DataEntry);
}
