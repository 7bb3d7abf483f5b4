mod store_file;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use edc_lifecycle::{
    InMemoryResponseStore, Lifecycle, LifecycleConfig, NewResponse, Role, SignatureInput,
    TransitionKind, TransitionRequest,
};
use edc_spec::{FormSchema, ValidationOutcome, Validator};
use serde_json::{Value, json};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use store_file::StoreFile;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Case-report form engine CLI",
    long_about = "Checks form schemas, validates payloads, evaluates expressions, and drives response lifecycle transitions against a JSON store file"
)]
struct Cli {
    /// Lifecycle config JSON (falls back to EDC_LIFECYCLE_CONFIG, then defaults).
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Report every structural problem in a form schema.
    Check {
        #[arg(long, value_name = "SCHEMA")]
        schema: PathBuf,
    },
    /// Validate a payload against a form schema.
    Validate {
        #[arg(long, value_name = "SCHEMA")]
        schema: PathBuf,
        #[arg(long, value_name = "PAYLOAD")]
        payload: PathBuf,
        /// Recompute calculated fields before validating.
        #[arg(long)]
        calculate: bool,
        /// Print the outcome as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show which pages, sections, and fields are visible and required.
    State {
        #[arg(long, value_name = "SCHEMA")]
        schema: PathBuf,
        #[arg(long, value_name = "PAYLOAD")]
        payload: PathBuf,
    },
    /// Evaluate an expression against a data file.
    Eval {
        /// Expression source, e.g. "{age} >= 18".
        expression: String,
        #[arg(long, value_name = "DATA")]
        data: Option<PathBuf>,
        /// Evaluate as a condition (errors become false).
        #[arg(long)]
        boolean: bool,
    },
    /// Print the JSON Schema of the form schema document.
    Schema,
    /// Create a draft response.
    Create {
        #[arg(long, value_name = "STORE")]
        store: PathBuf,
        #[arg(long, value_name = "SCHEMA")]
        schema: PathBuf,
        #[arg(long)]
        participant: String,
        #[arg(long)]
        actor: String,
        /// Ignored when the config assigns roles within a study.
        #[arg(long)]
        role: Role,
        #[arg(long, value_name = "PAYLOAD")]
        payload: Option<PathBuf>,
    },
    /// Apply a lifecycle transition to a stored response.
    Transition {
        #[arg(long, value_name = "STORE")]
        store: PathBuf,
        #[arg(long, value_name = "SCHEMA")]
        schema: PathBuf,
        #[arg(long, value_name = "ID")]
        response: Uuid,
        /// save-draft, submit, verify, lock, sign, unlock, or edit-completed.
        #[arg(long)]
        kind: TransitionKind,
        #[arg(long)]
        actor: String,
        /// Ignored when the config assigns roles within a study.
        #[arg(long)]
        role: Role,
        /// The response's current updatedAt (RFC 3339).
        #[arg(long, value_name = "UPDATED_AT")]
        token: Option<DateTime<Utc>>,
        #[arg(long, value_name = "PAYLOAD")]
        payload: Option<PathBuf>,
        /// Reason for change (unlock, edit-completed).
        #[arg(long)]
        reason: Option<String>,
        /// Signature meaning (sign).
        #[arg(long, requires = "reauthenticated_at")]
        meaning: Option<String>,
        /// When the signer last re-authenticated (RFC 3339).
        #[arg(long, value_name = "TIME", requires = "meaning")]
        reauthenticated_at: Option<DateTime<Utc>>,
    },
    /// Print the audit trail and signatures of a response.
    History {
        #[arg(long, value_name = "STORE")]
        store: PathBuf,
        #[arg(long, value_name = "ID")]
        response: Uuid,
    },
}

fn main() -> CliResult<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Command::Check { schema } => run_check(&schema),
        Command::Validate {
            schema,
            payload,
            calculate,
            json,
        } => run_validate(&schema, &payload, calculate, json),
        Command::State { schema, payload } => run_state(&schema, &payload),
        Command::Eval {
            expression,
            data,
            boolean,
        } => run_eval(&expression, data.as_deref(), boolean),
        Command::Schema => print_json(&edc_spec::schema_document()),
        Command::Create {
            store,
            schema,
            participant,
            actor,
            role,
            payload,
        } => {
            let config = LifecycleConfig::load(cli.config.as_deref())?;
            run_create(config, &store, &schema, participant, actor, role, payload.as_deref())
        }
        Command::Transition {
            store,
            schema,
            response,
            kind,
            actor,
            role,
            token,
            payload,
            reason,
            meaning,
            reauthenticated_at,
        } => {
            let config = LifecycleConfig::load(cli.config.as_deref())?;
            let mut request = TransitionRequest::new(kind, response, actor, role);
            request.expected_updated_at = token;
            request.reason = reason;
            request.payload = payload.as_deref().map(read_json).transpose()?;
            if let (Some(meaning), Some(reauthenticated_at)) = (meaning, reauthenticated_at) {
                request.signature = Some(SignatureInput {
                    meaning,
                    reauthenticated_at,
                });
            }
            run_transition(config, &store, &schema, request)
        }
        Command::History { store, response } => run_history(&store, response),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn read_json(path: &Path) -> CliResult<Value> {
    let raw = fs::read_to_string(path)
        .map_err(|err| format!("failed to read {}: {err}", path.display()))?;
    Ok(serde_json::from_str(&raw)?)
}

fn read_schema(path: &Path) -> CliResult<FormSchema> {
    Ok(serde_json::from_value(read_json(path)?)?)
}

fn print_json(value: &impl serde::Serialize) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn compile_schema(schema: &FormSchema) -> CliResult<Validator> {
    edc_spec::compile(schema).map_err(|errors| {
        for error in &errors {
            eprintln!("  {error}");
        }
        format!("schema has {} structural error(s)", errors.len()).into()
    })
}

fn run_check(schema_path: &Path) -> CliResult<()> {
    let schema = read_schema(schema_path)?;
    let errors = edc_spec::check_structure(&schema);
    if errors.is_empty() {
        let fields = schema.fields().count();
        println!("Schema OK: {} page(s), {fields} field(s)", schema.pages.len());
        return Ok(());
    }
    println!("Schema has {} problem(s):", errors.len());
    for error in &errors {
        println!("  {} - {}", error.path, error.message);
    }
    Err("schema check failed".into())
}

fn run_validate(schema_path: &Path, payload_path: &Path, calculate: bool, as_json: bool) -> CliResult<()> {
    let validator = compile_schema(&read_schema(schema_path)?)?;
    let mut payload = read_json(payload_path)?;
    if calculate {
        validator.apply_calculations(&mut payload);
    }

    let result = validator.validate(&payload);
    if as_json {
        print_json(&result)?;
    } else {
        println!(
            "Validation result: {}",
            if result.valid { "valid" } else { "invalid" }
        );
        describe_validation(&result);
    }

    if result.valid {
        Ok(())
    } else {
        Err("validation failed".into())
    }
}

fn describe_validation(result: &ValidationOutcome) {
    if !result.errors.is_empty() {
        println!("Errors:");
        for error in &result.errors {
            println!("  {} - {} ({})", error.path, error.message, error.code);
        }
    }
}

fn run_state(schema_path: &Path, payload_path: &Path) -> CliResult<()> {
    let validator = compile_schema(&read_schema(schema_path)?)?;
    let payload = read_json(payload_path)?;
    print_json(&validator.form_state(&payload))
}

fn run_eval(expression: &str, data: Option<&Path>, boolean: bool) -> CliResult<()> {
    let data = match data {
        Some(path) => read_json(path)?,
        None => json!({}),
    };
    if boolean {
        println!("{}", edc_spec::evaluate_boolean(expression, &data));
        return Ok(());
    }
    if let Err(err) = edc_spec::Expression::compile(expression) {
        return Err(err.to_string().into());
    }
    let value = edc_spec::evaluate(expression, &data).map_or(Value::Null, |scalar| scalar.to_json());
    println!("{value}");
    Ok(())
}

/// Builds an engine whose registry holds the schema under its own id and version.
fn open_lifecycle(
    config: LifecycleConfig,
    store: &mut StoreFile,
    schema_path: &Path,
) -> CliResult<(Lifecycle<InMemoryResponseStore>, String, String)> {
    let schema = read_schema(schema_path)?;
    let form_id = schema
        .id
        .clone()
        .ok_or("schema needs an id to hold responses")?;
    let version = schema.version.clone().unwrap_or_else(|| "1".to_string());

    let resolver = config.role_resolver();
    let mut lifecycle = Lifecycle::new(store.open()?, config);
    if let Some((resolver, study)) = resolver {
        debug!(%study, "roles resolved from study assignments");
        lifecycle = lifecycle.with_role_resolver(Arc::new(resolver), study);
    }
    let validator = compile_schema(&schema)?;
    lifecycle.register_validator(form_id.clone(), version.clone(), Arc::new(validator));
    debug!(%form_id, %version, "form registered");
    Ok((lifecycle, form_id, version))
}

fn run_create(
    config: LifecycleConfig,
    store_path: &Path,
    schema_path: &Path,
    participant: String,
    actor: String,
    role: Role,
    payload: Option<&Path>,
) -> CliResult<()> {
    let mut store = StoreFile::new(store_path);
    let (lifecycle, form_id, form_version) = open_lifecycle(config, &mut store, schema_path)?;
    let payload = payload.map(read_json).transpose()?;
    let response = lifecycle.create_draft(NewResponse {
        participant_id: participant,
        form_id,
        form_version,
        payload,
        actor,
        role,
    })?;
    store.save(lifecycle.store())?;
    print_json(&response)
}

fn run_transition(
    config: LifecycleConfig,
    store_path: &Path,
    schema_path: &Path,
    request: TransitionRequest,
) -> CliResult<()> {
    let mut store = StoreFile::new(store_path);
    let (lifecycle, _, _) = open_lifecycle(config, &mut store, schema_path)?;
    match lifecycle.transition(request) {
        Ok(response) => {
            store.save(lifecycle.store())?;
            print_json(&response)
        }
        Err(edc_lifecycle::LifecycleError::Validation(errors)) => {
            describe_validation(&ValidationOutcome {
                valid: false,
                errors,
            });
            Err("validation failed".into())
        }
        Err(err) => Err(err.to_string().into()),
    }
}

fn run_history(store_path: &Path, response: Uuid) -> CliResult<()> {
    let store = StoreFile::new(store_path).open()?;
    let lifecycle = Lifecycle::new(store, LifecycleConfig::default());
    let audit = lifecycle.history(response)?;
    let signatures = lifecycle.signatures(response)?;
    print_json(&json!({ "audit": audit, "signatures": signatures }))
}
