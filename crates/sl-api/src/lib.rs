use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sl_core::{ScriptIr, ScriptLangError, SlValue, SnapshotV1, SNAPSHOT_SCHEMA_V1};
use sl_runtime::{HostFunctionRegistry, ScriptLangEngine, ScriptLangEngineOptions};
use tracing::debug;

/// Compiler output consumed by the runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectBundle {
    pub scripts: BTreeMap<String, ScriptIr>,
    #[serde(default)]
    pub entry_script: Option<String>,
    #[serde(default)]
    pub global_json: BTreeMap<String, SlValue>,
    #[serde(default)]
    pub compiler_version: Option<String>,
}

#[derive(Clone)]
pub struct CreateEngineOptions {
    pub bundle: ProjectBundle,
    pub entry_script: Option<String>,
    pub entry_args: Option<BTreeMap<String, SlValue>>,
    pub host_functions: Option<Arc<dyn HostFunctionRegistry>>,
    pub random_seed: Option<u32>,
}

#[derive(Clone)]
pub struct ResumeEngineOptions {
    pub bundle: ProjectBundle,
    pub snapshot: SnapshotV1,
    pub host_functions: Option<Arc<dyn HostFunctionRegistry>>,
}

pub fn load_project_bundle(bytes: &[u8]) -> Result<ProjectBundle, ScriptLangError> {
    serde_json::from_slice(bytes).map_err(|error| {
        ScriptLangError::new(
            "API_BUNDLE_DECODE",
            format!("Project bundle is not valid: {}", error),
        )
    })
}

/// Builds an engine from a bundle and starts it at the resolved entry
/// script (explicit option, then the bundle's own entry, then `main`).
pub fn create_engine(options: CreateEngineOptions) -> Result<ScriptLangEngine, ScriptLangError> {
    let ProjectBundle {
        scripts,
        entry_script,
        global_json,
        compiler_version,
    } = options.bundle;
    let entry_script = resolve_entry_script(&scripts, options.entry_script.or(entry_script))?;

    let mut engine = ScriptLangEngine::new(ScriptLangEngineOptions {
        scripts,
        global_json,
        host_functions: options.host_functions,
        random_seed: options.random_seed,
        compiler_version,
    })?;
    engine.start(&entry_script, options.entry_args)?;
    debug!(entry = %entry_script, "engine created from bundle");
    Ok(engine)
}

pub fn resume_engine(options: ResumeEngineOptions) -> Result<ScriptLangEngine, ScriptLangError> {
    let mut engine = ScriptLangEngine::new(ScriptLangEngineOptions {
        scripts: options.bundle.scripts,
        global_json: options.bundle.global_json,
        host_functions: options.host_functions,
        random_seed: None,
        compiler_version: options.bundle.compiler_version,
    })?;
    engine.resume(options.snapshot)?;
    Ok(engine)
}

pub fn encode_snapshot(snapshot: &SnapshotV1) -> Result<Vec<u8>, ScriptLangError> {
    serde_json::to_vec(snapshot).map_err(|error| {
        ScriptLangError::new(
            "SNAPSHOT_ENCODE",
            format!("Snapshot could not be encoded: {}", error),
        )
    })
}

/// Decodes snapshot bytes. The raw JSON is checked field by field first so a
/// corrupt save reports the field at fault instead of a generic decode error.
pub fn decode_snapshot(bytes: &[u8]) -> Result<SnapshotV1, ScriptLangError> {
    let raw: Value = serde_json::from_slice(bytes).map_err(|error| {
        ScriptLangError::new(
            "SNAPSHOT_DECODE",
            format!("Snapshot is not valid JSON: {}", error),
        )
    })?;
    validate_snapshot_shape(&raw)?;
    serde_json::from_value(raw).map_err(|error| {
        ScriptLangError::new(
            "SNAPSHOT_SHAPE",
            format!("Snapshot has an unexpected shape: {}", error),
        )
    })
}

fn validate_snapshot_shape(raw: &Value) -> Result<(), ScriptLangError> {
    let Some(object) = raw.as_object() else {
        return Err(ScriptLangError::new(
            "SNAPSHOT_SHAPE",
            "Snapshot must be a JSON object.",
        ));
    };

    if object.get("schemaVersion").and_then(Value::as_str) != Some(SNAPSHOT_SCHEMA_V1) {
        return Err(ScriptLangError::new(
            "SNAPSHOT_SCHEMA",
            format!("Snapshot schemaVersion must be \"{}\".", SNAPSHOT_SCHEMA_V1),
        ));
    }

    let rng_ok = object
        .get("rngState")
        .and_then(Value::as_u64)
        .is_some_and(|state| u32::try_from(state).is_ok());
    if !rng_ok {
        return Err(ScriptLangError::new(
            "SNAPSHOT_RNG_STATE",
            "Snapshot rngState must be an unsigned 32-bit integer.",
        ));
    }

    if object.get("waitingChoice") != Some(&Value::Bool(true)) {
        return Err(ScriptLangError::new(
            "SNAPSHOT_WAITING_CHOICE",
            "Snapshot waitingChoice must be true.",
        ));
    }

    let items_ok = object
        .get("pendingChoiceItems")
        .and_then(Value::as_array)
        .is_some_and(|items| {
            items.iter().all(|item| {
                item.get("index").is_some_and(Value::is_u64)
                    && item.get("id").is_some_and(Value::is_string)
                    && item.get("text").is_some_and(Value::is_string)
            })
        });
    if !items_ok {
        return Err(ScriptLangError::new(
            "SNAPSHOT_PENDING_CHOICE_ITEMS",
            "Snapshot pendingChoiceItems must be a list of {index, id, text}.",
        ));
    }

    match object.get("pendingChoicePromptText") {
        None | Some(Value::Null) | Some(Value::String(_)) => Ok(()),
        Some(_) => Err(ScriptLangError::new(
            "SNAPSHOT_PENDING_CHOICE_PROMPT",
            "Snapshot pendingChoicePromptText must be a string or null.",
        )),
    }
}

pub fn resolve_entry_script(
    scripts: &BTreeMap<String, ScriptIr>,
    explicit: Option<String>,
) -> Result<String, ScriptLangError> {
    if let Some(entry) = explicit {
        if !scripts.contains_key(&entry) {
            return Err(ScriptLangError::new(
                "API_ENTRY_SCRIPT_NOT_FOUND",
                format!("Entry script \"{}\" is not registered.", entry),
            ));
        }
        return Ok(entry);
    }

    if scripts.contains_key("main") {
        return Ok("main".to_string());
    }

    Err(ScriptLangError::new(
        "API_ENTRY_MAIN_NOT_FOUND",
        "Expected script with name=\"main\" as default entry.",
    ))
}
