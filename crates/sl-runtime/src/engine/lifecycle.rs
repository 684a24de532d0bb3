use std::sync::Arc;

use sl_core::ScriptLangError;
use tracing::debug;

use super::*;

pub const DEFAULT_COMPILER_VERSION: &str = "player.v1";

/// Host-provided functions callable from expressions and code blocks with
/// zero to four arguments.
pub trait HostFunctionRegistry: Send + Sync {
    fn call(&self, name: &str, args: &[SlValue]) -> Result<SlValue, ScriptLangError>;
    fn names(&self) -> &[String];
}

#[derive(Debug, Default)]
pub struct EmptyHostFunctionRegistry {
    names: Vec<String>,
}

impl HostFunctionRegistry for EmptyHostFunctionRegistry {
    fn call(&self, _name: &str, _args: &[SlValue]) -> Result<SlValue, ScriptLangError> {
        Err(ScriptLangError::new(
            "ENGINE_HOST_FUNCTION_MISSING",
            "Host function registry is empty.",
        ))
    }

    fn names(&self) -> &[String] {
        &self.names
    }
}

#[derive(Clone)]
pub struct ScriptLangEngineOptions {
    pub scripts: BTreeMap<String, ScriptIr>,
    pub global_json: BTreeMap<String, SlValue>,
    pub host_functions: Option<Arc<dyn HostFunctionRegistry>>,
    pub random_seed: Option<u32>,
    pub compiler_version: Option<String>,
}

impl ScriptLangEngine {
    pub fn new(options: ScriptLangEngineOptions) -> Result<Self, ScriptLangError> {
        let host_functions: Arc<dyn HostFunctionRegistry> = options
            .host_functions
            .unwrap_or_else(|| Arc::new(EmptyHostFunctionRegistry::default()));

        let mut group_lookup = HashMap::new();
        let mut visible_json_by_script = HashMap::new();
        for (script_name, script) in &options.scripts {
            for group_id in script.groups.keys() {
                if let Some(owner) = group_lookup.insert(group_id.clone(), script_name.clone()) {
                    return Err(ScriptLangError::new(
                        "ENGINE_GROUP_DUPLICATE",
                        format!(
                            "Group \"{}\" is declared by both \"{}\" and \"{}\".",
                            group_id, owner, script_name
                        ),
                    ));
                }
            }
            visible_json_by_script.insert(
                script_name.clone(),
                script
                    .visible_json_globals
                    .iter()
                    .filter(|name| options.global_json.contains_key(name.as_str()))
                    .cloned()
                    .collect::<BTreeSet<_>>(),
            );
        }

        let initial_random_seed = options.random_seed.unwrap_or(1);
        let sandbox = ExpressionSandbox::new(host_functions, initial_random_seed)?;

        debug!(
            scripts = options.scripts.len(),
            globals = options.global_json.len(),
            seed = initial_random_seed,
            "engine created"
        );

        Ok(Self {
            scripts: options.scripts,
            compiler_version: options
                .compiler_version
                .unwrap_or_else(|| DEFAULT_COMPILER_VERSION.to_string()),
            group_lookup,
            global_json: JsonGlobals::new(options.global_json),
            visible_json_by_script,
            initial_random_seed,
            sandbox,
            frames: Vec::new(),
            pending_choice: None,
            ended: false,
            frame_counter: 1,
            once_state_by_script: BTreeMap::new(),
        })
    }

    /// Begins a fresh run of `entry_script_name`. Any previous state is
    /// discarded only once the entry scope has been built successfully.
    pub fn start(
        &mut self,
        entry_script_name: &str,
        entry_args: Option<BTreeMap<String, SlValue>>,
    ) -> Result<(), ScriptLangError> {
        let Some(script) = self.scripts.get(entry_script_name) else {
            return Err(ScriptLangError::new(
                "ENGINE_SCRIPT_NOT_FOUND",
                format!("Entry script \"{}\" is not registered.", entry_script_name),
            ));
        };
        let root_group_id = script.root_group_id.clone();
        self.lookup_group(&root_group_id)?;

        let (scope, var_types) =
            self.create_script_root_scope(entry_script_name, entry_args.unwrap_or_default())?;

        self.reset();
        self.push_root_frame(&root_group_id, scope, var_types, None);
        debug!(entry = entry_script_name, "engine started");
        Ok(())
    }

    pub fn compiler_version(&self) -> &str {
        &self.compiler_version
    }

    pub fn waiting_choice(&self) -> bool {
        self.pending_choice.is_some()
    }

    pub fn ended(&self) -> bool {
        self.ended
    }

    pub fn rng_state(&self) -> u32 {
        self.sandbox.rng_state()
    }

    /// Read-only view of an imported JSON document.
    pub fn json_global(&self, name: &str) -> Option<sl_core::JsonView<'_>> {
        self.global_json.get(name)
    }

    fn reset(&mut self) {
        self.frames.clear();
        self.pending_choice = None;
        self.ended = false;
        self.frame_counter = 1;
        self.once_state_by_script.clear();
        self.sandbox.set_rng_state(self.initial_random_seed);
    }
}

#[cfg(test)]
mod lifecycle_tests {
    use sl_core::ScriptType;

    use super::super::runtime_test_support::*;
    use super::*;

    #[test]
    fn new_rejects_duplicate_group_ids_across_scripts() {
        let main = script("main").root(vec![text("t1", "Hello")]).build();
        let other = script("other")
            .root(vec![])
            .group("main.root", vec![])
            .build();
        let result = ScriptLangEngine::new(engine_options(vec![main, other]));
        assert_eq!(
            result.err().map(|error| error.code),
            Some("ENGINE_GROUP_DUPLICATE".to_string())
        );
    }

    #[test]
    fn new_rejects_reserved_host_function_name_random() {
        let mut options = engine_options(vec![script("main").root(vec![]).build()]);
        options.host_functions = Some(test_registry(&["random"]));
        let result = ScriptLangEngine::new(options);
        assert_eq!(
            result.err().map(|error| error.code),
            Some("ENGINE_HOST_FUNCTION_RESERVED".to_string())
        );
    }

    #[test]
    fn defaults_apply_when_options_are_omitted() {
        let engine = engine_with(vec![script("main").root(vec![]).build()]);
        assert_eq!(engine.compiler_version(), DEFAULT_COMPILER_VERSION);
        assert_eq!(engine.rng_state(), 1);
        assert!(!engine.waiting_choice());
        assert!(!engine.ended());
    }

    #[test]
    fn start_rejects_unknown_script_and_bad_args_without_touching_state() {
        let main = script("main")
            .param("hp", ScriptType::number())
            .root(vec![text("t1", "HP ${hp}"), text("t2", "again")])
            .build();
        let mut engine = engine_with(vec![main]);
        engine.start("main", None).expect("start");
        assert_eq!(expect_text(&mut engine), "HP 0");

        let missing = engine.start("nope", None).expect_err("unknown script");
        assert_eq!(missing.code, "ENGINE_SCRIPT_NOT_FOUND");

        let mismatch = engine
            .start(
                "main",
                Some(BTreeMap::from([("hp".to_string(), SlValue::from("x"))])),
            )
            .expect_err("type mismatch");
        assert_eq!(mismatch.code, "ENGINE_TYPE_MISMATCH");

        let unknown = engine
            .start(
                "main",
                Some(BTreeMap::from([("mp".to_string(), SlValue::Number(1.0))])),
            )
            .expect_err("unknown arg");
        assert_eq!(unknown.code, "ENGINE_CALL_ARG_UNKNOWN");

        assert_eq!(expect_text(&mut engine), "again");
    }

    #[test]
    fn start_binds_entry_args_and_resets_random_state() {
        let main = script("main")
            .param("hp", ScriptType::number())
            .root(vec![
                var("v1", "roll", ScriptType::number(), Some("random()")),
                text("t1", "HP ${hp}"),
            ])
            .build();
        let mut engine = engine_with(vec![main]);
        let args = BTreeMap::from([("hp".to_string(), SlValue::Number(7.0))]);

        engine.start("main", Some(args.clone())).expect("start");
        assert_eq!(expect_text(&mut engine), "HP 7");
        assert_ne!(engine.rng_state(), 1);

        engine.start("main", Some(args)).expect("restart");
        assert_eq!(engine.rng_state(), 1);
        assert_eq!(expect_text(&mut engine), "HP 7");
        expect_end(&mut engine);
        assert!(engine.ended());
    }
}
