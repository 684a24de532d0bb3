use std::collections::{BTreeMap, BTreeSet, HashMap};

use sl_core::{
    ChoiceItem, ContinuationFrame, EngineOutput, JsonGlobals, ScriptIr, ScriptType, SlValue,
    SnapshotCompletion,
};

use crate::helpers::sandbox::ExpressionSandbox;

mod boundary;
mod callstack;
mod control_flow;
mod eval;
mod frame_stack;
mod lifecycle;
mod once_state;
mod rng;
mod scope;
mod snapshot;
mod step;

pub use lifecycle::{
    EmptyHostFunctionRegistry, HostFunctionRegistry, ScriptLangEngineOptions,
    DEFAULT_COMPILER_VERSION,
};
pub use rng::next_random_u32;

/// Maximum node dispatches a single `next_output` call may perform before
/// giving up with `ENGINE_GUARD_EXCEEDED`.
pub const EXECUTION_GUARD_LIMIT: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompletionKind {
    None,
    WhileBody,
    ResumeAfterChild,
}

impl From<CompletionKind> for SnapshotCompletion {
    fn from(value: CompletionKind) -> Self {
        match value {
            CompletionKind::None => SnapshotCompletion::None,
            CompletionKind::WhileBody => SnapshotCompletion::WhileBody,
            CompletionKind::ResumeAfterChild => SnapshotCompletion::ResumeAfterChild,
        }
    }
}

impl From<SnapshotCompletion> for CompletionKind {
    fn from(value: SnapshotCompletion) -> Self {
        match value {
            SnapshotCompletion::None => CompletionKind::None,
            SnapshotCompletion::WhileBody => CompletionKind::WhileBody,
            SnapshotCompletion::ResumeAfterChild => CompletionKind::ResumeAfterChild,
        }
    }
}

#[derive(Debug, Clone)]
struct RuntimeFrame {
    frame_id: u64,
    group_id: String,
    node_index: usize,
    scope: BTreeMap<String, SlValue>,
    var_types: BTreeMap<String, ScriptType>,
    completion: CompletionKind,
    script_root: bool,
    return_continuation: Option<ContinuationFrame>,
}

/// A choice boundary frozen at the moment it was first reached. Items and
/// prompt are never re-rendered while the boundary is pending.
#[derive(Debug, Clone)]
struct PendingChoice {
    frame_id: u64,
    node_id: String,
    options: Vec<ChoiceItem>,
    prompt_text: Option<String>,
}

impl PendingChoice {
    fn output(&self) -> EngineOutput {
        EngineOutput::Choices {
            items: self.options.clone(),
            prompt_text: self.prompt_text.clone(),
        }
    }
}

type ScopeInit = (BTreeMap<String, SlValue>, BTreeMap<String, ScriptType>);

pub struct ScriptLangEngine {
    scripts: BTreeMap<String, ScriptIr>,
    compiler_version: String,
    group_lookup: HashMap<String, String>,
    global_json: JsonGlobals,
    visible_json_by_script: HashMap<String, BTreeSet<String>>,
    initial_random_seed: u32,
    sandbox: ExpressionSandbox,

    frames: Vec<RuntimeFrame>,
    pending_choice: Option<PendingChoice>,
    ended: bool,
    frame_counter: u64,
    once_state_by_script: BTreeMap<String, BTreeSet<String>>,
}

#[cfg(test)]
pub(super) mod runtime_test_support {
    use std::sync::Arc;

    use sl_core::{
        CallArgument, ChoiceOption, ImplicitGroup, ScriptLangError, ScriptNode, ScriptParam,
        VarDeclaration,
    };

    use super::*;

    #[derive(Debug)]
    pub(crate) struct TestRegistry {
        pub(crate) names: Vec<String>,
    }

    impl HostFunctionRegistry for TestRegistry {
        fn call(&self, name: &str, args: &[SlValue]) -> Result<SlValue, ScriptLangError> {
            match name {
                "bonus" => {
                    let base = args.first().and_then(SlValue::as_number).unwrap_or(0.0);
                    Ok(SlValue::Number(base + 1.0))
                }
                "arity" => Ok(SlValue::Number(args.len() as f64)),
                "greet" => Ok(SlValue::String(format!(
                    "hi {}",
                    args.first().map(ToString::to_string).unwrap_or_default()
                ))),
                _ => Err(ScriptLangError::new(
                    "HOST_TEST_FAILURE",
                    format!("host function \"{}\" failed", name),
                )),
            }
        }

        fn names(&self) -> &[String] {
            &self.names
        }
    }

    pub(crate) fn test_registry(names: &[&str]) -> Arc<dyn HostFunctionRegistry> {
        Arc::new(TestRegistry {
            names: names.iter().map(|name| (*name).to_string()).collect(),
        })
    }

    pub(crate) struct ScriptBuilder {
        ir: ScriptIr,
    }

    /// Script whose root group is `<name>.root`.
    pub(crate) fn script(name: &str) -> ScriptBuilder {
        ScriptBuilder {
            ir: ScriptIr {
                script_name: name.to_string(),
                params: Vec::new(),
                root_group_id: format!("{}.root", name),
                groups: BTreeMap::new(),
                visible_json_globals: Vec::new(),
            },
        }
    }

    impl ScriptBuilder {
        pub(crate) fn param(mut self, name: &str, ty: ScriptType) -> Self {
            self.ir.params.push(ScriptParam {
                name: name.to_string(),
                r#type: ty,
                is_ref: false,
            });
            self
        }

        pub(crate) fn ref_param(mut self, name: &str, ty: ScriptType) -> Self {
            self.ir.params.push(ScriptParam {
                name: name.to_string(),
                r#type: ty,
                is_ref: true,
            });
            self
        }

        pub(crate) fn root(self, nodes: Vec<ScriptNode>) -> Self {
            let root_group_id = self.ir.root_group_id.clone();
            self.group(&root_group_id, nodes)
        }

        pub(crate) fn group(mut self, group_id: &str, nodes: Vec<ScriptNode>) -> Self {
            let parent_group_id =
                (group_id != self.ir.root_group_id).then(|| self.ir.root_group_id.clone());
            self.ir.groups.insert(
                group_id.to_string(),
                ImplicitGroup {
                    group_id: group_id.to_string(),
                    parent_group_id,
                    nodes,
                },
            );
            self
        }

        pub(crate) fn sees_json(mut self, names: &[&str]) -> Self {
            self.ir
                .visible_json_globals
                .extend(names.iter().map(|name| (*name).to_string()));
            self
        }

        pub(crate) fn build(self) -> ScriptIr {
            self.ir
        }
    }

    pub(crate) fn text(id: &str, value: &str) -> ScriptNode {
        ScriptNode::Text {
            id: id.to_string(),
            value: value.to_string(),
            once: false,
        }
    }

    pub(crate) fn once_text(id: &str, value: &str) -> ScriptNode {
        ScriptNode::Text {
            id: id.to_string(),
            value: value.to_string(),
            once: true,
        }
    }

    pub(crate) fn code(id: &str, source: &str) -> ScriptNode {
        ScriptNode::Code {
            id: id.to_string(),
            code: source.to_string(),
        }
    }

    pub(crate) fn var(id: &str, name: &str, ty: ScriptType, initial: Option<&str>) -> ScriptNode {
        ScriptNode::Var {
            id: id.to_string(),
            declaration: VarDeclaration {
                name: name.to_string(),
                r#type: ty,
                initial_value_expr: initial.map(ToString::to_string),
            },
        }
    }

    pub(crate) fn if_node(id: &str, when: &str, then_group: &str, else_group: Option<&str>) -> ScriptNode {
        ScriptNode::If {
            id: id.to_string(),
            when_expr: when.to_string(),
            then_group_id: then_group.to_string(),
            else_group_id: else_group.map(ToString::to_string),
        }
    }

    pub(crate) fn while_node(id: &str, when: &str, body_group: &str) -> ScriptNode {
        ScriptNode::While {
            id: id.to_string(),
            when_expr: when.to_string(),
            body_group_id: body_group.to_string(),
        }
    }

    pub(crate) fn choice(id: &str, prompt: Option<&str>, options: Vec<ChoiceOption>) -> ScriptNode {
        ScriptNode::Choice {
            id: id.to_string(),
            prompt_text: prompt.map(ToString::to_string),
            options,
        }
    }

    pub(crate) fn option(id: &str, text: &str, group: &str) -> ChoiceOption {
        ChoiceOption {
            id: id.to_string(),
            text: text.to_string(),
            when_expr: None,
            once: false,
            fall_over: false,
            group_id: group.to_string(),
        }
    }

    pub(crate) fn call(id: &str, target: &str, args: Vec<CallArgument>) -> ScriptNode {
        ScriptNode::Call {
            id: id.to_string(),
            target_script: target.to_string(),
            args,
        }
    }

    pub(crate) fn ret(id: &str, target: Option<&str>, args: Vec<CallArgument>) -> ScriptNode {
        ScriptNode::Return {
            id: id.to_string(),
            target_script: target.map(ToString::to_string),
            args,
        }
    }

    pub(crate) fn value_arg(expr: &str) -> CallArgument {
        CallArgument {
            value_expr: expr.to_string(),
            is_ref: false,
        }
    }

    pub(crate) fn ref_arg(path: &str) -> CallArgument {
        CallArgument {
            value_expr: path.to_string(),
            is_ref: true,
        }
    }

    pub(crate) fn engine_options(scripts: Vec<ScriptIr>) -> ScriptLangEngineOptions {
        ScriptLangEngineOptions {
            scripts: scripts
                .into_iter()
                .map(|script| (script.script_name.clone(), script))
                .collect(),
            global_json: BTreeMap::new(),
            host_functions: None,
            random_seed: Some(1),
            compiler_version: None,
        }
    }

    pub(crate) fn engine_with(scripts: Vec<ScriptIr>) -> ScriptLangEngine {
        ScriptLangEngine::new(engine_options(scripts)).expect("engine should build")
    }

    pub(crate) fn started(scripts: Vec<ScriptIr>) -> ScriptLangEngine {
        let mut engine = engine_with(scripts);
        engine.start("main", None).expect("start should pass");
        engine
    }

    pub(crate) fn expect_text(engine: &mut ScriptLangEngine) -> String {
        match engine.next_output().expect("next should pass") {
            EngineOutput::Text { text } => text,
            other => panic!("expected text, got {:?}", other),
        }
    }

    pub(crate) fn expect_choices(engine: &mut ScriptLangEngine) -> (Vec<ChoiceItem>, Option<String>) {
        match engine.next_output().expect("next should pass") {
            EngineOutput::Choices { items, prompt_text } => (items, prompt_text),
            other => panic!("expected choices, got {:?}", other),
        }
    }

    pub(crate) fn expect_end(engine: &mut ScriptLangEngine) {
        assert_eq!(engine.next_output().expect("next should pass"), EngineOutput::End);
    }

    /// Collects every text line, always picking the first choice item.
    pub(crate) fn drive_engine_to_end(engine: &mut ScriptLangEngine) -> Vec<String> {
        let mut texts = Vec::new();
        for _ in 0..5_000usize {
            match engine.next_output().expect("next should pass") {
                EngineOutput::Text { text } => texts.push(text),
                EngineOutput::Choices { items, .. } => {
                    let index = items.first().map(|item| item.index).unwrap_or(0);
                    engine.choose(index).expect("choose should pass");
                }
                EngineOutput::End => return texts,
            }
        }
        panic!("engine did not reach the end");
    }
}
