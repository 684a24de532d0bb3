//! Sandboxed rhai evaluation.
//!
//! Every evaluation sees exactly the bindings the caller passes in: mutable
//! script variables plus copies of the visible JSON globals. Nothing from the
//! host process leaks in except the registered builtins (`random`, `Math::*`)
//! and the host function registry.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use rhai::packages::{
    BasicArrayPackage, BasicMapPackage, BasicMathPackage, CorePackage, LogicPackage,
    MoreStringPackage, Package,
};
use rhai::{
    Dynamic, Engine, EvalAltResult, ImmutableString, Module, ParseErrorType, Position, Scope, FLOAT,
    INT,
};
use sl_core::{ScriptLangError, SlValue};
use tracing::{debug, trace};

use super::rhai_bridge::{dynamic_to_slvalue, slvalue_to_dynamic};
use crate::engine::{next_random_u32, HostFunctionRegistry};

pub(crate) const RANDOM_BUILTIN: &str = "random";
pub(crate) const MATH_MODULE: &str = "Math";

const MAX_OPERATIONS: u64 = 1_000_000;
const MAX_CALL_LEVELS: usize = 64;
const MAX_EXPR_DEPTH: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EvalMode {
    Expression,
    Statements,
}

impl EvalMode {
    fn label(self) -> &'static str {
        match self {
            Self::Expression => "Expression",
            Self::Statements => "Code",
        }
    }
}

/// Values pushed into the rhai scope, in push order. `mutable` names shadow
/// any same-named entry in `readonly`.
#[derive(Debug, Default)]
pub(crate) struct SandboxBindings {
    pub(crate) mutable: Vec<(String, SlValue)>,
    pub(crate) readonly: Vec<(String, SlValue)>,
}

#[derive(Debug)]
pub(crate) struct SandboxOutcome {
    /// Result of an expression; `None` for statement blocks.
    pub(crate) value: Option<SlValue>,
    /// Mutable bindings whose value changed, in binding order.
    pub(crate) updates: Vec<(String, SlValue)>,
}

type HostErrorSlot = Rc<RefCell<Option<ScriptLangError>>>;

pub(crate) struct ExpressionSandbox {
    engine: Engine,
    rng_state: Rc<Cell<u32>>,
    host_error: HostErrorSlot,
}

impl ExpressionSandbox {
    pub(crate) fn new(
        host_functions: Arc<dyn HostFunctionRegistry>,
        seed: u32,
    ) -> Result<Self, ScriptLangError> {
        if let Some(name) = host_functions
            .names()
            .iter()
            .find(|name| name.as_str() == RANDOM_BUILTIN || name.as_str() == MATH_MODULE)
        {
            return Err(ScriptLangError::new(
                "ENGINE_HOST_FUNCTION_RESERVED",
                format!("hostFunctions cannot register reserved builtin name \"{}\".", name),
            ));
        }

        let rng_state = Rc::new(Cell::new(seed));
        let host_error: HostErrorSlot = Rc::new(RefCell::new(None));

        // Pure language packages only, without the clock or a module resolver.
        let mut engine = Engine::new_raw();
        engine.register_global_module(CorePackage::new().as_shared_module());
        engine.register_global_module(LogicPackage::new().as_shared_module());
        engine.register_global_module(BasicMathPackage::new().as_shared_module());
        engine.register_global_module(BasicArrayPackage::new().as_shared_module());
        engine.register_global_module(BasicMapPackage::new().as_shared_module());
        engine.register_global_module(MoreStringPackage::new().as_shared_module());
        engine.set_strict_variables(true);
        engine.set_max_operations(MAX_OPERATIONS);
        engine.set_max_call_levels(MAX_CALL_LEVELS);
        engine.set_max_expr_depths(MAX_EXPR_DEPTH, MAX_EXPR_DEPTH);
        engine.disable_symbol("eval");
        engine.on_print(|text| debug!(target: "sl_runtime::script", "{}", text));
        engine.on_debug(|text, source, position| {
            debug!(target: "sl_runtime::script", ?source, %position, "{}", text)
        });

        let rng_for_builtin = Rc::clone(&rng_state);
        engine.register_fn(RANDOM_BUILTIN, move || -> INT {
            let mut state = rng_for_builtin.get();
            let value = next_random_u32(&mut state);
            rng_for_builtin.set(state);
            INT::from(value)
        });

        engine.register_static_module(MATH_MODULE, math_module().into());

        for name in host_functions.names() {
            register_host_function(&mut engine, name, &host_functions, &host_error);
        }

        Ok(Self {
            engine,
            rng_state,
            host_error,
        })
    }

    pub(crate) fn rng_state(&self) -> u32 {
        self.rng_state.get()
    }

    pub(crate) fn set_rng_state(&self, state: u32) {
        self.rng_state.set(state);
    }

    pub(crate) fn run(
        &self,
        source: &str,
        mode: EvalMode,
        bindings: &SandboxBindings,
    ) -> Result<SandboxOutcome, ScriptLangError> {
        self.host_error.borrow_mut().take();

        let mut scope = Scope::new();
        for (name, value) in &bindings.mutable {
            scope.push_dynamic(name.as_str(), slvalue_to_dynamic(value));
        }
        for (name, value) in &bindings.readonly {
            scope.push_dynamic(name.as_str(), slvalue_to_dynamic(value));
        }

        trace!(mode = mode.label(), source, "sandbox eval");
        let result = match mode {
            EvalMode::Expression => self
                .engine
                .eval_with_scope::<Dynamic>(&mut scope, &format!("({})", source))
                .map(Some),
            EvalMode::Statements => self.engine.run_with_scope(&mut scope, source).map(|()| None),
        };
        let value = match result {
            Ok(value) => value,
            Err(error) => return Err(self.translate_error(&error, mode)),
        };

        let mut entries = scope.iter();
        let mut updates = Vec::new();
        for (name, before) in &bindings.mutable {
            let Some((_, _, after)) = entries.next() else {
                break;
            };
            let after = dynamic_to_slvalue(after).map_err(|error| binding_error(name, error))?;
            if &after != before {
                updates.push((name.clone(), after));
            }
        }
        for (name, before) in &bindings.readonly {
            let Some((_, _, after)) = entries.next() else {
                break;
            };
            if dynamic_to_slvalue(after).ok().as_ref() != Some(before) {
                return Err(ScriptLangError::new(
                    "ENGINE_GLOBAL_READONLY",
                    format!("Global JSON \"{}\" is readonly and cannot be mutated.", name),
                ));
            }
        }

        let value = value.map(dynamic_to_slvalue).transpose()?;
        Ok(SandboxOutcome { value, updates })
    }

    fn translate_error(&self, error: &EvalAltResult, mode: EvalMode) -> ScriptLangError {
        let root = root_cause(error);
        let host_error = self.host_error.borrow_mut().take();
        if let Some(host_error) = host_error.filter(|host_error| raised_by_host(root, host_error)) {
            return host_error;
        }
        match root {
            EvalAltResult::ErrorVariableNotFound(name, _)
            | EvalAltResult::ErrorParsing(ParseErrorType::VariableUndefined(name), _) => {
                ScriptLangError::new(
                    "ENGINE_VAR_UNDEFINED",
                    format!("Variable \"{}\" is not defined.", name),
                )
            }
            EvalAltResult::ErrorFunctionNotFound(signature, _)
                if signature
                    .strip_prefix(RANDOM_BUILTIN)
                    .is_some_and(|rest| rest.is_empty() || rest.starts_with([' ', '('])) =>
            {
                ScriptLangError::new(
                    "ENGINE_RANDOM_ARITY",
                    format!("random() takes no arguments, got \"{}\".", signature),
                )
            }
            _ => ScriptLangError::new(
                "ENGINE_EVAL_ERROR",
                format!("{} eval failed: {}", mode.label(), error),
            ),
        }
    }
}

fn root_cause(error: &EvalAltResult) -> &EvalAltResult {
    match error {
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => root_cause(inner),
        other => other,
    }
}

/// A host failure caught by a script `try` block stays in the slot; it is only
/// reported when it is what actually ended the evaluation.
fn raised_by_host(root: &EvalAltResult, host_error: &ScriptLangError) -> bool {
    match root {
        EvalAltResult::ErrorRuntime(payload, _) => payload
            .read_lock::<ImmutableString>()
            .is_some_and(|message| message.as_str() == host_error.to_string()),
        _ => false,
    }
}

fn binding_error(name: &str, error: ScriptLangError) -> ScriptLangError {
    if error.code == "ENGINE_UNDEFINED_ASSIGN" {
        return ScriptLangError::new(
            "ENGINE_UNDEFINED_ASSIGN",
            format!("Variable \"{}\" cannot be assigned an undefined value.", name),
        );
    }
    error
}

fn numeric_arg(value: &Dynamic) -> Result<FLOAT, Box<EvalAltResult>> {
    if let Ok(value) = value.as_float() {
        return Ok(value);
    }
    if let Ok(value) = value.as_int() {
        return Ok(value as FLOAT);
    }
    Err(Box::new(EvalAltResult::ErrorRuntime(
        Dynamic::from(format!("Math expects a number, got {}.", value.type_name())),
        Position::NONE,
    )))
}

fn unary(module: &mut Module, name: &str, op: fn(FLOAT) -> FLOAT) {
    module.set_native_fn(
        name,
        move |x: Dynamic| -> Result<FLOAT, Box<EvalAltResult>> { Ok(op(numeric_arg(&x)?)) },
    );
}

fn binary(module: &mut Module, name: &str, op: fn(FLOAT, FLOAT) -> FLOAT) {
    module.set_native_fn(
        name,
        move |x: Dynamic, y: Dynamic| -> Result<FLOAT, Box<EvalAltResult>> {
            Ok(op(numeric_arg(&x)?, numeric_arg(&y)?))
        },
    );
}

fn math_module() -> Module {
    let mut module = Module::new();
    module.set_var("PI", std::f64::consts::PI as FLOAT);
    module.set_var("E", std::f64::consts::E as FLOAT);
    unary(&mut module, "floor", FLOAT::floor);
    unary(&mut module, "ceil", FLOAT::ceil);
    unary(&mut module, "round", FLOAT::round);
    unary(&mut module, "trunc", FLOAT::trunc);
    unary(&mut module, "abs", FLOAT::abs);
    unary(&mut module, "sqrt", FLOAT::sqrt);
    unary(&mut module, "sign", |x| if x == 0.0 { 0.0 } else { x.signum() });
    binary(&mut module, "pow", FLOAT::powf);
    binary(&mut module, "min", FLOAT::min);
    binary(&mut module, "max", FLOAT::max);
    module
}

#[derive(Clone)]
struct HostBridge {
    name: String,
    registry: Arc<dyn HostFunctionRegistry>,
    host_error: HostErrorSlot,
}

impl HostBridge {
    fn call(&self, args: Vec<Dynamic>) -> Result<Dynamic, Box<EvalAltResult>> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(dynamic_to_slvalue(arg).map_err(|error| self.fail(error))?);
        }
        trace!(name = %self.name, arity = values.len(), "host function call");
        let result = self
            .registry
            .call(&self.name, &values)
            .map_err(|error| self.fail(error))?;
        Ok(slvalue_to_dynamic(&result))
    }

    fn fail(&self, error: ScriptLangError) -> Box<EvalAltResult> {
        let message = error.to_string();
        *self.host_error.borrow_mut() = Some(error);
        Box::new(EvalAltResult::ErrorRuntime(
            Dynamic::from(message),
            Position::NONE,
        ))
    }
}

/// Registers `name` for every arity from zero to four.
fn register_host_function(
    engine: &mut Engine,
    name: &str,
    registry: &Arc<dyn HostFunctionRegistry>,
    host_error: &HostErrorSlot,
) {
    let bridge = HostBridge {
        name: name.to_string(),
        registry: Arc::clone(registry),
        host_error: Rc::clone(host_error),
    };

    let f0 = bridge.clone();
    engine.register_fn(name, move || f0.call(Vec::new()));
    let f1 = bridge.clone();
    engine.register_fn(name, move |a: Dynamic| f1.call(vec![a]));
    let f2 = bridge.clone();
    engine.register_fn(name, move |a: Dynamic, b: Dynamic| f2.call(vec![a, b]));
    let f3 = bridge.clone();
    engine.register_fn(name, move |a: Dynamic, b: Dynamic, c: Dynamic| {
        f3.call(vec![a, b, c])
    });
    let f4 = bridge;
    engine.register_fn(
        name,
        move |a: Dynamic, b: Dynamic, c: Dynamic, d: Dynamic| f4.call(vec![a, b, c, d]),
    );
}
