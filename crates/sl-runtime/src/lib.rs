mod engine;
mod helpers;

pub use engine::{
    next_random_u32, EmptyHostFunctionRegistry, HostFunctionRegistry, ScriptLangEngine,
    ScriptLangEngineOptions, DEFAULT_COMPILER_VERSION, EXECUTION_GUARD_LIMIT,
};
