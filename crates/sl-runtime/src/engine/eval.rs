use std::sync::OnceLock;

use regex::Regex;
use sl_core::{default_value_from_type, is_type_compatible, ScriptLangError};

use super::*;
use crate::helpers::sandbox::EvalMode;

fn template_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([^{}]+)\}").expect("template regex must compile"))
}

impl ScriptLangEngine {
    /// Builds the root scope of `script_name`: every param starts at its
    /// type default and is then overwritten by the supplied argument.
    pub(super) fn create_script_root_scope(
        &self,
        script_name: &str,
        arg_values: BTreeMap<String, SlValue>,
    ) -> Result<ScopeInit, ScriptLangError> {
        let script = self.scripts.get(script_name).ok_or_else(|| {
            ScriptLangError::new(
                "ENGINE_SCRIPT_NOT_FOUND",
                format!("Script \"{}\" not found.", script_name),
            )
        })?;

        let mut scope = BTreeMap::new();
        let mut var_types = BTreeMap::new();
        for param in &script.params {
            scope.insert(param.name.clone(), default_value_from_type(&param.r#type));
            var_types.insert(param.name.clone(), param.r#type.clone());
        }

        for (name, value) in arg_values {
            let Some(expected_type) = var_types.get(&name) else {
                return Err(ScriptLangError::new(
                    "ENGINE_CALL_ARG_UNKNOWN",
                    format!(
                        "Argument \"{}\" is not declared by script \"{}\".",
                        name, script_name
                    ),
                ));
            };
            if !is_type_compatible(&value, expected_type) {
                return Err(ScriptLangError::new(
                    "ENGINE_TYPE_MISMATCH",
                    format!(
                        "Argument \"{}\" expects {}, got {}.",
                        name,
                        expected_type.describe(),
                        value.type_name()
                    ),
                ));
            }
            scope.insert(name, value);
        }

        Ok((scope, var_types))
    }

    pub(super) fn render_text(&mut self, template: &str) -> Result<String, ScriptLangError> {
        let mut output = String::with_capacity(template.len());
        let mut last_index = 0usize;
        for captures in template_pattern().captures_iter(template) {
            let (Some(full), Some(expr)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            output.push_str(&template[last_index..full.start()]);
            let value = self.eval_expression(expr.as_str())?;
            output.push_str(&value.to_string());
            last_index = full.end();
        }
        output.push_str(&template[last_index..]);
        Ok(output)
    }

    pub(super) fn eval_boolean(&mut self, expr: &str) -> Result<bool, ScriptLangError> {
        match self.eval_expression(expr)? {
            SlValue::Bool(value) => Ok(value),
            other => Err(ScriptLangError::new(
                "ENGINE_BOOLEAN_EXPECTED",
                format!(
                    "Expression \"{}\" must evaluate to boolean, got {}.",
                    expr,
                    other.type_name()
                ),
            )),
        }
    }

    pub(super) fn run_code(&mut self, code: &str) -> Result<(), ScriptLangError> {
        self.run_sandbox(code, EvalMode::Statements).map(|_| ())
    }

    pub(super) fn eval_expression(&mut self, expr: &str) -> Result<SlValue, ScriptLangError> {
        self.run_sandbox(expr, EvalMode::Expression)?.ok_or_else(|| {
            ScriptLangError::new(
                "ENGINE_UNDEFINED_ASSIGN",
                format!("Expression \"{}\" produced no value.", expr),
            )
        })
    }

    fn run_sandbox(
        &mut self,
        source: &str,
        mode: EvalMode,
    ) -> Result<Option<SlValue>, ScriptLangError> {
        let rng_before = self.sandbox.rng_state();
        let bindings = self.collect_bindings();
        let result = self
            .sandbox
            .run(source, mode, &bindings)
            .and_then(|outcome| {
                self.commit_binding_updates(outcome.updates)?;
                Ok(outcome.value)
            });
        if result.is_err() {
            self.sandbox.set_rng_state(rng_before);
        }
        result
    }
}
