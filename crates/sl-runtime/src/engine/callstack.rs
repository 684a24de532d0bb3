use sl_core::{default_value_from_type, is_type_compatible, CallArgument, ScriptLangError, VarDeclaration};
use tracing::trace;

use super::*;

impl ScriptLangEngine {
    pub(super) fn execute_var_declaration(
        &mut self,
        declaration: &VarDeclaration,
    ) -> Result<(), ScriptLangError> {
        let duplicate = self
            .frames
            .last()
            .ok_or_else(|| ScriptLangError::new("ENGINE_NO_FRAME", "No runtime frame available."))?
            .scope
            .contains_key(&declaration.name);
        if duplicate {
            return Err(ScriptLangError::new(
                "ENGINE_VAR_DUPLICATE",
                format!(
                    "Variable \"{}\" is already declared in this scope.",
                    declaration.name
                ),
            ));
        }

        let value = match &declaration.initial_value_expr {
            Some(expr) => self.eval_expression(expr).map_err(|error| {
                if error.code == "ENGINE_UNDEFINED_ASSIGN" {
                    ScriptLangError::new(
                        "ENGINE_UNDEFINED_ASSIGN",
                        format!(
                            "Variable \"{}\" cannot be initialized with an undefined value.",
                            declaration.name
                        ),
                    )
                } else {
                    error
                }
            })?,
            None => default_value_from_type(&declaration.r#type),
        };

        if !is_type_compatible(&value, &declaration.r#type) {
            return Err(ScriptLangError::new(
                "ENGINE_TYPE_MISMATCH",
                format!(
                    "Variable \"{}\" expects {}, got {}.",
                    declaration.name,
                    declaration.r#type.describe(),
                    value.type_name()
                ),
            ));
        }

        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| ScriptLangError::new("ENGINE_NO_FRAME", "No runtime frame available."))?;
        frame.scope.insert(declaration.name.clone(), value);
        frame
            .var_types
            .insert(declaration.name.clone(), declaration.r#type.clone());
        Ok(())
    }

    /// Pushes the callee's root frame. A call that is the last node of a
    /// script root which itself has somewhere to return to replaces that
    /// root instead, so chains of such calls run in constant stack depth.
    pub(super) fn execute_call(
        &mut self,
        target_script: &str,
        args: &[CallArgument],
    ) -> Result<(), ScriptLangError> {
        let (caller_frame_id, caller_group_id, caller_node_index, caller_is_root, caller_has_continuation) = {
            let frame = self
                .frames
                .last()
                .ok_or_else(|| ScriptLangError::new("ENGINE_NO_FRAME", "No runtime frame available."))?;
            (
                frame.frame_id,
                frame.group_id.clone(),
                frame.node_index,
                frame.script_root,
                frame.return_continuation.is_some(),
            )
        };
        let caller_group_len = self.lookup_group(&caller_group_id)?.1.nodes.len();

        let Some(target) = self.scripts.get(target_script) else {
            return Err(ScriptLangError::new(
                "ENGINE_CALL_TARGET",
                format!("Call target script \"{}\" not found.", target_script),
            ));
        };
        let target_root = target.root_group_id.clone();
        let params = target.params.clone();
        self.lookup_group(&target_root)?;

        let mut arg_values = BTreeMap::new();
        let mut ref_bindings = BTreeMap::new();
        for (index, arg) in args.iter().enumerate() {
            let Some(param) = params.get(index) else {
                return Err(ScriptLangError::new(
                    "ENGINE_CALL_ARG_UNKNOWN",
                    format!(
                        "Call to \"{}\" passes {} arguments but it declares {}.",
                        target_script,
                        args.len(),
                        params.len()
                    ),
                ));
            };
            if param.is_ref != arg.is_ref {
                return Err(ScriptLangError::new(
                    "ENGINE_CALL_REF_MISMATCH",
                    format!(
                        "Argument \"{}\" of \"{}\" must{} be passed by ref.",
                        param.name,
                        target_script,
                        if param.is_ref { "" } else { " not" }
                    ),
                ));
            }
            let value = if arg.is_ref {
                ref_bindings.insert(param.name.clone(), arg.value_expr.clone());
                self.read_ref_target(&arg.value_expr)?
            } else {
                self.eval_expression(&arg.value_expr)?
            };
            arg_values.insert(param.name.clone(), value);
        }

        let is_tail_call =
            caller_is_root && caller_has_continuation && caller_node_index + 1 == caller_group_len;
        if is_tail_call && !ref_bindings.is_empty() {
            return Err(ScriptLangError::new(
                "ENGINE_TAIL_REF_UNSUPPORTED",
                format!(
                    "Tail call to \"{}\" cannot pass ref arguments.",
                    target_script
                ),
            ));
        }

        let (scope, var_types) = self.create_script_root_scope(target_script, arg_values)?;

        if is_tail_call {
            let inherited = self
                .frames
                .pop()
                .and_then(|frame| frame.return_continuation);
            trace!(script = target_script, "tail call");
            self.push_root_frame(&target_root, scope, var_types, inherited);
            return Ok(());
        }

        trace!(script = target_script, refs = ref_bindings.len(), "call");
        let continuation = ContinuationFrame {
            resume_frame_id: caller_frame_id,
            next_node_index: caller_node_index + 1,
            ref_bindings,
        };
        self.push_root_frame(&target_root, scope, var_types, Some(continuation));
        Ok(())
    }

    /// Leaves the current script. With a target, control transfers to that
    /// script, which inherits this script's continuation after the pending
    /// ref write-back has been done.
    pub(super) fn execute_return(
        &mut self,
        target_script: Option<&str>,
        args: &[CallArgument],
    ) -> Result<(), ScriptLangError> {
        let root_index = self.find_current_root_frame_index()?;

        let Some(target_name) = target_script else {
            let root = self
                .frames
                .split_off(root_index)
                .into_iter()
                .next()
                .ok_or_else(|| ScriptLangError::new("ENGINE_ROOT_FRAME", "No script root frame found."))?;
            trace!(group_id = %root.group_id, "return");
            return self.resolve_continuation(&root.scope, root.return_continuation);
        };

        let Some(target) = self.scripts.get(target_name) else {
            return Err(ScriptLangError::new(
                "ENGINE_RETURN_TARGET",
                format!("Return target script \"{}\" not found.", target_name),
            ));
        };
        let target_root = target.root_group_id.clone();
        let params = target.params.clone();
        self.lookup_group(&target_root)?;

        let mut arg_values = BTreeMap::new();
        for (index, arg) in args.iter().enumerate() {
            let Some(param) = params.get(index) else {
                return Err(ScriptLangError::new(
                    "ENGINE_CALL_ARG_UNKNOWN",
                    format!(
                        "Return to \"{}\" passes {} arguments but it declares {}.",
                        target_name,
                        args.len(),
                        params.len()
                    ),
                ));
            };
            if arg.is_ref || param.is_ref {
                return Err(ScriptLangError::new(
                    "ENGINE_RETURN_REF_UNSUPPORTED",
                    format!(
                        "Return to \"{}\" cannot bind \"{}\" by ref.",
                        target_name, param.name
                    ),
                ));
            }
            arg_values.insert(param.name.clone(), self.eval_expression(&arg.value_expr)?);
        }
        let (scope, var_types) = self.create_script_root_scope(target_name, arg_values)?;

        let root = self
            .frames
            .split_off(root_index)
            .into_iter()
            .next()
            .ok_or_else(|| ScriptLangError::new("ENGINE_ROOT_FRAME", "No script root frame found."))?;
        let forwarded = match root.return_continuation {
            Some(continuation) => {
                if self.find_frame_index(continuation.resume_frame_id).is_some() {
                    self.write_back_refs(&root.scope, &continuation.ref_bindings)?;
                }
                Some(ContinuationFrame {
                    ref_bindings: BTreeMap::new(),
                    ..continuation
                })
            }
            None => None,
        };
        trace!(script = target_name, "return with transfer");
        self.push_root_frame(&target_root, scope, var_types, forwarded);
        Ok(())
    }
}
