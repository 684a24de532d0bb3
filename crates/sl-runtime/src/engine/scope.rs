use sl_core::{is_type_compatible, ScriptLangError};

use super::*;
use crate::helpers::sandbox::SandboxBindings;
use crate::helpers::value_path::{assign_nested_path, parse_ref_path, read_nested_path};

impl ScriptLangEngine {
    pub(super) fn is_visible_json_global(&self, name: &str) -> bool {
        self.current_script_name()
            .and_then(|script_name| self.visible_json_by_script.get(script_name))
            .is_some_and(|visible| visible.contains(name))
    }

    fn declaring_frame_index(&self, name: &str) -> Option<usize> {
        self.frames
            .iter()
            .rposition(|frame| frame.scope.contains_key(name))
    }

    pub(super) fn read_variable(&self, name: &str) -> Result<SlValue, ScriptLangError> {
        if let Some(index) = self.declaring_frame_index(name) {
            if let Some(value) = self.frames[index].scope.get(name) {
                return Ok(value.clone());
            }
        }
        if self.is_visible_json_global(name) {
            if let Some(view) = self.global_json.get(name) {
                return Ok(view.to_value());
            }
        }

        Err(ScriptLangError::new(
            "ENGINE_VAR_READ",
            format!("Variable \"{}\" is not defined.", name),
        ))
    }

    pub(super) fn write_variable(&mut self, name: &str, value: SlValue) -> Result<(), ScriptLangError> {
        if let Some(index) = self.declaring_frame_index(name) {
            let frame = &mut self.frames[index];
            check_declared_type(frame, name, &value)?;
            frame.scope.insert(name.to_string(), value);
            return Ok(());
        }
        if self.is_visible_json_global(name) {
            return Err(global_readonly(name));
        }

        Err(ScriptLangError::new(
            "ENGINE_VAR_WRITE",
            format!("Variable \"{}\" is not defined.", name),
        ))
    }

    pub(super) fn read_path(&self, path: &str) -> Result<SlValue, ScriptLangError> {
        let parts = parse_path(path)?;
        let root = self.read_variable(&parts[0])?;
        read_nested_path(&root, &parts[1..])
            .cloned()
            .map_err(|reason| path_error("ENGINE_REF_PATH_READ", path, &reason))
    }

    /// Resolves a ref argument. The path root has to be a variable declared
    /// in some frame; imported JSON can be read but never bound by reference.
    pub(super) fn read_ref_target(&self, path: &str) -> Result<SlValue, ScriptLangError> {
        let parts = parse_path(path)?;
        if self.declaring_frame_index(&parts[0]).is_none() && self.is_visible_json_global(&parts[0]) {
            return Err(global_readonly(&parts[0]));
        }
        self.read_path(path)
    }

    pub(super) fn write_path(&mut self, path: &str, value: SlValue) -> Result<(), ScriptLangError> {
        let parts = parse_path(path)?;
        if parts.len() == 1 {
            return self.write_variable(&parts[0], value);
        }

        let Some(index) = self.declaring_frame_index(&parts[0]) else {
            if self.is_visible_json_global(&parts[0]) {
                return Err(global_readonly(&parts[0]));
            }
            return Err(ScriptLangError::new(
                "ENGINE_VAR_WRITE",
                format!("Variable \"{}\" is not defined.", parts[0]),
            ));
        };

        let mut root = self.frames[index]
            .scope
            .get(&parts[0])
            .cloned()
            .ok_or_else(|| path_error("ENGINE_REF_PATH_WRITE", path, "root vanished"))?;
        assign_nested_path(&mut root, &parts[1..], value)
            .map_err(|reason| path_error("ENGINE_REF_PATH_WRITE", path, &reason))?;
        self.write_variable(&parts[0], root)
    }

    /// Everything an evaluation may see: every declared variable on the
    /// stack (innermost wins) followed by copies of the visible JSON globals
    /// not shadowed by a variable.
    pub(super) fn collect_bindings(&self) -> SandboxBindings {
        let mut bindings = SandboxBindings::default();
        let mut seen = BTreeSet::new();
        for frame in self.frames.iter().rev() {
            for (name, value) in &frame.scope {
                if seen.insert(name.as_str()) {
                    bindings.mutable.push((name.clone(), value.clone()));
                }
            }
        }

        let visible = self
            .current_script_name()
            .and_then(|script_name| self.visible_json_by_script.get(script_name));
        for name in visible.into_iter().flatten() {
            if seen.contains(name.as_str()) {
                continue;
            }
            if let Some(view) = self.global_json.get(name) {
                bindings.readonly.push((name.clone(), view.to_value()));
            }
        }
        bindings
    }

    /// Applies a batch of variable updates atomically: every value is type
    /// checked first, then all are written.
    pub(super) fn commit_binding_updates(
        &mut self,
        updates: Vec<(String, SlValue)>,
    ) -> Result<(), ScriptLangError> {
        let mut targets = Vec::with_capacity(updates.len());
        for (name, value) in updates {
            let index = self.declaring_frame_index(&name).ok_or_else(|| {
                ScriptLangError::new(
                    "ENGINE_VAR_WRITE",
                    format!("Variable \"{}\" is not defined.", name),
                )
            })?;
            check_declared_type(&self.frames[index], &name, &value)?;
            targets.push((index, name, value));
        }
        for (index, name, value) in targets {
            self.frames[index].scope.insert(name, value);
        }
        Ok(())
    }
}

pub(super) fn check_declared_type(
    frame: &RuntimeFrame,
    name: &str,
    value: &SlValue,
) -> Result<(), ScriptLangError> {
    match frame.var_types.get(name) {
        Some(declared) if !is_type_compatible(value, declared) => Err(ScriptLangError::new(
            "ENGINE_TYPE_MISMATCH",
            format!(
                "Variable \"{}\" expects {}, got {}.",
                name,
                declared.describe(),
                value.type_name()
            ),
        )),
        _ => Ok(()),
    }
}

pub(super) fn global_readonly(name: &str) -> ScriptLangError {
    ScriptLangError::new(
        "ENGINE_GLOBAL_READONLY",
        format!("Global JSON \"{}\" is readonly and cannot be mutated.", name),
    )
}

fn parse_path(path: &str) -> Result<Vec<String>, ScriptLangError> {
    parse_ref_path(path).ok_or_else(|| {
        ScriptLangError::new("ENGINE_REF_PATH", format!("Invalid ref path \"{}\".", path))
    })
}

fn path_error(code: &str, path: &str, reason: &str) -> ScriptLangError {
    ScriptLangError::new(
        code,
        format!("Cannot resolve path \"{}\": {}.", path, reason),
    )
}
