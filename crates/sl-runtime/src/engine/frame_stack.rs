use sl_core::{ImplicitGroup, ScriptLangError};
use tracing::{debug, trace};

use super::*;

impl ScriptLangEngine {
    pub(super) fn top_frame_id(&self) -> Result<u64, ScriptLangError> {
        self.frames
            .last()
            .map(|frame| frame.frame_id)
            .ok_or_else(no_frame)
    }

    pub(super) fn bump_top_node_index(&mut self, amount: usize) -> Result<(), ScriptLangError> {
        let frame = self.frames.last_mut().ok_or_else(no_frame)?;
        frame.node_index += amount;
        Ok(())
    }

    pub(super) fn find_frame_index(&self, frame_id: u64) -> Option<usize> {
        self.frames
            .iter()
            .position(|frame| frame.frame_id == frame_id)
    }

    pub(super) fn lookup_group(
        &self,
        group_id: &str,
    ) -> Result<(&str, &ImplicitGroup), ScriptLangError> {
        let not_found = || {
            ScriptLangError::new(
                "ENGINE_GROUP_NOT_FOUND",
                format!("Group \"{}\" not found.", group_id),
            )
        };
        let script_name = self.group_lookup.get(group_id).ok_or_else(not_found)?;
        let group = self
            .scripts
            .get(script_name)
            .and_then(|script| script.groups.get(group_id))
            .ok_or_else(not_found)?;
        Ok((script_name.as_str(), group))
    }

    /// Script that owns the group currently on top of the stack.
    pub(super) fn current_script_name(&self) -> Option<&str> {
        let frame = self.frames.last()?;
        self.group_lookup.get(&frame.group_id).map(String::as_str)
    }

    pub(super) fn find_current_root_frame_index(&self) -> Result<usize, ScriptLangError> {
        self.frames
            .iter()
            .rposition(|frame| frame.script_root)
            .ok_or_else(|| ScriptLangError::new("ENGINE_ROOT_FRAME", "No script root frame found."))
    }

    fn next_frame_id(&mut self) -> u64 {
        let frame_id = self.frame_counter;
        self.frame_counter += 1;
        frame_id
    }

    pub(super) fn push_root_frame(
        &mut self,
        group_id: &str,
        scope: BTreeMap<String, SlValue>,
        var_types: BTreeMap<String, ScriptType>,
        return_continuation: Option<ContinuationFrame>,
    ) {
        let frame_id = self.next_frame_id();
        trace!(frame_id, group_id, "push script root frame");
        self.frames.push(RuntimeFrame {
            frame_id,
            group_id: group_id.to_string(),
            node_index: 0,
            scope,
            var_types,
            completion: CompletionKind::None,
            script_root: true,
            return_continuation,
        });
    }

    /// Enters `group_id` as a child of the top frame. The group is checked
    /// before anything changes; with `advance_parent` the parent cursor moves
    /// past the entering node.
    pub(super) fn enter_child_group(
        &mut self,
        group_id: &str,
        completion: CompletionKind,
        advance_parent: bool,
    ) -> Result<(), ScriptLangError> {
        self.lookup_group(group_id)?;
        if advance_parent {
            self.bump_top_node_index(1)?;
        }
        let frame_id = self.next_frame_id();
        trace!(frame_id, group_id, ?completion, "push group frame");
        self.frames.push(RuntimeFrame {
            frame_id,
            group_id: group_id.to_string(),
            node_index: 0,
            scope: BTreeMap::new(),
            var_types: BTreeMap::new(),
            completion,
            script_root: false,
            return_continuation: None,
        });
        Ok(())
    }

    /// Pops a frame whose group is exhausted. A finished script root hands
    /// control back through its continuation.
    pub(super) fn finish_frame(&mut self, frame_id: u64) -> Result<(), ScriptLangError> {
        let Some(index) = self.find_frame_index(frame_id) else {
            return Ok(());
        };
        let frame = self.frames.remove(index);
        trace!(frame_id, group_id = %frame.group_id, "finish frame");
        if !frame.script_root {
            return Ok(());
        }
        self.resolve_continuation(&frame.scope, frame.return_continuation)
    }

    /// Writes ref parameters back to the caller, then moves the caller's
    /// cursor. Without a live caller the run is over.
    pub(super) fn resolve_continuation(
        &mut self,
        returning_scope: &BTreeMap<String, SlValue>,
        continuation: Option<ContinuationFrame>,
    ) -> Result<(), ScriptLangError> {
        let Some(continuation) = continuation else {
            self.end_execution();
            return Ok(());
        };
        let Some(resume_index) = self.find_frame_index(continuation.resume_frame_id) else {
            self.end_execution();
            return Ok(());
        };
        self.write_back_refs(returning_scope, &continuation.ref_bindings)?;
        self.frames[resume_index].node_index = continuation.next_node_index;
        Ok(())
    }

    pub(super) fn write_back_refs(
        &mut self,
        returning_scope: &BTreeMap<String, SlValue>,
        ref_bindings: &BTreeMap<String, String>,
    ) -> Result<(), ScriptLangError> {
        for (callee_var, caller_path) in ref_bindings {
            let value = returning_scope.get(callee_var).cloned().ok_or_else(|| {
                ScriptLangError::new(
                    "ENGINE_REF_VALUE_MISSING",
                    format!("Missing ref value \"{}\" in callee scope.", callee_var),
                )
            })?;
            self.write_path(caller_path, value)?;
        }
        Ok(())
    }

    pub(super) fn end_execution(&mut self) {
        self.frames.clear();
        self.pending_choice = None;
        self.ended = true;
        debug!("execution ended");
    }
}

fn no_frame() -> ScriptLangError {
    ScriptLangError::new("ENGINE_NO_FRAME", "No runtime frame available.")
}
