use sl_core::{ScriptLangError, ScriptNode};

use super::*;

impl ScriptLangEngine {
    /// Index of the innermost loop body frame in the current script. Loops in
    /// a calling script are never targeted.
    fn find_loop_body_index(&self, keyword: &str) -> Result<usize, ScriptLangError> {
        let missing = || {
            ScriptLangError::new(
                "ENGINE_WHILE_CONTROL_TARGET_MISSING",
                format!("\"{}\" used outside of a while body.", keyword),
            )
        };

        let mut body_index = None;
        for (index, frame) in self.frames.iter().enumerate().rev() {
            if frame.completion == CompletionKind::WhileBody {
                body_index = Some(index);
                break;
            }
            if frame.script_root {
                break;
            }
        }
        let body_index = body_index.filter(|index| *index > 0).ok_or_else(missing)?;

        let owner = &self.frames[body_index - 1];
        let (_, group) = self.lookup_group(&owner.group_id)?;
        match group.nodes.get(owner.node_index) {
            Some(ScriptNode::While { .. }) => Ok(body_index),
            _ => Err(missing()),
        }
    }

    pub(super) fn execute_break(&mut self) -> Result<(), ScriptLangError> {
        let body_index = self.find_loop_body_index("break")?;
        self.frames.truncate(body_index);
        self.bump_top_node_index(1)
    }

    pub(super) fn execute_continue(&mut self) -> Result<(), ScriptLangError> {
        let body_index = self.find_loop_body_index("continue")?;
        self.frames.truncate(body_index);
        Ok(())
    }
}
