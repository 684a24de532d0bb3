use sl_core::{ScriptLangError, ScriptNode};
use tracing::trace;

use super::once_state::text_once_key;
use super::*;

/// Engine state a single node may touch before it fails part way through.
struct NodeCheckpoint {
    frames: Vec<RuntimeFrame>,
    rng_state: u32,
    once_state_by_script: BTreeMap<String, BTreeSet<String>>,
}

impl ScriptLangEngine {
    /// Runs until the next observable output. While a choice is pending the
    /// same frozen boundary is returned again without re-evaluating anything.
    ///
    /// A node that fails leaves frames, RNG and once state exactly as they
    /// were before it started, so retrying reproduces the same failure.
    pub fn next_output(&mut self) -> Result<EngineOutput, ScriptLangError> {
        if let Some(pending) = &self.pending_choice {
            return Ok(pending.output());
        }
        if self.ended {
            return Ok(EngineOutput::End);
        }

        for _ in 0..EXECUTION_GUARD_LIMIT {
            let Some((frame_id, group_id, node_index)) = self
                .frames
                .last()
                .map(|frame| (frame.frame_id, frame.group_id.clone(), frame.node_index))
            else {
                self.ended = true;
                return Ok(EngineOutput::End);
            };

            let (script_name, node) = {
                let (script_name, group) = self.lookup_group(&group_id)?;
                (script_name.to_string(), group.nodes.get(node_index).cloned())
            };
            let Some(node) = node else {
                self.finish_frame(frame_id)?;
                continue;
            };
            trace!(frame_id, node_index, node_id = node.id().unwrap_or("?"), "dispatch");

            let checkpoint = self.node_checkpoint();
            match self.execute_node(&script_name, &group_id, node_index, node) {
                Ok(Some(output)) => return Ok(output),
                Ok(None) => {}
                Err(error) => {
                    self.restore_node_checkpoint(checkpoint);
                    return Err(error);
                }
            }
        }

        Err(ScriptLangError::new(
            "ENGINE_GUARD_EXCEEDED",
            format!(
                "Execution guard exceeded {} steps without producing output.",
                EXECUTION_GUARD_LIMIT
            ),
        ))
    }

    fn node_checkpoint(&self) -> NodeCheckpoint {
        NodeCheckpoint {
            frames: self.frames.clone(),
            rng_state: self.sandbox.rng_state(),
            once_state_by_script: self.once_state_by_script.clone(),
        }
    }

    fn restore_node_checkpoint(&mut self, checkpoint: NodeCheckpoint) {
        self.frames = checkpoint.frames;
        self.sandbox.set_rng_state(checkpoint.rng_state);
        self.once_state_by_script = checkpoint.once_state_by_script;
        self.pending_choice = None;
        self.ended = false;
    }

    fn execute_node(
        &mut self,
        script_name: &str,
        group_id: &str,
        node_index: usize,
        node: ScriptNode,
    ) -> Result<Option<EngineOutput>, ScriptLangError> {
        match node {
            ScriptNode::Text { id, value, once } => {
                let once_key = text_once_key(&id);
                if once && self.has_once_state(script_name, &once_key) {
                    self.bump_top_node_index(1)?;
                    return Ok(None);
                }
                let rendered = self.render_text(&value)?;
                self.bump_top_node_index(1)?;
                if once {
                    self.mark_once_state(script_name, once_key);
                }
                Ok(Some(EngineOutput::Text { text: rendered }))
            }
            ScriptNode::Code { code, .. } => {
                self.run_code(&code)?;
                self.bump_top_node_index(1)?;
                Ok(None)
            }
            ScriptNode::Var { declaration, .. } => {
                self.execute_var_declaration(&declaration)?;
                self.bump_top_node_index(1)?;
                Ok(None)
            }
            ScriptNode::If {
                when_expr,
                then_group_id,
                else_group_id,
                ..
            } => {
                let target = if self.eval_boolean(&when_expr)? {
                    Some(then_group_id)
                } else {
                    else_group_id
                };
                match target {
                    Some(group_id) => {
                        self.enter_child_group(&group_id, CompletionKind::ResumeAfterChild, true)?
                    }
                    None => self.bump_top_node_index(1)?,
                }
                Ok(None)
            }
            ScriptNode::While {
                when_expr,
                body_group_id,
                ..
            } => {
                if self.eval_boolean(&when_expr)? {
                    self.enter_child_group(&body_group_id, CompletionKind::WhileBody, false)?;
                } else {
                    self.bump_top_node_index(1)?;
                }
                Ok(None)
            }
            ScriptNode::Choice {
                id,
                prompt_text,
                options,
            } => self.enter_choice(script_name, &id, prompt_text.as_deref(), &options),
            ScriptNode::Call {
                target_script,
                args,
                ..
            } => {
                self.execute_call(&target_script, &args)?;
                Ok(None)
            }
            ScriptNode::Return {
                target_script,
                args,
                ..
            } => {
                self.execute_return(target_script.as_deref(), &args)?;
                Ok(None)
            }
            ScriptNode::Break { .. } => {
                self.execute_break()?;
                Ok(None)
            }
            ScriptNode::Continue { .. } => {
                self.execute_continue()?;
                Ok(None)
            }
            ScriptNode::Unknown => Err(ScriptLangError::new(
                "ENGINE_NODE_UNKNOWN",
                format!(
                    "Node {} of group \"{}\" has an unknown kind.",
                    node_index, group_id
                ),
            )),
        }
    }
}
