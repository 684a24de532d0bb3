use std::collections::BTreeSet;

use sl_core::{
    is_type_compatible, ScopeChainEntry, ScriptLangError, ScriptNode, SnapshotCursor,
    SnapshotFrameV1, SnapshotV1, SNAPSHOT_SCHEMA_V1,
};
use tracing::debug;

use super::*;

fn snapshot_error(code: &str, message: impl Into<String>) -> ScriptLangError {
    ScriptLangError::new(code, message)
}

impl RuntimeFrame {
    fn to_snapshot(&self) -> SnapshotFrameV1 {
        SnapshotFrameV1 {
            frame_id: self.frame_id,
            group_id: self.group_id.clone(),
            node_index: self.node_index,
            scope: self.scope.clone(),
            var_types: self.var_types.clone(),
            completion: self.completion.into(),
            script_root: self.script_root,
            return_continuation: self.return_continuation.clone(),
        }
    }

    fn from_snapshot(frame: SnapshotFrameV1) -> Self {
        Self {
            frame_id: frame.frame_id,
            group_id: frame.group_id,
            node_index: frame.node_index,
            scope: frame.scope,
            var_types: frame.var_types,
            completion: frame.completion.into(),
            script_root: frame.script_root,
            return_continuation: frame.return_continuation,
        }
    }
}

impl ScriptLangEngine {
    /// Captures the full state at a pending choice. Only allowed while a
    /// choice is waiting.
    pub fn snapshot(&self) -> Result<SnapshotV1, ScriptLangError> {
        let Some(pending) = &self.pending_choice else {
            return Err(snapshot_error(
                "SNAPSHOT_NOT_ALLOWED",
                "snapshot is only allowed while waiting for a choice.",
            ));
        };

        let runtime_frames = self
            .frames
            .iter()
            .map(RuntimeFrame::to_snapshot)
            .collect::<Vec<_>>();
        let cursor = SnapshotCursor {
            group_path: self.frames.iter().map(|frame| frame.group_id.clone()).collect(),
            node_index: self.frames.last().map(|frame| frame.node_index).unwrap_or(0),
        };
        let scope_chain = self
            .frames
            .iter()
            .map(|frame| ScopeChainEntry {
                frame_id: frame.frame_id,
                group_id: frame.group_id.clone(),
                scope: frame.scope.clone(),
            })
            .collect();
        let continuations = self
            .frames
            .iter()
            .filter_map(|frame| frame.return_continuation.clone())
            .collect();

        Ok(SnapshotV1 {
            schema_version: SNAPSHOT_SCHEMA_V1.to_string(),
            compiler_version: self.compiler_version.clone(),
            cursor,
            runtime_frames,
            scope_chain,
            continuations,
            rng_state: self.sandbox.rng_state(),
            waiting_choice: true,
            pending_choice_node_id: pending.node_id.clone(),
            pending_choice_items: pending.options.clone(),
            pending_choice_prompt_text: pending.prompt_text.clone(),
            once_state_by_script: self.once_state_snapshot(),
        })
    }

    /// Restores a snapshot. The snapshot is checked completely against the
    /// loaded scripts first; on any failure the engine is left as it was.
    pub fn resume(&mut self, snapshot: SnapshotV1) -> Result<(), ScriptLangError> {
        self.validate_snapshot(&snapshot)?;

        let SnapshotV1 {
            runtime_frames,
            rng_state,
            pending_choice_node_id,
            pending_choice_items,
            pending_choice_prompt_text,
            once_state_by_script,
            ..
        } = snapshot;

        let frames = runtime_frames
            .into_iter()
            .map(RuntimeFrame::from_snapshot)
            .collect::<Vec<_>>();
        let max_frame_id = frames.iter().map(|frame| frame.frame_id).max().unwrap_or(0);
        let frame_id = frames.last().map(|frame| frame.frame_id).unwrap_or(0);

        self.frames = frames;
        self.frame_counter = max_frame_id + 1;
        self.ended = false;
        self.pending_choice = Some(PendingChoice {
            frame_id,
            node_id: pending_choice_node_id,
            options: pending_choice_items,
            prompt_text: pending_choice_prompt_text,
        });
        self.once_state_by_script = once_state_by_script
            .into_iter()
            .map(|(script_name, keys)| (script_name, keys.into_iter().collect()))
            .collect();
        self.sandbox.set_rng_state(rng_state);
        debug!(frames = self.frames.len(), rng_state, "snapshot resumed");
        Ok(())
    }

    fn validate_snapshot(&self, snapshot: &SnapshotV1) -> Result<(), ScriptLangError> {
        if snapshot.schema_version != SNAPSHOT_SCHEMA_V1 {
            return Err(snapshot_error(
                "SNAPSHOT_SCHEMA",
                format!(
                    "Unsupported snapshot schema \"{}\".",
                    snapshot.schema_version
                ),
            ));
        }
        if snapshot.compiler_version != self.compiler_version {
            return Err(snapshot_error(
                "SNAPSHOT_COMPILER_VERSION",
                format!(
                    "Snapshot compiler version \"{}\" does not match engine \"{}\".",
                    snapshot.compiler_version, self.compiler_version
                ),
            ));
        }
        if !snapshot.waiting_choice {
            return Err(snapshot_error(
                "SNAPSHOT_WAITING_CHOICE",
                "Snapshot must be captured while waiting for a choice.",
            ));
        }
        self.validate_choice_items(snapshot)?;
        self.validate_frames(snapshot)?;
        self.validate_pending_choice_node(snapshot)?;

        for script_name in snapshot.once_state_by_script.keys() {
            if !self.scripts.contains_key(script_name) {
                return Err(snapshot_error(
                    "SNAPSHOT_ONCE_STATE",
                    format!("Once state refers to unknown script \"{}\".", script_name),
                ));
            }
        }
        Ok(())
    }

    fn validate_choice_items(&self, snapshot: &SnapshotV1) -> Result<(), ScriptLangError> {
        if snapshot.pending_choice_items.is_empty() {
            return Err(snapshot_error(
                "SNAPSHOT_PENDING_CHOICE_ITEMS",
                "Pending choice has no items.",
            ));
        }
        let mut ids = BTreeSet::new();
        for (position, item) in snapshot.pending_choice_items.iter().enumerate() {
            if item.index != position || !ids.insert(item.id.as_str()) {
                return Err(snapshot_error(
                    "SNAPSHOT_PENDING_CHOICE_ITEMS",
                    format!("Pending choice item {} is malformed.", position),
                ));
            }
        }
        Ok(())
    }

    fn validate_frames(&self, snapshot: &SnapshotV1) -> Result<(), ScriptLangError> {
        let frames = &snapshot.runtime_frames;
        let Some(first) = frames.first() else {
            return Err(snapshot_error("SNAPSHOT_EMPTY", "Snapshot has no runtime frames."));
        };
        if !first.script_root {
            return Err(snapshot_error(
                "SNAPSHOT_FRAMES",
                "Bottom snapshot frame must be a script root.",
            ));
        }

        let mut seen_ids = Vec::with_capacity(frames.len());
        for frame in frames {
            if seen_ids.last().is_some_and(|last| *last >= frame.frame_id) {
                return Err(snapshot_error(
                    "SNAPSHOT_FRAMES",
                    "Snapshot frame ids must be strictly increasing.",
                ));
            }

            let (_, group) = self.lookup_group(&frame.group_id)?;
            if frame.node_index > group.nodes.len() {
                return Err(snapshot_error(
                    "SNAPSHOT_FRAMES",
                    format!(
                        "Frame {} cursor {} is past the end of group \"{}\".",
                        frame.frame_id, frame.node_index, frame.group_id
                    ),
                ));
            }

            for (name, value) in &frame.scope {
                let compatible = frame
                    .var_types
                    .get(name)
                    .is_some_and(|declared| is_type_compatible(value, declared));
                if !compatible {
                    return Err(snapshot_error(
                        "SNAPSHOT_FRAME_TYPE",
                        format!(
                            "Variable \"{}\" in frame {} does not match its declared type.",
                            name, frame.frame_id
                        ),
                    ));
                }
            }

            if let Some(continuation) = &frame.return_continuation {
                if !frame.script_root || !seen_ids.contains(&continuation.resume_frame_id) {
                    return Err(snapshot_error(
                        "SNAPSHOT_CONTINUATION",
                        format!(
                            "Frame {} continues into frame {} which is not below it.",
                            frame.frame_id, continuation.resume_frame_id
                        ),
                    ));
                }
            }

            seen_ids.push(frame.frame_id);
        }
        Ok(())
    }

    fn validate_pending_choice_node(&self, snapshot: &SnapshotV1) -> Result<(), ScriptLangError> {
        let Some(top) = snapshot.runtime_frames.last() else {
            return Err(snapshot_error("SNAPSHOT_EMPTY", "Snapshot has no runtime frames."));
        };
        let (_, group) = self.lookup_group(&top.group_id)?;
        let Some(ScriptNode::Choice { id, options, .. }) = group.nodes.get(top.node_index) else {
            return Err(snapshot_error(
                "SNAPSHOT_PENDING_CHOICE",
                "Snapshot cursor does not point at a choice node.",
            ));
        };
        if *id != snapshot.pending_choice_node_id {
            return Err(snapshot_error(
                "SNAPSHOT_PENDING_CHOICE",
                format!(
                    "Pending choice \"{}\" does not match node \"{}\".",
                    snapshot.pending_choice_node_id, id
                ),
            ));
        }
        for item in &snapshot.pending_choice_items {
            if !options.iter().any(|option| option.id == item.id) {
                return Err(snapshot_error(
                    "SNAPSHOT_PENDING_CHOICE_ITEMS",
                    format!("Pending choice item \"{}\" is not an option of \"{}\".", item.id, id),
                ));
            }
        }
        Ok(())
    }
}
