use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{ChoiceItem, ScriptType};
use crate::value::SlValue;

pub const SNAPSHOT_SCHEMA_V1: &str = "snapshot.v1";

/// Caller-resume information captured at a call site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuationFrame {
    pub resume_frame_id: u64,
    pub next_node_index: usize,
    /// Callee parameter name -> caller ref path.
    #[serde(default)]
    pub ref_bindings: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SnapshotCompletion {
    None,
    WhileBody,
    ResumeAfterChild,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotFrameV1 {
    pub frame_id: u64,
    pub group_id: String,
    pub node_index: usize,
    pub scope: BTreeMap<String, SlValue>,
    pub var_types: BTreeMap<String, ScriptType>,
    pub completion: SnapshotCompletion,
    pub script_root: bool,
    pub return_continuation: Option<ContinuationFrame>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotCursor {
    pub group_path: Vec<String>,
    pub node_index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeChainEntry {
    pub frame_id: u64,
    pub group_id: String,
    pub scope: BTreeMap<String, SlValue>,
}

/// Full suspended state at a choice boundary.
///
/// `cursor`, `scope_chain` and `continuations` are debug views derived from
/// `runtime_frames`; resuming never reads them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotV1 {
    pub schema_version: String,
    pub compiler_version: String,
    pub cursor: SnapshotCursor,
    pub runtime_frames: Vec<SnapshotFrameV1>,
    #[serde(default)]
    pub scope_chain: Vec<ScopeChainEntry>,
    #[serde(default)]
    pub continuations: Vec<ContinuationFrame>,
    pub rng_state: u32,
    pub waiting_choice: bool,
    pub pending_choice_node_id: String,
    pub pending_choice_items: Vec<ChoiceItem>,
    pub pending_choice_prompt_text: Option<String>,
    #[serde(default)]
    pub once_state_by_script: BTreeMap<String, Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn snapshot_decodes_without_optional_debug_views() {
        let snapshot: SnapshotV1 = serde_json::from_value(json!({
            "schemaVersion": "snapshot.v1",
            "compilerVersion": "player.v1",
            "cursor": { "groupPath": ["main.g0"], "nodeIndex": 0 },
            "runtimeFrames": [{
                "frameId": 1,
                "groupId": "main.g0",
                "nodeIndex": 0,
                "scope": { "hp": 10 },
                "varTypes": { "hp": { "kind": "primitive", "name": "number" } },
                "completion": "none",
                "scriptRoot": true,
                "returnContinuation": null
            }],
            "rngState": 7,
            "waitingChoice": true,
            "pendingChoiceNodeId": "c1",
            "pendingChoiceItems": [{ "index": 0, "id": "o1", "text": "Go" }],
            "pendingChoicePromptText": null
        }))
        .expect("snapshot should decode");
        assert_eq!(snapshot.schema_version, SNAPSHOT_SCHEMA_V1);
        assert!(snapshot.scope_chain.is_empty());
        assert!(snapshot.once_state_by_script.is_empty());
        assert_eq!(
            snapshot.runtime_frames[0].completion,
            SnapshotCompletion::None
        );
        assert_eq!(
            snapshot.runtime_frames[0].scope.get("hp"),
            Some(&SlValue::Number(10.0))
        );
    }

    #[test]
    fn completion_and_continuation_use_camel_case() {
        let continuation = ContinuationFrame {
            resume_frame_id: 3,
            next_node_index: 2,
            ref_bindings: BTreeMap::from([("target".to_string(), "hero.hp".to_string())]),
        };
        assert_eq!(
            serde_json::to_value(&continuation).expect("serialize"),
            json!({
                "resumeFrameId": 3,
                "nextNodeIndex": 2,
                "refBindings": { "target": "hero.hp" }
            })
        );
        assert_eq!(
            serde_json::to_value(SnapshotCompletion::ResumeAfterChild).expect("serialize"),
            json!("resumeAfterChild")
        );
    }
}
