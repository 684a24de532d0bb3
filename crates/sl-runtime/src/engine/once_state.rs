use super::*;

pub(super) fn text_once_key(node_id: &str) -> String {
    format!("text:{}", node_id)
}

pub(super) fn option_once_key(option_id: &str) -> String {
    format!("option:{}", option_id)
}

impl ScriptLangEngine {
    pub(super) fn has_once_state(&self, script_name: &str, key: &str) -> bool {
        self.once_state_by_script
            .get(script_name)
            .is_some_and(|set| set.contains(key))
    }

    pub(super) fn mark_once_state(&mut self, script_name: &str, key: String) {
        self.once_state_by_script
            .entry(script_name.to_string())
            .or_default()
            .insert(key);
    }

    pub(super) fn once_state_snapshot(&self) -> BTreeMap<String, Vec<String>> {
        self.once_state_by_script
            .iter()
            .filter(|(_, keys)| !keys.is_empty())
            .map(|(script_name, keys)| (script_name.clone(), keys.iter().cloned().collect()))
            .collect()
    }
}
