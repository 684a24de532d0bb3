use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct ScriptLangError {
    pub code: String,
    pub message: String,
}

/// Coarse classification of an error code, used by hosts to decide whether a
/// failure is an authoring bug, an API misuse or a stale save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Structural,
    Contract,
    TypeValue,
    ScopePath,
    Snapshot,
    Guard,
    Evaluation,
    Host,
}

impl ScriptLangError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        let code = self.code.as_str();
        if code.starts_with("SNAPSHOT_") {
            return ErrorCategory::Snapshot;
        }
        if code.starts_with("API_") || code.starts_with("ENGINE_HOST_FUNCTION") {
            return ErrorCategory::Host;
        }
        if code.starts_with("ENGINE_REF_PATH") {
            return ErrorCategory::ScopePath;
        }
        match code {
            "ENGINE_GROUP_NOT_FOUND"
            | "ENGINE_GROUP_DUPLICATE"
            | "ENGINE_NODE_UNKNOWN"
            | "ENGINE_SCRIPT_NOT_FOUND"
            | "ENGINE_CALL_TARGET"
            | "ENGINE_RETURN_TARGET"
            | "ENGINE_NO_FRAME"
            | "ENGINE_ROOT_FRAME" => ErrorCategory::Structural,
            "ENGINE_CALL_REF_MISMATCH"
            | "ENGINE_CALL_ARG_UNKNOWN"
            | "ENGINE_TAIL_REF_UNSUPPORTED"
            | "ENGINE_RETURN_REF_UNSUPPORTED"
            | "ENGINE_CHOICE_INDEX"
            | "ENGINE_NO_PENDING_CHOICE"
            | "ENGINE_CHOICE_NOT_FOUND"
            | "ENGINE_CHOICE_FRAME_MISSING"
            | "ENGINE_WHILE_CONTROL_TARGET_MISSING" => ErrorCategory::Contract,
            "ENGINE_TYPE_MISMATCH"
            | "ENGINE_UNDEFINED_ASSIGN"
            | "ENGINE_VAR_UNDEFINED"
            | "ENGINE_VAR_DUPLICATE"
            | "ENGINE_BOOLEAN_EXPECTED"
            | "ENGINE_VALUE_UNSUPPORTED"
            | "ENGINE_REF_VALUE_MISSING" => ErrorCategory::TypeValue,
            "ENGINE_VAR_READ" | "ENGINE_VAR_WRITE" | "ENGINE_GLOBAL_READONLY" => {
                ErrorCategory::ScopePath
            }
            "ENGINE_GUARD_EXCEEDED" => ErrorCategory::Guard,
            _ => ErrorCategory::Evaluation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_joins_code_and_message() {
        let error = ScriptLangError::new("ENGINE_CHOICE_INDEX", "Choice index \"3\" is out of range.");
        assert_eq!(
            error.to_string(),
            "ENGINE_CHOICE_INDEX: Choice index \"3\" is out of range."
        );
    }

    #[test]
    fn category_follows_code_families() {
        let category = |code: &str| ScriptLangError::new(code, "x").category();
        assert_eq!(category("SNAPSHOT_SCHEMA"), ErrorCategory::Snapshot);
        assert_eq!(category("ENGINE_NODE_UNKNOWN"), ErrorCategory::Structural);
        assert_eq!(category("ENGINE_TAIL_REF_UNSUPPORTED"), ErrorCategory::Contract);
        assert_eq!(category("ENGINE_UNDEFINED_ASSIGN"), ErrorCategory::TypeValue);
        assert_eq!(category("ENGINE_REF_PATH_WRITE"), ErrorCategory::ScopePath);
        assert_eq!(category("ENGINE_GLOBAL_READONLY"), ErrorCategory::ScopePath);
        assert_eq!(category("ENGINE_GUARD_EXCEEDED"), ErrorCategory::Guard);
        assert_eq!(category("ENGINE_HOST_FUNCTION_RESERVED"), ErrorCategory::Host);
        assert_eq!(category("ENGINE_EVAL_ERROR"), ErrorCategory::Evaluation);
    }
}
