use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveType {
    Number,
    String,
    Boolean,
}

impl PrimitiveType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::String => "string",
            Self::Boolean => "boolean",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "kind",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ScriptType {
    Primitive {
        name: PrimitiveType,
    },
    Array {
        element_type: Box<ScriptType>,
    },
    Map {
        value_type: Box<ScriptType>,
    },
    Object {
        type_name: String,
        fields: BTreeMap<String, ScriptType>,
    },
}

impl ScriptType {
    pub fn number() -> Self {
        Self::Primitive {
            name: PrimitiveType::Number,
        }
    }

    pub fn string() -> Self {
        Self::Primitive {
            name: PrimitiveType::String,
        }
    }

    pub fn boolean() -> Self {
        Self::Primitive {
            name: PrimitiveType::Boolean,
        }
    }

    pub fn array_of(element_type: ScriptType) -> Self {
        Self::Array {
            element_type: Box::new(element_type),
        }
    }

    pub fn map_of(value_type: ScriptType) -> Self {
        Self::Map {
            value_type: Box::new(value_type),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Primitive { name } => name.as_str().to_string(),
            Self::Array { element_type } => format!("{}[]", element_type.describe()),
            Self::Map { value_type } => format!("#{{{}}}", value_type.describe()),
            Self::Object { type_name, .. } => type_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VarDeclaration {
    pub name: String,
    pub r#type: ScriptType,
    #[serde(default)]
    pub initial_value_expr: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptParam {
    pub name: String,
    pub r#type: ScriptType,
    #[serde(default)]
    pub is_ref: bool,
}

/// A positional call argument. For ref arguments `value_expr` holds the
/// dotted caller path (`a.b.c`) instead of an expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallArgument {
    pub value_expr: String,
    #[serde(default)]
    pub is_ref: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChoiceOption {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub when_expr: Option<String>,
    #[serde(default)]
    pub once: bool,
    #[serde(default)]
    pub fall_over: bool,
    pub group_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "kind",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ScriptNode {
    Text {
        id: String,
        value: String,
        #[serde(default)]
        once: bool,
    },
    Code {
        id: String,
        code: String,
    },
    Var {
        id: String,
        declaration: VarDeclaration,
    },
    If {
        id: String,
        when_expr: String,
        then_group_id: String,
        #[serde(default)]
        else_group_id: Option<String>,
    },
    While {
        id: String,
        when_expr: String,
        body_group_id: String,
    },
    Choice {
        id: String,
        #[serde(default)]
        prompt_text: Option<String>,
        options: Vec<ChoiceOption>,
    },
    Call {
        id: String,
        target_script: String,
        #[serde(default)]
        args: Vec<CallArgument>,
    },
    Return {
        id: String,
        #[serde(default)]
        target_script: Option<String>,
        #[serde(default)]
        args: Vec<CallArgument>,
    },
    Break {
        id: String,
    },
    Continue {
        id: String,
    },
    /// Any node kind this runtime does not know how to execute.
    #[serde(other)]
    Unknown,
}

impl ScriptNode {
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Text { id, .. }
            | Self::Code { id, .. }
            | Self::Var { id, .. }
            | Self::If { id, .. }
            | Self::While { id, .. }
            | Self::Choice { id, .. }
            | Self::Call { id, .. }
            | Self::Return { id, .. }
            | Self::Break { id }
            | Self::Continue { id } => Some(id),
            Self::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImplicitGroup {
    pub group_id: String,
    #[serde(default)]
    pub parent_group_id: Option<String>,
    pub nodes: Vec<ScriptNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptIr {
    pub script_name: String,
    #[serde(default)]
    pub params: Vec<ScriptParam>,
    pub root_group_id: String,
    pub groups: BTreeMap<String, ImplicitGroup>,
    #[serde(default)]
    pub visible_json_globals: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChoiceItem {
    pub index: usize,
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "kind",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum EngineOutput {
    Text {
        text: String,
    },
    Choices {
        items: Vec<ChoiceItem>,
        prompt_text: Option<String>,
    },
    End,
}
