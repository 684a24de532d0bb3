use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{PrimitiveType, ScriptType};

/// Runtime value of the scripting language. There is no null/undefined
/// variant: every declared slot always holds a concrete value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SlValue {
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<SlValue>),
    Map(BTreeMap<String, SlValue>),
}

impl SlValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Map(_) => "map",
        }
    }
}

impl From<bool> for SlValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for SlValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for SlValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for SlValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

/// Text interpolation form: whole numbers print without a fraction, nested
/// values print in a compact literal syntax.
impl fmt::Display for SlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{}", value),
            Self::Number(value) => write_number(f, *value),
            Self::String(value) => f.write_str(value),
            Self::Array(values) => {
                f.write_str("[")?;
                for (index, value) in values.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write_nested(f, value)?;
                }
                f.write_str("]")
            }
            Self::Map(entries) => {
                f.write_str("{")?;
                for (index, (key, value)) in entries.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: ", key)?;
                    write_nested(f, value)?;
                }
                f.write_str("}")
            }
        }
    }
}

fn write_number(f: &mut fmt::Formatter<'_>, value: f64) -> fmt::Result {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        write!(f, "{}", value as i64)
    } else {
        write!(f, "{}", value)
    }
}

fn write_nested(f: &mut fmt::Formatter<'_>, value: &SlValue) -> fmt::Result {
    match value {
        SlValue::String(text) => write!(f, "{:?}", text),
        other => write!(f, "{}", other),
    }
}

pub fn default_value_from_type(ty: &ScriptType) -> SlValue {
    match ty {
        ScriptType::Primitive { name } => match name {
            PrimitiveType::Number => SlValue::Number(0.0),
            PrimitiveType::String => SlValue::String(String::new()),
            PrimitiveType::Boolean => SlValue::Bool(false),
        },
        ScriptType::Array { .. } => SlValue::Array(Vec::new()),
        ScriptType::Map { .. } => SlValue::Map(BTreeMap::new()),
        ScriptType::Object { fields, .. } => SlValue::Map(
            fields
                .iter()
                .map(|(field_name, field_type)| {
                    (field_name.clone(), default_value_from_type(field_type))
                })
                .collect(),
        ),
    }
}

pub fn is_type_compatible(value: &SlValue, ty: &ScriptType) -> bool {
    match ty {
        ScriptType::Primitive { name } => matches!(
            (name, value),
            (PrimitiveType::Number, SlValue::Number(_))
                | (PrimitiveType::String, SlValue::String(_))
                | (PrimitiveType::Boolean, SlValue::Bool(_))
        ),
        ScriptType::Array { element_type } => match value {
            SlValue::Array(values) => values
                .iter()
                .all(|entry| is_type_compatible(entry, element_type)),
            _ => false,
        },
        ScriptType::Map { value_type } => match value {
            SlValue::Map(values) => values
                .values()
                .all(|entry| is_type_compatible(entry, value_type)),
            _ => false,
        },
        ScriptType::Object { fields, .. } => match value {
            SlValue::Map(values) => {
                values.len() == fields.len()
                    && fields.iter().all(|(field_name, field_type)| {
                        values
                            .get(field_name)
                            .is_some_and(|field_value| is_type_compatible(field_value, field_type))
                    })
            }
            _ => false,
        },
    }
}
