use std::collections::BTreeMap;

use rhai::{Array, Dynamic, ImmutableString, Map, FLOAT, INT};
use sl_core::{ScriptLangError, SlValue};

/// Numbers always cross into the sandbox as floats; integer literals written
/// inside expressions still mix freely with them.
pub(crate) fn slvalue_to_dynamic(value: &SlValue) -> Dynamic {
    match value {
        SlValue::Bool(value) => Dynamic::from_bool(*value),
        SlValue::Number(value) => Dynamic::from_float(*value as FLOAT),
        SlValue::String(value) => Dynamic::from(value.clone()),
        SlValue::Array(values) => {
            Dynamic::from_array(values.iter().map(slvalue_to_dynamic).collect::<Array>())
        }
        SlValue::Map(values) => {
            let mut map = Map::new();
            for (key, value) in values {
                map.insert(key.as_str().into(), slvalue_to_dynamic(value));
            }
            Dynamic::from_map(map)
        }
    }
}

pub(crate) fn dynamic_to_slvalue(value: Dynamic) -> Result<SlValue, ScriptLangError> {
    if value.is_unit() {
        return Err(ScriptLangError::new(
            "ENGINE_UNDEFINED_ASSIGN",
            "Expression produced no value.",
        ));
    }
    if value.is::<bool>() {
        return Ok(SlValue::Bool(value.cast::<bool>()));
    }
    if value.is::<INT>() {
        return Ok(SlValue::Number(value.cast::<INT>() as f64));
    }
    if value.is::<FLOAT>() {
        let number = value.cast::<FLOAT>();
        if !number.is_finite() {
            return Err(ScriptLangError::new(
                "ENGINE_VALUE_UNSUPPORTED",
                format!("Number \"{}\" is not finite.", number),
            ));
        }
        return Ok(SlValue::Number(number));
    }
    if value.is::<ImmutableString>() {
        return Ok(SlValue::String(value.cast::<ImmutableString>().to_string()));
    }
    if value.is::<char>() {
        return Ok(SlValue::String(value.cast::<char>().to_string()));
    }
    if value.is::<Array>() {
        let array = value.cast::<Array>();
        let mut out = Vec::with_capacity(array.len());
        for item in array {
            out.push(dynamic_to_slvalue(item)?);
        }
        return Ok(SlValue::Array(out));
    }
    if value.is::<Map>() {
        let map = value.cast::<Map>();
        let mut out = BTreeMap::new();
        for (key, value) in map {
            out.insert(key.to_string(), dynamic_to_slvalue(value)?);
        }
        return Ok(SlValue::Map(out));
    }

    Err(ScriptLangError::new(
        "ENGINE_VALUE_UNSUPPORTED",
        format!("Unsupported script value type \"{}\".", value.type_name()),
    ))
}
