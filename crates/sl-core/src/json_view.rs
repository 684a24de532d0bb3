//! Read-only access to imported JSON documents.
//!
//! Imported data is owned by [`JsonGlobals`] and only ever handed out as
//! [`JsonView`] borrows. Neither type has a mutating method, so the imported
//! namespace cannot change after construction; callers that need a mutable
//! copy go through [`JsonView::to_value`].

use std::collections::BTreeMap;

use crate::value::SlValue;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JsonGlobals {
    values: BTreeMap<String, SlValue>,
}

impl JsonGlobals {
    pub fn new(values: BTreeMap<String, SlValue>) -> Self {
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<JsonView<'_>> {
        self.values.get(name).map(JsonView::new)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JsonView<'a> {
    value: &'a SlValue,
}

impl<'a> JsonView<'a> {
    pub fn new(value: &'a SlValue) -> Self {
        Self { value }
    }

    pub fn get(&self, key: &str) -> Option<JsonView<'a>> {
        match self.value {
            SlValue::Map(entries) => entries.get(key).map(JsonView::new),
            _ => None,
        }
    }

    pub fn at(&self, index: usize) -> Option<JsonView<'a>> {
        match self.value {
            SlValue::Array(values) => values.get(index).map(JsonView::new),
            _ => None,
        }
    }

    /// Follows dotted-path segments through nested maps.
    pub fn path<S: AsRef<str>>(&self, segments: &[S]) -> Option<JsonView<'a>> {
        segments
            .iter()
            .try_fold(*self, |view, segment| view.get(segment.as_ref()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &'a str> {
        let entries = match self.value {
            SlValue::Map(entries) => Some(entries),
            _ => None,
        };
        entries
            .into_iter()
            .flat_map(|entries| entries.keys().map(String::as_str))
    }

    pub fn len(&self) -> usize {
        match self.value {
            SlValue::Array(values) => values.len(),
            SlValue::Map(entries) => entries.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_number(&self) -> Option<f64> {
        self.value.as_number()
    }

    pub fn as_str(&self) -> Option<&'a str> {
        match self.value {
            SlValue::String(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.value.as_bool()
    }

    pub fn type_name(&self) -> &'static str {
        self.value.type_name()
    }

    /// Deep copy into an ordinary mutable value.
    pub fn to_value(&self) -> SlValue {
        self.value.clone()
    }
}
