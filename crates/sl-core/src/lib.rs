pub mod error;
pub mod json_view;
pub mod snapshot;
pub mod types;
pub mod value;

pub use error::{ErrorCategory, ScriptLangError};
pub use json_view::{JsonGlobals, JsonView};
pub use snapshot::*;
pub use types::*;
pub use value::*;
