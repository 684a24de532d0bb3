pub(crate) mod rhai_bridge;
pub(crate) mod sandbox;
pub(crate) mod value_path;
