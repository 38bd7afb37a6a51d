mod registry;
mod selectors;

pub use registry::{
    ModelRegistry, ModelSpec, CAPABILITY_EDIT, CAPABILITY_IMAGE, CAPABILITY_TEXT,
    DEFAULT_IMAGE_MODEL, DEFAULT_TEXT_MODEL,
};
pub use selectors::{ModelSelection, ModelSelector};
