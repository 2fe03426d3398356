//! Image reference handling

mod reference;

pub use reference::{image_by_registry, registry, ImageRef, DEFAULT_REGISTRY};
