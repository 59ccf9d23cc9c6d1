//! Installer image patching and streaming.

pub mod image;
pub mod patch;
pub mod payload;
pub mod source;

pub use image::PatchedImage;
pub use patch::{Marker, DEFAULT_MARKER};
pub use payload::PayloadSettings;
pub use source::{source_from_location, ImageSource};
