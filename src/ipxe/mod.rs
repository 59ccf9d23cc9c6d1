//! iPXE scripts and bootloader binaries.

pub mod binary;
pub mod script;

pub use binary::{BinaryPatch, BinaryStore, EMBEDDED_SCRIPT_MARKER};
pub use script::{ScriptComposer, ScriptContext, ScriptSettings};
