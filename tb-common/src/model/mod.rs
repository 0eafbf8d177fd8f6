// tb-common/src/model/mod.rs
// Declares the modules within the model directory.

pub mod formula;
pub mod options;
pub mod version;

// Re-export
pub use formula::{BottleSpec, Formula, SourceSpec, SpecKind};
pub use options::{BuildOptions, FormulaOption, Options};
pub use version::{PkgVersion, Version};
