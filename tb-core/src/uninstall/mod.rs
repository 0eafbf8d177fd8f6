// tb-core/src/uninstall/mod.rs

pub mod common;
pub mod formula;

pub use common::UninstallOptions;
pub use formula::{uninstall_formula, UninstallReport};
