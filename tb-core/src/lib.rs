// tb-core/src/lib.rs

pub mod cleanup;
pub mod install;
pub mod link;
pub mod lock;
pub mod pin;
pub mod uninstall;

pub use cleanup::{Cleanup, CleanupOptions, CleanupReport, Prune};
pub use install::{FormulaInstaller, InstallOptions, InstallOutcome, InstallSession};
pub use link::{LinkOptions, LinkReport, Linker};
pub use lock::{FormulaLock, LockSet};
pub use uninstall::{uninstall_formula, UninstallOptions, UninstallReport};
