// tb-core/src/install/mod.rs

pub mod bottle;
pub mod devtools;
pub mod installer;
pub mod interrupt;
pub mod provider;
pub mod recipe;

pub use bottle::CachedBottleProvider;
pub use devtools::HostProbe;
pub use installer::{
    Collaborators, FormulaInstaller, InstallOptions, InstallOutcome, InstallSession,
};
pub use interrupt::{InterruptGuard, InterruptSource};
pub use provider::{BottleProvider, Builder, Fetcher};
pub use recipe::{CachedFetcher, RecipeBuilder};
