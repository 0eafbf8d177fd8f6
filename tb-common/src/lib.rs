// tb-common/src/lib.rs
pub mod cache;
pub mod config;
pub mod dependency;
pub mod error;
pub mod formulary;
pub mod keg;
pub mod model;
pub mod receipt;

// Re-export key types
pub use cache::Cache;
pub use config::Config;
pub use error::{Result, TbError};
pub use formulary::Formulary;
pub use keg::{InstalledKeg, KegRegistry, LinkState};
pub use model::{Formula, Options, PkgVersion, Version};
pub use receipt::InstallReceipt;
