// tb-core/src/link/mod.rs
//! Projects kegs into the shared prefix and keeps the per-name opt and linked records.

pub mod linker;
pub mod switch;

use std::path::PathBuf;

pub use linker::{opt_link, remove_opt_link, Linker, LINKABLE_DIRS};
pub use switch::{switch, SwitchReport};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkOptions {
    /// Repoint symlinks owned by other kegs and replace unmanaged files.
    pub overwrite: bool,
    /// Walk and check everything, change nothing.
    pub dry_run: bool,
    /// Link keg-only formulae anyway.
    pub force: bool,
}

impl LinkOptions {
    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            ..Self::default()
        }
    }
}

/// What a link or unlink call did, or would do under `dry_run`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkReport {
    pub keg: PathBuf,
    /// Symlinks created in the prefix.
    pub created: Vec<PathBuf>,
    /// Symlinks that previously pointed elsewhere and now point into the keg.
    pub repointed: Vec<PathBuf>,
    /// Prefix directories created for the keg.
    pub directories: Vec<PathBuf>,
    /// Symlinks removed from the prefix.
    pub removed: Vec<PathBuf>,
    /// Symlinks of a previously linked version of the same formula, removed before linking.
    pub displaced: Vec<PathBuf>,
    /// Symlinks that already pointed into the keg.
    pub unchanged: usize,
    pub dry_run: bool,
}

impl LinkReport {
    pub fn new(keg: impl Into<PathBuf>, dry_run: bool) -> Self {
        Self {
            keg: keg.into(),
            dry_run,
            ..Self::default()
        }
    }

    /// Number of symlinks the call created, repointed or removed.
    pub fn changed(&self) -> usize {
        self.created.len() + self.repointed.len() + self.removed.len() + self.displaced.len()
    }

    pub fn is_noop(&self) -> bool {
        self.changed() == 0 && self.directories.is_empty()
    }
}
