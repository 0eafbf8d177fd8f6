// tb-core/src/pin.rs
//! Pins keep a formula's kegs out of cleanup. The pin record points at the keg that was
//! active when the pin was taken.

use tb_common::error::{Result, TbError};
use tb_common::keg::{InstalledKeg, KegRegistry};
use tracing::debug;

pub fn pin(registry: &KegRegistry, name: &str) -> Result<InstalledKeg> {
    let keg = registry.resolve_keg(name)?;
    let record = registry.config().pinned_record_path(name);
    tb_io::replace_symlink(&keg.path, &record)?;
    debug!("[{}] Pinned at {}", name, keg.version);
    Ok(keg)
}

/// Removes the pin of `name`. Returns false if it was not pinned.
pub fn unpin(registry: &KegRegistry, name: &str) -> Result<bool> {
    let record = registry.config().pinned_record_path(name);
    if !tb_io::check_symlink_exists(&record) && registry.kegs_for(name)?.is_empty() {
        return Err(TbError::KegNotFound(name.to_string()));
    }
    let removed = tb_io::remove_file_if_exists(&record)?;
    if removed {
        debug!("[{}] Unpinned", name);
    }
    Ok(removed)
}
