// tb-core/src/uninstall/formula.rs
use tb_common::error::{Result, TbError};
use tb_common::keg::{InstalledKeg, KegRegistry};
use tracing::debug;

use super::common::{prune_rack, remove_keg_dir, UninstallOptions};
use crate::link::{remove_opt_link, LinkOptions, Linker};
use crate::lock::FormulaLock;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UninstallReport {
    pub name: String,
    pub removed: Vec<InstalledKeg>,
    /// Symlinks removed from the prefix across all removed kegs.
    pub unlinked: usize,
    /// Installed kegs whose receipts list a removed keg as a runtime dependency.
    pub dependents: Vec<InstalledKeg>,
    pub rack_removed: bool,
    pub remaining: Vec<InstalledKeg>,
}

/// Uninstalls the active keg of `name`, or every keg of it with `force`.
pub fn uninstall_formula(
    registry: &KegRegistry,
    name: &str,
    options: UninstallOptions,
) -> Result<UninstallReport> {
    let kegs = if options.force {
        let kegs = registry.kegs_for(name)?;
        if kegs.is_empty() {
            return Err(TbError::KegNotFound(name.to_string()));
        }
        kegs
    } else {
        vec![registry.resolve_keg(name)?]
    };

    let config = registry.config();
    let _lock = FormulaLock::acquire(&config.locks_dir(), name, &format!("uninstalling {name}"))?;
    let dependents = installed_dependents(registry, &kegs)?;
    if !dependents.is_empty() {
        debug!(
            "[{}] Still required by: {}",
            name,
            dependents
                .iter()
                .map(|k| format!("{} {}", k.name, k.version))
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    let linker = Linker::new(registry);
    let mut report = UninstallReport {
        name: name.to_string(),
        dependents,
        ..UninstallReport::default()
    };
    for keg in kegs {
        debug!("[{}] Uninstalling {}", name, keg.path.display());
        let unlinked = linker.unlink(&keg, LinkOptions::default())?;
        report.unlinked += unlinked.removed.len();
        if remove_opt_link(registry, &keg)? {
            debug!("[{}] Removed opt link", name);
        }
        remove_keg_dir(&keg)?;
        report.removed.push(keg);
    }

    report.rack_removed = prune_rack(registry, name)?;
    report.remaining = registry.kegs_for(name)?;

    let pin = config.pinned_record_path(name);
    if tb_io::is_dangling_symlink(&pin) {
        debug!("[{}] Removing pin of uninstalled keg", name);
        tb_io::remove_file_if_exists(&pin)?;
    }
    Ok(report)
}

fn installed_dependents(registry: &KegRegistry, kegs: &[InstalledKeg]) -> Result<Vec<InstalledKeg>> {
    let mut dependents = Vec::new();
    for other in registry.list_installed_kegs()? {
        if kegs.iter().any(|k| k.name == other.name) {
            continue;
        }
        let Some(receipt) = other.receipt()? else {
            continue;
        };
        if kegs.iter().any(|k| receipt.depends_on(&k.name, &k.version)) {
            dependents.push(other);
        }
    }
    Ok(dependents)
}
