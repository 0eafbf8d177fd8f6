// tb-core/src/link/linker.rs
//! Conflict-detecting symlink farm between kegs and the prefix.
//!
//! Directories are created for real and only files (or symlinks shipped inside a keg) become
//! links, so several kegs can share `lib/pkgconfig` or `share/man`. Every link points at an
//! absolute path inside the keg.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tb_common::config::Config;
use tb_common::error::{Result, TbError};
use tb_common::keg::{lexical_normalize, InstalledKeg, KegRegistry};
use tb_common::model::Formula;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use super::{LinkOptions, LinkReport};

/// Top-level keg directories projected into the prefix.
pub const LINKABLE_DIRS: [&str; 7] = ["bin", "sbin", "etc", "include", "lib", "share", "Frameworks"];

/// What currently occupies a prefix path.
#[derive(Debug)]
enum Slot {
    Absent,
    Dir,
    /// Symlink resolving into the keg being linked.
    Own,
    Dangling,
    Foreign(InstalledKeg),
    /// A real file, or a symlink to something outside the cellar.
    Unmanaged(PathBuf),
}

pub struct Linker<'a> {
    registry: &'a KegRegistry,
}

impl<'a> Linker<'a> {
    pub fn new(registry: &'a KegRegistry) -> Self {
        Self { registry }
    }

    fn config(&self) -> &Config {
        self.registry.config()
    }

    /// Links `keg` unless its formula is keg-only and `force` is unset.
    pub fn link_formula(
        &self,
        formula: &Formula,
        keg: &InstalledKeg,
        options: LinkOptions,
    ) -> Result<LinkReport> {
        if formula.is_keg_only() && !options.force {
            return Err(TbError::KegOnly(formula.name.clone()));
        }
        self.link(keg, options)
    }

    /// Links every file of the keg's linkable directories into the prefix and records the keg
    /// as linked. Another version of the same formula that is currently linked is unlinked
    /// first. A conflict in a real run removes whatever this call created and relinks the
    /// displaced version before the error is returned.
    pub fn link(&self, keg: &InstalledKeg, options: LinkOptions) -> Result<LinkReport> {
        debug!(
            "[{}] Linking {}{}",
            keg.name,
            keg.path.display(),
            if options.dry_run { " (dry run)" } else { "" }
        );
        let mut report = LinkReport::new(&keg.path, options.dry_run);
        let displaced = self
            .registry
            .linked_keg(&keg.name)
            .filter(|linked| linked.path != keg.path);
        if let Some(previous) = &displaced {
            debug!(
                "[{}] Unlinking {} before linking {}",
                keg.name, previous.version, keg.version
            );
            let unlinked = self.unlink(
                previous,
                LinkOptions {
                    dry_run: options.dry_run,
                    ..LinkOptions::default()
                },
            )?;
            report.displaced = unlinked.removed;
        }

        let result = self
            .link_tree(keg, displaced.as_ref(), options, &mut report)
            .and_then(|()| {
                if options.dry_run {
                    Ok(())
                } else {
                    tb_io::replace_symlink(&keg.path, &self.config().linked_record_path(&keg.name))
                }
            });
        if let Err(e) = result {
            if !options.dry_run {
                rollback(&report);
                if let Some(previous) = &displaced {
                    self.relink(previous);
                }
            }
            return Err(e);
        }
        debug!(
            "[{}] Linked: {} created, {} repointed, {} unchanged",
            keg.name,
            report.created.len(),
            report.repointed.len(),
            report.unchanged
        );
        Ok(report)
    }

    /// Puts a keg back after a failed link or switch. Failure here only warns; the caller
    /// is already returning the original error.
    pub(crate) fn relink(&self, keg: &InstalledKeg) {
        match self.link(keg, LinkOptions::default()) {
            Ok(_) => debug!("[{}] Relinked {}", keg.name, keg.version),
            Err(e) => warn!("[{}] Could not relink {}: {}", keg.name, keg.version, e),
        }
    }

    fn link_tree(
        &self,
        keg: &InstalledKeg,
        displaced: Option<&InstalledKeg>,
        options: LinkOptions,
        report: &mut LinkReport,
    ) -> Result<()> {
        let prefix = self.config().prefix().to_path_buf();
        for dir in LINKABLE_DIRS {
            let source_root = keg.path.join(dir);
            if !source_root.is_dir() {
                continue;
            }
            let mut walker = WalkDir::new(&source_root)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| e.depth() == 0 || !is_hidden(e));
            while let Some(entry) = walker.next() {
                let entry = entry.map_err(walk_error)?;
                let target = prefix.join(relative_to(&keg.path, entry.path())?);
                if entry.file_type().is_dir() {
                    match self.classify(&target, keg) {
                        Slot::Absent => {
                            if !options.dry_run {
                                tb_io::create_dir_all(&target)?;
                            }
                            report.directories.push(target);
                        }
                        Slot::Dir => {}
                        // Only reachable in a dry run; a real run unlinked it already.
                        Slot::Foreign(owner) if is_displaced(displaced, &owner) => {
                            report.directories.push(target);
                        }
                        Slot::Own => {
                            report.unchanged += 1;
                            walker.skip_current_dir();
                        }
                        Slot::Dangling => {
                            if !options.dry_run {
                                tb_io::remove_file_if_exists(&target)?;
                                tb_io::create_dir_all(&target)?;
                            }
                            report.directories.push(target);
                        }
                        Slot::Foreign(owner) if options.overwrite => {
                            warn!(
                                "[{}] Replacing {} (owned by {} {}) with a directory",
                                keg.name,
                                target.display(),
                                owner.name,
                                owner.version
                            );
                            if !options.dry_run {
                                tb_io::remove_file_if_exists(&target)?;
                                tb_io::create_dir_all(&target)?;
                            }
                            report.directories.push(target);
                        }
                        Slot::Foreign(owner) => return Err(foreign_conflict(target, keg, owner)),
                        Slot::Unmanaged(found) => {
                            return Err(unmanaged_conflict(target, keg, found))
                        }
                    }
                    continue;
                }

                let source = entry.path().to_path_buf();
                match self.classify(&target, keg) {
                    Slot::Absent | Slot::Dangling => {
                        if !options.dry_run {
                            tb_io::replace_symlink(&source, &target)?;
                        }
                        report.created.push(target);
                    }
                    Slot::Own => report.unchanged += 1,
                    Slot::Foreign(owner) if is_displaced(displaced, &owner) => {
                        report.created.push(target);
                    }
                    Slot::Foreign(owner) if options.overwrite => {
                        debug!(
                            "[{}] Repointing {} away from {} {}",
                            keg.name,
                            target.display(),
                            owner.name,
                            owner.version
                        );
                        if !options.dry_run {
                            tb_io::replace_symlink(&source, &target)?;
                        }
                        report.repointed.push(target);
                    }
                    Slot::Foreign(owner) => return Err(foreign_conflict(target, keg, owner)),
                    Slot::Unmanaged(_) if options.overwrite => {
                        warn!("[{}] Overwriting {}", keg.name, target.display());
                        if !options.dry_run {
                            tb_io::replace_symlink(&source, &target)?;
                        }
                        report.repointed.push(target);
                    }
                    Slot::Unmanaged(found) => return Err(unmanaged_conflict(target, keg, found)),
                    Slot::Dir => {
                        let found = target.clone();
                        return Err(unmanaged_conflict(target, keg, found));
                    }
                }
            }
        }
        Ok(())
    }

    /// Removes every prefix symlink resolving into `keg`, prunes prefix directories left
    /// empty and clears the linked record if it names this keg.
    pub fn unlink(&self, keg: &InstalledKeg, options: LinkOptions) -> Result<LinkReport> {
        debug!(
            "[{}] Unlinking {}{}",
            keg.name,
            keg.path.display(),
            if options.dry_run { " (dry run)" } else { "" }
        );
        let prefix = self.config().prefix().to_path_buf();
        let mut report = LinkReport::new(&keg.path, options.dry_run);
        for dir in LINKABLE_DIRS {
            let source_root = keg.path.join(dir);
            if !source_root.is_dir() {
                continue;
            }
            let walker = WalkDir::new(&source_root)
                .follow_links(false)
                .contents_first(true)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| e.depth() == 0 || !is_hidden(e));
            for entry in walker {
                let entry = entry.map_err(walk_error)?;
                let target = prefix.join(relative_to(&keg.path, entry.path())?);
                match self.classify(&target, keg) {
                    Slot::Own => {
                        if !options.dry_run {
                            tb_io::remove_file_if_exists(&target)?;
                        }
                        report.removed.push(target);
                    }
                    Slot::Dir if entry.file_type().is_dir() && entry.depth() > 0 => {
                        if !options.dry_run && tb_io::remove_dir_if_empty(&target)? {
                            debug!("[{}] Pruned empty {}", keg.name, target.display());
                        }
                    }
                    _ => {}
                }
            }
        }

        if !options.dry_run {
            let record = self.config().linked_record_path(&keg.name);
            if record_points_at(self.registry, &record, keg) {
                tb_io::remove_file_if_exists(&record)?;
            }
        }
        debug!("[{}] Unlinked {} symlinks", keg.name, report.removed.len());
        Ok(report)
    }

    fn classify(&self, target: &Path, keg: &InstalledKeg) -> Slot {
        let Ok(meta) = target.symlink_metadata() else {
            return Slot::Absent;
        };
        if !meta.file_type().is_symlink() {
            return if meta.is_dir() {
                Slot::Dir
            } else {
                Slot::Unmanaged(target.to_path_buf())
            };
        }
        let Some(dest) = tb_io::symlink_target(target) else {
            return Slot::Unmanaged(target.to_path_buf());
        };
        if !target.exists() {
            return Slot::Dangling;
        }
        match self.registry.keg_for_path(&dest) {
            Some(owner) if owner.name == keg.name && owner.version == keg.version => Slot::Own,
            Some(owner) => Slot::Foreign(owner),
            // A symlinked directory outside the cellar is descended like a real one.
            None if target.is_dir() => Slot::Dir,
            None => Slot::Unmanaged(dest),
        }
    }
}

/// Points `<prefix>/opt/<name>` at `keg`. Returns false when it already did.
pub fn opt_link(config: &Config, keg: &InstalledKeg) -> Result<bool> {
    let opt_path = config.formula_opt_path(&keg.name);
    if tb_io::symlink_target(&opt_path).is_some_and(|t| lexical_normalize(&t) == keg.path) {
        return Ok(false);
    }
    debug!(
        "[{}] Opt link {} -> {}",
        keg.name,
        opt_path.display(),
        keg.path.display()
    );
    tb_io::replace_symlink(&keg.path, &opt_path)?;
    Ok(true)
}

/// Removes the opt link if it points at `keg`, dangling or not.
pub fn remove_opt_link(registry: &KegRegistry, keg: &InstalledKeg) -> Result<bool> {
    let opt_path = registry.config().formula_opt_path(&keg.name);
    if record_points_at(registry, &opt_path, keg) {
        return tb_io::remove_file_if_exists(&opt_path);
    }
    Ok(false)
}

/// Whether the record symlink at `record` targets `keg`. Works for records whose target has
/// already been removed.
pub(crate) fn record_points_at(registry: &KegRegistry, record: &Path, keg: &InstalledKeg) -> bool {
    let Some(dest) = tb_io::symlink_target(record) else {
        return false;
    };
    if lexical_normalize(&dest) == lexical_normalize(&keg.path) {
        return true;
    }
    registry
        .keg_for_path(&dest)
        .is_some_and(|k| k.name == keg.name && k.version == keg.version)
}

fn rollback(report: &LinkReport) {
    for link in report.created.iter().rev() {
        if let Err(e) = tb_io::remove_file_if_exists(link) {
            warn!("Rollback could not remove {}: {}", link.display(), e);
        }
    }
    for dir in report.directories.iter().rev() {
        if let Err(e) = tb_io::remove_dir_if_empty(dir) {
            warn!("Rollback could not remove {}: {}", dir.display(), e);
        }
    }
    debug!(
        "Rolled back {} links and {} directories",
        report.created.len(),
        report.directories.len()
    );
}

fn foreign_conflict(path: PathBuf, keg: &InstalledKeg, owner: InstalledKeg) -> TbError {
    TbError::LinkConflict {
        path,
        keg: keg.path.clone(),
        owner: format!("{} {}", owner.name, owner.version),
        owner_keg: owner.path,
    }
}

fn unmanaged_conflict(path: PathBuf, keg: &InstalledKeg, found: PathBuf) -> TbError {
    TbError::LinkConflict {
        path,
        keg: keg.path.clone(),
        owner: "a file not managed by tb".to_string(),
        owner_keg: found,
    }
}

fn is_displaced(displaced: Option<&InstalledKeg>, owner: &InstalledKeg) -> bool {
    displaced.is_some_and(|d| d.path == owner.path)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}

fn relative_to<'p>(base: &Path, path: &'p Path) -> Result<&'p Path> {
    path.strip_prefix(base)
        .map_err(|_| TbError::Generic(format!("{} is outside {}", path.display(), base.display())))
}

fn walk_error(e: walkdir::Error) -> TbError {
    TbError::Io(Arc::new(e.into()))
}
