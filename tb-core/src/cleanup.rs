// tb-core/src/cleanup.rs
//! Removes superseded kegs, stale downloads and `.DS_Store` droppings under the prefix.
//!
//! A keg is only ever pruned relative to a reference keg (the linked one, else the opt one),
//! and only when it is strictly older than that reference. When anything needed to decide is
//! missing, the keg stays.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, SystemTime};

use crossbeam_channel::unbounded;
use tb_common::cache::{Cache, CacheEntry};
use tb_common::error::{Result, TbError};
use tb_common::formulary::Formulary;
use tb_common::keg::{InstalledKeg, KegRegistry};
use tb_common::receipt::InstallReceipt;
use threadpool::ThreadPool;
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use crate::link::{LinkOptions, Linker};
use crate::lock::FormulaLock;
use crate::uninstall::common::disk_usage;

const MARKER_FILE: &str = ".DS_Store";
const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// `--prune=<days>` or `--prune=all`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prune {
    Days(u64),
    All,
}

impl FromStr for Prune {
    type Err = TbError;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        s.parse::<u64>()
            .map(Self::Days)
            .map_err(|_| TbError::ParseError("prune", format!("expected days or `all`, got {s:?}")))
    }
}

#[derive(Debug, Clone, Default)]
pub struct CleanupOptions {
    /// Restrict cleanup to these formulae. Empty means all of them and also sweeps markers.
    pub names: Vec<String>,
    pub prune: Option<Prune>,
    pub dry_run: bool,
    /// Also prune old kegs of keg-only formulae.
    pub force: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub kegs: Vec<InstalledKeg>,
    pub cache_files: Vec<PathBuf>,
    pub markers: Vec<PathBuf>,
    pub skipped_pinned: Vec<String>,
    pub freed_bytes: u64,
    pub dry_run: bool,
}

impl CleanupReport {
    pub fn is_empty(&self) -> bool {
        self.kegs.is_empty() && self.cache_files.is_empty() && self.markers.is_empty()
    }
}

/// Kegs and receipts of everything installed, read once per run.
struct InstalledState {
    kegs: Vec<(InstalledKeg, Option<InstallReceipt>)>,
}

impl InstalledState {
    fn read(registry: &KegRegistry) -> Result<Self> {
        let mut kegs = Vec::new();
        for keg in registry.list_installed_kegs()? {
            let receipt = keg.receipt()?;
            kegs.push((keg, receipt));
        }
        Ok(Self { kegs })
    }

    /// Whether a keg of another formula records exactly this keg as a runtime dependency.
    fn is_required(&self, keg: &InstalledKeg) -> bool {
        self.kegs.iter().any(|(other, receipt)| {
            other.name != keg.name
                && receipt
                    .as_ref()
                    .is_some_and(|r| r.depends_on(&keg.name, &keg.version))
        })
    }
}

pub struct Cleanup<'a> {
    registry: &'a KegRegistry,
    formulary: &'a Formulary,
    now: SystemTime,
}

impl<'a> Cleanup<'a> {
    pub fn new(registry: &'a KegRegistry, formulary: &'a Formulary) -> Self {
        Self {
            registry,
            formulary,
            now: SystemTime::now(),
        }
    }

    /// Evaluates `--prune=<days>` against `now` instead of the current time.
    pub fn at(mut self, now: SystemTime) -> Self {
        self.now = now;
        self
    }

    #[instrument(skip_all, fields(dry_run = options.dry_run))]
    pub fn run(&self, options: &CleanupOptions) -> Result<CleanupReport> {
        let mut report = CleanupReport {
            dry_run: options.dry_run,
            ..CleanupReport::default()
        };

        let racks = if options.names.is_empty() {
            self.registry.list_racks()?
        } else {
            options.names.clone()
        };
        let state = InstalledState::read(self.registry)?;
        let linker = Linker::new(self.registry);
        for name in &racks {
            if self.registry.is_pinned(name) {
                debug!("[{}] Pinned, skipping", name);
                report.skipped_pinned.push(name.clone());
                continue;
            }
            let kegs = self.eligible_kegs(name, options.force, &state)?;
            if kegs.is_empty() {
                continue;
            }
            let _lock = if options.dry_run {
                None
            } else {
                Some(FormulaLock::acquire(
                    &self.registry.config().locks_dir(),
                    name,
                    &format!("cleaning up {name}"),
                )?)
            };
            for keg in kegs {
                report.freed_bytes += disk_usage(&keg.path);
                if !options.dry_run {
                    let unlinked = linker.unlink(&keg, LinkOptions::default())?;
                    if !unlinked.removed.is_empty() {
                        debug!(
                            "[{}] Removed {} stray symlinks into {}",
                            name,
                            unlinked.removed.len(),
                            keg.version
                        );
                    }
                    debug!("[{}] Removing {}", name, keg.path.display());
                    tb_io::remove_path(&keg.path)?;
                }
                report.kegs.push(keg);
            }
        }

        for entry in self.stale_cache_entries(&options.names, options.prune)? {
            if let Ok(metadata) = entry.path.metadata() {
                report.freed_bytes += metadata.len();
            }
            if !options.dry_run {
                tb_io::remove_file_if_exists(&entry.path)?;
            }
            report.cache_files.push(entry.path);
        }

        if options.names.is_empty() {
            report.markers = sweep_markers(self.registry.config().prefix(), options.dry_run);
        }
        Ok(report)
    }

    /// Kegs of `name` that cleanup may remove.
    pub fn cleanable_kegs(&self, name: &str, force: bool) -> Result<Vec<InstalledKeg>> {
        let state = InstalledState::read(self.registry)?;
        self.eligible_kegs(name, force, &state)
    }

    fn eligible_kegs(
        &self,
        name: &str,
        force: bool,
        state: &InstalledState,
    ) -> Result<Vec<InstalledKeg>> {
        let kegs = self.registry.kegs_for(name)?;
        if kegs.len() < 2 {
            return Ok(Vec::new());
        }
        let link_state = self.registry.link_state(name);
        let Some(reference) = link_state.linked.clone().or_else(|| link_state.opt.clone()) else {
            debug!("[{}] Neither linked nor opt-linked, nothing to compare against", name);
            return Ok(Vec::new());
        };
        let is_active = |keg: &InstalledKeg| {
            link_state.linked.as_ref() == Some(keg) || link_state.opt.as_ref() == Some(keg)
        };

        let candidates: Vec<InstalledKeg> = kegs
            .into_iter()
            .filter(|keg| keg.version < reference.version && !is_active(keg))
            .filter(|keg| {
                let required = state.is_required(keg);
                if required {
                    debug!("[{}] {} is a recorded runtime dependency", name, keg.version);
                }
                !required
            })
            .collect();
        if candidates.is_empty() || force || self.keg_only_safe(name, link_state.opt.as_ref(), state) {
            return Ok(candidates);
        }
        debug!("[{}] Keg-only and not provably unused, keeping old kegs", name);
        Ok(Vec::new())
    }

    /// Whether old kegs of `name` may go. Always for ordinary formulae; for keg-only ones only
    /// when the opt link exists and every installed dependent has a receipt recording its
    /// source. A formula without a definition counts as keg-only.
    fn keg_only_safe(
        &self,
        name: &str,
        opt: Option<&InstalledKeg>,
        state: &InstalledState,
    ) -> bool {
        match self.formulary.load_formula(name) {
            Ok(formula) if !formula.is_keg_only() => return true,
            Ok(_) => {}
            Err(e) => debug!("[{}] No formula definition: {}", name, e),
        }
        if opt.is_none() {
            return false;
        }
        state
            .kegs
            .iter()
            .filter(|(keg, receipt)| keg.name != name && self.depends_on(keg, receipt.as_ref(), name))
            .all(|(_, receipt)| receipt.as_ref().is_some_and(InstallReceipt::has_source_hash))
    }

    fn depends_on(&self, keg: &InstalledKeg, receipt: Option<&InstallReceipt>, name: &str) -> bool {
        if receipt.is_some_and(|r| r.runtime_dependencies.iter().any(|d| d.name == name)) {
            return true;
        }
        self.formulary
            .load_formula(&keg.name)
            .map(|f| f.dependencies.iter().any(|d| d.formula_name() == name))
            .unwrap_or(false)
    }

    /// Downloads and bottles for versions the formulary no longer carries, plus anything the
    /// prune setting selects.
    fn stale_cache_entries(&self, names: &[String], prune: Option<Prune>) -> Result<Vec<CacheEntry>> {
        let cache = Cache::new(self.registry.config());
        let mut stale = Vec::new();
        for entry in cache.entries()? {
            if !names.is_empty() && !names.contains(&entry.name) {
                continue;
            }
            let outdated = match self.formulary.load_formula(&entry.name) {
                Ok(formula) => formula.pkg_version().to_string() != entry.version,
                Err(_) => true,
            };
            let pruned = match prune {
                Some(Prune::All) => true,
                Some(Prune::Days(days)) => {
                    entry.older_than(Duration::from_secs(days * SECONDS_PER_DAY), self.now)
                }
                None => false,
            };
            if outdated || pruned {
                debug!("Stale cache entry {}", entry.path.display());
                stale.push(entry);
            }
        }
        Ok(stale)
    }
}

/// Deletes every `.DS_Store` below `root` on a worker pool sized by CPU count. Returns the
/// files found (under `dry_run`) or deleted.
pub fn sweep_markers(root: &Path, dry_run: bool) -> Vec<PathBuf> {
    let found: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && e.file_name() == MARKER_FILE)
        .map(|e| e.into_path())
        .collect();
    if dry_run || found.is_empty() {
        return found;
    }

    let workers = num_cpus::get().max(1).min(found.len());
    let pool = ThreadPool::new(workers);
    debug!("Sweeping {} marker file(s) with {} workers", found.len(), workers);
    let (tx, rx) = unbounded();
    for path in found {
        let tx = tx.clone();
        pool.execute(move || {
            let result = tb_io::remove_file_if_exists(&path);
            let _ = tx.send((path, result));
        });
    }
    drop(tx);

    let mut removed = Vec::new();
    for (path, result) in rx {
        match result {
            Ok(_) => removed.push(path),
            Err(e) => warn!("Could not remove {}: {}", path.display(), e),
        }
    }
    removed.sort();
    removed
}
