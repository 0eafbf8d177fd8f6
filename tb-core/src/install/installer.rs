// tb-core/src/install/installer.rs
//! Installs a formula and the dependencies it is missing.
//!
//! Everything that must survive between recursive calls lives in an `InstallSession`: the
//! set of formulae already attempted, the locks held for the current root and the kegs
//! installed so far. Nothing is global.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tb_common::config::Config;
use tb_common::dependency::{
    DependencyResolver, ExpandedDependency, Expansion, ResolutionContext, SystemProbe,
};
use tb_common::error::{Result, TbError};
use tb_common::formulary::Formulary;
use tb_common::keg::{InstalledKeg, KegRegistry};
use tb_common::model::{BuildOptions, Formula, Options, PkgVersion, SpecKind};
use tb_common::receipt::{InstallReceipt, ReceiptSource, RuntimeDependency};
use tracing::{debug, error, warn};

use super::interrupt::InterruptSource;
use super::provider::{BottleProvider, Builder, Fetcher};
use crate::link::{opt_link, LinkOptions, LinkReport, Linker};
use crate::lock::LockSet;

#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    pub force: bool,
    pub ignore_dependencies: bool,
    pub only_dependencies: bool,
    pub spec: SpecKind,
    pub build_from_source: bool,
    /// `with-x`, `without-x`, `universal` and friends.
    pub options: Options,
    pub installed_as_dependency: bool,
}

impl InstallOptions {
    fn for_dependency(&self, dep: &ExpandedDependency) -> Self {
        Self {
            force: self.force,
            ignore_dependencies: true,
            only_dependencies: false,
            spec: SpecKind::Stable,
            build_from_source: self.build_from_source,
            options: dep.options.clone(),
            installed_as_dependency: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed {
        keg: InstalledKeg,
        poured_from_bottle: bool,
        /// `None` for keg-only formulae and when linking failed.
        link: Option<LinkReport>,
    },
    /// The requested version is already installed; nothing was done.
    AlreadyInstalled(InstalledKeg),
    /// This session already tried the formula.
    AlreadyAttempted(String),
    /// `only_dependencies` was set; the formula itself was not installed.
    DependenciesOnly(String),
}

/// State threaded through every install call of one command.
#[derive(Debug, Default)]
pub struct InstallSession {
    attempted: HashSet<String>,
    locks: LockSet,
    lock_history: Vec<String>,
    installed: Vec<InstalledKeg>,
    interrupt: InterruptSource,
}

impl InstallSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interrupt(interrupt: InterruptSource) -> Self {
        Self {
            interrupt,
            ..Self::default()
        }
    }

    pub fn was_attempted(&self, name: &str) -> bool {
        self.attempted.contains(name)
    }

    /// Kegs installed by this session, in install order.
    pub fn installed(&self) -> &[InstalledKeg] {
        &self.installed
    }

    /// Every formula lock this session has acquired, in order.
    pub fn lock_history(&self) -> &[String] {
        &self.lock_history
    }

    pub fn holds_locks(&self) -> bool {
        !self.locks.is_empty()
    }

    fn lock(&mut self, config: &Config, name: &str) -> Result<()> {
        if self.locks.holds(name) {
            return Ok(());
        }
        self.locks
            .acquire(&config.locks_dir(), name, &format!("installing {name}"))?;
        self.lock_history.push(name.to_string());
        Ok(())
    }
}

/// The installer's collaborators.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub probe: &'a dyn SystemProbe,
    pub fetcher: &'a dyn Fetcher,
    pub builder: &'a dyn Builder,
    pub bottles: &'a dyn BottleProvider,
}

pub struct FormulaInstaller<'a> {
    registry: &'a KegRegistry,
    formulary: &'a Formulary,
    tools: Collaborators<'a>,
}

impl<'a> FormulaInstaller<'a> {
    pub fn new(
        registry: &'a KegRegistry,
        formulary: &'a Formulary,
        tools: Collaborators<'a>,
    ) -> Self {
        Self {
            registry,
            formulary,
            tools,
        }
    }

    fn config(&self) -> &Config {
        self.registry.config()
    }

    /// Whether `formula` will be poured: bottles are allowed, one exists for a compatible
    /// cellar, the stable spec is active and no non-default options are used.
    pub fn pours_bottle(
        &self,
        formula: &Formula,
        spec: SpecKind,
        build: &BuildOptions,
        build_from_source: bool,
    ) -> bool {
        !build_from_source
            && !self.config().build_from_source
            && spec == SpecKind::Stable
            && build.used_options().is_empty()
            && formula
                .bottle
                .as_ref()
                .is_some_and(|b| b.compatible_with(&self.config().cellar_dir()))
            && self.tools.bottles.has_bottle(formula)
    }

    /// Expands the dependencies `formula` needs under `options`.
    pub fn expand(&self, formula: &Arc<Formula>, options: &InstallOptions) -> Result<Expansion> {
        let root_name = formula.name.clone();
        let pours = |f: &Formula, build: &BuildOptions| {
            let spec = if f.name == root_name {
                options.spec
            } else {
                SpecKind::Stable
            };
            self.pours_bottle(f, spec, build, options.build_from_source)
        };
        let context = ResolutionContext {
            formulary: self.formulary,
            keg_registry: self.registry,
            probe: self.tools.probe,
            pours_bottle: &pours,
        };
        DependencyResolver::new(context, Arc::clone(formula), options.options.clone()).expand()
    }

    pub fn install_name(
        &self,
        session: &mut InstallSession,
        name: &str,
        options: &InstallOptions,
    ) -> Result<InstallOutcome> {
        let formula = self.formulary.load_formula(name)?;
        self.install(session, formula, options)
    }

    pub fn install(
        &self,
        session: &mut InstallSession,
        formula: Arc<Formula>,
        options: &InstallOptions,
    ) -> Result<InstallOutcome> {
        if !session.attempted.insert(formula.name.clone()) {
            debug!("[{}] Already attempted in this session", formula.name);
            return Ok(InstallOutcome::AlreadyAttempted(formula.name.clone()));
        }
        if !formula.has_spec(options.spec) {
            return Err(TbError::NotFound(format!(
                "{} has no {} spec",
                formula.name, options.spec
            )));
        }
        let version = formula.pkg_version_for(options.spec);

        if !options.installed_as_dependency {
            if let Some(keg) = self.check_installed(&formula, &version, options)? {
                return Ok(InstallOutcome::AlreadyInstalled(keg));
            }
        }

        let build = BuildOptions::new(options.options.clone(), formula.declared_options());
        let expansion = if options.ignore_dependencies {
            Expansion::default()
        } else {
            self.expand(&formula, options)?
        };
        expansion.check_requirements()?;
        let to_install: Vec<ExpandedDependency> = expansion.to_install().cloned().collect();

        if !options.force {
            let mut checked: Vec<&Formula> = vec![formula.as_ref()];
            checked.extend(to_install.iter().map(|d| d.formula.as_ref()));
            self.check_conflicts(&checked)?;
        }
        self.check_build_tools(&formula, &build, &to_install, options)?;

        // Locks are taken only after every preflight check passed, so a rejected install
        // leaves no trace on disk. The outermost call owns and releases them.
        let owns_locks = !session.holds_locks();
        let result = self
            .acquire_locks(session, &formula, &to_install, options)
            .and_then(|()| {
                self.install_locked(session, &formula, &version, &build, &to_install, options)
            });
        if owns_locks {
            session.locks.release_all();
        }
        result
    }

    fn acquire_locks(
        &self,
        session: &mut InstallSession,
        formula: &Formula,
        to_install: &[ExpandedDependency],
        options: &InstallOptions,
    ) -> Result<()> {
        if !options.only_dependencies {
            session.lock(self.config(), &formula.name)?;
        }
        for dep in to_install {
            session.lock(self.config(), dep.name())?;
        }
        Ok(())
    }

    fn install_locked(
        &self,
        session: &mut InstallSession,
        formula: &Arc<Formula>,
        version: &PkgVersion,
        build: &BuildOptions,
        to_install: &[ExpandedDependency],
        options: &InstallOptions,
    ) -> Result<InstallOutcome> {
        if !to_install.is_empty() {
            debug!(
                "[{}] Installing dependencies: {}",
                formula.name,
                to_install
                    .iter()
                    .map(ExpandedDependency::name)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        for dep in to_install {
            session.interrupt.check(dep.name())?;
            self.install_dependency(session, dep, options)?;
        }

        if options.only_dependencies {
            return Ok(InstallOutcome::DependenciesOnly(formula.name.clone()));
        }
        self.install_keg(session, formula, version, build, options)
    }

    /// Installs one planned dependency. An older linked keg of it is unlinked first and
    /// relinked if the install fails.
    fn install_dependency(
        &self,
        session: &mut InstallSession,
        dep: &ExpandedDependency,
        options: &InstallOptions,
    ) -> Result<()> {
        let linker = Linker::new(self.registry);
        let previously_linked = self
            .registry
            .linked_keg(dep.name())
            .filter(|keg| keg.version != dep.formula.pkg_version());
        if let Some(old) = &previously_linked {
            debug!(
                "[{}] Unlinking {} before upgrading",
                dep.name(),
                old.version
            );
            linker.unlink(old, LinkOptions::default())?;
        }

        match self.install(session, Arc::clone(&dep.formula), &options.for_dependency(dep)) {
            Ok(outcome) => {
                debug!("[{}] Dependency outcome: {:?}", dep.name(), outcome);
                Ok(())
            }
            Err(e) => {
                if let Some(old) = &previously_linked {
                    if let Err(relink_err) = linker.link(old, LinkOptions::default()) {
                        error!(
                            "[{}] Could not relink {}: {}",
                            dep.name(),
                            old.version,
                            relink_err
                        );
                    }
                }
                Err(e)
            }
        }
    }

    /// Preflight for a requested formula. Returns the keg when the requested version is
    /// already there and nothing needs doing.
    fn check_installed(
        &self,
        formula: &Formula,
        version: &PkgVersion,
        options: &InstallOptions,
    ) -> Result<Option<InstalledKeg>> {
        if let Some(linked) = self.registry.linked_keg(&formula.name) {
            if linked.version != *version {
                return Err(TbError::AlreadyInstalled {
                    name: formula.name.clone(),
                    installed: linked.version_str(),
                    requested: version.to_string(),
                });
            }
        }
        match self.registry.installed_keg(&formula.name, version) {
            Some(keg) if !options.force => {
                warn!(
                    "{} {} is already installed",
                    formula.name, version
                );
                Ok(Some(keg))
            }
            _ => Ok(None),
        }
    }

    /// Linked formulae that the given formulae conflict with, in either direction.
    fn check_conflicts(&self, formulae: &[&Formula]) -> Result<()> {
        let linked = self.registry.linked_names()?;
        for formula in formulae {
            let mut conflicts: Vec<String> = Vec::new();
            for other in &linked {
                if *other == formula.name {
                    continue;
                }
                let declared_here = formula.conflicts_with(other);
                let declared_there = self
                    .formulary
                    .load_formula(other)
                    .map(|f| f.conflicts_with(&formula.name))
                    .unwrap_or(false);
                if declared_here || declared_there {
                    conflicts.push(other.clone());
                }
            }
            if !conflicts.is_empty() {
                return Err(TbError::Conflict {
                    name: formula.name.clone(),
                    conflicts,
                });
            }
        }
        Ok(())
    }

    fn check_build_tools(
        &self,
        formula: &Formula,
        build: &BuildOptions,
        to_install: &[ExpandedDependency],
        options: &InstallOptions,
    ) -> Result<()> {
        let mut from_source = Vec::new();
        if !options.only_dependencies
            && !self.pours_bottle(formula, options.spec, build, options.build_from_source)
        {
            from_source.push(formula.name.clone());
        }
        for dep in to_install {
            let dep_build = BuildOptions::new(dep.options.clone(), dep.formula.declared_options());
            if !self.pours_bottle(&dep.formula, SpecKind::Stable, &dep_build, options.build_from_source)
            {
                from_source.push(dep.name().to_string());
            }
        }
        if from_source.is_empty() || self.tools.probe.has_build_tools() {
            return Ok(());
        }
        Err(TbError::BuildTools(from_source))
    }

    fn install_keg(
        &self,
        session: &mut InstallSession,
        formula: &Formula,
        version: &PkgVersion,
        build: &BuildOptions,
        options: &InstallOptions,
    ) -> Result<InstallOutcome> {
        let keg_path = self.registry.get_keg_path(&formula.name, version);
        let guard = PartialKegGuard::new(&keg_path)?;

        let mut poured = false;
        if self.pours_bottle(formula, options.spec, build, options.build_from_source) {
            match self.tools.bottles.pour(formula, &keg_path) {
                Ok(_) => poured = true,
                Err(e) => {
                    warn!("[{}] {}; building from source", formula.name, e);
                    guard.clear()?;
                    if !self.tools.probe.has_build_tools() {
                        return Err(TbError::BuildTools(vec![formula.name.clone()]));
                    }
                }
            }
        }
        if !poured {
            self.build_from_source(formula, options.spec, version, &keg_path, build)?;
        }
        session.interrupt.check(&formula.name)?;

        self.write_receipt(formula, version, &keg_path, build, options, poured)?;
        guard.commit();

        let keg = InstalledKeg {
            name: formula.name.clone(),
            version: version.clone(),
            path: keg_path,
        };
        let link = self.link_installed(formula, &keg);
        if let Err(e) = self.tools.builder.post_install(formula, &keg.path) {
            warn!("[{}] post-install step failed: {}", formula.name, e);
        }
        session.installed.push(keg.clone());
        debug!("[{}] Installed {}", formula.name, keg.path.display());
        Ok(InstallOutcome::Installed {
            keg,
            poured_from_bottle: poured,
            link,
        })
    }

    fn build_from_source(
        &self,
        formula: &Formula,
        spec: SpecKind,
        version: &PkgVersion,
        keg_path: &Path,
        build: &BuildOptions,
    ) -> Result<()> {
        let source = match formula.source_for(spec) {
            Some((url, sha256)) if !url.is_empty() => Some(self.tools.fetcher.fetch(
                &formula.name,
                &version.to_string(),
                url,
                sha256,
            )?),
            _ => None,
        };
        self.tools
            .builder
            .build(formula, spec, keg_path, build, source.as_deref())
            .map_err(|e| match e {
                TbError::BuildError { .. } | TbError::Interrupted(_) => e,
                other => TbError::BuildError {
                    name: formula.name.clone(),
                    cause: other.to_string(),
                },
            })?;
        if !keg_path.is_dir() {
            return Err(TbError::BuildError {
                name: formula.name.clone(),
                cause: format!("build produced no keg at {}", keg_path.display()),
            });
        }
        Ok(())
    }

    /// Opt-links the new keg and links it unless keg-only. Failures here are warnings: the
    /// keg is installed either way.
    fn link_installed(&self, formula: &Formula, keg: &InstalledKeg) -> Option<LinkReport> {
        if let Err(e) = opt_link(self.config(), keg) {
            warn!("[{}] Could not create opt link: {}", formula.name, e);
        }
        if formula.is_keg_only() {
            debug!(
                "[{}] Keg-only ({}), not linking",
                formula.name,
                formula.keg_only.as_deref().unwrap_or_default()
            );
            return None;
        }
        match Linker::new(self.registry).link(keg, LinkOptions::default()) {
            Ok(report) => Some(report),
            Err(e) => {
                warn!("[{}] The keg was installed but not linked: {}", formula.name, e);
                None
            }
        }
    }

    fn write_receipt(
        &self,
        formula: &Formula,
        version: &PkgVersion,
        keg_path: &Path,
        build: &BuildOptions,
        options: &InstallOptions,
        poured: bool,
    ) -> Result<()> {
        let formula_hash = match self.formulary.definition_bytes(&formula.name) {
            Ok(bytes) => Some(tb_io::sha256_bytes(&bytes)),
            Err(e) => {
                warn!("[{}] Could not hash formula definition: {}", formula.name, e);
                None
            }
        };
        let runtime_dependencies = formula
            .dependencies
            .iter()
            .filter(|dep| !dep.is_build())
            .filter_map(|dep| {
                let name = dep.formula_name();
                self.registry
                    .opt_keg(name)
                    .or_else(|| self.registry.latest_keg(name).ok().flatten())
                    .map(|keg| RuntimeDependency {
                        name: keg.name,
                        version: keg.version,
                    })
            })
            .collect();
        let receipt = InstallReceipt {
            name: formula.name.clone(),
            version: version.clone(),
            used_options: build.used_options(),
            unused_options: build.unused_options(),
            poured_from_bottle: poured,
            installed_as_dependency: options.installed_as_dependency,
            installed_on_request: !options.installed_as_dependency,
            time: Utc::now(),
            source: ReceiptSource {
                tap: formula.tap.clone(),
                spec: options.spec,
                formula_hash,
            },
            runtime_dependencies,
        };
        tb_io::write_json(&InstallReceipt::path_in(keg_path), &receipt)
    }
}

/// Removes a keg directory that never finished installing. A keg that already existed at
/// the path is moved aside first and restored on rollback.
struct PartialKegGuard {
    keg_path: PathBuf,
    backup: Option<PathBuf>,
    armed: bool,
}

impl PartialKegGuard {
    fn new(keg_path: &Path) -> Result<Self> {
        let mut backup = None;
        if tb_io::check_symlink_exists(keg_path) {
            let file_name = keg_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let aside = keg_path.with_file_name(format!(".{file_name}.reinstall"));
            tb_io::remove_path(&aside)?;
            fs::rename(keg_path, &aside)?;
            debug!("Moved existing keg aside to {}", aside.display());
            backup = Some(aside);
        }
        Ok(Self {
            keg_path: keg_path.to_path_buf(),
            backup,
            armed: true,
        })
    }

    /// Empties the keg path for another attempt.
    fn clear(&self) -> Result<()> {
        tb_io::remove_path(&self.keg_path)
    }

    fn commit(mut self) {
        self.armed = false;
        if let Some(backup) = self.backup.take() {
            if let Err(e) = tb_io::remove_path(&backup) {
                warn!("Could not remove previous keg {}: {}", backup.display(), e);
            }
        }
    }
}

impl Drop for PartialKegGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        debug!("Rolling back partial keg {}", self.keg_path.display());
        if let Err(e) = tb_io::remove_path(&self.keg_path) {
            error!(
                "Failed to remove partial keg {}: {}",
                self.keg_path.display(),
                e
            );
        }
        if let Some(backup) = self.backup.take() {
            if let Err(e) = fs::rename(&backup, &self.keg_path) {
                error!("Failed to restore {}: {}", self.keg_path.display(), e);
            }
        }
        if let Some(rack) = self.keg_path.parent() {
            let _ = tb_io::remove_dir_if_empty(rack);
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn guard_removes_partial_keg_and_empty_rack() {
        let dir = TempDir::new().unwrap();
        let keg = dir.path().join("Cellar/foo/1.0");
        {
            let _guard = PartialKegGuard::new(&keg).unwrap();
            fs::create_dir_all(keg.join("bin")).unwrap();
        }
        assert!(!keg.exists());
        assert!(!dir.path().join("Cellar/foo").exists());
    }

    #[test]
    fn guard_restores_previous_keg_on_rollback() {
        let dir = TempDir::new().unwrap();
        let keg = dir.path().join("Cellar/foo/1.0");
        fs::create_dir_all(&keg).unwrap();
        fs::write(keg.join("old"), "old").unwrap();
        {
            let _guard = PartialKegGuard::new(&keg).unwrap();
            assert!(!keg.exists());
            fs::create_dir_all(&keg).unwrap();
            fs::write(keg.join("new"), "new").unwrap();
        }
        assert!(keg.join("old").exists());
        assert!(!keg.join("new").exists());
    }

    #[test]
    fn committed_guard_keeps_keg_and_drops_backup() {
        let dir = TempDir::new().unwrap();
        let keg = dir.path().join("Cellar/foo/1.0");
        fs::create_dir_all(&keg).unwrap();
        let guard = PartialKegGuard::new(&keg).unwrap();
        fs::create_dir_all(&keg).unwrap();
        fs::write(keg.join("new"), "new").unwrap();
        guard.commit();
        assert!(keg.join("new").exists());
        assert!(!dir.path().join("Cellar/foo/.1.0.reinstall").exists());
    }
}
