// tb-core/src/link/switch.rs
use tb_common::error::Result;
use tb_common::formulary::Formulary;
use tb_common::keg::{InstalledKeg, KegRegistry};
use tracing::{debug, warn};

use super::linker::{opt_link, remove_opt_link, Linker};
use super::{LinkOptions, LinkReport};

#[derive(Debug, Clone)]
pub struct SwitchReport {
    pub keg: InstalledKeg,
    /// Kegs that had at least one symlink removed.
    pub unlinked: Vec<InstalledKeg>,
    /// `None` when the formula is keg-only and was only opt-linked.
    pub linked: Option<LinkReport>,
}

/// Makes `version` the active keg of `name`: every keg of `name` is unlinked, then the
/// requested one is opt-linked and, unless keg-only, linked. If that fails, the previously
/// linked and opt-linked kegs are put back before the error is returned.
pub fn switch(
    registry: &KegRegistry,
    formulary: &Formulary,
    name: &str,
    version: &str,
) -> Result<SwitchReport> {
    let keg = registry.find_keg(name, version)?;
    let linker = Linker::new(registry);
    let previous_linked = registry.linked_keg(name);
    let previous_opt = registry.opt_keg(name);

    let mut unlinked = Vec::new();
    for other in registry.kegs_for(name)? {
        let report = linker.unlink(&other, LinkOptions::default())?;
        if report.changed() > 0 {
            unlinked.push(other);
        }
    }

    let keg_only = match formulary.load_formula(name) {
        Ok(formula) => formula.is_keg_only(),
        Err(e) => {
            warn!("[{}] No formula definition ({}); linking anyway", name, e);
            false
        }
    };
    let activated = opt_link(registry.config(), &keg).and_then(|_| {
        if keg_only {
            debug!("[{}] Keg-only, leaving {} unlinked", name, keg.version);
            Ok(None)
        } else {
            linker.link(&keg, LinkOptions::default()).map(Some)
        }
    });
    let linked = match activated {
        Ok(linked) => linked,
        Err(e) => {
            warn!("[{}] Switch to {} failed, restoring previous state", name, version);
            restore(registry, &keg, previous_opt.as_ref(), previous_linked.as_ref());
            return Err(e);
        }
    };

    Ok(SwitchReport {
        keg,
        unlinked,
        linked,
    })
}

fn restore(
    registry: &KegRegistry,
    target: &InstalledKeg,
    opt: Option<&InstalledKeg>,
    linked: Option<&InstalledKeg>,
) {
    let restored = match opt {
        Some(previous) => opt_link(registry.config(), previous).map(|_| ()),
        None => remove_opt_link(registry, target).map(|_| ()),
    };
    if let Err(e) = restored {
        warn!("[{}] Could not restore the opt link: {}", target.name, e);
    }
    if let Some(previous) = linked {
        Linker::new(registry).relink(previous);
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tb_common::config::Config;
    use tb_common::error::TbError;
    use tb_common::model::Formula;
    use tempfile::TempDir;

    use super::*;

    fn install(registry: &KegRegistry, version: &str) -> InstalledKeg {
        let path = registry.config().formula_keg_path("foo", version);
        fs::create_dir_all(path.join("bin")).unwrap();
        fs::write(path.join("bin/foo"), version).unwrap();
        registry.find_keg("foo", version).unwrap()
    }

    #[test]
    fn switch_leaves_only_requested_keg_active() {
        let dir = TempDir::new().unwrap();
        let registry = KegRegistry::new(Config::with_prefix(dir.path()));
        let formulary = Formulary::from_formulae([Formula::new("foo", "3.0").unwrap()]);
        install(&registry, "1.0");
        install(&registry, "2.0");
        let three = install(&registry, "3.0");
        Linker::new(&registry)
            .link(&three, LinkOptions::default())
            .unwrap();

        let report = switch(&registry, &formulary, "foo", "2.0").unwrap();
        assert_eq!(report.unlinked, [three]);

        let state = registry.link_state("foo");
        assert_eq!(state.linked.unwrap().version_str(), "2.0");
        assert_eq!(state.opt.unwrap().version_str(), "2.0");
        let bin = dir.path().join("bin/foo");
        assert_eq!(fs::read_to_string(bin).unwrap(), "2.0");
    }

    #[test]
    fn failed_switch_restores_the_active_version() {
        let dir = TempDir::new().unwrap();
        let registry = KegRegistry::new(Config::with_prefix(dir.path()));
        let formulary = Formulary::from_formulae([Formula::new("foo", "2.0").unwrap()]);
        let one = install(&registry, "1.0");
        let two = install(&registry, "2.0");
        fs::create_dir_all(two.path.join("share")).unwrap();
        fs::write(two.path.join("share/foo.conf"), "2.0").unwrap();
        opt_link(registry.config(), &one).unwrap();
        Linker::new(&registry)
            .link(&one, LinkOptions::default())
            .unwrap();
        fs::create_dir_all(dir.path().join("share")).unwrap();
        fs::write(dir.path().join("share/foo.conf"), "local").unwrap();

        let err = switch(&registry, &formulary, "foo", "2.0").unwrap_err();
        assert!(matches!(err, TbError::LinkConflict { .. }));

        let state = registry.link_state("foo");
        assert_eq!(state.linked, Some(one.clone()));
        assert_eq!(state.opt, Some(one.clone()));
        let bin = dir.path().join("bin/foo");
        assert_eq!(fs::read_link(&bin).unwrap(), one.path.join("bin/foo"));
        assert_eq!(
            fs::read_to_string(dir.path().join("share/foo.conf")).unwrap(),
            "local"
        );
    }

    #[test]
    fn failed_switch_without_previous_state_leaves_nothing_active() {
        let dir = TempDir::new().unwrap();
        let registry = KegRegistry::new(Config::with_prefix(dir.path()));
        let formulary = Formulary::from_formulae([Formula::new("foo", "1.0").unwrap()]);
        install(&registry, "1.0");
        fs::create_dir_all(dir.path().join("bin")).unwrap();
        fs::write(dir.path().join("bin/foo"), "local").unwrap();

        assert!(switch(&registry, &formulary, "foo", "1.0").is_err());
        assert!(registry.linked_keg("foo").is_none());
        assert!(registry.opt_keg("foo").is_none());
    }

    #[test]
    fn switch_keg_only_sets_opt_link_only() {
        let dir = TempDir::new().unwrap();
        let registry = KegRegistry::new(Config::with_prefix(dir.path()));
        let mut formula = Formula::new("foo", "2.0").unwrap();
        formula.keg_only = Some("shadows system foo".into());
        let formulary = Formulary::from_formulae([formula]);
        install(&registry, "1.0");

        let report = switch(&registry, &formulary, "foo", "1.0").unwrap();
        assert!(report.linked.is_none());
        assert!(registry.linked_keg("foo").is_none());
        assert_eq!(registry.opt_keg("foo").unwrap().version_str(), "1.0");
    }

    #[test]
    fn switch_to_unknown_version_lists_installed() {
        let dir = TempDir::new().unwrap();
        let registry = KegRegistry::new(Config::with_prefix(dir.path()));
        let formulary = Formulary::from_formulae([]);
        install(&registry, "1.0");
        let err = switch(&registry, &formulary, "foo", "9.9").unwrap_err();
        assert!(matches!(err, TbError::KegNotFound(ref msg) if msg.contains("1.0")));
        assert_eq!(err.exit_code(), 2);
    }
}
