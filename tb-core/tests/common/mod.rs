// Shared fixtures for the tb-core integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tb_common::config::Config;
use tb_common::dependency::SystemProbe;
use tb_common::error::{Result, TbError};
use tb_common::formulary::Formulary;
use tb_common::keg::{InstalledKeg, KegRegistry};
use tb_common::model::{BuildOptions, Formula, PkgVersion, SpecKind, Version};
use tb_core::install::{
    BottleProvider, Builder, Collaborators, Fetcher, FormulaInstaller, InstallOptions,
    InstallOutcome, InstallSession,
};
use tempfile::TempDir;
use walkdir::WalkDir;

pub struct FakeProbe {
    pub build_tools: bool,
    pub executables: Vec<String>,
}

impl Default for FakeProbe {
    fn default() -> Self {
        Self {
            build_tools: true,
            executables: Vec::new(),
        }
    }
}

impl SystemProbe for FakeProbe {
    fn os_version(&self) -> Option<Version> {
        Version::parse("10.6.8").ok()
    }
    fn has_executable(&self, name: &str) -> bool {
        self.executables.iter().any(|e| e == name)
    }
    fn supports_compiler_standard(&self, _standard: &str) -> bool {
        true
    }
    fn arch(&self) -> String {
        "x86_64".into()
    }
    fn has_build_tools(&self) -> bool {
        self.build_tools
    }
}

#[derive(Default)]
pub struct FakeFetcher {
    pub fetched: Mutex<Vec<String>>,
}

impl Fetcher for FakeFetcher {
    fn fetch(&self, name: &str, version: &str, _url: &str, _sha256: Option<&str>) -> Result<PathBuf> {
        self.fetched.lock().unwrap().push(name.to_string());
        Ok(PathBuf::from(format!("/nonexistent/{name}--{version}.tar.gz")))
    }
}

/// Builds kegs holding `bin/<name>` plus any extra files registered for the formula.
#[derive(Default)]
pub struct FakeBuilder {
    pub built: Mutex<Vec<String>>,
    pub failing: Mutex<HashSet<String>>,
    pub extra_files: Mutex<HashMap<String, Vec<String>>>,
    /// Raises the flag once the named formula has been built.
    pub interrupt_after: Mutex<Option<(String, Arc<AtomicBool>)>>,
    pub post_installed: Mutex<Vec<String>>,
}

impl FakeBuilder {
    pub fn fail(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_string());
    }

    pub fn add_file(&self, name: &str, relative: &str) {
        self.extra_files
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .push(relative.to_string());
    }

    pub fn built(&self) -> Vec<String> {
        self.built.lock().unwrap().clone()
    }
}

impl Builder for FakeBuilder {
    fn build(
        &self,
        formula: &Formula,
        _spec: SpecKind,
        keg_path: &Path,
        _options: &BuildOptions,
        _source: Option<&Path>,
    ) -> Result<PathBuf> {
        fs::create_dir_all(keg_path.join("bin"))?;
        if self.failing.lock().unwrap().contains(&formula.name) {
            fs::write(keg_path.join("bin/half-built"), "partial")?;
            return Err(TbError::BuildError {
                name: formula.name.clone(),
                cause: "make: *** [all] Error 2".into(),
            });
        }
        fs::write(keg_path.join("bin").join(&formula.name), &formula.name)?;
        if let Some(files) = self.extra_files.lock().unwrap().get(&formula.name) {
            for relative in files {
                let path = keg_path.join(relative);
                fs::create_dir_all(path.parent().unwrap())?;
                fs::write(path, relative)?;
            }
        }
        self.built.lock().unwrap().push(formula.name.clone());
        if let Some((name, flag)) = self.interrupt_after.lock().unwrap().as_ref() {
            if *name == formula.name {
                flag.store(true, Ordering::SeqCst);
            }
        }
        Ok(keg_path.to_path_buf())
    }

    fn post_install(&self, formula: &Formula, _keg_path: &Path) -> Result<()> {
        self.post_installed.lock().unwrap().push(formula.name.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeBottleProvider {
    pub available: Mutex<HashSet<String>>,
    pub broken: Mutex<HashSet<String>>,
    pub poured: Mutex<Vec<String>>,
}

impl FakeBottleProvider {
    pub fn offer(&self, name: &str) {
        self.available.lock().unwrap().insert(name.to_string());
    }

    pub fn break_bottle(&self, name: &str) {
        self.broken.lock().unwrap().insert(name.to_string());
    }
}

impl BottleProvider for FakeBottleProvider {
    fn has_bottle(&self, formula: &Formula) -> bool {
        self.available.lock().unwrap().contains(&formula.name)
    }

    fn pour(&self, formula: &Formula, keg_path: &Path) -> Result<PathBuf> {
        fs::create_dir_all(keg_path.join("bin"))?;
        if self.broken.lock().unwrap().contains(&formula.name) {
            return Err(TbError::PourError {
                name: formula.name.clone(),
                cause: "truncated archive".into(),
            });
        }
        fs::write(keg_path.join("bin").join(&formula.name), "bottled")?;
        self.poured.lock().unwrap().push(formula.name.clone());
        Ok(keg_path.to_path_buf())
    }
}

/// A throwaway prefix with formula definitions on disk and fake collaborators.
pub struct TestEnvironment {
    pub dir: TempDir,
    pub config: Config,
    pub registry: KegRegistry,
    pub formulary: Formulary,
    pub probe: FakeProbe,
    pub fetcher: FakeFetcher,
    pub builder: FakeBuilder,
    pub bottles: FakeBottleProvider,
}

impl TestEnvironment {
    /// `definitions` are formula JSON documents, written to the formula directory.
    pub fn new(definitions: &[&str]) -> Self {
        Self::with_probe(definitions, FakeProbe::default())
    }

    pub fn with_probe(definitions: &[&str], probe: FakeProbe) -> Self {
        let dir = TempDir::new().unwrap();
        let config = Config::with_prefix(dir.path());
        fs::create_dir_all(config.formula_dir()).unwrap();
        for definition in definitions {
            let value: serde_json::Value = serde_json::from_str(definition).unwrap();
            let name = value["name"].as_str().unwrap();
            fs::write(config.formula_dir().join(format!("{name}.json")), definition).unwrap();
        }
        Self {
            registry: KegRegistry::new(config.clone()),
            formulary: Formulary::new(&config),
            config,
            dir,
            probe,
            fetcher: FakeFetcher::default(),
            builder: FakeBuilder::default(),
            bottles: FakeBottleProvider::default(),
        }
    }

    pub fn installer(&self) -> FormulaInstaller<'_> {
        FormulaInstaller::new(
            &self.registry,
            &self.formulary,
            Collaborators {
                probe: &self.probe,
                fetcher: &self.fetcher,
                builder: &self.builder,
                bottles: &self.bottles,
            },
        )
    }

    pub fn install(&self, name: &str) -> Result<InstallOutcome> {
        self.install_with(name, &InstallOptions::default())
    }

    pub fn install_with(&self, name: &str, options: &InstallOptions) -> Result<InstallOutcome> {
        let mut session = InstallSession::new();
        self.installer().install_name(&mut session, name, options)
    }

    /// Creates a keg by hand with `bin/<name>` inside, bypassing the installer.
    pub fn make_keg(&self, name: &str, version: &str) -> InstalledKeg {
        let path = self.config.formula_keg_path(name, version);
        fs::create_dir_all(path.join("bin")).unwrap();
        fs::write(path.join("bin").join(name), version).unwrap();
        InstalledKeg {
            name: name.to_string(),
            version: PkgVersion::parse(version).unwrap(),
            path,
        }
    }

    pub fn prefix_path(&self, relative: &str) -> PathBuf {
        self.config.prefix().join(relative)
    }

    /// Every path under the prefix except the formula definitions.
    pub fn snapshot(&self) -> Vec<PathBuf> {
        let formula_dir = self.config.formula_dir().to_path_buf();
        let mut paths: Vec<PathBuf> = WalkDir::new(self.config.prefix())
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.into_path())
            .filter(|p| !p.starts_with(&formula_dir))
            .collect();
        paths.sort();
        paths
    }

    pub fn installed_names(&self) -> Vec<String> {
        self.registry
            .list_installed_kegs()
            .unwrap()
            .into_iter()
            .map(|k| k.name)
            .collect()
    }
}
