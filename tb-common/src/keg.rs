// tb-common/src/keg.rs
use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};

use super::config::Config;
use super::error::{Result, TbError};
use super::model::PkgVersion;
use super::receipt::InstallReceipt;

/// Represents information about an installed package (Keg).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledKeg {
    pub name: String,
    pub version: PkgVersion,
    pub path: PathBuf,
}

impl InstalledKeg {
    pub fn version_str(&self) -> String {
        self.version.to_string()
    }

    pub fn receipt(&self) -> Result<Option<InstallReceipt>> {
        InstallReceipt::read(&self.path)
    }
}

/// Linked and opt-linked kegs of one formula, read from the filesystem. Records whose target
/// is gone read as `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkState {
    pub linked: Option<InstalledKeg>,
    pub opt: Option<InstalledKeg>,
}

/// Manages querying installed packages in the Cellar.
#[derive(Debug, Clone)]
pub struct KegRegistry {
    config: Config,
}

impl KegRegistry {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cellar_path(&self) -> PathBuf {
        self.config.cellar_dir()
    }

    pub fn rack_path(&self, name: &str) -> PathBuf {
        self.config.formula_cellar_dir(name)
    }

    pub fn get_keg_path(&self, name: &str, version: &PkgVersion) -> PathBuf {
        self.rack_path(name).join(version.to_string())
    }

    /// Names of every rack in the cellar, sorted.
    pub fn list_racks(&self) -> Result<Vec<String>> {
        let cellar = self.cellar_path();
        let entries = match fs::read_dir(&cellar) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut racks = Vec::new();
        for entry in entries {
            match entry {
                Ok(entry) if entry.path().is_dir() => {
                    if let Some(name) = entry.file_name().to_str() {
                        if !name.starts_with('.') {
                            racks.push(name.to_string());
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("Error reading entry in cellar: {}. Skipping.", e),
            }
        }
        racks.sort();
        Ok(racks)
    }

    /// Every keg of `name`, oldest first.
    pub fn kegs_for(&self, name: &str) -> Result<Vec<InstalledKeg>> {
        let rack = self.rack_path(name);
        let entries = match fs::read_dir(&rack) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut kegs = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("[{}] Error reading keg entry: {}. Skipping.", name, e);
                    continue;
                }
            };
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(dir_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if dir_name.starts_with('.') {
                continue;
            }
            match PkgVersion::parse(dir_name) {
                Ok(version) => kegs.push(InstalledKeg {
                    name: name.to_string(),
                    version,
                    path,
                }),
                Err(e) => warn!("[{}] Ignoring keg {}: {}", name, path.display(), e),
            }
        }
        kegs.sort_by(|a, b| a.version.cmp(&b.version));
        debug!("[{}] Found {} installed keg(s)", name, kegs.len());
        Ok(kegs)
    }

    pub fn list_installed_kegs(&self) -> Result<Vec<InstalledKeg>> {
        let mut all = Vec::new();
        for rack in self.list_racks()? {
            all.extend(self.kegs_for(&rack)?);
        }
        Ok(all)
    }

    /// The keg of exactly `version`, if installed.
    pub fn installed_keg(&self, name: &str, version: &PkgVersion) -> Option<InstalledKeg> {
        let path = self.get_keg_path(name, version);
        path.is_dir().then(|| InstalledKeg {
            name: name.to_string(),
            version: version.clone(),
            path,
        })
    }

    /// Newest installed keg of `name`.
    pub fn latest_keg(&self, name: &str) -> Result<Option<InstalledKeg>> {
        Ok(self.kegs_for(name)?.pop())
    }

    /// The keg a path lives in, if the path is inside the cellar.
    pub fn keg_for_path(&self, path: &Path) -> Option<InstalledKeg> {
        let cellar = self.cellar_path();
        let normalized = lexical_normalize(path);
        let relative = match normalized.strip_prefix(&cellar) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => {
                let canonical_cellar = cellar.canonicalize().ok()?;
                let canonical = normalized.canonicalize().ok()?;
                canonical.strip_prefix(&canonical_cellar).ok()?.to_path_buf()
            }
        };
        let mut components = relative.components();
        let name = components.next()?.as_os_str().to_str()?.to_string();
        let version_str = components.next()?.as_os_str().to_str()?;
        let version = PkgVersion::parse(version_str).ok()?;
        let path = cellar.join(&name).join(version_str);
        Some(InstalledKeg {
            name,
            version,
            path,
        })
    }

    fn keg_from_record(&self, record: &Path, name: &str) -> Option<InstalledKeg> {
        let target = fs::read_link(record).ok()?;
        let target = if target.is_absolute() {
            target
        } else {
            record.parent()?.join(target)
        };
        if !target.is_dir() {
            debug!(
                "[{}] Record {} points at missing {}",
                name,
                record.display(),
                target.display()
            );
            return None;
        }
        self.keg_for_path(&target).filter(|keg| keg.name == name)
    }

    pub fn opt_keg(&self, name: &str) -> Option<InstalledKeg> {
        self.keg_from_record(&self.config.formula_opt_path(name), name)
    }

    pub fn linked_keg(&self, name: &str) -> Option<InstalledKeg> {
        self.keg_from_record(&self.config.linked_record_path(name), name)
    }

    pub fn pinned_keg(&self, name: &str) -> Option<InstalledKeg> {
        self.keg_from_record(&self.config.pinned_record_path(name), name)
    }

    pub fn is_pinned(&self, name: &str) -> bool {
        self.pinned_keg(name).is_some()
    }

    pub fn link_state(&self, name: &str) -> LinkState {
        LinkState {
            linked: self.linked_keg(name),
            opt: self.opt_keg(name),
        }
    }

    /// Racks whose linked record points at an existing keg.
    pub fn linked_names(&self) -> Result<Vec<String>> {
        Ok(self
            .list_racks()?
            .into_iter()
            .filter(|name| self.linked_keg(name).is_some())
            .collect())
    }

    /// Picks the keg a bare name refers to: the linked keg, else the only keg, else the opt
    /// keg.
    pub fn resolve_keg(&self, name: &str) -> Result<InstalledKeg> {
        let mut kegs = self.kegs_for(name)?;
        if kegs.is_empty() {
            return Err(TbError::KegNotFound(name.to_string()));
        }
        if let Some(linked) = self.linked_keg(name) {
            return Ok(linked);
        }
        if kegs.len() == 1 {
            return Ok(kegs.remove(0));
        }
        if let Some(opt) = self.opt_keg(name) {
            return Ok(opt);
        }
        Err(TbError::MultipleVersionsInstalled {
            name: name.to_string(),
            versions: kegs.iter().map(InstalledKeg::version_str).collect(),
        })
    }

    /// The keg of `name` whose directory name is `version_str`.
    pub fn find_keg(&self, name: &str, version_str: &str) -> Result<InstalledKeg> {
        let kegs = self.kegs_for(name)?;
        let installed: Vec<String> = kegs.iter().map(InstalledKeg::version_str).collect();
        kegs.into_iter()
            .find(|keg| keg.version_str() == version_str)
            .ok_or_else(|| {
                if installed.is_empty() {
                    TbError::KegNotFound(format!("{name} {version_str}"))
                } else {
                    TbError::KegNotFound(format!(
                        "{name} {version_str} (installed: {})",
                        installed.join(", ")
                    ))
                }
            })
    }
}

/// Collapses `.` and `..` without touching the filesystem.
pub fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
