// tb-core/src/install/bottle.rs
//! Pours bottles from `<cache>/bottles/<name>--<version>.bottle.tar.gz`.
//!
//! Bottle archives hold `<name>/<version>/...`; the two leading components are stripped so
//! the contents land directly in the keg. Text files carrying the `@@TB_PREFIX@@` and
//! `@@TB_CELLAR@@` placeholders are rewritten for this prefix.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;
use tb_common::cache::Cache;
use tb_common::config::Config;
use tb_common::error::{Result, TbError};
use tb_common::model::Formula;
use tracing::{debug, error, warn};
use walkdir::WalkDir;

use super::provider::BottleProvider;

const STRIP_COMPONENTS: usize = 2;
const PREFIX_PLACEHOLDER: &str = "@@TB_PREFIX@@";
const CELLAR_PLACEHOLDER: &str = "@@TB_CELLAR@@";

#[derive(Debug, Clone)]
pub struct CachedBottleProvider {
    config: Config,
    cache: Cache,
}

impl CachedBottleProvider {
    pub fn new(config: Config) -> Self {
        let cache = Cache::new(&config);
        Self { config, cache }
    }

    pub fn bottle_path(&self, formula: &Formula) -> PathBuf {
        self.cache
            .bottle_path(&formula.name, &formula.pkg_version().to_string())
    }

    fn pour_inner(&self, formula: &Formula, keg_path: &Path) -> Result<PathBuf> {
        let bottle_path = self.bottle_path(formula);
        if let Some(expected) = formula
            .bottle
            .as_ref()
            .map(|b| b.sha256.as_str())
            .filter(|s| !s.is_empty())
        {
            tb_io::verify_checksum(&bottle_path, expected)?;
        }
        if keg_path.exists() {
            debug!(
                "Removing existing keg directory before pouring: {}",
                keg_path.display()
            );
            tb_io::remove_path(keg_path)?;
        }
        tb_io::create_dir_all(keg_path)?;

        debug!(
            "Extracting bottle archive {} to {} with strip_components={}",
            bottle_path.display(),
            keg_path.display(),
            STRIP_COMPONENTS
        );
        let file = File::open(&bottle_path)?;
        extract_tar_gz(GzDecoder::new(file), keg_path, STRIP_COMPONENTS, &bottle_path)?;
        ensure_write_permissions(keg_path)?;
        relocate(keg_path, &self.config)?;
        debug!(
            "Bottle pour complete for {} at {}",
            formula.name,
            keg_path.display()
        );
        Ok(keg_path.to_path_buf())
    }
}

impl BottleProvider for CachedBottleProvider {
    fn has_bottle(&self, formula: &Formula) -> bool {
        formula.bottle.is_some() && self.bottle_path(formula).is_file()
    }

    fn pour(&self, formula: &Formula, keg_path: &Path) -> Result<PathBuf> {
        self.pour_inner(formula, keg_path)
            .map_err(|e| match e {
                TbError::PourError { .. } => e,
                other => TbError::PourError {
                    name: formula.name.clone(),
                    cause: other.to_string(),
                },
            })
    }
}

fn extract_tar_gz<R: Read>(
    reader: R,
    target_dir: &Path,
    strip_components: usize,
    archive_path_for_log: &Path,
) -> Result<()> {
    let mut archive = Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);

    let mut errors: Vec<String> = Vec::new();
    for entry_result in archive.entries()? {
        let mut entry = entry_result.map_err(|e| {
            TbError::Generic(format!(
                "Error reading TAR entry from {}: {}",
                archive_path_for_log.display(),
                e
            ))
        })?;
        let original_path = entry.path()?.into_owned();

        let mut target = target_dir.to_path_buf();
        let mut kept = 0;
        let mut unsafe_path = false;
        for component in original_path.components().skip(strip_components) {
            match component {
                Component::Normal(p) => {
                    target.push(p);
                    kept += 1;
                }
                Component::CurDir => {}
                Component::ParentDir | Component::Prefix(_) | Component::RootDir => {
                    unsafe_path = true;
                    break;
                }
            }
        }
        if unsafe_path {
            let msg = format!(
                "Disallowed path {} in {}",
                original_path.display(),
                archive_path_for_log.display()
            );
            error!("{}", msg);
            errors.push(msg);
            continue;
        }
        if kept == 0 {
            debug!("Skipping entry due to strip_components: {:?}", original_path);
            continue;
        }

        if let Some(parent) = target.parent() {
            tb_io::create_dir_all(parent)?;
        }
        if let Err(e) = entry.unpack(&target) {
            let msg = format!("Failed to unpack {}: {}", target.display(), e);
            error!("{}", msg);
            errors.push(msg);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(TbError::Generic(format!(
            "{} error(s) extracting {}: {}",
            errors.len(),
            archive_path_for_log.display(),
            errors.join("; ")
        )))
    }
}

fn ensure_write_permissions(path: &Path) -> Result<()> {
    for entry in WalkDir::new(path).min_depth(1).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_symlink() {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let mut perms = metadata.permissions();
        let current_mode = perms.mode();
        let new_mode = current_mode | 0o200;
        if new_mode != current_mode {
            perms.set_mode(new_mode);
            let _ = fs::set_permissions(entry.path(), perms);
        }
    }
    Ok(())
}

/// Rewrites placeholders in every text file of the keg. Binary files are left alone.
fn relocate(keg_path: &Path, config: &Config) -> Result<()> {
    let mut repl: HashMap<&str, String> = HashMap::new();
    repl.insert(CELLAR_PLACEHOLDER, config.cellar_dir().display().to_string());
    repl.insert(PREFIX_PLACEHOLDER, config.prefix().display().to_string());

    let mut relocated = 0;
    for entry in WalkDir::new(keg_path).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let content = match fs::read(path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Could not read {} for relocation: {}", path.display(), e);
                continue;
            }
        };
        if content.contains(&0) {
            continue;
        }
        let Ok(text) = String::from_utf8(content) else {
            continue;
        };
        if !repl.keys().any(|placeholder| text.contains(placeholder)) {
            continue;
        }
        let mut new_text = text;
        for (placeholder, value) in &repl {
            new_text = new_text.replace(placeholder, value);
        }
        tb_io::atomic_write_file(path, new_text.as_bytes())?;
        relocated += 1;
    }
    debug!("Relocated {} text file(s) in {}", relocated, keg_path.display());
    Ok(())
}

/// Writes a bottle archive for `keg_path` in the layout `pour` expects. Used to cache bottles
/// of locally built kegs.
pub fn write_bottle(keg_path: &Path, name: &str, version: &str, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        tb_io::create_dir_all(parent)?;
    }
    let file = File::create(dest)?;
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);
    builder.append_dir_all(Path::new(name).join(version), keg_path)?;
    builder.into_inner()?.finish()?;
    Ok(())
}
