// tb-common/src/cache.rs
// Layout of the download cache: fetched sources under `downloads/`, bottles under `bottles/`.
// Every cached artifact is named `<name>--<version>.<ext>`.

use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use tracing::warn;

use super::error::Result;
use crate::Config;

const ARCHIVE_EXTENSIONS: &[&str] = &[
    ".bottle.tar.gz",
    ".tar.gz",
    ".tar.bz2",
    ".tar.xz",
    ".tgz",
    ".tbz",
    ".tar",
    ".zip",
    ".gz",
    ".patch",
    ".diff",
];

/// A file in the cache whose name follows `<name>--<version>.<ext>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub path: PathBuf,
    pub name: String,
    pub version: String,
    pub modified: Option<SystemTime>,
}

impl CacheEntry {
    pub fn older_than(&self, age: Duration, now: SystemTime) -> bool {
        self.modified
            .and_then(|m| now.duration_since(m).ok())
            .is_some_and(|elapsed| elapsed > age)
    }
}

#[derive(Debug, Clone)]
pub struct Cache {
    cache_dir: PathBuf,
}

impl Cache {
    pub fn new(config: &Config) -> Self {
        Self {
            cache_dir: config.cache_dir(),
        }
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.cache_dir.join("downloads")
    }

    pub fn bottles_dir(&self) -> PathBuf {
        self.cache_dir.join("bottles")
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(self.downloads_dir())?;
        fs::create_dir_all(self.bottles_dir())?;
        Ok(())
    }

    /// Cache path for a download, keeping the url's archive extension.
    pub fn download_path(&self, name: &str, version: &str, url: &str) -> PathBuf {
        let file_name = url.rsplit('/').next().unwrap_or_default();
        let ext = ARCHIVE_EXTENSIONS
            .iter()
            .find(|ext| file_name.ends_with(*ext))
            .copied()
            .unwrap_or(".tar.gz");
        self.downloads_dir().join(format!("{name}--{version}{ext}"))
    }

    pub fn bottle_path(&self, name: &str, version: &str) -> PathBuf {
        self.bottles_dir()
            .join(format!("{name}--{version}.bottle.tar.gz"))
    }

    /// Every recognisable entry in both cache subdirectories.
    pub fn entries(&self) -> Result<Vec<CacheEntry>> {
        let mut entries = Vec::new();
        for dir in [self.downloads_dir(), self.bottles_dir()] {
            let read_dir = match fs::read_dir(&dir) {
                Ok(read_dir) => read_dir,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            for entry in read_dir {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!("Error reading cache entry in {}: {}", dir.display(), e);
                        continue;
                    }
                };
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if let Some((name, version)) = parse_cache_file_name(file_name) {
                    let modified = entry.metadata().and_then(|m| m.modified()).ok();
                    entries.push(CacheEntry {
                        name,
                        version,
                        modified,
                        path,
                    });
                }
            }
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }
}

/// Splits `<name>--<version>.<ext>` into name and version.
pub fn parse_cache_file_name(file_name: &str) -> Option<(String, String)> {
    let (name, rest) = file_name.split_once("--")?;
    let version = ARCHIVE_EXTENSIONS
        .iter()
        .find_map(|ext| rest.strip_suffix(ext))
        .or_else(|| rest.rsplit_once('.').map(|(v, _)| v))?;
    if name.is_empty() || version.is_empty() {
        return None;
    }
    Some((name.to_string(), version.to_string()))
}
