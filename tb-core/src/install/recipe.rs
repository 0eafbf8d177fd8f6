// tb-core/src/install/recipe.rs
//! Default fetch and build adapters: sources land in the download cache, recipes run as
//! plain subprocesses in a throwaway staging directory.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tb_common::cache::Cache;
use tb_common::config::Config;
use tb_common::error::{Result, TbError};
use tb_common::model::{BuildOptions, Formula, SpecKind};
use tracing::{debug, warn};

use super::interrupt::InterruptSource;
use super::provider::{Builder, Fetcher};

/// Fetches `file://` URLs and local paths by copying, everything else through `curl`.
#[derive(Debug, Clone)]
pub struct CachedFetcher {
    cache: Cache,
}

impl CachedFetcher {
    pub fn new(cache: Cache) -> Self {
        Self { cache }
    }

    fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let dir = self.cache.downloads_dir();
        tb_io::create_dir_all(&dir)?;
        let partial = tempfile::Builder::new()
            .prefix(".download")
            .tempfile_in(&dir)?;

        if let Some(local) = local_source(url) {
            debug!("Copying {} into cache", local.display());
            fs::copy(&local, partial.path())?;
        } else {
            let argv: Vec<String> = ["curl", "--fail", "--location", "--silent", "--show-error"]
                .iter()
                .map(|s| s.to_string())
                .chain(["--output".to_string(), partial.path().display().to_string()])
                .chain([url.to_string()])
                .collect();
            let output = tb_io::run_command(&argv, None, &HashMap::new())?;
            if !output.status.success() {
                return Err(TbError::CommandExecError(format!(
                    "curl {url}: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }
        }
        partial
            .persist(dest)
            .map_err(|e| TbError::Io(Arc::new(e.error)))?;
        Ok(())
    }
}

impl Fetcher for CachedFetcher {
    fn fetch(&self, name: &str, version: &str, url: &str, sha256: Option<&str>) -> Result<PathBuf> {
        let dest = self.cache.download_path(name, version, url);
        let sha256 = sha256.filter(|s| !s.is_empty());

        if dest.is_file() {
            match sha256 {
                Some(expected) if tb_io::verify_checksum(&dest, expected).is_err() => {
                    warn!("[{}] Cached download is stale, fetching again", name);
                    tb_io::remove_file_if_exists(&dest)?;
                }
                _ => {
                    debug!("[{}] Using cached download {}", name, dest.display());
                    return Ok(dest);
                }
            }
        }

        debug!("[{}] Fetching {} -> {}", name, url, dest.display());
        self.download(url, &dest)?;
        if let Some(expected) = sha256 {
            if let Err(e) = tb_io::verify_checksum(&dest, expected) {
                tb_io::remove_file_if_exists(&dest)?;
                return Err(e);
            }
        }
        Ok(dest)
    }
}

fn local_source(url: &str) -> Option<PathBuf> {
    if let Some(path) = url.strip_prefix("file://") {
        return Some(PathBuf::from(path));
    }
    let path = Path::new(url);
    path.is_absolute().then(|| path.to_path_buf())
}

/// Runs a formula's `install` argv lines in order, each in the staging directory.
#[derive(Debug, Clone)]
pub struct RecipeBuilder {
    config: Config,
    interrupt: InterruptSource,
}

impl RecipeBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            interrupt: InterruptSource::default(),
        }
    }

    pub fn with_interrupt(mut self, interrupt: InterruptSource) -> Self {
        self.interrupt = interrupt;
        self
    }

    fn environment(
        &self,
        formula: &Formula,
        keg_path: &Path,
        options: Option<&BuildOptions>,
    ) -> HashMap<String, String> {
        let mut envs = HashMap::new();
        envs.insert("PREFIX".to_string(), keg_path.display().to_string());
        envs.insert(
            "TB_PREFIX".to_string(),
            self.config.prefix().display().to_string(),
        );
        envs.insert(
            "TB_CELLAR".to_string(),
            self.config.cellar_dir().display().to_string(),
        );
        envs.insert("TB_FORMULA".to_string(), formula.name.clone());
        envs.insert(
            "TB_OPTIONS".to_string(),
            options
                .map(|o| o.used_options().as_flags())
                .unwrap_or_default(),
        );
        envs.insert(
            "MAKEFLAGS".to_string(),
            format!("-j{}", num_cpus::get().max(1)),
        );
        envs
    }

    /// Runs `lines` in `cwd`, logging each step's output under the formula's log directory.
    fn run_lines(
        &self,
        formula: &Formula,
        lines: &[Vec<String>],
        cwd: &Path,
        envs: &HashMap<String, String>,
        phase: &str,
    ) -> std::result::Result<(), String> {
        let log_dir = self.config.logs_dir().join(&formula.name);
        for (step, argv) in lines.iter().enumerate() {
            if self.interrupt.is_raised() {
                return Err("interrupted".to_string());
            }
            let output = tb_io::run_command(argv, Some(cwd), envs).map_err(|e| e.to_string())?;
            write_step_log(&log_dir, phase, step, argv, &output);
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
                return Err(format!(
                    "`{}` failed with {}{}",
                    argv.join(" "),
                    output.status,
                    if tail.is_empty() {
                        String::new()
                    } else {
                        format!(": {}", tail.into_iter().rev().collect::<Vec<_>>().join("\n"))
                    }
                ));
            }
        }
        Ok(())
    }
}

fn write_step_log(
    log_dir: &Path,
    phase: &str,
    step: usize,
    argv: &[String],
    output: &std::process::Output,
) {
    let program = argv
        .first()
        .and_then(|p| Path::new(p).file_name())
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let path = log_dir.join(format!("{phase}.{:02}.{program}.log", step + 1));
    let mut contents = format!("{}\n\n", argv.join(" ")).into_bytes();
    contents.extend_from_slice(&output.stdout);
    contents.extend_from_slice(&output.stderr);
    if let Err(e) = tb_io::create_dir_all(log_dir).and_then(|()| tb_io::atomic_write_file(&path, &contents)) {
        debug!("Could not write build log {}: {}", path.display(), e);
    }
}

impl Builder for RecipeBuilder {
    fn build(
        &self,
        formula: &Formula,
        spec: SpecKind,
        keg_path: &Path,
        options: &BuildOptions,
        source: Option<&Path>,
    ) -> Result<PathBuf> {
        let build_error = |cause: String| TbError::BuildError {
            name: formula.name.clone(),
            cause,
        };
        if formula.install.is_empty() {
            return Err(build_error("formula has no install recipe".to_string()));
        }

        let staging = tempfile::Builder::new()
            .prefix(&format!("tb-build-{}-", formula.name))
            .tempdir()?;
        debug!(
            "[{}] Building {} spec in {}",
            formula.name,
            spec,
            staging.path().display()
        );
        let mut envs = self.environment(formula, keg_path, Some(options));
        if let Some(source) = source {
            let file_name = source
                .file_name()
                .ok_or_else(|| build_error(format!("bad source path {}", source.display())))?;
            let staged = staging.path().join(file_name);
            fs::copy(source, &staged)?;
            envs.insert("TB_SOURCE".to_string(), staged.display().to_string());
        }

        tb_io::create_dir_all(keg_path)?;
        self.run_lines(formula, &formula.install, staging.path(), &envs, "install")
            .map_err(|cause| {
                if self.interrupt.is_raised() {
                    TbError::Interrupted(formula.name.clone())
                } else {
                    build_error(cause)
                }
            })?;
        debug!("[{}] Build finished into {}", formula.name, keg_path.display());
        Ok(keg_path.to_path_buf())
    }

    fn post_install(&self, formula: &Formula, keg_path: &Path) -> Result<()> {
        if formula.post_install.is_empty() {
            return Ok(());
        }
        let envs = self.environment(formula, keg_path, None);
        self.run_lines(formula, &formula.post_install, keg_path, &envs, "post_install")
            .map_err(|cause| TbError::BuildError {
                name: formula.name.clone(),
                cause: format!("post-install: {cause}"),
            })
    }
}
