// tb-core/src/install/devtools.rs
//! Host toolchain and system discovery. This is the only place expansion-facing checks touch
//! the machine.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use tb_common::dependency::SystemProbe;
use tb_common::error::{Result, TbError};
use tb_common::model::Version;
use tracing::debug;

pub fn find_compiler(name: &str) -> Result<PathBuf> {
    let env_var_name = match name {
        "cc" => "CC",
        "c++" | "cxx" => "CXX",
        _ => "",
    };
    if !env_var_name.is_empty() {
        if let Ok(compiler_path) = env::var(env_var_name) {
            let path = PathBuf::from(compiler_path);
            if path.is_file() {
                debug!(
                    "Using compiler from env var {}: {}",
                    env_var_name,
                    path.display()
                );
                return Ok(path);
            }
            debug!(
                "Env var {} points to non-existent file: {}",
                env_var_name,
                path.display()
            );
        }
    }

    if cfg!(target_os = "macos") {
        debug!("Attempting to find '{name}' using xcrun");
        match Command::new("xcrun")
            .arg("--find")
            .arg(name)
            .stderr(Stdio::piped())
            .output()
        {
            Ok(out) if out.status.success() => {
                let path = PathBuf::from(String::from_utf8_lossy(&out.stdout).trim());
                if path.is_file() {
                    debug!("Found compiler via xcrun: {}", path.display());
                    return Ok(path);
                }
                debug!("xcrun returned unusable path for '{}'", name);
            }
            Ok(out) => {
                let stderr = String::from_utf8_lossy(&out.stderr);
                debug!("xcrun failed to find '{}': {}", name, stderr.trim());
            }
            Err(e) => debug!("Failed to execute xcrun: {e}. Falling back to PATH search."),
        }
    }

    debug!("Falling back to searching PATH for '{name}'");
    which::which(name)
        .map_err(|e| TbError::NotFound(format!("compiler '{name}' not found on PATH: {e}")))
}

/// `sw_vers -productVersion` on macOS, the kernel release elsewhere.
pub fn host_os_version() -> Option<Version> {
    let (program, arg) = if cfg!(target_os = "macos") {
        ("sw_vers", "-productVersion")
    } else {
        ("uname", "-r")
    };
    let output = Command::new(program)
        .arg(arg)
        .stderr(Stdio::null())
        .output()
        .ok()
        .filter(|out| out.status.success())?;
    let raw = String::from_utf8_lossy(&output.stdout).trim().to_string();
    // Kernel releases carry a distro suffix ("6.1.0-13-amd64").
    let numeric: String = raw
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let version = Version::parse(numeric.trim_end_matches('.')).ok();
    debug!("Host OS version: {:?} (raw '{}')", version, raw);
    version
}

/// Architecture in the naming formulae use (`arm64` rather than `aarch64`).
pub fn host_arch() -> String {
    match env::consts::ARCH {
        "aarch64" => "arm64".to_string(),
        other => other.to_string(),
    }
}

/// `SystemProbe` backed by the running machine. Compiler checks are memoized per standard.
#[derive(Debug, Default)]
pub struct HostProbe {
    compiler_checks: std::sync::Mutex<HashMap<String, bool>>,
}

impl HostProbe {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_standard(standard: &str) -> bool {
        let (compiler, language) = if standard.contains("++") {
            ("c++", "c++")
        } else {
            ("cc", "c")
        };
        let Ok(compiler_path) = find_compiler(compiler) else {
            return false;
        };
        let supported = Command::new(&compiler_path)
            .arg(format!("-std={standard}"))
            .args(["-x", language, "-E", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false);
        debug!(
            "{} {} -std={}",
            compiler_path.display(),
            if supported { "supports" } else { "rejects" },
            standard
        );
        supported
    }
}

impl SystemProbe for HostProbe {
    fn os_version(&self) -> Option<Version> {
        host_os_version()
    }

    fn has_executable(&self, name: &str) -> bool {
        which::which(name).is_ok()
    }

    fn supports_compiler_standard(&self, standard: &str) -> bool {
        let mut checks = self
            .compiler_checks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *checks
            .entry(standard.to_string())
            .or_insert_with(|| Self::check_standard(standard))
    }

    fn arch(&self) -> String {
        host_arch()
    }

    fn has_build_tools(&self) -> bool {
        find_compiler("cc").is_ok() && which::which("make").is_ok()
    }
}
