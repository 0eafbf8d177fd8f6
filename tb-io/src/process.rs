// tb-io/src/process.rs
use std::collections::HashMap;
use std::path::Path;
use std::process::{Output, Stdio};

use tb_common::error::{Result, TbError};
use tracing::{debug, error};

/// Runs `argv` to completion with captured output. A non-zero exit is returned as an `Ok`
/// output; only a failure to spawn is an error.
pub fn run_command(
    argv: &[String],
    cwd: Option<&Path>,
    envs: &HashMap<String, String>,
) -> Result<Output> {
    let (command, args) = argv
        .split_first()
        .ok_or_else(|| TbError::CommandExecError("empty command line".to_string()))?;
    debug!(
        "Running command: {} {:?} (cwd: {:?}, envs: {:?})",
        command,
        args,
        cwd,
        envs.keys().collect::<Vec<_>>()
    );
    let mut cmd = std::process::Command::new(command);
    cmd.args(args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    cmd.envs(envs);
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.stdin(Stdio::null());

    match cmd.output() {
        Ok(output) => {
            if !output.status.success() {
                debug!("Command failed with status: {}", output.status);
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stderr.trim().is_empty() {
                    debug!("Stderr:\n{}", stderr.trim());
                }
            } else {
                debug!("Command finished successfully.");
            }
            Ok(output)
        }
        Err(e) => {
            error!("Failed to execute command {}: {}", command, e);
            Err(TbError::CommandExecError(format!("{command}: {e}")))
        }
    }
}
