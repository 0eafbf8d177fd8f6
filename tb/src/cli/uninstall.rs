// tb/src/cli/uninstall.rs
use std::collections::HashMap;
use std::path::PathBuf;

use clap::Args;
use colored::Colorize;
use tb_common::config::Config;
use tb_common::error::Result;
use tb_common::keg::KegRegistry;
use tb_core::uninstall::{uninstall_formula, UninstallOptions};
use tracing::error;

use super::{collect_failures, ui};

#[derive(Args, Debug)]
pub struct Uninstall {
    /// The names of the formulae to uninstall
    #[arg(required = true)]
    pub names: Vec<String>,
    /// Remove every installed version, not only the active one
    #[arg(long)]
    pub force: bool,
}

impl Uninstall {
    pub fn run(&self, config: &Config) -> Result<()> {
        let registry = KegRegistry::new(config.clone());
        let options = UninstallOptions { force: self.force };
        let mut failures = Vec::new();

        for name in &self.names {
            let sizes: HashMap<PathBuf, (usize, u64)> = registry
                .kegs_for(name)
                .unwrap_or_default()
                .into_iter()
                .map(|keg| {
                    let size = ui::count_files_and_size(&keg.path);
                    (keg.path, size)
                })
                .collect();
            match uninstall_formula(&registry, name, options) {
                Ok(report) => {
                    for keg in &report.removed {
                        let (file_count, size) =
                            sizes.get(&keg.path).copied().unwrap_or((0, 0));
                        println!(
                            "✓ Uninstalled {} ({} files, {})",
                            keg.path.display().to_string().green(),
                            file_count,
                            ui::format_size(size)
                        );
                    }
                    for dependent in &report.dependents {
                        ui::warning(&format!(
                            "{} is still required by {} {}",
                            name, dependent.name, dependent.version
                        ));
                    }
                    if !report.remaining.is_empty() {
                        println!(
                            "{} {} still installed; remove all with `tb uninstall --force {}`",
                            name,
                            report
                                .remaining
                                .iter()
                                .map(|k| k.version_str())
                                .collect::<Vec<_>>()
                                .join(", "),
                            name
                        );
                    }
                }
                Err(e) => {
                    error!("✖ Failed to uninstall '{}': {}", name.cyan(), e);
                    failures.push((name.clone(), e));
                }
            }
        }
        collect_failures(failures)
    }
}
