// tb/src/cli/link.rs
use clap::Args;
use colored::Colorize;
use tb_common::config::Config;
use tb_common::error::Result;
use tb_common::formulary::Formulary;
use tb_common::keg::KegRegistry;
use tb_core::link::{opt_link, LinkOptions, LinkReport, Linker};
use tracing::warn;

use super::ui;

#[derive(Args, Debug)]
pub struct Link {
    pub name: String,
    /// Replace files and symlinks that belong to something else
    #[arg(long)]
    pub overwrite: bool,
    /// List what would be linked without changing anything
    #[arg(long, short = 'n')]
    pub dry_run: bool,
    /// Link keg-only formulae too
    #[arg(long)]
    pub force: bool,
}

impl Link {
    pub fn run(&self, config: &Config) -> Result<()> {
        let registry = KegRegistry::new(config.clone());
        let keg = registry.resolve_keg(&self.name)?;
        let options = LinkOptions {
            overwrite: self.overwrite,
            dry_run: self.dry_run,
            force: self.force,
        };
        let linker = Linker::new(&registry);
        let report = match Formulary::new(config).load_formula(&self.name) {
            Ok(formula) => linker.link_formula(&formula, &keg, options)?,
            Err(e) => {
                warn!("[{}] No formula definition ({}); linking anyway", self.name, e);
                linker.link(&keg, options)?
            }
        };
        if !self.dry_run {
            opt_link(config, &keg)?;
        }
        print_report("Linking", &report);
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct Unlink {
    pub name: String,
    /// List what would be unlinked without changing anything
    #[arg(long, short = 'n')]
    pub dry_run: bool,
}

impl Unlink {
    pub fn run(&self, config: &Config) -> Result<()> {
        let registry = KegRegistry::new(config.clone());
        let keg = registry.resolve_keg(&self.name)?;
        let options = LinkOptions {
            dry_run: self.dry_run,
            ..LinkOptions::default()
        };
        let report = Linker::new(&registry).unlink(&keg, options)?;
        print_report("Unlinking", &report);
        Ok(())
    }
}

pub(crate) fn print_report(verb: &str, report: &LinkReport) {
    if report.dry_run {
        ui::header(&format!("Dry run: {} {}", verb.to_lowercase(), report.keg.display()));
        for path in &report.displaced {
            println!("{} {}", "unlink".yellow(), path.display());
        }
        for path in report
            .created
            .iter()
            .chain(&report.repointed)
            .chain(&report.removed)
        {
            println!("{}", path.display());
        }
        return;
    }
    if !report.displaced.is_empty() {
        println!("Unlinked {} symlinks of the previous version", report.displaced.len());
    }
    println!(
        "{} {}... {} symlinks {}",
        verb,
        report.keg.display().to_string().green(),
        report.changed(),
        if report.removed.is_empty() { "created" } else { "removed" }
    );
}
