// tb/src/cli/cleanup.rs
use clap::Args;
use colored::Colorize;
use tb_common::config::Config;
use tb_common::error::Result;
use tb_common::formulary::Formulary;
use tb_common::keg::KegRegistry;
use tb_core::cleanup::{Cleanup as CleanupRun, CleanupOptions, Prune};

use super::ui;

#[derive(Args, Debug)]
pub struct Cleanup {
    /// Only clean up these formulae
    pub names: Vec<String>,
    /// Remove cached downloads older than this many days, or `all`
    #[arg(long, value_name = "DAYS|all")]
    pub prune: Option<String>,
    /// Show what would be removed without removing anything
    #[arg(long, short = 'n')]
    pub dry_run: bool,
    /// Also remove old versions of keg-only formulae
    #[arg(long)]
    pub force: bool,
}

impl Cleanup {
    pub fn run(&self, config: &Config) -> Result<()> {
        let prune = self
            .prune
            .as_deref()
            .map(str::parse::<Prune>)
            .transpose()?;
        let options = CleanupOptions {
            names: self.names.clone(),
            prune,
            dry_run: self.dry_run,
            force: self.force,
        };
        let registry = KegRegistry::new(config.clone());
        let formulary = Formulary::new(config);
        let report = CleanupRun::new(&registry, &formulary).run(&options)?;

        let verb = if report.dry_run { "Would remove" } else { "Removing" };
        for name in &report.skipped_pinned {
            ui::warning(&format!("Skipping {name}: it is pinned"));
        }
        for keg in &report.kegs {
            println!("{verb}: {}", keg.path.display().to_string().yellow());
        }
        for path in report.cache_files.iter().chain(&report.markers) {
            println!("{verb}: {}", path.display());
        }
        if report.is_empty() {
            println!("Nothing to clean up");
        } else if report.dry_run {
            println!("This operation would free approximately {}", ui::format_size(report.freed_bytes));
        } else {
            println!("This operation freed approximately {}", ui::format_size(report.freed_bytes));
        }
        Ok(())
    }
}
