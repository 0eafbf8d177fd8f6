// tb/src/cli/install.rs

use clap::Args;
use colored::Colorize;
use tb_common::cache::Cache;
use tb_common::config::Config;
use tb_common::error::Result;
use tb_common::formulary::Formulary;
use tb_common::keg::KegRegistry;
use tb_common::model::{Options, SpecKind};
use tb_core::install::{
    CachedBottleProvider, CachedFetcher, Collaborators, FormulaInstaller, HostProbe,
    InstallOptions, InstallOutcome, InstallSession, InterruptGuard, RecipeBuilder,
};
use tracing::{error, instrument};

use super::{collect_failures, ui};

#[derive(Debug, Args)]
pub struct InstallArgs {
    #[arg(required = true)]
    names: Vec<String>,

    /// Install even if conflicting formulae are linked, or reinstall the same version
    #[arg(long)]
    force: bool,
    /// Install only the named formulae, none of their dependencies
    #[arg(long)]
    ignore_dependencies: bool,
    /// Install the dependencies of the named formulae but not the formulae themselves
    #[arg(long, conflicts_with = "ignore_dependencies")]
    only_dependencies: bool,
    /// Build the development head
    #[arg(long = "HEAD", conflicts_with = "devel")]
    head: bool,
    /// Build the devel spec
    #[arg(long)]
    devel: bool,
    #[arg(
        long,
        short = 's',
        help = "Build from source even if a bottle is available"
    )]
    build_from_source: bool,
    /// Enable an optional dependency or feature (repeatable)
    #[arg(long = "with", value_name = "NAME")]
    with: Vec<String>,
    /// Disable a recommended dependency or feature (repeatable)
    #[arg(long = "without", value_name = "NAME")]
    without: Vec<String>,
    /// Build universal binaries
    #[arg(long)]
    universal: bool,
}

impl InstallArgs {
    fn install_options(&self) -> InstallOptions {
        let mut options = Options::new();
        for name in &self.with {
            options.insert(format!("with-{name}"));
        }
        for name in &self.without {
            options.insert(format!("without-{name}"));
        }
        if self.universal {
            options.insert("universal");
        }
        let spec = if self.head {
            SpecKind::Head
        } else if self.devel {
            SpecKind::Devel
        } else {
            SpecKind::Stable
        };
        InstallOptions {
            force: self.force,
            ignore_dependencies: self.ignore_dependencies,
            only_dependencies: self.only_dependencies,
            spec,
            build_from_source: self.build_from_source,
            options,
            installed_as_dependency: false,
        }
    }

    #[instrument(skip(self, config), fields(targets = ?self.names))]
    pub fn run(&self, config: &Config) -> Result<()> {
        let registry = KegRegistry::new(config.clone());
        let formulary = Formulary::new(config);
        let probe = HostProbe::new();
        let fetcher = CachedFetcher::new(Cache::new(config));
        let builder = RecipeBuilder::new(config.clone());
        let bottles = CachedBottleProvider::new(config.clone());
        let installer = FormulaInstaller::new(
            &registry,
            &formulary,
            Collaborators {
                probe: &probe,
                fetcher: &fetcher,
                builder: &builder,
                bottles: &bottles,
            },
        );

        let options = self.install_options();
        let _interrupt = InterruptGuard::install();
        let mut session = InstallSession::new();
        let mut failures = Vec::new();
        for name in &self.names {
            ui::header(&format!("Installing {name}"));
            match installer.install_name(&mut session, name, &options) {
                Ok(outcome) => print_outcome(&outcome),
                Err(e) => {
                    error!("✖ Failed to install '{}': {}", name, e);
                    failures.push((name.clone(), e));
                }
            }
        }
        let dependencies: Vec<String> = session
            .installed()
            .iter()
            .filter(|keg| !self.names.contains(&keg.name))
            .map(|keg| format!("{} {}", keg.name.cyan(), keg.version))
            .collect();
        if !dependencies.is_empty() {
            println!("Installed dependencies: {}", dependencies.join(", "));
        }
        collect_failures(failures)
    }
}

fn print_outcome(outcome: &InstallOutcome) {
    match outcome {
        InstallOutcome::Installed {
            keg,
            poured_from_bottle,
            link,
        } => {
            let (file_count, size) = ui::count_files_and_size(&keg.path);
            println!(
                "✓ {} {} {} ({} files, {})",
                if *poured_from_bottle { "Poured" } else { "Built" },
                keg.name.green(),
                keg.version,
                file_count,
                ui::format_size(size)
            );
            match link {
                Some(report) => println!("  {} symlinks created", report.created.len()),
                None => println!("  {} is not linked into the prefix", keg.name),
            }
        }
        InstallOutcome::AlreadyInstalled(keg) => ui::warning(&format!(
            "{} {} is already installed; use --force to reinstall",
            keg.name, keg.version
        )),
        InstallOutcome::AlreadyAttempted(name) => {
            println!("  {name} was already handled in this run")
        }
        InstallOutcome::DependenciesOnly(name) => {
            println!("✓ Dependencies of {} installed", name.green())
        }
    }
}
