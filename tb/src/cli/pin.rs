// tb/src/cli/pin.rs
use clap::Args;
use colored::Colorize;
use tb_common::config::Config;
use tb_common::error::Result;
use tb_common::keg::KegRegistry;
use tracing::error;

use super::collect_failures;

#[derive(Args, Debug)]
pub struct Pin {
    /// Formulae to keep out of cleanup
    #[arg(required = true)]
    pub names: Vec<String>,
}

impl Pin {
    pub fn run(&self, config: &Config) -> Result<()> {
        let registry = KegRegistry::new(config.clone());
        let mut failures = Vec::new();
        for name in &self.names {
            match tb_core::pin::pin(&registry, name) {
                Ok(keg) => println!("Pinned {} at {}", name.cyan(), keg.version),
                Err(e) => {
                    error!("✖ Failed to pin '{}': {}", name, e);
                    failures.push((name.clone(), e));
                }
            }
        }
        collect_failures(failures)
    }
}

#[derive(Args, Debug)]
pub struct Unpin {
    #[arg(required = true)]
    pub names: Vec<String>,
}

impl Unpin {
    pub fn run(&self, config: &Config) -> Result<()> {
        let registry = KegRegistry::new(config.clone());
        let mut failures = Vec::new();
        for name in &self.names {
            match tb_core::pin::unpin(&registry, name) {
                Ok(true) => println!("Unpinned {}", name.cyan()),
                Ok(false) => println!("{name} is not pinned"),
                Err(e) => {
                    error!("✖ Failed to unpin '{}': {}", name, e);
                    failures.push((name.clone(), e));
                }
            }
        }
        collect_failures(failures)
    }
}
