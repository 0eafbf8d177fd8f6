// tb/src/cli/switch.rs
use clap::Args;
use colored::Colorize;
use tb_common::config::Config;
use tb_common::error::Result;
use tb_common::formulary::Formulary;
use tb_common::keg::KegRegistry;

#[derive(Args, Debug)]
pub struct Switch {
    pub name: String,
    /// The installed version to make active
    pub version: String,
}

impl Switch {
    pub fn run(&self, config: &Config) -> Result<()> {
        let registry = KegRegistry::new(config.clone());
        let formulary = Formulary::new(config);
        let report = tb_core::link::switch(&registry, &formulary, &self.name, &self.version)?;
        for keg in &report.unlinked {
            println!("Unlinked {} {}", keg.name, keg.version);
        }
        match &report.linked {
            Some(link) => println!(
                "{} is now {} ({} symlinks)",
                self.name.cyan(),
                report.keg.version.to_string().green(),
                link.created.len() + link.repointed.len() + link.unchanged
            ),
            None => println!(
                "{} is now {} (keg-only, opt link only)",
                self.name.cyan(),
                report.keg.version.to_string().green()
            ),
        }
        Ok(())
    }
}
