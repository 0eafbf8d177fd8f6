// tb/src/cli/list.rs
use clap::Args;
use colored::Colorize;
use tb_common::config::Config;
use tb_common::error::Result;
use tb_common::keg::KegRegistry;

#[derive(Args, Debug)]
pub struct List {
    /// Show every installed version of each formula
    #[arg(long)]
    pub versions: bool,
    /// Only list pinned formulae
    #[arg(long)]
    pub pinned: bool,
}

impl List {
    pub fn run(&self, config: &Config) -> Result<()> {
        let registry = KegRegistry::new(config.clone());
        let mut names = registry.list_racks()?;
        if self.pinned {
            names.retain(|name| registry.is_pinned(name));
        }
        names.sort();

        for name in names {
            let kegs = registry.kegs_for(&name)?;
            if kegs.is_empty() {
                continue;
            }
            if !self.versions {
                println!("{name}");
                continue;
            }
            let linked = registry.linked_keg(&name);
            let versions: Vec<String> = kegs
                .iter()
                .map(|keg| {
                    let version = keg.version_str();
                    if linked.as_ref().is_some_and(|l| l.path == keg.path) {
                        version.green().to_string()
                    } else {
                        version
                    }
                })
                .collect();
            println!("{} {}", name.bold(), versions.join(" "));
        }
        Ok(())
    }
}
