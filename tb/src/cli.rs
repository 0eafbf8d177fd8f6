// tb/src/cli.rs
//! Defines the command-line argument structure using clap.
use clap::{ArgAction, Parser, Subcommand};
use tb_common::error::{Result, TbError};
use tb_common::Config;

pub mod cleanup;
pub mod install;
pub mod link;
pub mod list;
pub mod pin;
pub mod switch;
pub mod ui;
pub mod uninstall;

use crate::cli::cleanup::Cleanup;
use crate::cli::install::InstallArgs;
use crate::cli::link::{Link, Unlink};
use crate::cli::list::List;
use crate::cli::pin::{Pin, Unpin};
use crate::cli::switch::Switch;
use crate::cli::uninstall::Uninstall;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, name = "tb", bin_name = "tb")]
#[command(propagate_version = true)]
pub struct CliArgs {
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Install(InstallArgs),
    Uninstall(Uninstall),
    Link(Link),
    Unlink(Unlink),
    Switch(Switch),
    Cleanup(Cleanup),
    Pin(Pin),
    Unpin(Unpin),
    List(List),
}

impl Command {
    pub fn run(&self, config: &Config) -> Result<()> {
        match self {
            Self::Install(command) => command.run(config),
            Self::Uninstall(command) => command.run(config),
            Self::Link(command) => command.run(config),
            Self::Unlink(command) => command.run(config),
            Self::Switch(command) => command.run(config),
            Self::Cleanup(command) => command.run(config),
            Self::Pin(command) => command.run(config),
            Self::Unpin(command) => command.run(config),
            Self::List(command) => command.run(config),
        }
    }
}

/// Folds per-name failures of a multi-name command into one error. A single failure is
/// returned as is so its exit code survives.
pub(crate) fn collect_failures(mut failures: Vec<(String, TbError)>) -> Result<()> {
    match failures.len() {
        0 => Ok(()),
        1 => Err(failures.remove(0).1),
        n => Err(TbError::Generic(format!(
            "{n} of the requested formulae failed: {}",
            failures
                .iter()
                .map(|(name, _)| name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}
