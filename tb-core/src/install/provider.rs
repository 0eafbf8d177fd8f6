// tb-core/src/install/provider.rs
//! Collaborators the installer delegates to. The defaults live in `recipe` and `bottle`;
//! tests swap in fakes.

use std::path::{Path, PathBuf};

use tb_common::error::Result;
use tb_common::model::{BuildOptions, Formula, SpecKind};

pub trait Fetcher {
    /// Downloads `url` as `<name>--<version>` and verifies it against `sha256` when one is
    /// given. Returns the local path.
    fn fetch(&self, name: &str, version: &str, url: &str, sha256: Option<&str>) -> Result<PathBuf>;
}

pub trait Builder {
    /// Builds `formula` into `keg_path` from the fetched `source`, if the spec has one.
    fn build(
        &self,
        formula: &Formula,
        spec: SpecKind,
        keg_path: &Path,
        options: &BuildOptions,
        source: Option<&Path>,
    ) -> Result<PathBuf>;

    fn post_install(&self, formula: &Formula, keg_path: &Path) -> Result<()>;
}

pub trait BottleProvider {
    fn has_bottle(&self, formula: &Formula) -> bool;

    /// Pours the formula's bottle into `keg_path`.
    fn pour(&self, formula: &Formula, keg_path: &Path) -> Result<PathBuf>;
}
