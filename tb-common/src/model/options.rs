// tb-common/src/model/options.rs
use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A set of option names (`with-foo`, `without-bar`, `universal`), stored without the leading
/// `--`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Options(BTreeSet<String>);

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl AsRef<str>) -> bool {
        self.0.insert(normalize(name.as_ref()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(normalize(name).as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn union(&self, other: &Options) -> Options {
        Options(self.0.union(&other.0).cloned().collect())
    }

    pub fn extend(&mut self, other: &Options) {
        self.0.extend(other.0.iter().cloned());
    }

    pub fn intersection(&self, other: &Options) -> Options {
        Options(self.0.intersection(&other.0).cloned().collect())
    }

    pub fn difference(&self, other: &Options) -> Options {
        Options(self.0.difference(&other.0).cloned().collect())
    }

    pub fn is_superset(&self, other: &Options) -> bool {
        self.0.is_superset(&other.0)
    }

    /// Space separated `--flag` form, as exported to build recipes.
    pub fn as_flags(&self) -> String {
        self.0
            .iter()
            .map(|o| format!("--{o}"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn normalize(name: &str) -> String {
    name.trim_start_matches('-').to_string()
}

impl<S: AsRef<str>> FromIterator<S> for Options {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut options = Options::new();
        for name in iter {
            options.insert(name);
        }
        options
    }
}

impl fmt::Display for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_flags())
    }
}

/// An option a formula declares, with its help text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormulaOption {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// The options a build was asked for, interpreted against what the formula declares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOptions {
    args: Options,
    declared: Options,
}

impl BuildOptions {
    pub fn new(args: Options, declared: Options) -> Self {
        Self { args, declared }
    }

    /// Whether the build includes `name`. An optional `name` needs an explicit `with-name`;
    /// a recommended one is on unless `without-name` was given. Undeclared names are off.
    pub fn with(&self, name: &str) -> bool {
        let with = format!("with-{name}");
        let without = format!("without-{name}");
        if self.declared.contains(&with) {
            self.args.contains(&with)
        } else if self.declared.contains(&without) {
            !self.args.contains(&without)
        } else {
            false
        }
    }

    pub fn without(&self, name: &str) -> bool {
        !self.with(name)
    }

    pub fn universal(&self) -> bool {
        self.args.contains("universal") && self.declared.contains("universal")
    }

    pub fn include(&self, name: &str) -> bool {
        self.args.contains(name)
    }

    pub fn args(&self) -> &Options {
        &self.args
    }

    pub fn used_options(&self) -> Options {
        self.declared.intersection(&self.args)
    }

    pub fn unused_options(&self) -> Options {
        self.declared.difference(&self.args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(names: &[&str]) -> Options {
        names.iter().copied().collect()
    }

    #[test]
    fn optional_needs_explicit_with() {
        let declared = opts(&["with-ssl"]);
        assert!(BuildOptions::new(Options::new(), declared.clone()).without("ssl"));
        assert!(BuildOptions::new(opts(&["with-ssl"]), declared).with("ssl"));
    }

    #[test]
    fn recommended_is_on_unless_suppressed() {
        let declared = opts(&["without-docs"]);
        assert!(BuildOptions::new(Options::new(), declared.clone()).with("docs"));
        assert!(BuildOptions::new(opts(&["without-docs"]), declared).without("docs"));
    }

    #[test]
    fn undeclared_names_are_off() {
        let build = BuildOptions::new(opts(&["with-x11"]), Options::new());
        assert!(build.without("x11"));
    }

    #[test]
    fn used_and_unused_split_declared_options() {
        let build = BuildOptions::new(
            opts(&["--with-ssl", "universal", "bogus"]),
            opts(&["with-ssl", "without-docs", "universal"]),
        );
        assert_eq!(build.used_options(), opts(&["with-ssl", "universal"]));
        assert_eq!(build.unused_options(), opts(&["without-docs"]));
        assert!(build.universal());
    }

    #[test]
    fn leading_dashes_are_ignored() {
        let o = opts(&["--universal"]);
        assert!(o.contains("universal"));
        assert!(o.contains("--universal"));
        assert_eq!(o.as_flags(), "--universal");
    }
}
