// tb-common/src/model/formula.rs
// Formula definitions as loaded from `<formula_dir>/<name>.json`.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::options::{FormulaOption, Options};
use super::version::{PkgVersion, Version};
use crate::dependency::{Dependency, DependencyTag, Requirement};
use crate::error::Result;

/// Which source spec of a formula an install uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecKind {
    #[default]
    Stable,
    Devel,
    Head,
}

impl fmt::Display for SpecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stable => write!(f, "stable"),
            Self::Devel => write!(f, "devel"),
            Self::Head => write!(f, "head"),
        }
    }
}

/// An alternative source (devel or HEAD).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    #[serde(default = "Version::head")]
    pub version: Version,
    pub url: String,
    #[serde(default)]
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BottleSpec {
    /// `"any"` for relocatable bottles, otherwise the cellar path the bottle was built for.
    #[serde(default = "any_cellar")]
    pub cellar: String,
    #[serde(default)]
    pub sha256: String,
    #[serde(default)]
    pub rebuild: u32,
}

fn any_cellar() -> String {
    "any".to_string()
}

impl BottleSpec {
    pub fn compatible_with(&self, cellar: &Path) -> bool {
        self.cellar == "any" || self.cellar == ":any" || Path::new(&self.cellar) == cellar
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Formula {
    pub name: String,
    pub version: Version,
    #[serde(default)]
    pub revision: u32,
    #[serde(default)]
    pub desc: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,

    /// Source download URL for the stable version.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub sha256: String,

    #[serde(default)]
    pub devel: Option<SourceSpec>,
    #[serde(default)]
    pub head: Option<SourceSpec>,

    #[serde(default)]
    pub bottle: Option<BottleSpec>,

    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default)]
    pub requirements: Vec<Requirement>,
    #[serde(default)]
    pub options: Vec<FormulaOption>,

    #[serde(default)]
    pub conflicts_with: Vec<String>,
    /// Reason the formula is keg-only, if it is.
    #[serde(default)]
    pub keg_only: Option<String>,
    #[serde(default)]
    pub require_universal_deps: bool,

    /// Build recipe: each entry is one argv, run in order.
    #[serde(default)]
    pub install: Vec<Vec<String>>,
    #[serde(default)]
    pub post_install: Vec<Vec<String>>,

    #[serde(default)]
    pub tap: Option<String>,
}

impl Formula {
    /// Creates a bare formula. Primarily for tests and manual construction.
    pub fn new(name: impl Into<String>, version_str: &str) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            version: Version::parse(version_str)?,
            revision: 0,
            desc: None,
            homepage: None,
            url: String::new(),
            sha256: String::new(),
            devel: None,
            head: None,
            bottle: None,
            dependencies: Vec::new(),
            requirements: Vec::new(),
            options: Vec::new(),
            conflicts_with: Vec::new(),
            keg_only: None,
            require_universal_deps: false,
            install: Vec::new(),
            post_install: Vec::new(),
            tap: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pkg_version(&self) -> PkgVersion {
        PkgVersion::new(self.version.clone(), self.revision)
    }

    /// Keg directory name for the given spec. Devel and HEAD kegs carry no revision.
    pub fn pkg_version_for(&self, spec: SpecKind) -> PkgVersion {
        match spec {
            SpecKind::Stable => self.pkg_version(),
            SpecKind::Devel => self
                .devel
                .as_ref()
                .map(|s| PkgVersion::new(s.version.clone(), 0))
                .unwrap_or_else(|| self.pkg_version()),
            SpecKind::Head => PkgVersion::new(
                self.head
                    .as_ref()
                    .map(|s| s.version.clone())
                    .unwrap_or_else(Version::head),
                0,
            ),
        }
    }

    /// Every formula has a stable spec. Whether it can be built from source is up to the
    /// builder; a bottle-only formula is still installable.
    pub fn has_spec(&self, spec: SpecKind) -> bool {
        match spec {
            SpecKind::Stable => true,
            SpecKind::Devel => self.devel.is_some(),
            SpecKind::Head => self.head.is_some(),
        }
    }

    /// Source url and checksum for a spec. HEAD sources are unchecked.
    pub fn source_for(&self, spec: SpecKind) -> Option<(&str, Option<&str>)> {
        match spec {
            SpecKind::Stable if !self.url.is_empty() => Some((
                self.url.as_str(),
                Some(self.sha256.as_str()).filter(|s| !s.is_empty()),
            )),
            SpecKind::Stable => None,
            SpecKind::Devel => self
                .devel
                .as_ref()
                .map(|s| (s.url.as_str(), s.sha256.as_deref())),
            SpecKind::Head => self.head.as_ref().map(|s| (s.url.as_str(), None)),
        }
    }

    pub fn is_keg_only(&self) -> bool {
        self.keg_only.is_some()
    }

    /// Every option the formula accepts: the explicit ones, plus `with-<dep>` for each optional
    /// edge and `without-<dep>` for each recommended edge.
    pub fn declared_options(&self) -> Options {
        let mut declared: Options = self.options.iter().map(|o| o.name.as_str()).collect();
        let optional = self
            .dependencies
            .iter()
            .map(|d| (d.option_name(), d.tags))
            .chain(self.requirements.iter().map(|r| (r.option_name(), r.tags)));
        for (name, tags) in optional {
            if tags.contains(DependencyTag::OPTIONAL) {
                declared.insert(format!("with-{name}"));
            } else if tags.contains(DependencyTag::RECOMMENDED) {
                declared.insert(format!("without-{name}"));
            }
        }
        declared
    }

    pub fn option_defined(&self, name: &str) -> bool {
        self.declared_options().contains(name)
    }

    pub fn conflicts_with(&self, other: &str) -> bool {
        self.conflicts_with.iter().any(|c| c == other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Formula {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn minimal_definition_gets_defaults() {
        let f = parse(r#"{"name":"zlib","version":"1.2.13","url":"file:///src/zlib.tar.gz"}"#);
        assert_eq!(f.pkg_version().to_string(), "1.2.13");
        assert!(f.dependencies.is_empty());
        assert!(!f.is_keg_only());
        assert!(f.has_spec(SpecKind::Stable));
        assert!(!f.has_spec(SpecKind::Head));
        assert_eq!(f.source_for(SpecKind::Stable), Some(("file:///src/zlib.tar.gz", None)));
    }

    #[test]
    fn bottle_only_definition_has_a_stable_spec() {
        let f = parse(r#"{"name":"jq","version":"1.7","bottle":{"cellar":"any"}}"#);
        assert!(f.has_spec(SpecKind::Stable));
        assert!(f.source_for(SpecKind::Stable).is_none());
        assert!(!f.has_spec(SpecKind::Devel));
    }

    #[test]
    fn declared_options_include_derived_ones() {
        let f = parse(
            r#"{
                "name": "wget",
                "version": "1.21",
                "options": [{"name": "universal"}],
                "dependencies": [
                    {"name": "openssl"},
                    {"name": "homebrew/dupes/libidn", "tags": "OPTIONAL"},
                    {"name": "gettext", "tags": "RECOMMENDED"}
                ],
                "requirements": [
                    {"name": "x11", "type": "executable", "command": "xterm", "tags": "OPTIONAL"}
                ]
            }"#,
        );
        let declared = f.declared_options();
        assert!(declared.contains("universal"));
        assert!(declared.contains("with-libidn"));
        assert!(declared.contains("without-gettext"));
        assert!(declared.contains("with-x11"));
        assert!(!declared.contains("with-openssl"));
    }

    #[test]
    fn spec_versions_follow_spec_kind() {
        let mut f = parse(
            r#"{
                "name": "foo",
                "version": "1.0",
                "revision": 2,
                "devel": {"version": "1.1-beta", "url": "file:///foo-devel.tar.gz"},
                "head": {"url": "file:///foo.git"}
            }"#,
        );
        assert_eq!(f.pkg_version_for(SpecKind::Stable).to_string(), "1.0_2");
        assert_eq!(f.pkg_version_for(SpecKind::Devel).to_string(), "1.1-beta");
        assert_eq!(f.pkg_version_for(SpecKind::Head).to_string(), "HEAD");
        f.head = None;
        assert!(f.source_for(SpecKind::Head).is_none());
    }

    #[test]
    fn bottle_cellar_compatibility() {
        let any = BottleSpec {
            cellar: "any".into(),
            sha256: String::new(),
            rebuild: 0,
        };
        let pinned = BottleSpec {
            cellar: "/usr/local/Cellar".into(),
            ..any.clone()
        };
        assert!(any.compatible_with(Path::new("/opt/tb/Cellar")));
        assert!(pinned.compatible_with(Path::new("/usr/local/Cellar")));
        assert!(!pinned.compatible_with(Path::new("/opt/tb/Cellar")));
    }
}
