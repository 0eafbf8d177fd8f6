// tb-common/src/dependency/requirement.rs
use std::fmt;

use serde::{Deserialize, Serialize};

use super::definition::{Dependency, DependencyTag};
use crate::model::Version;

/// Answers questions about the machine a build runs on. The host implementation lives in
/// tb-core and shells out; expansion only ever sees this trait.
pub trait SystemProbe {
    fn os_version(&self) -> Option<Version>;
    fn has_executable(&self, name: &str) -> bool;
    fn supports_compiler_standard(&self, standard: &str) -> bool;
    fn arch(&self) -> String;
    fn has_build_tools(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequirementKind {
    MaximumOsVersion { version: Version },
    MinimumOsVersion { version: Version },
    Compiler { standard: String },
    Executable { command: String },
    Arch { arch: String },
}

impl fmt::Display for RequirementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaximumOsVersion { version } => write!(f, "OS version <= {version}"),
            Self::MinimumOsVersion { version } => write!(f, "OS version >= {version}"),
            Self::Compiler { standard } => write!(f, "a compiler supporting {standard}"),
            Self::Executable { command } => write!(f, "`{command}` on PATH"),
            Self::Arch { arch } => write!(f, "{arch} architecture"),
        }
    }
}

fn default_fatal() -> bool {
    true
}

/// A non-formula precondition of a formula.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Requirement {
    pub name: String,
    #[serde(flatten)]
    pub kind: RequirementKind,
    #[serde(default)]
    pub tags: DependencyTag,
    #[serde(default = "default_fatal")]
    pub fatal: bool,
    /// Formula that provides this requirement when the system does not.
    #[serde(default)]
    pub default_formula: Option<String>,
}

impl Requirement {
    pub fn new(name: impl Into<String>, kind: RequirementKind) -> Self {
        Self {
            name: name.into(),
            kind,
            tags: DependencyTag::RUNTIME,
            fatal: true,
            default_formula: None,
        }
    }

    pub fn option_name(&self) -> &str {
        &self.name
    }

    pub fn is_build(&self) -> bool {
        self.tags.contains(DependencyTag::BUILD)
    }

    pub fn is_optional(&self) -> bool {
        self.tags.contains(DependencyTag::OPTIONAL)
    }

    pub fn is_recommended(&self) -> bool {
        self.tags.contains(DependencyTag::RECOMMENDED)
    }

    pub fn satisfied(&self, probe: &dyn SystemProbe) -> bool {
        match &self.kind {
            RequirementKind::MaximumOsVersion { version } => {
                probe.os_version().is_some_and(|os| os <= *version)
            }
            RequirementKind::MinimumOsVersion { version } => {
                probe.os_version().is_some_and(|os| os >= *version)
            }
            RequirementKind::Compiler { standard } => probe.supports_compiler_standard(standard),
            RequirementKind::Executable { command } => probe.has_executable(command),
            RequirementKind::Arch { arch } => probe.arch() == *arch,
        }
    }

    /// The dependency that stands in for this requirement, carrying over its tags.
    pub fn to_dependency(&self) -> Option<Dependency> {
        self.default_formula
            .as_ref()
            .map(|formula| Dependency::new_with_tags(formula.clone(), self.tags))
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (requires {})", self.name, self.kind)
    }
}
