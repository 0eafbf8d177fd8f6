// tb-common/src/dependency/definition.rs
use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::model::Options;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct DependencyTag: u8 {
        const RUNTIME     = 0b00000001;
        const BUILD       = 0b00000010;
        const TEST        = 0b00000100;
        const OPTIONAL    = 0b00001000;
        const RECOMMENDED = 0b00010000;
    }
}

impl Default for DependencyTag {
    fn default() -> Self {
        Self::RUNTIME
    }
}

impl fmt::Display for DependencyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A declared edge from a formula to another formula.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    /// Target formula, optionally tap-qualified (`user/repo/name`).
    pub name: String,
    #[serde(default)]
    pub tags: DependencyTag,
    /// Options requested on the target.
    #[serde(default)]
    pub options: Options,
}

impl Dependency {
    pub fn new_runtime(name: impl Into<String>) -> Self {
        Self::new_with_tags(name, DependencyTag::RUNTIME)
    }

    pub fn new_with_tags(name: impl Into<String>, tags: DependencyTag) -> Self {
        Self {
            name: name.into(),
            tags,
            options: Options::new(),
        }
    }

    /// The bare formula name, without any tap qualifier.
    pub fn formula_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    /// Name used in the derived `with-`/`without-` options.
    pub fn option_name(&self) -> &str {
        self.formula_name()
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
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tags == DependencyTag::RUNTIME {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{} ({})", self.name, self.tags)
        }
    }
}

pub trait DependencyExt {
    fn filter_by_tags(&self, include: DependencyTag, exclude: DependencyTag) -> Vec<&Dependency>;
    fn runtime(&self) -> Vec<&Dependency>;
    fn build_time(&self) -> Vec<&Dependency>;
}

impl DependencyExt for Vec<Dependency> {
    fn filter_by_tags(&self, include: DependencyTag, exclude: DependencyTag) -> Vec<&Dependency> {
        self.iter()
            .filter(|dep| dep.tags.contains(include) && !dep.tags.intersects(exclude))
            .collect()
    }

    fn runtime(&self) -> Vec<&Dependency> {
        // Optional and recommended edges are runtime edges once enabled.
        self.iter()
            .filter(|dep| {
                dep.tags.intersects(
                    DependencyTag::RUNTIME | DependencyTag::RECOMMENDED | DependencyTag::OPTIONAL,
                )
            })
            .collect()
    }

    fn build_time(&self) -> Vec<&Dependency> {
        self.filter_by_tags(DependencyTag::BUILD, DependencyTag::empty())
    }
}
