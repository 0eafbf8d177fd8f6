// tb-common/src/dependency/mod.rs
pub mod definition;
pub mod requirement;
pub mod resolver;

pub use definition::{Dependency, DependencyExt, DependencyTag};
pub use requirement::{Requirement, RequirementKind, SystemProbe};
pub use resolver::{
    DependencyResolver, ExpandedDependency, Expansion, PlanAction, ResolutionContext, Visit,
};
