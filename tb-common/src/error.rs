use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// A requirement that could not be satisfied, attributed to the formula that declared it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsatisfiedRequirement {
    pub dependent: String,
    pub requirement: String,
    pub fatal: bool,
}

impl fmt::Display for UnsatisfiedRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.dependent, self.requirement)
    }
}

fn join_unsatisfied(reqs: &[UnsatisfiedRequirement]) -> String {
    reqs.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug, Clone)]
pub enum TbError {
    #[error("I/O Error: {0}")]
    Io(#[from] Arc<std::io::Error>),

    #[error("JSON Parsing Error: {0}")]
    Json(#[from] Arc<serde_json::Error>),

    #[error("Semantic Versioning Error: {0}")]
    SemVer(#[from] Arc<semver::Error>),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Cache Error: {0}")]
    Cache(String),

    #[error("Resource Not Found: {0}")]
    NotFound(String),

    #[error("No such keg: {0}")]
    KegNotFound(String),

    #[error("{name} has multiple installed versions ({}); specify one", versions.join(", "))]
    MultipleVersionsInstalled { name: String, versions: Vec<String> },

    #[error("Unsatisfied requirements: {}", join_unsatisfied(.0))]
    UnsatisfiedRequirements(Vec<UnsatisfiedRequirement>),

    #[error("Cannot install {name} because conflicting formulae are linked: {}", conflicts.join(", "))]
    Conflict { name: String, conflicts: Vec<String> },

    #[error("Could not symlink {}: already owned by {owner} ({}); target keg {}", path.display(), owner_keg.display(), keg.display())]
    LinkConflict {
        path: PathBuf,
        keg: PathBuf,
        owner: String,
        owner_keg: PathBuf,
    },

    #[error("{name}-{installed} already installed; to install {requested}, first run `tb unlink {name}`")]
    AlreadyInstalled {
        name: String,
        installed: String,
        requested: String,
    },

    #[error("No bottle or build tools available for: {}", .0.join(", "))]
    BuildTools(Vec<String>),

    #[error("Failed to build {name}: {cause}")]
    BuildError { name: String, cause: String },

    #[error("Failed to pour bottle for {name}: {cause}")]
    PourError { name: String, cause: String },

    #[error("Operation already in progress for {name}: {detail}")]
    OperationInProgress { name: String, detail: String },

    #[error("Checksum Mismatch: {0}")]
    ChecksumMismatch(String),

    #[error("Dependency Error: {0}")]
    DependencyError(String),

    #[error("{0} is keg-only; link it with --force")]
    KegOnly(String),

    #[error("Interrupted while installing {0}")]
    Interrupted(String),

    #[error("Parsing Error in {0}: {1}")]
    ParseError(&'static str, String),

    #[error("Failed to execute command: {0}")]
    CommandExecError(String),

    #[error("Generic Error: {0}")]
    Generic(String),
}

impl TbError {
    /// Process exit code for this error. Lookup failures get their own codes so scripts can tell
    /// "nothing to do" apart from "ambiguous request".
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::KegNotFound(_) => 2,
            Self::MultipleVersionsInstalled { .. } => 3,
            _ => 1,
        }
    }

    /// True for errors raised before anything on disk was touched.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            Self::UnsatisfiedRequirements(_)
                | Self::Conflict { .. }
                | Self::AlreadyInstalled { .. }
                | Self::BuildTools(_)
        )
    }
}

impl From<std::io::Error> for TbError {
    fn from(err: std::io::Error) -> Self {
        TbError::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for TbError {
    fn from(err: serde_json::Error) -> Self {
        TbError::Json(Arc::new(err))
    }
}

impl From<semver::Error> for TbError {
    fn from(err: semver::Error) -> Self {
        TbError::SemVer(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, TbError>;
