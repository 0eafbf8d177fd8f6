// tb-common/src/model/version.rs
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, TbError};

/// A formula version as written in its definition.
///
/// The raw string is kept for display and paths. Ordering tries semver first (after padding
/// `1` / `1.2` to three components) and falls back to comparing numeric and alphabetic runs.
/// `HEAD` sorts above every other version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version(String);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Num(u64),
    Alpha(String),
}

impl Version {
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(TbError::ParseError("version", "empty version string".into()));
        }
        if trimmed.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(TbError::ParseError(
                "version",
                format!("invalid character in version '{trimmed}'"),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn head() -> Self {
        Self("HEAD".to_string())
    }

    pub fn is_head(&self) -> bool {
        self.0 == "HEAD" || self.0.starts_with("HEAD-")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Semver view of this version, if it has one.
    pub fn semver(&self) -> Option<semver::Version> {
        if self.is_head() {
            return None;
        }
        if let Ok(v) = semver::Version::parse(&self.0) {
            return Some(v);
        }
        let (core, rest) = match self.0.find(['-', '+']) {
            Some(idx) => self.0.split_at(idx),
            None => (self.0.as_str(), ""),
        };
        let padded = match core.split('.').count() {
            1 => format!("{core}.0.0{rest}"),
            2 => format!("{core}.0{rest}"),
            _ => return None,
        };
        semver::Version::parse(&padded).ok()
    }

    fn tokens(&self) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut chars = self.0.chars().peekable();
        while let Some(&c) = chars.peek() {
            if c.is_ascii_digit() {
                let mut run = String::new();
                while let Some(&d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                    run.push(d);
                    chars.next();
                }
                tokens.push(Token::Num(run.parse().unwrap_or(u64::MAX)));
            } else if c.is_alphabetic() {
                let mut run = String::new();
                while let Some(&a) = chars.peek().filter(|a| a.is_alphabetic()) {
                    run.push(a.to_ascii_lowercase());
                    chars.next();
                }
                tokens.push(Token::Alpha(run));
            } else {
                chars.next();
            }
        }
        tokens
    }

    fn compare_tokens(&self, other: &Self) -> Ordering {
        let ours = self.tokens();
        let theirs = other.tokens();
        let len = ours.len().max(theirs.len());
        for i in 0..len {
            let ord = match (ours.get(i), theirs.get(i)) {
                (Some(Token::Num(a)), Some(Token::Num(b))) => a.cmp(b),
                (Some(Token::Alpha(a)), Some(Token::Alpha(b))) => a.cmp(b),
                (Some(Token::Num(_)), Some(Token::Alpha(_))) => Ordering::Greater,
                (Some(Token::Alpha(_)), Some(Token::Num(_))) => Ordering::Less,
                // A trailing alpha run is a pre-release marker ("1.0beta" < "1.0").
                (Some(Token::Alpha(_)), None) => Ordering::Less,
                (None, Some(Token::Alpha(_))) => Ordering::Greater,
                (Some(Token::Num(a)), None) => a.cmp(&0),
                (None, Some(Token::Num(b))) => 0.cmp(b),
                (None, None) => Ordering::Equal,
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let ord = match (self.is_head(), other.is_head()) {
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (true, true) => Ordering::Equal,
            (false, false) => match (self.semver(), other.semver()) {
                (Some(a), Some(b)) => a.cmp_precedence(&b),
                _ => self.compare_tokens(other),
            },
        };
        ord.then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for Version {
    type Err = TbError;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Version {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Version::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// A version plus the formula revision, written `<version>[_<revision>]`. This is the name of
/// a keg directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PkgVersion {
    pub version: Version,
    pub revision: u32,
}

impl PkgVersion {
    pub fn new(version: Version, revision: u32) -> Self {
        Self { version, revision }
    }

    pub fn parse(s: &str) -> Result<Self> {
        if let Some((version, revision)) = s.rsplit_once('_') {
            if let Ok(revision) = revision.parse::<u32>() {
                return Ok(Self::new(Version::parse(version)?, revision));
            }
        }
        Ok(Self::new(Version::parse(s)?, 0))
    }

    pub fn is_head(&self) -> bool {
        self.version.is_head()
    }
}

impl Ord for PkgVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.version
            .cmp(&other.version)
            .then_with(|| self.revision.cmp(&other.revision))
    }
}

impl PartialOrd for PkgVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PkgVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.revision == 0 {
            write!(f, "{}", self.version)
        } else {
            write!(f, "{}_{}", self.version, self.revision)
        }
    }
}

impl FromStr for PkgVersion {
    type Err = TbError;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        PkgVersion::parse(s)
    }
}

impl Serialize for PkgVersion {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PkgVersion {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        PkgVersion::from_str(&s).map_err(serde::de::Error::custom)
    }
}
