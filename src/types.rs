//! Validated value types: strongly-typed wrappers that enforce invariants at
//! construction time so the rest of the crate cannot build a `Learning` with
//! a negative confidence or a query with a zero limit.

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// A path that has passed `validation::path::validate_file_path`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidatedPath {
    inner: PathBuf,
}

impl ValidatedPath {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("path is not valid UTF-8"))?;
        crate::validation::path::validate_file_path(path_str)?;
        Ok(Self {
            inner: path.to_path_buf(),
        })
    }

    pub fn as_path(&self) -> &Path {
        &self.inner
    }

    pub fn as_str(&self) -> &str {
        self.inner.to_str().expect("ValidatedPath is always UTF-8")
    }
}

impl fmt::Display for ValidatedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A `limit` parameter (top-k, blast-radius depth) guaranteed non-zero and
/// below a sane upper bound, so a caller-supplied `0` or `u32::MAX` can't
/// turn a bounded query into an unbounded scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValidatedLimit {
    inner: usize,
}

impl ValidatedLimit {
    pub const MAX: usize = 10_000;

    pub fn new(value: usize) -> Result<Self> {
        ensure!(value > 0, "limit must be non-zero");
        ensure!(value <= Self::MAX, "limit exceeds maximum of {}", Self::MAX);
        Ok(Self { inner: value })
    }

    pub fn get(&self) -> usize {
        self.inner
    }
}

impl Default for ValidatedLimit {
    fn default() -> Self {
        Self { inner: 50 }
    }
}

/// A blast-radius hop count, bounded so a cyclic import graph can't make
/// the recursive query run forever (spec §4.4, REDESIGN FLAGS).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValidatedDepth {
    inner: u32,
}

impl ValidatedDepth {
    pub const MAX: u32 = 32;

    pub fn new(value: u32) -> Result<Self> {
        ensure!(value > 0, "depth must be non-zero");
        ensure!(value <= Self::MAX, "depth exceeds maximum of {}", Self::MAX);
        Ok(Self { inner: value })
    }

    pub fn get(&self) -> u32 {
        self.inner
    }
}

impl Default for ValidatedDepth {
    fn default() -> Self {
        Self { inner: 5 }
    }
}

/// A `Learning.confidence` value, constrained to `[0, 1]` per spec §3.1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidatedConfidence {
    inner: f64,
}

impl ValidatedConfidence {
    pub fn new(value: f64) -> Result<Self> {
        crate::validation::numeric::validate_confidence(value)?;
        Ok(Self { inner: value })
    }

    pub fn get(&self) -> f64 {
        self.inner
    }
}

/// A non-empty string, the shape shared by ids, names, and content fields
/// that must never be stored blank (spec §3.1 invariant: "every entity has
/// a non-empty id").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NonEmptyString {
    inner: String,
}

impl NonEmptyString {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        ensure!(!value.trim().is_empty(), "value cannot be empty");
        Ok(Self { inner: value })
    }

    pub fn as_str(&self) -> &str {
        &self.inner
    }

    pub fn into_string(self) -> String {
        self.inner
    }
}

impl fmt::Display for NonEmptyString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

/// Paired creation/update timestamps, kept together so an update can never
/// regress `updated_at` below `created_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampPair {
    pub created_at: i64,
    pub updated_at: i64,
}

impl TimestampPair {
    pub fn new(now: i64) -> Self {
        Self {
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self, now: i64) -> Result<()> {
        ensure!(now >= self.created_at, "updated_at cannot precede created_at");
        self.updated_at = now;
        Ok(())
    }
}

/// Directed relationship kinds between **code** entities (spec §3.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeRelationKind {
    Calls,
    Imports,
    Exports,
    Extends,
    Implements,
    Defines,
}

impl CodeRelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Calls => "calls",
            Self::Imports => "imports",
            Self::Exports => "exports",
            Self::Extends => "extends",
            Self::Implements => "implements",
            Self::Defines => "defines",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Ok(match s {
            "calls" => Self::Calls,
            "imports" => Self::Imports,
            "exports" => Self::Exports,
            "extends" => Self::Extends,
            "implements" => Self::Implements,
            "defines" => Self::Defines,
            other => anyhow::bail!("unknown code relation kind: {other}"),
        })
    }
}

impl fmt::Display for CodeRelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Declaration kinds a code entity can be (spec §3.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeEntityKind {
    Function,
    Class,
    Interface,
    Type,
    Variable,
    Enum,
    File,
}

impl CodeEntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Class => "class",
            Self::Interface => "interface",
            Self::Type => "type",
            Self::Variable => "variable",
            Self::Enum => "enum",
            Self::File => "file",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Ok(match s {
            "function" => Self::Function,
            "class" => Self::Class,
            "interface" => Self::Interface,
            "type" => Self::Type,
            "variable" => Self::Variable,
            "enum" => Self::Enum,
            "file" => Self::File,
            other => anyhow::bail!("unknown code entity kind: {other}"),
        })
    }
}

impl fmt::Display for CodeEntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Typed edges between **knowledge-graph** entities (spec §3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeRelationKind {
    About,
    AppliesTo,
    InFile,
    InDoc,
    Documents,
}

impl KnowledgeRelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::About => "ABOUT",
            Self::AppliesTo => "APPLIES_TO",
            Self::InFile => "IN_FILE",
            Self::InDoc => "IN_DOC",
            Self::Documents => "DOCUMENTS",
        }
    }
}

impl fmt::Display for KnowledgeRelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_rejects_zero() {
        assert!(ValidatedLimit::new(0).is_err());
        assert!(ValidatedLimit::new(1).is_ok());
    }

    #[test]
    fn confidence_rejects_out_of_range() {
        assert!(ValidatedConfidence::new(-0.1).is_err());
        assert!(ValidatedConfidence::new(1.1).is_err());
        assert!(ValidatedConfidence::new(0.5).is_ok());
    }

    #[test]
    fn timestamp_pair_rejects_regression() {
        let mut pair = TimestampPair::new(100);
        assert!(pair.touch(50).is_err());
        assert!(pair.touch(150).is_ok());
        assert_eq!(pair.updated_at, 150);
    }

    #[test]
    fn code_relation_kind_round_trips() {
        for kind in [
            CodeRelationKind::Calls,
            CodeRelationKind::Imports,
            CodeRelationKind::Exports,
            CodeRelationKind::Extends,
            CodeRelationKind::Implements,
            CodeRelationKind::Defines,
        ] {
            assert_eq!(CodeRelationKind::parse(kind.as_str()).unwrap(), kind);
        }
    }
}
