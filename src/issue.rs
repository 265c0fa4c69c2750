//! The issue data model (`spec.md` §3 "Issue").
//!
//! Ids are validated newtypes: parse-and-validate in `TryFrom<String>`,
//! round-trip through `Display`, and a
//! `#[serde(try_from = "String", into = "String")]` shim so the type is
//! never constructible except through validation.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// IssueId (permanent)
// ---------------------------------------------------------------------------

/// A permanent, opaque identifier: `is-<26-char-Crockford-base32>` (a ULID
/// payload). Immutable once assigned.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IssueId(String);

const CROCKFORD_ALPHABET: &str = "0123456789ABCDEFGHJKMNPQRSTVWXYZ";

impl IssueId {
    /// Validate and wrap a full `is-XXXXXXXXXXXXXXXXXXXXXXXXXX` string.
    pub fn new(s: impl Into<String>) -> Result<Self, ValidationError> {
        let s = s.into();
        Self::validate(&s)?;
        Ok(Self(s))
    }

    /// The string form, e.g. `is-01J8Z9X8QJ6Z9X8QJ6Z9X8QJ6Z`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(s: &str) -> Result<(), ValidationError> {
        let Some(payload) = s.strip_prefix("is-") else {
            return Err(ValidationError { field: "id".into(), reason: format!("'{s}' is missing the 'is-' prefix") });
        };
        if payload.len() != 26 {
            return Err(ValidationError {
                field: "id".into(),
                reason: format!("expected 26 characters after 'is-', got {}", payload.len()),
            });
        }
        if !payload.chars().all(|c| CROCKFORD_ALPHABET.contains(c.to_ascii_uppercase())) {
            return Err(ValidationError { field: "id".into(), reason: "payload must be Crockford base32".into() });
        }
        Ok(())
    }
}

impl fmt::Display for IssueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for IssueId {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for IssueId {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Self(s))
    }
}

impl From<IssueId> for String {
    fn from(id: IssueId) -> Self {
        id.0
    }
}

/// A field validation failure, convertible into [`crate::Error::Validation`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationError {
    /// The field that failed.
    pub field: String,
    /// Human-readable reason.
    pub reason: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {}", self.field, self.reason)
    }
}

impl std::error::Error for ValidationError {}

impl From<ValidationError> for crate::Error {
    fn from(e: ValidationError) -> Self {
        Self::Validation { field: e.field, reason: e.reason }
    }
}

// ---------------------------------------------------------------------------
// ShortId
// ---------------------------------------------------------------------------

/// A mutable, human-facing identifier, unique per clone. Not stored in the
/// issue file; resolved through the [`crate::id::IdMapping`].
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShortId(String);

impl ShortId {
    /// Wrap an already-allocated short id token.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// The bare token, e.g. `"a1"` (without the display prefix).
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Render as `<prefix>-<short>`, e.g. `"tbd-a1"`.
    #[must_use]
    pub fn display_id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.0)
    }
}

impl fmt::Display for ShortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// The category of an issue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    Bug,
    Feature,
    Task,
    Epic,
    Chore,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Bug => "bug",
            Self::Feature => "feature",
            Self::Task => "task",
            Self::Epic => "epic",
            Self::Chore => "chore",
        };
        f.write_str(s)
    }
}

impl FromStr for Kind {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bug" => Ok(Self::Bug),
            "feature" => Ok(Self::Feature),
            "task" => Ok(Self::Task),
            "epic" => Ok(Self::Epic),
            "chore" => Ok(Self::Chore),
            other => Err(ValidationError { field: "kind".into(), reason: format!("unknown kind '{other}'") }),
        }
    }
}

/// The lifecycle state of an issue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Open,
    InProgress,
    Blocked,
    Deferred,
    Closed,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Deferred => "deferred",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

impl FromStr for Status {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "in_progress" => Ok(Self::InProgress),
            "blocked" => Ok(Self::Blocked),
            "deferred" => Ok(Self::Deferred),
            "closed" => Ok(Self::Closed),
            other => Err(ValidationError { field: "status".into(), reason: format!("unknown status '{other}'") }),
        }
    }
}

/// Issue priority: `0` is highest, `4` is lowest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

impl Priority {
    /// Validate `value` is in `0..=4`.
    pub fn new(value: u8) -> Result<Self, ValidationError> {
        if value > 4 {
            return Err(ValidationError { field: "priority".into(), reason: format!("{value} is out of range 0..=4") });
        }
        Ok(Self(value))
    }

    /// The numeric value.
    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Priority {
    type Error = ValidationError;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Priority> for u8 {
    fn from(p: Priority) -> Self {
        p.0
    }
}

/// A dependency edge from this issue onto another.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Dependency {
    /// The dependency relation. Only `blocks` exists today; the field is
    /// kept open (rather than a unit type) so future relation kinds do
    /// not require a file-format migration.
    #[serde(rename = "type")]
    pub kind: DependencyKind,
    /// The permanent id of the issue this dependency points at.
    pub target: IssueId,
}

/// The kind of relation a [`Dependency`] expresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    Blocks,
}

// ---------------------------------------------------------------------------
// Issue
// ---------------------------------------------------------------------------

/// An issue: the unit of work tracked by this system.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    /// Permanent internal identifier.
    pub id: IssueId,
    /// Monotonically increasing mutation counter. A merge tie-breaker
    /// only — never authoritative on its own.
    pub version: u64,
    /// Short, human title.
    pub title: String,
    pub kind: Kind,
    pub status: Status,
    pub priority: Priority,

    /// Not part of the front matter: `storage::serialize` writes this
    /// under its own `## Description` heading and `storage::parse`
    /// reads it back from there.
    #[serde(skip)]
    pub description: String,
    /// Not part of the front matter: `storage::serialize` writes this
    /// under its own `## Notes` heading and `storage::parse` reads it
    /// back from there.
    #[serde(skip)]
    pub notes: String,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub labels: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub dependencies: BTreeSet<Dependency>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<IssueId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_order_hints: Option<Vec<IssueId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deferred_until: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_issue_url: Option<String>,

    /// RFC-3339 creation timestamp.
    pub created_at: String,
    /// RFC-3339 last-mutation timestamp; advanced on every mutation.
    pub updated_at: String,

    /// Opaque nested mapping preserved verbatim across read/write, for
    /// fields this version of tbd does not model (used by importers to
    /// retain original ids, e.g. from a prior tracker).
    #[serde(flatten)]
    pub extensions: BTreeMap<String, serde_yaml::Value>,
}

impl Issue {
    /// Reject an update that would make an issue its own parent
    /// (`spec.md` §9 "validators reject an update that would create a
    /// direct self-parent").
    pub fn set_parent(&mut self, parent: Option<IssueId>) -> Result<(), ValidationError> {
        if let Some(p) = &parent {
            if *p == self.id {
                return Err(ValidationError { field: "parent_id".into(), reason: "an issue cannot be its own parent".into() });
            }
        }
        self.parent_id = parent;
        Ok(())
    }
}
