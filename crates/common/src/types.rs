// Core domain types shared across the Revline crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a repository record. Assigned once by the store and never
/// reused, even after the record is deleted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepositoryId(pub i64);

impl std::fmt::Display for RepositoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One file touched by a commit: repository-relative path plus the dotted
/// revision label (e.g. `1.3` or `1.2.2.1`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileRevision {
    pub path: String,
    pub label: String,
}

/// A commit reconstructed from the change log.
///
/// Commits carry no stable identity: two commits are equal exactly when
/// their structural content is equal, and callers must not assume the
/// parser deduplicates them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Commit {
    pub author: String,
    pub timestamp: DateTime<Utc>,
    pub comment: String,
    /// Branch label, `HEAD` for the trunk.
    pub branch: String,
    /// Files touched, in log order.
    pub revisions: Vec<FileRevision>,
}

/// The most recently parsed commit history of one repository.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeLog {
    /// Commits ordered by timestamp, oldest first.
    pub commits: Vec<Commit>,
}

impl ChangeLog {
    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }
}

/// A work-tracking issue, as seen by the commit-matching engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Issue {
    /// Current key, e.g. `ABC-12`.
    pub key: String,
    /// Key of the project the issue currently belongs to, e.g. `ABC`.
    pub project_key: String,
}
