// Persistence boundary for repository records and project associations.
//
// The engine consumes this as a plain record/association store; `MetaDb` is
// the sqlite-backed implementation.

pub mod meta_db;

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

use revline_common::types::RepositoryId;

/// Default ceiling for a single remote log operation (10 minutes).
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Configuration needed to synchronize one CVS-style repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CvsSettings {
    /// Connection root, e.g. `:pserver:anonymous@cvs.example.org:/cvsroot/proj`.
    pub connection_root: String,
    pub module_name: String,
    /// Credential used when fetching (pserver password). Optional.
    pub credential: Option<String>,
    /// Where the fetched log lives. When unset, a reusable per-repository
    /// temp file is used.
    pub log_file_path: Option<PathBuf>,
    /// Whether to fetch the log from the remote server, or only parse the
    /// file at `log_file_path`.
    pub fetch_remote: bool,
    /// Wall-clock ceiling for the remote fetch.
    pub timeout: Duration,
    /// Repository browser link settings, if a browser is configured.
    pub browser: Option<BrowserSettings>,
}

impl Default for CvsSettings {
    fn default() -> Self {
        Self {
            connection_root: String::new(),
            module_name: String::new(),
            credential: None,
            log_file_path: None,
            fetch_remote: true,
            timeout: DEFAULT_OPERATION_TIMEOUT,
            browser: None,
        }
    }
}

/// Base URL + root parameter for building human-facing browser links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserSettings {
    pub base_url: String,
    pub root_parameter: String,
}

/// Attributes of a repository record, without the store-assigned id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRepository {
    pub kind: String,
    pub name: String,
    pub description: String,
    pub settings: CvsSettings,
}

/// A persisted repository record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRepository {
    pub id: RepositoryId,
    pub kind: String,
    pub name: String,
    pub description: String,
    pub settings: CvsSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    pub message: String,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(error: rusqlite::Error) -> Self {
        StoreError::new(error.to_string())
    }
}

/// Record and association persistence, as consumed by the directory.
pub trait RepositoryStore: Send + Sync {
    fn find_all(&self) -> Result<Vec<StoredRepository>, StoreError>;

    fn find_by_id(&self, id: RepositoryId) -> Result<Option<StoredRepository>, StoreError>;

    /// Persist a new record and assign its id. Ids are never reused.
    fn create(&self, repository: NewRepository) -> Result<StoredRepository, StoreError>;

    /// Replace all attributes of an existing record.
    fn update(&self, id: RepositoryId, repository: NewRepository) -> Result<(), StoreError>;

    /// Delete a record together with all of its project associations.
    fn delete(&self, id: RepositoryId) -> Result<(), StoreError>;

    fn repository_ids_for_project(
        &self,
        project_key: &str,
    ) -> Result<Vec<RepositoryId>, StoreError>;

    fn project_keys_for_repository(&self, id: RepositoryId) -> Result<Vec<String>, StoreError>;

    /// Replace the project's association set wholesale: old associations are
    /// removed first, then exactly the given ids are linked.
    fn replace_project_repositories(
        &self,
        project_key: &str,
        ids: &[RepositoryId],
    ) -> Result<(), StoreError>;
}
