// Error taxonomy for the synchronization engine.
//
// Directory errors are caller-correctable and propagate immediately without
// touching cache state. Sync errors are operational: the periodic batch
// catches them per repository, the on-demand path hands them to the caller
// with full detail.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

use revline_common::types::RepositoryId;

use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// The repository kind is not one the engine can synchronize.
    UnsupportedType { kind: String },
    /// Another active record already carries this name (case-sensitive).
    DuplicateName { name: String },
    /// No record with this id exists.
    UnknownRepository { id: RepositoryId },
    Store(StoreError),
}

impl Display for DirectoryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DirectoryError::UnsupportedType { kind } => {
                write!(f, "unsupported repository type `{kind}`")
            }
            DirectoryError::DuplicateName { name } => {
                write!(f, "a repository named `{name}` already exists")
            }
            DirectoryError::UnknownRepository { id } => {
                write!(f, "no repository with id {id}")
            }
            DirectoryError::Store(error) => write!(f, "repository store error: {error}"),
        }
    }
}

impl Error for DirectoryError {}

impl From<StoreError> for DirectoryError {
    fn from(error: StoreError) -> Self {
        DirectoryError::Store(error)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The advisory lock on the log file could not be obtained within the
    /// fixed acquisition window. Distinct from `OperationTimeout`: lock
    /// contention and a stuck remote peer need different operator remedies.
    LockTimeout { lock_path: PathBuf, waited: Duration },
    /// The remote log operation exceeded the repository's configured timeout
    /// and was aborted.
    OperationTimeout { limit: Duration },
    /// The remote command reported errors (or failed without any).
    RemoteCommand { message: String },
    /// Fetching is disabled and the configured log file does not exist.
    MissingLogFile { path: PathBuf },
    /// The log text did not match the expected rlog structure.
    LogSyntax { line: usize, message: String },
    Io { message: String },
}

impl Display for SyncError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::LockTimeout { lock_path, waited } => write!(
                f,
                "could not obtain lock `{}` in {}s",
                lock_path.display(),
                waited.as_secs()
            ),
            SyncError::OperationTimeout { limit } => {
                write!(f, "remote log operation exceeded the {}s timeout", limit.as_secs())
            }
            SyncError::RemoteCommand { message } => write!(f, "remote command failed: {message}"),
            SyncError::MissingLogFile { path } => {
                write!(f, "log file `{}` does not exist and fetching is disabled", path.display())
            }
            SyncError::LogSyntax { line, message } => {
                write!(f, "log syntax error at line {line}: {message}")
            }
            SyncError::Io { message } => write!(f, "io error: {message}"),
        }
    }
}

impl Error for SyncError {}

impl From<std::io::Error> for SyncError {
    fn from(error: std::io::Error) -> Self {
        SyncError::Io { message: error.to_string() }
    }
}
