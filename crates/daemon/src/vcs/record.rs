use std::fmt::{Display, Formatter};
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tempfile::NamedTempFile;
use tracing::warn;

use revline_common::types::{ChangeLog, RepositoryId};

use crate::store::{CvsSettings, StoredRepository};
use crate::vcs::browser::ViewVcsBrowser;

/// Kinds of version control repositories the engine can synchronize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryKind {
    Cvs,
}

impl RepositoryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RepositoryKind::Cvs => "cvs",
        }
    }

    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "cvs" => Some(RepositoryKind::Cvs),
            _ => None,
        }
    }
}

impl Display for RepositoryKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A live repository: the persisted attributes plus the runtime state the
/// sync pipeline maintains for it.
///
/// `content` distinguishes "never synchronized" (`None`) from "synchronized,
/// log had no matching commits" (an empty `ChangeLog`). The parsed log is
/// shared as an `Arc` so a cosmetic settings update can carry it over to the
/// replacement record without copying.
#[derive(Debug)]
pub struct RepositoryRecord {
    pub id: RepositoryId,
    pub kind: RepositoryKind,
    pub name: String,
    pub description: String,
    pub settings: CvsSettings,
    browser: Option<ViewVcsBrowser>,
    content: Mutex<Option<Arc<ChangeLog>>>,
    temp_log: Mutex<Option<tempfile::TempPath>>,
    sync_gate: tokio::sync::Mutex<()>,
}

impl RepositoryRecord {
    pub fn from_stored(stored: StoredRepository, kind: RepositoryKind) -> Self {
        let browser = stored.settings.browser.as_ref().and_then(|settings| {
            match ViewVcsBrowser::new(&settings.base_url, &settings.root_parameter) {
                Ok(browser) => Some(browser),
                Err(error) => {
                    warn!(
                        repository = %stored.name,
                        base_url = %settings.base_url,
                        %error,
                        "ignoring invalid repository browser settings"
                    );
                    None
                }
            }
        });

        Self {
            id: stored.id,
            kind,
            name: stored.name,
            description: stored.description,
            settings: stored.settings,
            browser,
            content: Mutex::new(None),
            temp_log: Mutex::new(None),
            sync_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn browser(&self) -> Option<&ViewVcsBrowser> {
        self.browser.as_ref()
    }

    /// Latest parsed log, or `None` when this record has not completed a
    /// synchronization yet.
    pub fn content(&self) -> Option<Arc<ChangeLog>> {
        self.content.lock().expect("content lock poisoned").clone()
    }

    pub fn set_content(&self, content: Arc<ChangeLog>) {
        *self.content.lock().expect("content lock poisoned") = Some(content);
    }

    /// Carry the other record's parsed log over to this one. Shares the
    /// same `Arc`, so no log data is copied.
    pub fn copy_content_from(&self, other: &RepositoryRecord) {
        let theirs = other.content();
        *self.content.lock().expect("content lock poisoned") = theirs;
    }

    /// Serializes synchronization passes for this repository. Held across
    /// fetch and parse so two passes never race on the same log file.
    pub async fn sync_guard(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.sync_gate.lock().await
    }

    /// Path the fetched log is written to: the configured path when set,
    /// otherwise a per-record temp file created on first use and reused for
    /// the record's lifetime.
    pub fn log_destination(&self) -> io::Result<PathBuf> {
        if let Some(path) = &self.settings.log_file_path {
            return Ok(path.clone());
        }

        let mut temp_log = self.temp_log.lock().expect("temp log lock poisoned");
        if let Some(path) = temp_log.as_ref() {
            return Ok(path.to_path_buf());
        }
        let path = NamedTempFile::new()?.into_temp_path();
        let result = path.to_path_buf();
        *temp_log = Some(path);
        Ok(result)
    }
}

/// True when the two settings differ in a way that invalidates previously
/// fetched content: a different server, module, credential, or fetch mode
/// means the old log no longer describes the configured repository.
pub fn is_materially_different(old: &CvsSettings, new: &CvsSettings) -> bool {
    old.connection_root != new.connection_root
        || old.module_name != new.module_name
        || old.credential != new.credential
        || old.fetch_remote != new.fetch_remote
}
