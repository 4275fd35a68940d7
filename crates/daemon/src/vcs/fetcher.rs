use std::future::Future;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::vcs::error::SyncError;
use crate::vcs::lock::LogLock;
use crate::vcs::record::RepositoryRecord;

/// What a single remote log fetch needs to know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub connection_root: String,
    pub module_name: String,
    pub credential: Option<String>,
}

impl FetchRequest {
    /// Connection root with the credential folded into the pserver user
    /// part: `:pserver:user@host:/path` becomes `:pserver:user:pw@host:/path`.
    /// Roots of other methods, and roots that already carry a password, are
    /// returned as-is.
    pub fn authenticated_root(&self) -> String {
        let Some(credential) = &self.credential else {
            return self.connection_root.clone();
        };
        let Some(rest) = self.connection_root.strip_prefix(":pserver:") else {
            return self.connection_root.clone();
        };
        let Some(at) = rest.find('@') else {
            return self.connection_root.clone();
        };
        if rest[..at].contains(':') {
            return self.connection_root.clone();
        }
        format!(":pserver:{}:{}{}", &rest[..at], credential, &rest[at..])
    }
}

/// Result of streaming one remote log: whether the command exited cleanly,
/// plus every line it wrote to stderr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub success: bool,
    pub error_lines: Vec<String>,
}

/// Streams one repository's full revision log into a sink. Trait-based so
/// tests can script log text without a CVS server.
pub trait RlogClient: Send + Sync {
    fn stream_log(
        &self,
        request: &FetchRequest,
        sink: &mut (dyn Write + Send),
    ) -> impl Future<Output = io::Result<FetchOutcome>> + Send;
}

/// Real client: runs `cvs -d <root> rlog <module>` and pipes its stdout
/// into the sink. `kill_on_drop` tears the process down if the fetch is
/// cancelled or times out.
#[derive(Debug, Default, Clone, Copy)]
pub struct CvsProcessClient;

impl RlogClient for CvsProcessClient {
    async fn stream_log(
        &self,
        request: &FetchRequest,
        sink: &mut (dyn Write + Send),
    ) -> io::Result<FetchOutcome> {
        let mut child = Command::new("cvs")
            .arg("-d")
            .arg(request.authenticated_root())
            .arg("rlog")
            .arg(&request.module_name)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child.stdout.take().ok_or_else(|| {
            io::Error::other("cvs child process has no stdout handle")
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            io::Error::other("cvs child process has no stderr handle")
        })?;

        let copy_stdout = async {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                sink.write_all(line.as_bytes())?;
                sink.write_all(b"\n")?;
            }
            io::Result::Ok(())
        };
        let collect_stderr = async {
            let mut errors = Vec::new();
            let mut lines = BufReader::new(stderr).lines();
            while let Some(line) = lines.next_line().await? {
                errors.push(line);
            }
            io::Result::Ok(errors)
        };

        let (copied, errors) = tokio::join!(copy_stdout, collect_stderr);
        copied?;
        let error_lines = errors?;
        let status = child.wait().await?;

        Ok(FetchOutcome { success: status.success(), error_lines })
    }
}

/// Fetches a repository's log to its destination file, under the log lock
/// and within the repository's configured timeout.
#[derive(Debug, Clone)]
pub struct RemoteFetcher<C = CvsProcessClient> {
    client: C,
}

impl RemoteFetcher<CvsProcessClient> {
    pub fn new() -> Self {
        Self { client: CvsProcessClient }
    }
}

impl Default for RemoteFetcher<CvsProcessClient> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: RlogClient> RemoteFetcher<C> {
    pub fn with_client(client: C) -> Self {
        Self { client }
    }

    /// Bring the record's log file up to date and return its absolute path.
    ///
    /// When fetching is disabled the configured file is used as-is; it must
    /// already exist. Otherwise the destination is locked, truncated, and
    /// rewritten from the remote log stream. Remote stderr output fails the
    /// fetch even when the process exits zero.
    pub async fn fetch(&self, record: &RepositoryRecord) -> Result<PathBuf, SyncError> {
        let destination = record.log_destination()?;

        if !record.settings.fetch_remote {
            if !destination.exists() {
                return Err(SyncError::MissingLogFile { path: destination });
            }
            debug!(repository = %record.name, path = %destination.display(),
                "fetching disabled, using log file as-is");
            return Ok(std::path::absolute(destination)?);
        }

        let request = FetchRequest {
            connection_root: record.settings.connection_root.clone(),
            module_name: record.settings.module_name.clone(),
            credential: record.settings.credential.clone(),
        };

        let _lock = LogLock::acquire(&destination).await?;
        let file = std::fs::File::create(&destination)?;
        let mut writer = BufWriter::new(file);

        let limit = record.settings.timeout;
        let streamed = timeout(limit, self.client.stream_log(&request, &mut writer)).await;
        let flushed = writer.flush();
        drop(writer);

        let outcome = match streamed {
            Err(_) => return Err(SyncError::OperationTimeout { limit }),
            Ok(Err(error)) => return Err(error.into()),
            Ok(Ok(outcome)) => outcome,
        };
        flushed?;

        if !outcome.error_lines.is_empty() {
            return Err(SyncError::RemoteCommand { message: outcome.error_lines.join(" ") });
        }
        if !outcome.success {
            return Err(SyncError::RemoteCommand {
                message: "cvs rlog exited with a failure status".into(),
            });
        }

        info!(repository = %record.name, path = %destination.display(), "fetched revision log");
        Ok(std::path::absolute(destination)?)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use revline_common::types::RepositoryId;

    use crate::store::{CvsSettings, StoredRepository};
    use crate::vcs::record::RepositoryKind;

    use super::*;

    /// Writes a canned log body to the sink and returns a scripted outcome.
    struct ScriptedClient {
        body: &'static str,
        outcome: FetchOutcome,
    }

    impl RlogClient for ScriptedClient {
        async fn stream_log(
            &self,
            _request: &FetchRequest,
            sink: &mut (dyn Write + Send),
        ) -> io::Result<FetchOutcome> {
            sink.write_all(self.body.as_bytes())?;
            Ok(self.outcome.clone())
        }
    }

    /// Never completes; used to drive the fetch into its timeout.
    struct StalledClient;

    impl RlogClient for StalledClient {
        async fn stream_log(
            &self,
            _request: &FetchRequest,
            _sink: &mut (dyn Write + Send),
        ) -> io::Result<FetchOutcome> {
            tokio::time::sleep(Duration::from_secs(86_400)).await;
            Ok(FetchOutcome { success: true, error_lines: Vec::new() })
        }
    }

    fn record_with(settings: CvsSettings) -> RepositoryRecord {
        RepositoryRecord::from_stored(
            StoredRepository {
                id: RepositoryId(1),
                kind: "cvs".into(),
                name: "main".into(),
                description: String::new(),
                settings,
            },
            RepositoryKind::Cvs,
        )
    }

    #[test]
    fn authenticated_root_injects_the_password() {
        let request = FetchRequest {
            connection_root: ":pserver:anonymous@cvs.example.org:/cvsroot/proj".into(),
            module_name: "proj".into(),
            credential: Some("hunter2".into()),
        };
        assert_eq!(
            request.authenticated_root(),
            ":pserver:anonymous:hunter2@cvs.example.org:/cvsroot/proj"
        );
    }

    #[test]
    fn authenticated_root_leaves_other_roots_alone() {
        let mut request = FetchRequest {
            connection_root: ":ext:dev@cvs.example.org:/cvsroot/proj".into(),
            module_name: "proj".into(),
            credential: Some("hunter2".into()),
        };
        assert_eq!(request.authenticated_root(), request.connection_root);

        request.connection_root = ":pserver:u:pw@host:/root".into();
        assert_eq!(request.authenticated_root(), request.connection_root);

        request.credential = None;
        request.connection_root = ":pserver:u@host:/root".into();
        assert_eq!(request.authenticated_root(), request.connection_root);
    }

    #[tokio::test]
    async fn fetch_writes_the_stream_to_the_destination() {
        let dir = TempDir::new().unwrap();
        let log_path = dir.path().join("proj.log");
        let record = record_with(CvsSettings {
            log_file_path: Some(log_path.clone()),
            ..CvsSettings::default()
        });
        let fetcher = RemoteFetcher::with_client(ScriptedClient {
            body: "RCS file: /cvsroot/proj/a.c,v\n",
            outcome: FetchOutcome { success: true, error_lines: Vec::new() },
        });

        let fetched = fetcher.fetch(&record).await.unwrap();
        assert!(fetched.is_absolute());
        assert_eq!(
            std::fs::read_to_string(&log_path).unwrap(),
            "RCS file: /cvsroot/proj/a.c,v\n"
        );
        assert!(!log_path.with_file_name("proj.log.write.lock").exists());
    }

    #[tokio::test]
    async fn remote_errors_are_joined_into_one_message() {
        let dir = TempDir::new().unwrap();
        let record = record_with(CvsSettings {
            log_file_path: Some(dir.path().join("proj.log")),
            ..CvsSettings::default()
        });
        let fetcher = RemoteFetcher::with_client(ScriptedClient {
            body: "",
            outcome: FetchOutcome {
                success: true,
                error_lines: vec!["cannot connect".into(), "to host".into()],
            },
        });

        let error = fetcher.fetch(&record).await.unwrap_err();
        assert_eq!(
            error,
            SyncError::RemoteCommand { message: "cannot connect to host".into() }
        );
    }

    #[tokio::test]
    async fn nonzero_exit_without_stderr_still_fails() {
        let dir = TempDir::new().unwrap();
        let record = record_with(CvsSettings {
            log_file_path: Some(dir.path().join("proj.log")),
            ..CvsSettings::default()
        });
        let fetcher = RemoteFetcher::with_client(ScriptedClient {
            body: "",
            outcome: FetchOutcome { success: false, error_lines: Vec::new() },
        });

        assert!(matches!(
            fetcher.fetch(&record).await.unwrap_err(),
            SyncError::RemoteCommand { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_aborts_at_the_configured_timeout() {
        let dir = TempDir::new().unwrap();
        let record = record_with(CvsSettings {
            log_file_path: Some(dir.path().join("proj.log")),
            timeout: Duration::from_secs(30),
            ..CvsSettings::default()
        });
        let fetcher = RemoteFetcher::with_client(StalledClient);

        let error = fetcher.fetch(&record).await.unwrap_err();
        assert_eq!(error, SyncError::OperationTimeout { limit: Duration::from_secs(30) });
    }

    #[tokio::test]
    async fn disabled_fetch_requires_an_existing_file() {
        let dir = TempDir::new().unwrap();
        let log_path = dir.path().join("offline.log");
        let record = record_with(CvsSettings {
            log_file_path: Some(log_path.clone()),
            fetch_remote: false,
            ..CvsSettings::default()
        });
        let fetcher = RemoteFetcher::new();

        let error = fetcher.fetch(&record).await.unwrap_err();
        assert_eq!(error, SyncError::MissingLogFile { path: log_path.clone() });

        std::fs::write(&log_path, "RCS file: x\n").unwrap();
        let fetched = fetcher.fetch(&record).await.unwrap();
        assert!(fetched.is_absolute());
        assert!(fetched.ends_with("offline.log"));
    }
}
