use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use revline_common::issuekey::project_key_of;
use revline_common::types::{Commit, Issue, RepositoryId};

use crate::scheduler::SyncPass;
use crate::vcs::directory::RepositoryDirectory;
use crate::vcs::error::{DirectoryError, SyncError};
use crate::vcs::fetcher::{RemoteFetcher, RlogClient};
use crate::vcs::matcher::match_commits;
use crate::vcs::parser::LogParser;
use crate::vcs::record::RepositoryRecord;

/// Decides whether a requester may see an issue's commits at all. One check
/// per lookup; a denial short-circuits every repository access.
pub trait PermissionCheck: Send + Sync {
    fn can_view_commits(&self, issue: &Issue, requester: &str) -> bool;
}

/// An issue's historical keys from renames and project moves, oldest first.
/// A commit made under an old key never textually references the new one,
/// so matching must run once per key.
pub trait IssueHistory: Send + Sync {
    fn previous_keys(&self, issue: &Issue) -> Vec<String>;
}

/// Standalone deployment defaults: everyone may view, no rename history.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAllViewers;

impl PermissionCheck for AllowAllViewers {
    fn can_view_commits(&self, _issue: &Issue, _requester: &str) -> bool {
        true
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoPreviousKeys;

impl IssueHistory for NoPreviousKeys {
    fn previous_keys(&self, _issue: &Issue) -> Vec<String> {
        Vec::new()
    }
}

/// Drives the fetch-parse-match pipeline across the directory.
pub struct SyncOrchestrator<C: RlogClient> {
    directory: Arc<RepositoryDirectory>,
    fetcher: RemoteFetcher<C>,
    parser: LogParser,
    permissions: Arc<dyn PermissionCheck>,
    history: Arc<dyn IssueHistory>,
}

impl<C: RlogClient> SyncOrchestrator<C> {
    pub fn new(
        directory: Arc<RepositoryDirectory>,
        fetcher: RemoteFetcher<C>,
        parser: LogParser,
        permissions: Arc<dyn PermissionCheck>,
        history: Arc<dyn IssueHistory>,
    ) -> Self {
        Self { directory, fetcher, parser, permissions, history }
    }

    /// One periodic pass over every repository. A failing repository is
    /// logged and skipped, never aborting the rest of the batch. Returns
    /// whether every synchronized repository succeeded.
    pub async fn synchronize_all(&self) -> bool {
        let records = self.directory.repositories();
        info!(repositories = records.len(), "synchronization pass starting");

        let mut all_ok = true;
        for record in records {
            let projects = match self.directory.projects_for_repository(record.id) {
                Ok(projects) => projects,
                Err(error) => {
                    warn!(repository = %record.name, %error,
                        "could not resolve project associations, skipping");
                    continue;
                }
            };
            if projects.is_empty() {
                debug!(repository = %record.name, "no project associations, skipping");
                continue;
            }

            if let Err(error) = self.synchronize_one(&record).await {
                error!(repository = %record.name, %error, "synchronization failed");
                all_ok = false;
            }
        }
        all_ok
    }

    /// Synchronize one repository: fetch its log, parse it, and publish the
    /// parsed content on the record. Serialized per repository; a failure at
    /// any stage leaves the previous content in place.
    pub async fn synchronize_one(&self, record: &RepositoryRecord) -> Result<(), SyncError> {
        let _guard = record.sync_guard().await;

        let log_path = self.fetcher.fetch(record).await?;
        let log = self
            .parser
            .parse(&log_path, &record.settings.module_name, &record.name)
            .await?;
        info!(repository = %record.name, commits = log.commits.len(), "repository synchronized");
        record.set_content(Arc::new(log));
        Ok(())
    }

    /// Commits referencing the issue, per repository, across its whole key
    /// history.
    ///
    /// The map value is `None` for a repository that has never completed a
    /// synchronization since it came into scope. A requester without view
    /// permission gets an empty map without any repository being consulted.
    pub fn commits_for_issue(
        &self,
        issue: &Issue,
        requester: &str,
    ) -> Result<HashMap<RepositoryId, Option<Vec<Commit>>>, DirectoryError> {
        if !self.permissions.can_view_commits(issue, requester) {
            debug!(issue = %issue.key, requester, "commit view permission denied");
            return Ok(HashMap::new());
        }

        let mut keys = self.history.previous_keys(issue);
        if !keys.contains(&issue.key) {
            keys.push(issue.key.clone());
        }

        let mut project_keys: Vec<&str> = vec![&issue.project_key];
        for key in &keys {
            if let Some(project) = project_key_of(key) {
                if !project_keys.contains(&project) {
                    project_keys.push(project);
                }
            }
        }

        let mut candidates: Vec<Arc<RepositoryRecord>> = Vec::new();
        for project in project_keys {
            for record in self.directory.repositories_for_project(project)? {
                if !candidates.iter().any(|existing| existing.id == record.id) {
                    candidates.push(record);
                }
            }
        }

        let mut results = HashMap::new();
        for record in candidates {
            let content = record.content();
            let mut merged: Option<Vec<Commit>> = None;
            for key in &keys {
                merged = merge_matches(merged, match_commits(content.as_deref(), key));
            }
            results.insert(record.id, merged);
        }
        Ok(results)
    }
}

/// Fold rule for per-key match results: an unsynchronized `None` is absorbed
/// by any `Some`, and two `Some`s union structurally.
fn merge_matches(
    accumulated: Option<Vec<Commit>>,
    matched: Option<Vec<Commit>>,
) -> Option<Vec<Commit>> {
    match (accumulated, matched) {
        (None, matched) => matched,
        (accumulated, None) => accumulated,
        (Some(mut accumulated), Some(matched)) => {
            for commit in matched {
                if !accumulated.contains(&commit) {
                    accumulated.push(commit);
                }
            }
            Some(accumulated)
        }
    }
}

impl<C: RlogClient + 'static> SyncPass for Arc<SyncOrchestrator<C>> {
    fn run(&self) -> impl std::future::Future<Output = bool> + Send {
        self.synchronize_all()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap as StdHashMap;
    use std::io::{self, Write};
    use std::sync::Mutex;

    use tempfile::TempDir;

    use crate::scheduler::SyncSchedule;
    use crate::store::meta_db::MetaDb;
    use crate::store::{CvsSettings, NewRepository};
    use crate::vcs::fetcher::{FetchOutcome, FetchRequest};

    use super::*;

    /// Scripted rlog client: a canned log body per connection root, plus a
    /// call count.
    #[derive(Default)]
    struct MockRlogClient {
        logs: StdHashMap<String, &'static str>,
        calls: Mutex<Vec<String>>,
    }

    impl RlogClient for MockRlogClient {
        async fn stream_log(
            &self,
            request: &FetchRequest,
            sink: &mut (dyn Write + Send),
        ) -> io::Result<FetchOutcome> {
            self.calls.lock().unwrap().push(request.connection_root.clone());
            match self.logs.get(&request.connection_root) {
                Some(body) => {
                    sink.write_all(body.as_bytes())?;
                    Ok(FetchOutcome { success: true, error_lines: Vec::new() })
                }
                None => Ok(FetchOutcome {
                    success: false,
                    error_lines: vec!["connection refused".into()],
                }),
            }
        }
    }

    struct NullSchedule;

    impl SyncSchedule for NullSchedule {
        fn activate(&self) {}
        fn cancel(&self) {}
        fn run_now(&self) {}
    }

    struct DenyAll;

    impl PermissionCheck for DenyAll {
        fn can_view_commits(&self, _issue: &Issue, _requester: &str) -> bool {
            false
        }
    }

    struct RenamedFrom(&'static str);

    impl IssueHistory for RenamedFrom {
        fn previous_keys(&self, _issue: &Issue) -> Vec<String> {
            vec![self.0.to_string()]
        }
    }

    const GOOD_ROOT: &str = ":pserver:anonymous@cvs.example.org:/cvsroot/proj";
    const OLD_ROOT: &str = ":pserver:anonymous@cvs.example.org:/cvsroot/old";
    const DEAD_ROOT: &str = ":pserver:anonymous@gone.example.org:/cvsroot/x";

    const PROJ_LOG: &str = "\
RCS file: /cvsroot/proj/src/a.c,v
Working file: src/a.c
----------------------------
revision 1.2
date: 2007/03/12 10:15:30;  author: jdoe;  state: Exp;
ABC-1 fix the parser
----------------------------
revision 1.1
date: 2007/03/10 09:00:00;  author: mgr;  state: Exp;
ABC-2 initial work
=============================================================================
";

    const OLD_PROJ_LOG: &str = "\
RCS file: /cvsroot/old/src/z.c,v
Working file: src/z.c
----------------------------
revision 1.5
date: 2006/11/02 14:00:00;  author: jdoe;  state: Exp;
OLD-7 legacy change
=============================================================================
";

    struct Fixture {
        directory: Arc<RepositoryDirectory>,
        _dir: TempDir,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MetaDb::open(dir.path().join("meta.db")).unwrap());
        let directory = Arc::new(RepositoryDirectory::new(store, Arc::new(NullSchedule)));
        Fixture { directory, _dir: dir }
    }

    fn orchestrator(
        directory: Arc<RepositoryDirectory>,
        client: MockRlogClient,
    ) -> SyncOrchestrator<MockRlogClient> {
        SyncOrchestrator::new(
            directory,
            RemoteFetcher::with_client(client),
            LogParser::new(),
            Arc::new(AllowAllViewers),
            Arc::new(NoPreviousKeys),
        )
    }

    fn repository(fixture: &Fixture, name: &str, root: &str, module: &str, log_dir: &TempDir) -> Arc<RepositoryRecord> {
        fixture
            .directory
            .create(NewRepository {
                kind: "cvs".into(),
                name: name.into(),
                description: String::new(),
                settings: CvsSettings {
                    connection_root: root.into(),
                    module_name: module.into(),
                    log_file_path: Some(log_dir.path().join(format!("{name}.log"))),
                    ..CvsSettings::default()
                },
            })
            .unwrap()
    }

    fn issue(key: &str) -> Issue {
        Issue {
            key: key.into(),
            project_key: project_key_of(key).unwrap().to_string(),
        }
    }

    #[tokio::test]
    async fn synchronize_one_publishes_parsed_content() {
        let f = fixture();
        let record = repository(&f, "main", GOOD_ROOT, "proj", &f._dir);
        let orchestrator = orchestrator(
            f.directory.clone(),
            MockRlogClient {
                logs: StdHashMap::from([(GOOD_ROOT.to_string(), PROJ_LOG)]),
                ..MockRlogClient::default()
            },
        );

        assert!(record.content().is_none());
        orchestrator.synchronize_one(&record).await.unwrap();
        let content = record.content().unwrap();
        assert_eq!(content.commits.len(), 2);
    }

    #[tokio::test]
    async fn failed_synchronization_keeps_previous_content() {
        let f = fixture();
        let record = repository(&f, "dead", DEAD_ROOT, "x", &f._dir);
        let orchestrator = orchestrator(f.directory.clone(), MockRlogClient::default());

        let previous = Arc::new(revline_common::types::ChangeLog::default());
        record.set_content(previous.clone());

        let error = orchestrator.synchronize_one(&record).await.unwrap_err();
        assert!(matches!(error, SyncError::RemoteCommand { .. }));
        assert!(Arc::ptr_eq(&record.content().unwrap(), &previous));
    }

    #[tokio::test]
    async fn batch_skips_unassociated_and_continues_past_failures() {
        let f = fixture();
        let good = repository(&f, "good", GOOD_ROOT, "proj", &f._dir);
        let bad = repository(&f, "bad", DEAD_ROOT, "x", &f._dir);
        let orphan = repository(&f, "orphan", GOOD_ROOT, "proj", &f._dir);
        let tail = repository(&f, "tail", GOOD_ROOT, "proj", &f._dir);
        f.directory
            .set_project_repositories("ABC", &[good.id, bad.id, tail.id])
            .unwrap();

        let orchestrator = orchestrator(
            f.directory.clone(),
            MockRlogClient {
                logs: StdHashMap::from([(GOOD_ROOT.to_string(), PROJ_LOG)]),
                ..MockRlogClient::default()
            },
        );

        let all_ok = orchestrator.synchronize_all().await;
        assert!(!all_ok, "the dead repository must fail the batch result");
        assert!(good.content().is_some(), "good repository still synchronizes");
        assert!(orphan.content().is_none(), "unassociated repository is skipped");
        assert!(tail.content().is_some(), "repositories after a failure are still attempted");
    }

    #[tokio::test]
    async fn commits_for_issue_distinguishes_unsynchronized_from_empty() {
        let f = fixture();
        let record = repository(&f, "main", GOOD_ROOT, "proj", &f._dir);
        f.directory.set_project_repositories("ABC", &[record.id]).unwrap();
        let orchestrator = orchestrator(
            f.directory.clone(),
            MockRlogClient {
                logs: StdHashMap::from([(GOOD_ROOT.to_string(), PROJ_LOG)]),
                ..MockRlogClient::default()
            },
        );

        // Before any pass: the repository answers None.
        let results = orchestrator.commits_for_issue(&issue("ABC-1"), "jdoe").unwrap();
        assert_eq!(results.get(&record.id), Some(&None));

        orchestrator.synchronize_one(&record).await.unwrap();

        let results = orchestrator.commits_for_issue(&issue("ABC-1"), "jdoe").unwrap();
        let matched = results.get(&record.id).unwrap().as_ref().unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].comment, "ABC-1 fix the parser");

        // Synchronized but zero matches: Some(empty), not None.
        let results = orchestrator.commits_for_issue(&issue("ABC-99"), "jdoe").unwrap();
        assert_eq!(results.get(&record.id), Some(&Some(Vec::new())));
    }

    #[tokio::test]
    async fn permission_denial_short_circuits_every_repository() {
        let f = fixture();
        let record = repository(&f, "main", GOOD_ROOT, "proj", &f._dir);
        f.directory.set_project_repositories("ABC", &[record.id]).unwrap();

        let orchestrator = SyncOrchestrator::new(
            f.directory.clone(),
            RemoteFetcher::with_client(MockRlogClient::default()),
            LogParser::new(),
            Arc::new(DenyAll),
            Arc::new(NoPreviousKeys),
        );

        let results = orchestrator.commits_for_issue(&issue("ABC-1"), "intruder").unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn previous_keys_pull_in_their_projects_repositories() {
        let f = fixture();
        let current = repository(&f, "current", GOOD_ROOT, "proj", &f._dir);
        let legacy = repository(&f, "legacy", OLD_ROOT, "old", &f._dir);
        f.directory.set_project_repositories("ABC", &[current.id]).unwrap();
        f.directory.set_project_repositories("OLD", &[legacy.id]).unwrap();

        let orchestrator = SyncOrchestrator::new(
            f.directory.clone(),
            RemoteFetcher::with_client(MockRlogClient {
                logs: StdHashMap::from([
                    (GOOD_ROOT.to_string(), PROJ_LOG),
                    (OLD_ROOT.to_string(), OLD_PROJ_LOG),
                ]),
                ..MockRlogClient::default()
            }),
            LogParser::new(),
            Arc::new(AllowAllViewers),
            Arc::new(RenamedFrom("OLD-7")),
        );
        orchestrator.synchronize_one(&current).await.unwrap();
        orchestrator.synchronize_one(&legacy).await.unwrap();

        // ABC-1 was renamed from OLD-7: both projects' repositories are
        // candidates and the old key matches in the legacy repository.
        let results = orchestrator.commits_for_issue(&issue("ABC-1"), "jdoe").unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[&current.id].as_ref().unwrap().len(), 1);
        let legacy_matches = results[&legacy.id].as_ref().unwrap();
        assert_eq!(legacy_matches.len(), 1);
        assert_eq!(legacy_matches[0].comment, "OLD-7 legacy change");
    }

    #[test]
    fn merge_matches_folds_the_sentinel_and_unions_structurally() {
        let commit = |comment: &str| Commit {
            author: "jdoe".into(),
            timestamp: chrono::Utc::now(),
            comment: comment.into(),
            branch: "HEAD".into(),
            revisions: Vec::new(),
        };

        assert_eq!(merge_matches(None, None), None);
        assert_eq!(merge_matches(None, Some(Vec::new())), Some(Vec::new()));
        assert_eq!(merge_matches(Some(Vec::new()), None), Some(Vec::new()));

        let a = commit("ABC-1 one");
        let b = commit("ABC-1 two");
        let merged = merge_matches(
            Some(vec![a.clone(), b.clone()]),
            Some(vec![b.clone(), a.clone()]),
        )
        .unwrap();
        assert_eq!(merged, vec![a, b]);
    }
}
