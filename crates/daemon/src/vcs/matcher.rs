use revline_common::issuekey::is_key_in_string;
use revline_common::types::{ChangeLog, Commit};

/// Commits in `content` that reference `issue_key` as an exact token.
///
/// `None` in means `None` out: a repository that has never completed a
/// synchronization has no answer yet, which callers must not conflate with
/// "synchronized and found nothing" (`Some` of an empty vec).
pub fn match_commits(content: Option<&ChangeLog>, issue_key: &str) -> Option<Vec<Commit>> {
    let content = content?;
    Some(
        content
            .commits
            .iter()
            .filter(|commit| is_key_in_string(issue_key, &commit.comment))
            .cloned()
            .collect(),
    )
}
