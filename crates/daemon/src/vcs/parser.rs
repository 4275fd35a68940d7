use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::{debug, warn};

use revline_common::issuekey::contains_issue_key;
use revline_common::types::{ChangeLog, Commit, FileRevision};

use crate::vcs::error::SyncError;
use crate::vcs::lock::LogLock;

/// Revisions by the same author with the same comment count as one commit
/// when their timestamps fall within this window (statcvs grouping rule).
const COMMIT_GROUP_WINDOW: chrono::Duration = chrono::Duration::minutes(5);

const EMPTY_LOG_MESSAGE: &str = "*** empty log message ***";

/// Text decodings the parser knows how to apply to a fetched log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Utf8,
    Latin1,
}

impl Encoding {
    pub fn parse(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Some(Encoding::Utf8),
            "latin1" | "iso-8859-1" => Some(Encoding::Latin1),
            _ => None,
        }
    }

    fn decode(self, bytes: &[u8]) -> String {
        match self {
            Encoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Encoding::Latin1 => bytes.iter().map(|&b| b as char).collect(),
        }
    }
}

/// Parses CVS `rlog` output into the domain's commit model.
///
/// Revisions whose comments carry no issue-key token are dropped while the
/// model is being built, so they never exist in memory at all.
#[derive(Debug, Clone, Default)]
pub struct LogParser {
    encodings: HashMap<String, Encoding>,
}

impl LogParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the config's `[encodings]` table. Unrecognized labels are
    /// logged and fall back to UTF-8.
    pub fn from_config(encodings: &HashMap<String, String>) -> Self {
        let mut parsed = HashMap::new();
        for (repository, label) in encodings {
            match Encoding::parse(label) {
                Some(encoding) => {
                    parsed.insert(repository.clone(), encoding);
                }
                None => {
                    warn!(repository = %repository, encoding = %label,
                        "unknown log encoding, falling back to utf-8");
                }
            }
        }
        Self { encodings: parsed }
    }

    fn encoding_for(&self, repository_name: &str) -> Encoding {
        self.encodings.get(repository_name).copied().unwrap_or_default()
    }

    /// Read and parse the log file under the shared advisory lock, so a
    /// concurrent fetch can never hand us a half-written file.
    pub async fn parse(
        &self,
        log_path: &Path,
        module_name: &str,
        repository_name: &str,
    ) -> Result<ChangeLog, SyncError> {
        let _lock = LogLock::acquire(log_path).await?;
        let bytes = std::fs::read(log_path)?;
        let text = self.encoding_for(repository_name).decode(&bytes);
        let log = parse_log_text(&text, module_name)?;
        debug!(repository = %repository_name, commits = log.commits.len(), "parsed revision log");
        Ok(log)
    }
}

/// One retained revision before commit grouping.
#[derive(Debug, Clone)]
struct RawRevision {
    path: String,
    label: String,
    author: String,
    timestamp: DateTime<Utc>,
    branch: String,
    comment: String,
}

/// Parse rlog text. Pure, so tests can feed in log fragments directly.
pub fn parse_log_text(text: &str, module_name: &str) -> Result<ChangeLog, SyncError> {
    let mut revisions = Vec::new();
    let mut lines = text.lines().enumerate().peekable();

    while let Some((_, line)) = lines.peek() {
        if line.starts_with("RCS file:") {
            parse_file_block(&mut lines, module_name, &mut revisions)?;
        } else {
            lines.next();
        }
    }

    Ok(group_into_commits(revisions))
}

type Lines<'a> = std::iter::Peekable<std::iter::Enumerate<std::str::Lines<'a>>>;

fn parse_file_block(
    lines: &mut Lines<'_>,
    module_name: &str,
    revisions: &mut Vec<RawRevision>,
) -> Result<(), SyncError> {
    let (rcs_line_no, rcs_line) = match lines.next() {
        Some(entry) => entry,
        None => return Ok(()),
    };
    let rcs_file = rcs_line
        .strip_prefix("RCS file:")
        .map(|rest| rest.trim().trim_end_matches(",v").to_string())
        .unwrap_or_default();

    let mut working_file: Option<String> = None;
    let mut branch_names: HashMap<String, String> = HashMap::new();
    let mut in_symbolic_names = false;

    // Header: everything up to the first revision separator or block end.
    loop {
        let Some(&(line_no, line)) = lines.peek() else {
            return Ok(());
        };
        if is_revision_separator(line) {
            lines.next();
            break;
        }
        if is_block_end(line) {
            lines.next();
            return Ok(());
        }
        if line.starts_with("RCS file:") {
            return Err(SyncError::LogSyntax {
                line: line_no + 1,
                message: "file block has no terminator".into(),
            });
        }
        if let Some(rest) = line.strip_prefix("Working file:") {
            working_file = Some(rest.trim().to_string());
            in_symbolic_names = false;
        } else if line.starts_with("symbolic names:") {
            in_symbolic_names = true;
        } else if in_symbolic_names && line.starts_with(['\t', ' ']) {
            if let Some((name, number)) = line.trim().split_once(':') {
                if let Some(branch_number) = magic_branch_number(number.trim()) {
                    branch_names.insert(branch_number, name.trim().to_string());
                }
            }
        } else {
            in_symbolic_names = false;
        }
        lines.next();
    }

    let path = match working_file {
        Some(file) => file,
        None => path_from_rcs_file(&rcs_file, module_name).ok_or(SyncError::LogSyntax {
            line: rcs_line_no + 1,
            message: "file block has neither a working file nor a parseable RCS path".into(),
        })?,
    };

    // Revision entries until the block end.
    loop {
        let Some((line_no, line)) = lines.next() else {
            return Ok(());
        };
        if is_block_end(line) {
            return Ok(());
        }
        let Some(label) = line.strip_prefix("revision ") else {
            return Err(SyncError::LogSyntax {
                line: line_no + 1,
                message: format!("expected a revision line, found `{line}`"),
            });
        };
        // `revision 1.4  locked by: jdoe;` carries trailing lock info.
        let label = label.split_whitespace().next().unwrap_or(label).to_string();

        let (date_line_no, date_line) = lines.next().ok_or(SyncError::LogSyntax {
            line: line_no + 1,
            message: "revision entry ends before its date line".into(),
        })?;
        let fields = parse_semicolon_fields(date_line);
        let raw_date = fields.get("date").copied().ok_or(SyncError::LogSyntax {
            line: date_line_no + 1,
            message: "revision entry has no date field".into(),
        })?;
        let timestamp = parse_timestamp(raw_date).ok_or(SyncError::LogSyntax {
            line: date_line_no + 1,
            message: format!("unparseable revision date `{raw_date}`"),
        })?;
        let author = fields.get("author").copied().unwrap_or("").to_string();

        // Skip the optional branches line.
        if lines.peek().is_some_and(|(_, line)| line.starts_with("branches:")) {
            lines.next();
        }

        let mut comment_lines: Vec<&str> = Vec::new();
        let mut ended_block = false;
        loop {
            let Some(&(_, line)) = lines.peek() else {
                ended_block = true;
                break;
            };
            if is_revision_separator(line) {
                lines.next();
                break;
            }
            if is_block_end(line) {
                lines.next();
                ended_block = true;
                break;
            }
            comment_lines.push(line);
            lines.next();
        }
        let comment = comment_lines.join("\n").trim().to_string();

        // The build-time filter: keyless or empty-message revisions never
        // enter the model.
        if comment != EMPTY_LOG_MESSAGE && contains_issue_key(&comment) {
            revisions.push(RawRevision {
                path: path.clone(),
                branch: branch_of(&label, &branch_names),
                label,
                author,
                timestamp,
                comment,
            });
        }

        if ended_block {
            return Ok(());
        }
    }
}

fn is_revision_separator(line: &str) -> bool {
    line.len() >= 10 && line.bytes().all(|b| b == b'-')
}

fn is_block_end(line: &str) -> bool {
    line.len() >= 10 && line.bytes().all(|b| b == b'=')
}

/// `src/a.c` from `/cvsroot/proj/src/a.c` for module `proj`. Attic paths
/// (`src/Attic/a.c` holds deleted files) are flattened back to `src/a.c`.
fn path_from_rcs_file(rcs_file: &str, module_name: &str) -> Option<String> {
    let needle = format!("/{module_name}/");
    let start = rcs_file.find(&needle)? + needle.len();
    let path = rcs_file[start..].replace("Attic/", "");
    (!path.is_empty()).then_some(path)
}

/// `key: value;  key: value;` fields of an rlog date line.
fn parse_semicolon_fields(line: &str) -> HashMap<&str, &str> {
    line.split(';')
        .filter_map(|field| field.split_once(':'))
        .map(|(key, value)| (key.trim(), value.trim()))
        .collect()
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S %z") {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y/%m/%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// A symbolic-names entry `a.b.0.c` is CVS's "magic" spelling of branch
/// number `a.b.c`; anything else names a tag, not a branch.
fn magic_branch_number(number: &str) -> Option<String> {
    let components: Vec<&str> = number.split('.').collect();
    if components.len() < 4 || components[components.len() - 2] != "0" {
        return None;
    }
    let mut branch = components[..components.len() - 2].to_vec();
    branch.push(components[components.len() - 1]);
    Some(branch.join("."))
}

/// Two components mean the trunk; `a.b.c.d` sits on branch `a.b.c`, named
/// through the magic symbolic-names entry when one exists.
fn branch_of(label: &str, branch_names: &HashMap<String, String>) -> String {
    let components: Vec<&str> = label.split('.').collect();
    if components.len() <= 2 {
        return "HEAD".to_string();
    }
    let branch_number = components[..components.len() - 1].join(".");
    branch_names.get(&branch_number).cloned().unwrap_or(branch_number)
}

fn group_into_commits(mut revisions: Vec<RawRevision>) -> ChangeLog {
    revisions.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

    let mut commits: Vec<Commit> = Vec::new();
    let mut group_latest: Vec<DateTime<Utc>> = Vec::new();

    for revision in revisions {
        let existing = commits.iter().position(|commit| {
            commit.author == revision.author
                && commit.comment == revision.comment
                && commit.branch == revision.branch
        });
        let joinable = existing.filter(|&index| {
            revision.timestamp - group_latest[index] <= COMMIT_GROUP_WINDOW
        });

        match joinable {
            Some(index) => {
                commits[index]
                    .revisions
                    .push(FileRevision { path: revision.path, label: revision.label });
                group_latest[index] = revision.timestamp;
            }
            None => {
                commits.push(Commit {
                    author: revision.author,
                    timestamp: revision.timestamp,
                    comment: revision.comment,
                    branch: revision.branch,
                    revisions: vec![FileRevision {
                        path: revision.path,
                        label: revision.label,
                    }],
                });
                group_latest.push(revision.timestamp);
            }
        }
    }

    commits.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    ChangeLog { commits }
}
