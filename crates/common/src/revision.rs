// Dotted CVS revision labels (`1.3`, `1.2.2.1`) and the previous-revision
// rule used for diff links.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RevisionLabelError {
    #[error("revision label is empty")]
    Empty,
    #[error("revision label component `{0}` is not a number")]
    NotANumber(String),
    #[error("revision `{0}` has no previous revision")]
    NoPrevious(String),
}

/// Parse a dotted label into its numeric components.
pub fn parse_label(label: &str) -> Result<Vec<u64>, RevisionLabelError> {
    if label.is_empty() {
        return Err(RevisionLabelError::Empty);
    }

    label
        .split('.')
        .map(|part| part.parse().map_err(|_| RevisionLabelError::NotANumber(part.to_string())))
        .collect()
}

/// The revision a diff of `label` is taken against.
///
/// The last component is decremented (`1.3` → `1.2`) unless it is `1`; a
/// `.1` label marks a branch point, and its predecessor is found by dropping
/// the last two components (`1.2.2.1` → `1.2`), not by decrementing.
pub fn previous_revision(label: &str) -> Result<String, RevisionLabelError> {
    let mut parts = parse_label(label)?;
    let last = *parts.last().expect("parsed label has at least one component");

    if last != 1 {
        *parts.last_mut().expect("parsed label has at least one component") = last - 1;
    } else {
        if parts.len() < 3 {
            return Err(RevisionLabelError::NoPrevious(label.to_string()));
        }
        parts.truncate(parts.len() - 2);
    }

    Ok(parts.iter().map(u64::to_string).collect::<Vec<_>>().join("."))
}
