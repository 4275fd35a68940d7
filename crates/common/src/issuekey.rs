// Issue-key token rules.
//
// A key token looks like `ABC-12`: an uppercase project-key prefix, a dash,
// and digits. Matching is case-sensitive and token-bounded — a key counts as
// present only when both sides are a non-alphanumeric character or the edge
// of the string, so `ABC-1` is never found inside `ABC-10` or `XABC-1`.

use std::sync::LazyLock;

use regex::Regex;

/// Any issue-key-shaped token, with the boundary rules baked into the
/// surrounding classes (the regex crate has no lookaround).
static ANY_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^A-Za-z0-9])[A-Z][A-Z0-9]+-[0-9]+(?:$|[^A-Za-z0-9])")
        .expect("issue key pattern is valid")
});

/// True when `text` contains at least one issue-key-shaped token.
///
/// This is the revision filter used while building the commit model: a
/// revision whose comment mentions no key at all can never match any issue
/// and is dropped before it enters memory.
pub fn contains_issue_key(text: &str) -> bool {
    ANY_KEY.is_match(text)
}

/// True when `text` contains `key` as an exact, case-sensitive token.
pub fn is_key_in_string(key: &str, text: &str) -> bool {
    if key.is_empty() {
        return false;
    }

    for (start, _) in text.match_indices(key) {
        let before_ok = text[..start].chars().next_back().is_none_or(|c| !c.is_alphanumeric());
        let after_ok =
            text[start + key.len()..].chars().next().is_none_or(|c| !c.is_alphanumeric());
        if before_ok && after_ok {
            return true;
        }
    }

    false
}

/// Project key portion of an issue key: `ABC-12` → `ABC`.
pub fn project_key_of(issue_key: &str) -> Option<&str> {
    match issue_key.rsplit_once('-') {
        Some((project, number)) if !project.is_empty() && !number.is_empty() => Some(project),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_key_matches_inside_sentence() {
        assert!(is_key_in_string("ABC-1", "Fixes ABC-1 today"));
        assert!(is_key_in_string("ABC-1", "ABC-1"));
        assert!(is_key_in_string("ABC-1", "see ABC-1."));
        assert!(is_key_in_string("ABC-1", "(ABC-1)"));
    }

    #[test]
    fn key_does_not_match_longer_number() {
        assert!(!is_key_in_string("ABC-1", "ABC-10"));
        assert!(!is_key_in_string("ABC-1", "Fixes ABC-10 and ABC-11"));
    }

    #[test]
    fn key_does_not_match_with_leading_alphanumerics() {
        assert!(!is_key_in_string("ABC-1", "XABC-1"));
        assert!(!is_key_in_string("ABC-1", "1ABC-1"));
    }

    #[test]
    fn matching_is_case_sensitive() {
        assert!(!is_key_in_string("ABC-1", "abc-1"));
        assert!(!is_key_in_string("abc-1", "ABC-1"));
    }

    #[test]
    fn empty_key_never_matches() {
        assert!(!is_key_in_string("", "anything"));
    }

    #[test]
    fn detects_any_key_token() {
        assert!(contains_issue_key("Fixed ABC-123"));
        assert!(contains_issue_key("ABC-1: initial import"));
        assert!(contains_issue_key("merge JRA-42 onto branch"));
    }

    #[test]
    fn rejects_non_key_text() {
        assert!(!contains_issue_key("plain refactoring, no ticket"));
        assert!(!contains_issue_key("version 1.2 bump"));
        assert!(!contains_issue_key("lowercase abc-1 is not a key"));
        // Single-letter prefixes are not project-key-like.
        assert!(!contains_issue_key("A-1"));
    }

    #[test]
    fn rejects_embedded_key_shapes() {
        assert!(!contains_issue_key("notAKEY-1x"));
        assert!(!contains_issue_key("XABC-1Y"));
    }

    #[test]
    fn project_key_extraction() {
        assert_eq!(project_key_of("ABC-12"), Some("ABC"));
        assert_eq!(project_key_of("X2Y-9"), Some("X2Y"));
        assert_eq!(project_key_of("NODASH"), None);
        assert_eq!(project_key_of("-1"), None);
        assert_eq!(project_key_of("ABC-"), None);
    }
}
