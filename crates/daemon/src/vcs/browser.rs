use std::error::Error;
use std::fmt::{Display, Formatter};

use url::Url;

use revline_common::revision::{previous_revision, RevisionLabelError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserError {
    InvalidBaseUrl { base_url: String, message: String },
}

impl Display for BrowserError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            BrowserError::InvalidBaseUrl { base_url, message } => {
                write!(f, "invalid browser base url `{base_url}`: {message}")
            }
        }
    }
}

impl Error for BrowserError {}

/// Builds ViewCVS-style links for a repository's files, revisions and diffs.
///
/// The base URL is validated up front and normalised to a trailing slash,
/// so link building itself cannot fail except for diff links, which need a
/// previous revision to exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewVcsBrowser {
    base_url: String,
    root_parameter: Option<String>,
}

impl ViewVcsBrowser {
    pub fn new(base_url: &str, root_parameter: &str) -> Result<Self, BrowserError> {
        let parsed = Url::parse(base_url).map_err(|error| BrowserError::InvalidBaseUrl {
            base_url: base_url.to_string(),
            message: error.to_string(),
        })?;
        if parsed.cannot_be_a_base() {
            return Err(BrowserError::InvalidBaseUrl {
                base_url: base_url.to_string(),
                message: "not a usable base url".into(),
            });
        }

        let mut base_url = base_url.to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        let root_parameter =
            (!root_parameter.is_empty()).then(|| root_parameter.to_string());
        Ok(Self { base_url, root_parameter })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn file_link(&self, path: &str) -> String {
        let link = format!("{}{}", self.base_url, path.trim_start_matches('/'));
        match &self.root_parameter {
            Some(root) => append_parameter(&link, &format!("root={root}")),
            None => link,
        }
    }

    pub fn revision_link(&self, path: &str, revision: &str) -> String {
        append_parameter(&self.file_link(path), &format!("rev={revision}"))
    }

    /// Link to the diff between `revision` and the revision before it.
    pub fn diff_link(&self, path: &str, revision: &str) -> Result<String, RevisionLabelError> {
        let previous = previous_revision(revision)?;
        Ok(append_parameter(
            &self.file_link(path),
            &format!("r1={previous}&r2={revision}"),
        ))
    }
}

fn append_parameter(link: &str, parameter: &str) -> String {
    let separator = if link.contains('?') { '&' } else { '?' };
    format!("{link}{separator}{parameter}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn browser() -> ViewVcsBrowser {
        ViewVcsBrowser::new("https://viewvc.example.org/proj", "main").unwrap()
    }

    #[test]
    fn rejects_unusable_base_urls() {
        assert!(ViewVcsBrowser::new("not a url", "").is_err());
        assert!(ViewVcsBrowser::new("mailto:dev@example.org", "").is_err());
        assert!(ViewVcsBrowser::new("https://viewvc.example.org/proj/", "").is_ok());
    }

    #[test]
    fn file_link_carries_the_root_parameter() {
        assert_eq!(
            browser().file_link("src/a.c"),
            "https://viewvc.example.org/proj/src/a.c?root=main"
        );
    }

    #[test]
    fn file_link_without_a_root_parameter_has_no_query() {
        let browser = ViewVcsBrowser::new("https://viewvc.example.org/proj", "").unwrap();
        assert_eq!(browser.file_link("src/a.c"), "https://viewvc.example.org/proj/src/a.c");
    }

    #[test]
    fn revision_link_appends_with_the_right_separator() {
        assert_eq!(
            browser().revision_link("src/a.c", "1.4"),
            "https://viewvc.example.org/proj/src/a.c?root=main&rev=1.4"
        );
        let bare = ViewVcsBrowser::new("https://viewvc.example.org/proj", "").unwrap();
        assert_eq!(
            bare.revision_link("src/a.c", "1.4"),
            "https://viewvc.example.org/proj/src/a.c?rev=1.4"
        );
    }

    #[test]
    fn diff_link_spans_the_previous_revision() {
        assert_eq!(
            browser().diff_link("src/a.c", "1.3").unwrap(),
            "https://viewvc.example.org/proj/src/a.c?root=main&r1=1.2&r2=1.3"
        );
        assert_eq!(
            browser().diff_link("src/a.c", "1.2.2.1").unwrap(),
            "https://viewvc.example.org/proj/src/a.c?root=main&r1=1.2&r2=1.2.2.1"
        );
    }

    #[test]
    fn diff_link_fails_for_the_first_revision() {
        assert!(browser().diff_link("src/a.c", "1.1").is_err());
    }
}
