//! Source links for rendered locations.

use crate::classify::SourceLocation;

/// Builds `<repo>/blob/<commit>/<path>#L<line>` links.
///
/// Both the repository URL and the commit are opaque strings taken from
/// the CI environment. Without either one no links are produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceLinker {
    base: Option<String>,
}

impl SourceLinker {
    /// Creates a linker; empty or missing inputs disable linking
    pub fn new(repo_url: Option<&str>, commit: Option<&str>) -> Self {
        let base = match (repo_url.map(str::trim), commit.map(str::trim)) {
            (Some(repo), Some(commit)) if !repo.is_empty() && !commit.is_empty() => {
                normalize_repo_url(repo).map(|repo| format!("{}/blob/{}", repo, commit))
            }
            _ => None,
        };
        Self { base }
    }

    /// A linker that never links
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Returns true if links can be produced
    pub fn is_enabled(&self) -> bool {
        self.base.is_some()
    }

    /// Link to `location`, if linking is enabled and the path is repository-relative
    pub fn link(&self, location: &SourceLocation) -> Option<String> {
        let base = self.base.as_deref()?;
        let path = location.path.trim_start_matches("./");
        if path.is_empty() || path.starts_with('/') {
            return None;
        }
        Some(format!("{}/{}#L{}", base, path, location.line))
    }
}

/// Turns a clone URL into a browsable `https://` URL.
///
/// `git@host:owner/repo.git` becomes `https://host/owner/repo`; `http(s)://`
/// URLs only lose a trailing `.git` or `/`. Anything else yields `None`.
pub fn normalize_repo_url(url: &str) -> Option<String> {
    let url = url.trim();

    let https = if let Some(rest) = url.strip_prefix("git@") {
        let (host, path) = rest.split_once(':')?;
        format!("https://{}/{}", host, path)
    } else if let Some(rest) = url.strip_prefix("ssh://git@") {
        format!("https://{}", rest)
    } else if url.starts_with("https://") || url.starts_with("http://") {
        url.to_string()
    } else {
        return None;
    };

    let trimmed = https.trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    Some(trimmed.to_string())
}
