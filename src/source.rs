//! Citation sources and host helpers.

use serde::{Deserialize, Serialize};
use url::Url;

/// Maximum number of citations kept for a single answer.
pub const MAX_CITATIONS: usize = 6;

/// A cited source shown alongside an answer.
///
/// Sources are built once from upstream results and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Source {
    /// Display title.
    pub title: String,
    /// Source URL.
    pub url: String,
    /// Optional snippet from the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    /// Favicon URL, synthesized from the host when the upstream omits it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
}

impl Source {
    /// Build a source, filling in the favicon from the URL's host if absent.
    pub fn new(
        title: impl Into<String>,
        url: impl Into<String>,
        snippet: Option<String>,
        favicon: Option<String>,
    ) -> Self {
        let url = url.into();
        let favicon = favicon
            .filter(|f| !f.trim().is_empty())
            .or_else(|| favicon_url(&url));
        Self {
            title: title.into(),
            url,
            snippet: snippet.filter(|s| !s.trim().is_empty()),
            favicon,
        }
    }

    /// Return a copy whose favicon is guaranteed to be set when the URL has a host.
    #[must_use]
    pub fn normalized(self) -> Self {
        Self::new(self.title, self.url, self.snippet, self.favicon)
    }
}

/// Extract the display host of a URL.
///
/// The host is lower-cased with a leading `www.` removed. Bare hosts such as
/// `example.com/path` are accepted by assuming `https`.
pub fn host_of(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let parsed = Url::parse(raw).or_else(|_| Url::parse(&format!("https://{raw}")));
    let url = parsed.ok()?;
    let host = url.host_str()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();

    if host.is_empty() { None } else { Some(host) }
}

/// Favicon service URL for the host of `url`.
pub fn favicon_url(url: &str) -> Option<String> {
    host_of(url).map(|host| format!("https://www.google.com/s2/favicons?domain={host}&sz=32"))
}
