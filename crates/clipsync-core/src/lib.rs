//! Core domain model for clipsync: clippings, vault paths, the front-matter
//! codec and the path deriver that doubles as the deduplication key.

pub mod markdown;
pub mod paths;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub use markdown::{add_metadata, parse, render, Markdown, MetaValue, Metadata};
pub use paths::{derive_path, markdown_file_name, sanitize_component, PathError};

/// Provider tags the path deriver and formatters know how to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClippingKind {
    Twitter,
    Webpage,
}

impl ClippingKind {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "twitter" => Some(Self::Twitter),
            "webpage" => Some(Self::Webpage),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Twitter => "twitter",
            Self::Webpage => "webpage",
        }
    }
}

impl fmt::Display for ClippingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One saved item as returned by the remote sync endpoint.
///
/// `kind` stays a raw string so that an unknown provider tag fails for that
/// clipping only instead of rejecting the whole batch at decode time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clipping {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, alias = "markdown")]
    pub content: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub saved_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
}

/// Shape of a clipping's payload; selects how it becomes markdown.
#[derive(Debug, Clone, PartialEq)]
pub enum ClippingPayload<'a> {
    /// Content already carries its front-matter header and is written verbatim.
    FrontMatter(&'a str),
    /// Early twitter clippings: structured tweets in `data`, no header.
    Tweets(Vec<Tweet>),
    /// Free text with no recoverable metadata.
    Plain(&'a str),
}

impl Clipping {
    pub fn known_kind(&self) -> Option<ClippingKind> {
        ClippingKind::parse(&self.kind)
    }

    pub fn payload(&self) -> ClippingPayload<'_> {
        if markdown::has_front_matter(&self.content) {
            return ClippingPayload::FrontMatter(&self.content);
        }
        if self.known_kind() == Some(ClippingKind::Twitter) {
            if let Some(tweets) = self.tweets().filter(|tweets| !tweets.is_empty()) {
                return ClippingPayload::Tweets(tweets);
            }
        }
        ClippingPayload::Plain(&self.content)
    }

    /// Tweets carried in `data`, if it decodes as a tweet list.
    pub fn tweets(&self) -> Option<Vec<Tweet>> {
        let data = self.data.as_ref()?;
        serde_json::from_value(data.clone()).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tweet {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub created_at: String,
    pub author: TweetAuthor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quoted_tweet: Option<QuotedTweet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<TweetAttachment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TweetAuthor {
    pub name: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotedTweet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub text: String,
    pub author: TweetAuthor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TweetAttachment {
    Image { src: String },
    Link { src: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VaultPathError {
    #[error("vault path is empty")]
    Empty,
    #[error("vault path `{0}` must be relative")]
    Absolute(String),
    #[error("vault path `{path}` has an invalid segment `{segment}`")]
    InvalidSegment { path: String, segment: String },
}

/// Relative, `/`-separated location inside the vault.
///
/// Segments are never empty, `.`, `..`, or contain `:`/NUL, so joining a
/// `VaultPath` onto the vault root cannot escape it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VaultPath(String);

impl VaultPath {
    /// Backslashes are treated as separators and empty segments are dropped,
    /// so `Clippings\\Web//` normalizes to `Clippings/Web`.
    pub fn new(raw: &str) -> Result<Self, VaultPathError> {
        let trimmed = raw.trim();
        if trimmed.starts_with('/') || trimmed.starts_with('\\') {
            return Err(VaultPathError::Absolute(raw.to_string()));
        }
        let segments: Vec<&str> = trimmed
            .split(['/', '\\'])
            .filter(|segment| !segment.is_empty())
            .collect();
        Self::from_segments(segments)
    }

    pub fn from_segments<I, S>(segments: I) -> Result<Self, VaultPathError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut joined = String::new();
        for segment in segments {
            let segment = segment.as_ref();
            if segment.is_empty()
                || segment == "."
                || segment == ".."
                || segment.contains(['/', '\\', ':', '\0'])
            {
                return Err(VaultPathError::InvalidSegment {
                    path: joined.clone(),
                    segment: segment.to_string(),
                });
            }
            if !joined.is_empty() {
                joined.push('/');
            }
            joined.push_str(segment);
        }
        if joined.is_empty() {
            return Err(VaultPathError::Empty);
        }
        Ok(Self(joined))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    pub fn join(&self, child: &VaultPath) -> VaultPath {
        VaultPath(format!("{}/{}", self.0, child.0))
    }

    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    pub fn parent(&self) -> Option<VaultPath> {
        self.0
            .rsplit_once('/')
            .map(|(parent, _)| VaultPath(parent.to_string()))
    }

    /// Every ancestor directory, shallowest first: `a/b/c.md` yields `a`, `a/b`.
    pub fn ancestors_shallow_first(&self) -> Vec<VaultPath> {
        let mut ancestors = Vec::new();
        let mut prefix = String::new();
        let segments: Vec<&str> = self.segments().collect();
        for segment in &segments[..segments.len().saturating_sub(1)] {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(segment);
            ancestors.push(VaultPath(prefix.clone()));
        }
        ancestors
    }
}

impl fmt::Display for VaultPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<VaultPath> for String {
    fn from(path: VaultPath) -> Self {
        path.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn clipping_accepts_markdown_alias_and_unknown_types() {
        let clipping: Clipping = serde_json::from_value(json!({
            "id": "42",
            "type": "mastodon",
            "markdown": "hello",
            "created_at": "2024-01-01T00:00:00Z",
            "saved_at": "2024-01-02T00:00:00Z"
        }))
        .expect("decode clipping");

        assert_eq!(clipping.content, "hello");
        assert_eq!(clipping.kind, "mastodon");
        assert_eq!(clipping.known_kind(), None);
        assert_eq!(clipping.payload(), ClippingPayload::Plain("hello"));
    }

    #[test]
    fn payload_prefers_embedded_front_matter() {
        let clipping = Clipping {
            id: "42".into(),
            user_id: None,
            kind: "twitter".into(),
            content: "---\nusername: alice\nid: 42\n---\n\nHello world".into(),
            created_at: String::new(),
            saved_at: String::new(),
            data: Some(json!([{"id": "42", "text": "ignored", "author": {"name": "A", "username": "alice"}}])),
        };

        assert!(matches!(clipping.payload(), ClippingPayload::FrontMatter(_)));
    }

    #[test]
    fn twitter_data_without_header_selects_tweets() {
        let clipping = Clipping {
            id: "7".into(),
            user_id: Some("u1".into()),
            kind: "twitter".into(),
            content: String::new(),
            created_at: String::new(),
            saved_at: String::new(),
            data: Some(json!([{
                "id": "7",
                "text": "first",
                "createdAt": "2023-05-01",
                "author": {"name": "Bob", "username": "bob"},
                "attachment": {"type": "image", "src": "https://img/1.png"}
            }])),
        };

        let ClippingPayload::Tweets(tweets) = clipping.payload() else {
            panic!("expected tweets payload");
        };
        assert_eq!(tweets.len(), 1);
        assert_eq!(tweets[0].author.username, "bob");
        assert_eq!(
            tweets[0].attachment,
            Some(TweetAttachment::Image { src: "https://img/1.png".into() })
        );
    }

    #[test]
    fn vault_path_normalizes_and_rejects_escapes() {
        let path = VaultPath::new("Clippings\\Web//Pages/").expect("valid");
        assert_eq!(path.as_str(), "Clippings/Web/Pages");

        assert_eq!(VaultPath::new("   "), Err(VaultPathError::Empty));
        assert!(matches!(VaultPath::new("/etc/passwd"), Err(VaultPathError::Absolute(_))));
        assert!(matches!(
            VaultPath::new("a/../b"),
            Err(VaultPathError::InvalidSegment { .. })
        ));
        assert!(matches!(
            VaultPath::new("C:/Users"),
            Err(VaultPathError::InvalidSegment { .. })
        ));
    }

    #[test]
    fn ancestors_are_listed_shallow_first() {
        let path = VaultPath::new("base/Twitter/alice/42.md").expect("valid");
        let ancestors: Vec<String> = path
            .ancestors_shallow_first()
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(ancestors, vec!["base", "base/Twitter", "base/Twitter/alice"]);
        assert_eq!(path.parent().map(String::from).as_deref(), Some("base/Twitter/alice"));
        assert_eq!(path.file_name(), "42.md");
    }
}
