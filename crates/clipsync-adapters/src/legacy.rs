//! Legacy per-type feed (`/obsidian/data`) and its bespoke note templates.
//!
//! Older accounts receive tweets, threads, reddit items and highlights as
//! structured records. Each page is drained by the server once delivered, so
//! the client keeps asking until an empty page comes back.

use async_trait::async_trait;
use clipsync_core::{markdown_file_name, PathError, VaultPath};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::{ApiClient, SourceError};

pub const TWEETS_DIR: &str = "Twitter/Tweets";
pub const TWEET_COLLECTIONS_DIR: &str = "Twitter/Tweet Collections";
pub const REDDIT_COMMENTS_DIR: &str = "Reddit/Comments";
pub const REDDIT_POSTS_DIR: &str = "Reddit/Posts";
pub const KINDLE_DIR: &str = "Kindle Highlights";
pub const HIGHLIGHTS_DIR: &str = "Highlights";
pub const POCKET_DIR: &str = "Pocket";

const EXCERPT_CHARS: usize = 50;
const THREAD: u8 = 1;
const CONVERSATION: u8 = 2;
const MEDIA_IMAGE: u8 = 1;
const MEDIA_VIDEO: u8 = 2;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LegacyUserData {
    pub tweets: Vec<LegacyTweet>,
    pub tweet_collections: Vec<LegacyTweetCollection>,
    pub reddit_comments: Vec<LegacyRedditComment>,
    pub reddit_posts: Vec<LegacyRedditPost>,
    pub kindle_highlights: Vec<LegacyKindleHighlight>,
    pub generic_highlights: Vec<LegacyGenericHighlight>,
    pub pocket_highlights: Vec<LegacyPocketHighlight>,
}

impl LegacyUserData {
    pub fn is_empty(&self) -> bool {
        self.tweets.is_empty()
            && self.tweet_collections.is_empty()
            && self.reddit_comments.is_empty()
            && self.reddit_posts.is_empty()
            && self.kindle_highlights.is_empty()
            && self.generic_highlights.is_empty()
            && self.pocket_highlights.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LegacyAuthor {
    pub name: String,
    pub username: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LegacyMedia {
    #[serde(rename = "type")]
    pub kind: Option<u8>,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LegacyTweet {
    pub text: String,
    pub url: String,
    pub author: LegacyAuthor,
    pub media: Vec<LegacyMedia>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LegacyTweetCollection {
    #[serde(rename = "type")]
    pub kind: u8,
    pub url: String,
    pub author: LegacyAuthor,
    pub tweets: Vec<LegacyTweet>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LegacyRedditComment {
    pub text: String,
    pub subreddit: String,
    pub url: String,
    pub author: LegacyAuthor,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LegacyRedditPost {
    pub title: String,
    pub text: Option<String>,
    pub subreddit: String,
    pub url: String,
    pub author: LegacyAuthor,
    pub media: Vec<LegacyMedia>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LegacyWork {
    pub title: String,
    pub author: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LegacyKindleHighlight {
    pub text: String,
    pub location: JsonValue,
    pub book: LegacyWork,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LegacyGenericHighlight {
    pub title: String,
    pub text: Option<String>,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LegacyPocketHighlight {
    pub text: String,
    pub pocket_article: LegacyWork,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct LegacyTokenStatus {
    pub valid: bool,
    #[serde(default)]
    pub subscribed: bool,
}

/// A file the legacy feed wants in the vault, relative to the sync folder.
#[derive(Debug, Clone, PartialEq)]
pub enum LegacyNote {
    /// Whole page; skipped when it already exists.
    Page { path: VaultPath, contents: String },
    /// One highlight appended to a per-book/article page created with `header`.
    Highlight {
        path: VaultPath,
        header: String,
        entry: String,
    },
}

impl LegacyNote {
    pub fn path(&self) -> &VaultPath {
        match self {
            Self::Page { path, .. } | Self::Highlight { path, .. } => path,
        }
    }
}

#[async_trait]
pub trait LegacyFeed: Send + Sync {
    async fn next_page(&self) -> Result<LegacyUserData, SourceError>;
}

#[async_trait]
impl LegacyFeed for ApiClient {
    async fn next_page(&self) -> Result<LegacyUserData, SourceError> {
        let value: JsonValue = self.get_json("/obsidian/data", &[]).await?;
        if let Some(message) = value.get("message").and_then(JsonValue::as_str) {
            if message.contains("Error") {
                return Err(SourceError::Auth {
                    reason: message.to_string(),
                });
            }
        }
        serde_json::from_value(value).map_err(|source| SourceError::Decode {
            url: format!("{}/obsidian/data", self.base_url()),
            source,
        })
    }
}

impl ApiClient {
    pub async fn verify_legacy_token(&self) -> Result<LegacyTokenStatus, SourceError> {
        self.get_json("/token/verify", &[]).await
    }

    /// Asks the service to forget what it already delivered so the next
    /// legacy sync starts from scratch.
    pub async fn clear_sync_memory(&self) -> Result<(), SourceError> {
        let _: JsonValue = self.get_json("/obsidian/clear-sync-memory", &[]).await?;
        Ok(())
    }
}

/// One entry per record; a record whose path cannot be built fails alone.
pub fn legacy_notes(data: &LegacyUserData) -> Vec<Result<LegacyNote, PathError>> {
    let mut notes = Vec::new();
    notes.extend(data.tweets.iter().map(tweet_note));
    notes.extend(data.tweet_collections.iter().filter_map(collection_note));
    notes.extend(data.reddit_comments.iter().map(reddit_comment_note));
    notes.extend(data.reddit_posts.iter().map(reddit_post_note));
    notes.extend(data.kindle_highlights.iter().map(kindle_note));
    notes.extend(data.generic_highlights.iter().map(generic_highlight_note));
    notes.extend(data.pocket_highlights.iter().map(pocket_note));
    notes
}

/// First 50 characters with line breaks collapsed to spaces.
fn excerpt(text: &str) -> String {
    single_line(text).chars().take(EXCERPT_CHARS).collect()
}

fn single_line(text: &str) -> String {
    text.replace("\r\n", " ").replace(['\r', '\n'], " ")
}

fn note_path(dir: &str, title: &str) -> Result<VaultPath, PathError> {
    let dir = VaultPath::new(dir)?;
    let file = VaultPath::from_segments([markdown_file_name(&excerpt(title))])?;
    Ok(dir.join(&file))
}

fn twitter_author_link(author: &LegacyAuthor) -> String {
    format!("[{}](https://twitter.com/{})", author.name, author.username)
}

fn tweet_media_lines(media: &[LegacyMedia]) -> impl Iterator<Item = String> + '_ {
    media.iter().map(|entity| format!("![]({})\n", entity.url))
}

fn tweet_note(tweet: &LegacyTweet) -> Result<LegacyNote, PathError> {
    let mut lines = vec![
        format!("# {}...", excerpt(&tweet.text)),
        "## Metadata".to_string(),
        format!("- Author: {}", twitter_author_link(&tweet.author)),
        "- Type: 🐤 Tweet #tweet".to_string(),
        format!("- URL: {}\n", tweet.url),
        "## Tweet".to_string(),
        format!("{}\n", tweet.text),
    ];
    lines.extend(tweet_media_lines(&tweet.media));

    Ok(LegacyNote::Page {
        path: note_path(TWEETS_DIR, &tweet.text)?,
        contents: lines.join("\n"),
    })
}

fn collection_note(collection: &LegacyTweetCollection) -> Option<Result<LegacyNote, PathError>> {
    let first = collection.tweets.first()?;
    let (label, section) = match collection.kind {
        THREAD => ("🧵 Thread #thread", "Thread"),
        CONVERSATION => ("💬 Conversation #conversation", "Conversation"),
        _ => return None,
    };

    let mut lines = vec![
        format!("# {}...", excerpt(&first.text)),
        "## Metadata".to_string(),
        format!("- Author: {}", twitter_author_link(&collection.author)),
        format!("- Type: {label}"),
        format!("- URL: {}\n", collection.url),
        format!("## {section}"),
    ];
    for tweet in &collection.tweets {
        if collection.kind == CONVERSATION {
            lines.push(format!(
                "**[{} (@{})]({})**\n",
                tweet.author.name,
                tweet.author.username,
                tweet.author.url.as_deref().unwrap_or_default()
            ));
        }
        lines.push(format!("{}\n", tweet.text));
        lines.extend(tweet_media_lines(&tweet.media));
        if collection.kind == CONVERSATION {
            lines.push("---\n".to_string());
        }
    }

    Some(note_path(TWEET_COLLECTIONS_DIR, &first.text).map(|path| LegacyNote::Page {
        path,
        contents: lines.join("\n"),
    }))
}

fn reddit_metadata(subreddit: &str, author: &LegacyAuthor) -> [String; 2] {
    [
        format!("- Subreddit: [r/{subreddit}](https://reddit.com/r/{subreddit})"),
        format!(
            "- Author: [u/{0}](https://reddit.com/user/{0})",
            author.username
        ),
    ]
}

fn reddit_comment_note(comment: &LegacyRedditComment) -> Result<LegacyNote, PathError> {
    let mut lines = vec![
        format!("# {}...", excerpt(&comment.text)),
        "## Metadata".to_string(),
    ];
    lines.extend(reddit_metadata(&comment.subreddit, &comment.author));
    lines.extend([
        "- Type: 👾 Reddit Comment #reddit-comment".to_string(),
        format!("- URL: {}\n", comment.url),
        "## Comment".to_string(),
        format!("{}\n", comment.text),
    ]);

    Ok(LegacyNote::Page {
        path: note_path(REDDIT_COMMENTS_DIR, &comment.text)?,
        contents: lines.join("\n"),
    })
}

fn reddit_post_note(post: &LegacyRedditPost) -> Result<LegacyNote, PathError> {
    let mut lines = vec![format!("# {}", single_line(&post.title)), "## Metadata".to_string()];
    lines.extend(reddit_metadata(&post.subreddit, &post.author));
    lines.extend([
        "- Type: 👾 Reddit Post #reddit-post".to_string(),
        format!("- URL: {}\n", post.url),
        "## Post".to_string(),
        post.text
            .as_deref()
            .filter(|text| !text.is_empty())
            .map(|text| format!("{text}\n"))
            .unwrap_or_default(),
    ]);
    for media in &post.media {
        match media.kind {
            Some(MEDIA_IMAGE) => lines.push(format!("![]({})\n", media.url)),
            Some(MEDIA_VIDEO) => lines.push(format!("[Video]({})\n", media.url)),
            _ => {}
        }
    }

    Ok(LegacyNote::Page {
        path: note_path(REDDIT_POSTS_DIR, &post.title)?,
        contents: lines.join("\n"),
    })
}

fn work_header(work: &LegacyWork, label: &str) -> String {
    [
        format!("# {}", single_line(&work.title)),
        "## Metadata".to_string(),
        format!("- Author: {}", work.author),
        format!("- Type: {label}"),
        format!("- URL: {}\n", work.url),
        "## Highlights".to_string(),
    ]
    .join("\n")
}

fn location_text(location: &JsonValue) -> String {
    match location {
        JsonValue::String(text) => text.clone(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

fn kindle_note(highlight: &LegacyKindleHighlight) -> Result<LegacyNote, PathError> {
    Ok(LegacyNote::Highlight {
        path: note_path(KINDLE_DIR, &highlight.book.title)?,
        header: work_header(&highlight.book, "📕 Kindle Highlight #kindle-highlight"),
        entry: format!(
            "\n{} - *Location: {}*\n",
            highlight.text,
            location_text(&highlight.location)
        ),
    })
}

fn generic_highlight_note(highlight: &LegacyGenericHighlight) -> Result<LegacyNote, PathError> {
    let lines = [
        format!("# {}", single_line(&highlight.title)),
        "## Metadata".to_string(),
        "- Type: 💬 Highlight #highlight".to_string(),
        format!("- URL: {}\n", highlight.url),
        "## Highlight".to_string(),
        highlight
            .text
            .as_deref()
            .filter(|text| !text.is_empty())
            .map(|text| format!("{text}\n"))
            .unwrap_or_default(),
    ];

    Ok(LegacyNote::Page {
        path: note_path(HIGHLIGHTS_DIR, &highlight.title)?,
        contents: lines.join("\n"),
    })
}

fn pocket_note(highlight: &LegacyPocketHighlight) -> Result<LegacyNote, PathError> {
    Ok(LegacyNote::Highlight {
        path: note_path(POCKET_DIR, &highlight.pocket_article.title)?,
        header: work_header(&highlight.pocket_article, "📑 Pocket Highlights #pocket-highlights"),
        entry: format!("\n{}\n", highlight.text),
    })
}
