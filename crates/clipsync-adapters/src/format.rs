//! Clipping → markdown, one strategy per payload shape.

use clipsync_core::{
    add_metadata, parse, render, Clipping, ClippingPayload, Markdown, Metadata, QuotedTweet, Tweet,
    TweetAttachment, TweetAuthor,
};

/// Parsed document (for path derivation) plus the exact text to write.
#[derive(Debug, Clone, PartialEq)]
pub struct Materialized {
    pub document: Markdown,
    pub contents: String,
}

pub fn materialize(clipping: &Clipping) -> Materialized {
    match clipping.payload() {
        ClippingPayload::FrontMatter(text) | ClippingPayload::Plain(text) => Materialized {
            document: parse(text),
            contents: text.to_string(),
        },
        ClippingPayload::Tweets(tweets) => {
            let document = twitter_clipping_to_markdown(clipping, &tweets);
            let contents = render(&document);
            Materialized { document, contents }
        }
    }
}

/// Renders early twitter clippings, which carry tweets in `data` instead of
/// an embedded header. `tweets` must not be empty.
pub fn twitter_clipping_to_markdown(clipping: &Clipping, tweets: &[Tweet]) -> Markdown {
    let Some(first) = tweets.first() else {
        return parse(&clipping.content);
    };

    let identity: Metadata = [
        ("author", first.author.name.clone()),
        ("username", first.author.username.clone()),
        ("id", first.id.clone()),
        (
            "source",
            format!(
                "https://twitter.com/{}/status/{}",
                first.author.username, first.id
            ),
        ),
    ]
    .into_iter()
    .collect();
    let timestamps: Metadata = [
        ("posted", clipping.created_at.clone()),
        ("saved", clipping.saved_at.clone()),
    ]
    .into_iter()
    .collect();

    let body = tweets
        .iter()
        .map(tweet_to_markdown)
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");

    add_metadata(&Markdown::new(identity, body), &timestamps)
}

fn avatar_prefix(author: &TweetAuthor) -> String {
    author
        .avatar
        .as_deref()
        .map(|avatar| format!("![{}|20]({avatar})  ", author.username))
        .unwrap_or_default()
}

fn tweet_to_markdown(tweet: &Tweet) -> String {
    let mut lines = vec![
        format!(
            "{}{} · @{} · {}",
            avatar_prefix(&tweet.author),
            tweet.author.name,
            tweet.author.username,
            tweet.created_at
        ),
        tweet.text.clone(),
    ];
    if let Some(quoted) = &tweet.quoted_tweet {
        lines.push(format!("\n{}", quoted_tweet_to_markdown(quoted)));
    }
    if let Some(attachment) = &tweet.attachment {
        lines.push(format!("\n{}", attachment_to_markdown(attachment)));
    }
    lines.retain(|line| !line.is_empty());
    lines.join("\n")
}

fn quoted_tweet_to_markdown(tweet: &QuotedTweet) -> String {
    let mut lines = vec![
        format!(
            "{}{} · @{}",
            avatar_prefix(&tweet.author),
            tweet.author.name,
            tweet.author.username
        ),
        tweet.text.clone(),
    ];
    if let Some(source) = &tweet.source {
        lines.push(format!("[Open]({source})"));
    }
    lines.retain(|line| !line.is_empty());
    quote_block(&lines.join("\n"))
}

fn attachment_to_markdown(attachment: &TweetAttachment) -> String {
    match attachment {
        TweetAttachment::Image { src } => format!("![image|300]({src})"),
        TweetAttachment::Link { src } => format!("[{src}]({src})"),
    }
}

fn quote_block(text: &str) -> String {
    text.lines()
        .map(|line| format!("> {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipsync_core::derive_path;
    use serde_json::json;

    fn twitter_clipping(content: &str, data: Option<serde_json::Value>) -> Clipping {
        Clipping {
            id: "c1".into(),
            user_id: None,
            kind: "twitter".into(),
            content: content.into(),
            created_at: "2023-05-01T10:00:00Z".into(),
            saved_at: "2023-05-02T10:00:00Z".into(),
            data,
        }
    }

    #[test]
    fn front_matter_content_is_written_verbatim() {
        let markdown = "---\nusername: alice\nid: 42\n---\n\nHello world";
        let materialized = materialize(&twitter_clipping(markdown, None));

        assert_eq!(materialized.contents, markdown);
        assert_eq!(
            derive_path("twitter", &materialized.document.metadata)
                .expect("path")
                .as_str(),
            "Twitter/alice/42.md"
        );
    }

    #[test]
    fn tweet_data_renders_header_and_thread() {
        let clipping = twitter_clipping(
            "",
            Some(json!([
                {
                    "id": "100",
                    "text": "First tweet",
                    "createdAt": "May 1",
                    "author": {"name": "Alice", "username": "alice", "avatar": "https://a/av.png"},
                    "quotedTweet": {
                        "source": "https://twitter.com/bob/status/5",
                        "text": "quoted line",
                        "author": {"name": "Bob", "username": "bob"}
                    }
                },
                {
                    "id": "101",
                    "text": "Second tweet",
                    "createdAt": "May 1",
                    "author": {"name": "Alice", "username": "alice"},
                    "attachment": {"type": "image", "src": "https://img/1.png"}
                }
            ])),
        );

        let materialized = materialize(&clipping);

        let expected = "---\n\
author: Alice\n\
username: alice\n\
id: 100\n\
source: https://twitter.com/alice/status/100\n\
posted: 2023-05-01T10:00:00Z\n\
saved: 2023-05-02T10:00:00Z\n\
---\n\n\
![alice|20](https://a/av.png)  Alice · @alice · May 1\n\
First tweet\n\
\n\
> Bob · @bob\n\
> quoted line\n\
> [Open](https://twitter.com/bob/status/5)\n\
\n---\n\n\
Alice · @alice · May 1\n\
Second tweet\n\
\n\
![image|300](https://img/1.png)";
        assert_eq!(materialized.contents, expected);
        assert_eq!(
            derive_path("twitter", &materialized.document.metadata)
                .expect("path")
                .as_str(),
            "Twitter/alice/100.md"
        );
        assert_eq!(parse(&materialized.contents), materialized.document);
    }

    #[test]
    fn plain_content_has_no_identity() {
        let materialized = materialize(&twitter_clipping("just text", None));
        assert!(materialized.document.metadata.is_empty());
        assert_eq!(materialized.contents, "just text");
        assert!(derive_path("twitter", &materialized.document.metadata).is_err());
    }
}
