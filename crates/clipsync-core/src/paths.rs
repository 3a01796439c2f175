//! Vault path derivation.
//!
//! The derived path encodes a clipping's identity, so it is also the
//! deduplication key: the writer skips paths that already exist.

use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

use crate::markdown::Metadata;
use crate::{ClippingKind, VaultPath, VaultPathError};

pub const TWITTER_DIR: &str = "Twitter";
pub const WEB_PAGES_DIR: &str = "Web Pages";

const MAX_COMPONENT_BYTES: usize = 200;
const DIGEST_HEX_LEN: usize = 8;
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("invalid source url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("unsupported clipping type `{0}`")]
    UnsupportedType(String),
    #[error(transparent)]
    Path(#[from] VaultPathError),
}

pub fn derive_path(kind: &str, metadata: &Metadata) -> Result<VaultPath, PathError> {
    match ClippingKind::parse(kind) {
        Some(ClippingKind::Twitter) => {
            let username = required(metadata, "username")?;
            let id = required(metadata, "id")?;
            Ok(VaultPath::from_segments([
                TWITTER_DIR.to_string(),
                sanitize_component(username),
                markdown_file_name(id),
            ])?)
        }
        Some(ClippingKind::Webpage) => {
            let title = required(metadata, "title")?;
            let source = required(metadata, "source")?;
            let host = source_host(source)?;
            Ok(VaultPath::from_segments([
                WEB_PAGES_DIR.to_string(),
                sanitize_component(&host),
                markdown_file_name(title),
            ])?)
        }
        None => Err(PathError::UnsupportedType(kind.to_string())),
    }
}

pub fn markdown_file_name(stem: &str) -> String {
    format!("{}.md", sanitize_component(stem))
}

/// Makes `raw` safe as a single path component.
///
/// Path separators, `? < > : * | "` and control characters are removed,
/// trailing dots and spaces are stripped, reserved device names are dropped
/// and the result is capped at 200 bytes. Whenever that changes the input, a
/// short SHA-256 digest of the original is appended so inputs that clean up
/// to the same text still get distinct names. The result is never empty.
pub fn sanitize_component(raw: &str) -> String {
    let mut cleaned: String = raw.chars().filter(|ch| !is_illegal(*ch)).collect();
    trim_trailing_dots_and_spaces(&mut cleaned);
    if is_reserved(&cleaned) {
        cleaned.clear();
    }
    truncate_on_char_boundary(&mut cleaned, MAX_COMPONENT_BYTES);
    trim_trailing_dots_and_spaces(&mut cleaned);

    if cleaned == raw && !cleaned.is_empty() {
        return cleaned;
    }

    let digest = short_digest(raw);
    if cleaned.is_empty() {
        digest
    } else {
        format!("{cleaned}-{digest}")
    }
}

fn required<'a>(metadata: &'a Metadata, field: &'static str) -> Result<&'a str, PathError> {
    metadata
        .get_text(field)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(PathError::MissingField(field))
}

fn source_host(source: &str) -> Result<String, PathError> {
    let url = Url::parse(source).map_err(|err| PathError::InvalidUrl {
        url: source.to_string(),
        reason: err.to_string(),
    })?;
    url.host_str()
        .filter(|host| !host.is_empty())
        .map(str::to_string)
        .ok_or_else(|| PathError::InvalidUrl {
            url: source.to_string(),
            reason: "url has no host".to_string(),
        })
}

fn is_illegal(ch: char) -> bool {
    matches!(ch, '/' | '\\' | '?' | '<' | '>' | ':' | '*' | '|' | '"') || ch.is_control()
}

fn is_reserved(name: &str) -> bool {
    let stem = name.split('.').next().unwrap_or_default();
    RESERVED_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(stem))
}

fn trim_trailing_dots_and_spaces(value: &mut String) {
    let keep = value.trim_end_matches(|ch| ch == '.' || ch == ' ').len();
    value.truncate(keep);
}

fn truncate_on_char_boundary(value: &mut String, max_bytes: usize) {
    if value.len() <= max_bytes {
        return;
    }
    let mut cut = max_bytes;
    while !value.is_char_boundary(cut) {
        cut -= 1;
    }
    value.truncate(cut);
}

fn short_digest(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(DIGEST_HEX_LEN);
    digest
}
