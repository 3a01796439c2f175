//! Front-matter codec.
//!
//! A document is an optional `---` delimited block of `key: value` and
//! `key: [a, b]` lines followed by a free-text body. Parsing is best-effort:
//! lines that are not `key: value` pairs are ignored, and a missing or
//! unterminated block yields empty metadata with the whole input as body.

const DELIMITER: &str = "---";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaValue {
    Text(String),
    List(Vec<String>),
}

impl MetaValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::List(_) => None,
        }
    }

}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<String>> for MetaValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

/// Insertion-ordered key/value header. Equality ignores key order.
#[derive(Debug, Clone, Default, Eq)]
pub struct Metadata {
    entries: Vec<(String, MetaValue)>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&MetaValue> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value)
    }

    pub fn get_text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(MetaValue::as_text)
    }

    /// Replaces an existing key in place, otherwise appends.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Option<MetaValue> {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetaValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PartialEq for Metadata {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .entries
                .iter()
                .all(|(key, value)| other.get(key) == Some(value))
    }
}

impl<K, V> FromIterator<(K, V)> for Metadata
where
    K: Into<String>,
    V: Into<MetaValue>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut metadata = Metadata::new();
        for (key, value) in iter {
            metadata.insert(key, value);
        }
        metadata
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Markdown {
    pub metadata: Metadata,
    pub body: String,
}

impl Markdown {
    pub fn new(metadata: Metadata, body: impl Into<String>) -> Self {
        Self {
            metadata,
            body: body.into(),
        }
    }
}

pub fn has_front_matter(text: &str) -> bool {
    split_front_matter(text).is_some()
}

pub fn parse(text: &str) -> Markdown {
    let Some((block, body)) = split_front_matter(text) else {
        return Markdown::new(Metadata::new(), text.trim());
    };

    let mut metadata = Metadata::new();
    for line in block.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        metadata.insert(key, parse_value(value.trim()));
    }

    Markdown::new(metadata, body.trim())
}

/// Keys must be non-empty and free of `:` and line breaks to survive `parse`.
pub fn render(doc: &Markdown) -> String {
    let attributes = doc
        .metadata
        .iter()
        .map(|(key, value)| match value {
            MetaValue::Text(text) => format!("{key}: {}", render_scalar(text)),
            MetaValue::List(items) => format!(
                "{key}: [{}]",
                items
                    .iter()
                    .map(|item| render_item(item))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!("{DELIMITER}\n{attributes}\n{DELIMITER}\n\n{}", doc.body.trim())
}

/// Overlays `patch` on a copy of `doc`; patch keys win.
pub fn add_metadata(doc: &Markdown, patch: &Metadata) -> Markdown {
    let mut metadata = doc.metadata.clone();
    for (key, value) in patch.iter() {
        metadata.insert(key, value.clone());
    }
    Markdown::new(metadata, doc.body.clone())
}

/// Returns the raw header block and the text after the closing delimiter.
fn split_front_matter(text: &str) -> Option<(&str, &str)> {
    let rest = text.trim_start().strip_prefix(DELIMITER)?;
    let (opening_tail, rest) = rest.split_once('\n')?;
    if !opening_tail.trim().is_empty() {
        return None;
    }

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim() == DELIMITER {
            return Some((&rest[..offset], &rest[offset + line.len()..]));
        }
        offset += line.len();
    }
    None
}

fn parse_value(raw: &str) -> MetaValue {
    if let Some(inner) = raw.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
        return MetaValue::List(split_list(inner));
    }
    MetaValue::Text(unquote(raw).unwrap_or_else(|| raw.to_string()))
}

fn split_list(inner: &str) -> Vec<String> {
    if inner.trim().is_empty() {
        return Vec::new();
    }

    let mut items = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;
    for ch in inner.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_quotes => {
                current.push(ch);
                escaped = true;
            }
            '"' if in_quotes => {
                current.push(ch);
                in_quotes = false;
            }
            // only a leading quote opens a quoted item
            '"' if current.trim().is_empty() => {
                current.push(ch);
                in_quotes = true;
            }
            ',' if !in_quotes => {
                items.push(finish_item(&current));
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    items.push(finish_item(&current));
    items
}

fn finish_item(raw: &str) -> String {
    let trimmed = raw.trim();
    unquote(trimmed).unwrap_or_else(|| trimmed.to_string())
}

fn unquote(raw: &str) -> Option<String> {
    let inner = raw.strip_prefix('"')?.strip_suffix('"')?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            // the closing quote was escaped, so this was never a quoted value
            None => return None,
        }
    }
    Some(out)
}

fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(ch),
        }
    }
    out.push('"');
    out
}

fn render_scalar(value: &str) -> String {
    let needs_quotes = value.starts_with('[')
        || value.starts_with('"')
        || value.contains(['\n', '\r'])
        || value.trim() != value;
    if needs_quotes {
        quote(value)
    } else {
        value.to_string()
    }
}

fn render_item(item: &str) -> String {
    let needs_quotes = item.is_empty()
        || item.contains([',', '"', '[', ']', '\n', '\r'])
        || item.trim() != item;
    if needs_quotes {
        quote(item)
    } else {
        item.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(pairs: &[(&str, MetaValue)]) -> Metadata {
        pairs.iter().cloned().collect()
    }

    #[test]
    fn text_without_header_is_all_body() {
        let doc = parse("  just some text\n\nmore  ");
        assert!(doc.metadata.is_empty());
        assert_eq!(doc.body, "just some text\n\nmore");
    }

    #[test]
    fn parses_scalars_lists_and_ignores_noise() {
        let doc = parse(
            "---\nauthor: Alice Smith\ntags: [rust,  sync ,vault]\nnot a pair\n\nsource: https://example.com/a\n---\n\nBody text\n",
        );

        assert_eq!(doc.metadata.get_text("author"), Some("Alice Smith"));
        assert_eq!(
            doc.metadata.get("tags"),
            Some(&MetaValue::List(vec!["rust".into(), "sync".into(), "vault".into()]))
        );
        assert_eq!(doc.metadata.get_text("source"), Some("https://example.com/a"));
        assert_eq!(doc.metadata.len(), 3);
        assert_eq!(doc.body, "Body text");
    }

    #[test]
    fn value_keeps_everything_after_first_colon() {
        let doc = parse("---\ntitle: Rust: the book\n---\nbody");
        assert_eq!(doc.metadata.get_text("title"), Some("Rust: the book"));
    }

    #[test]
    fn unterminated_header_is_treated_as_body() {
        let input = "---\nusername: alice\nno closing line";
        let doc = parse(input);
        assert!(doc.metadata.is_empty());
        assert_eq!(doc.body, input);
    }

    #[test]
    fn empty_list_parses_to_no_items() {
        let doc = parse("---\ntags: []\n---\n");
        assert_eq!(doc.metadata.get("tags"), Some(&MetaValue::List(Vec::new())));
        assert_eq!(doc.body, "");
    }

    #[test]
    fn renders_in_insertion_order() {
        let doc = Markdown::new(
            meta(&[
                ("username", "alice".into()),
                ("id", "42".into()),
                ("tags", vec!["a".to_string(), "b".to_string()].into()),
            ]),
            "\n Hello world \n",
        );
        assert_eq!(
            render(&doc),
            "---\nusername: alice\nid: 42\ntags: [a, b]\n---\n\nHello world"
        );
    }

    #[test]
    fn round_trip_preserves_metadata_and_body() {
        let doc = Markdown::new(
            meta(&[
                ("title", "Notes: part 1".into()),
                ("quoted", "\"already quoted\"".into()),
                ("bracketed", "[not a list]".into()),
                ("padded", "  spaced  ".into()),
                ("multiline", "line one\nline two".into()),
                ("empty", "".into()),
                (
                    "tags",
                    vec![
                        "plain".to_string(),
                        "with, comma".to_string(),
                        "".to_string(),
                        "say \"hi\"".to_string(),
                        "back\\slash".to_string(),
                    ]
                    .into(),
                ),
                ("none", Vec::<String>::new().into()),
            ]),
            "# Heading\n\nParagraph with --- inside",
        );

        let parsed = parse(&render(&doc));
        assert_eq!(parsed, doc);
    }

    #[test]
    fn round_trip_holds_across_generated_documents() {
        const SCALARS: &[&str] = &[
            "plain",
            "",
            "Notes: part 1",
            "\"quoted\"",
            "[not a list]",
            "  padded ",
            "tab\tinside",
            "line one\nline two",
            "crlf\r\nend",
            "back\\slash",
            "trailing\\",
            "ünïcödé ✓",
            "a, b, c",
            "---",
            "\"",
        ];
        const ITEMS: &[&str] = &[
            "plain",
            "",
            "with, comma",
            "say \"hi\"",
            "[x]",
            " pad",
            "back\\slash",
            "multi\nline",
            "\"",
            "ünï",
        ];
        const BODIES: &[&str] = &[
            "",
            "Hello world",
            "# Heading\n\nParagraph with --- inside",
            "---\nstarts with a delimiter",
            "key: value lookalike\n---",
        ];

        for case in 0..60usize {
            let mut metadata = Metadata::new();
            for k in 0..case % 5 {
                let value: MetaValue = if (case + k) % 3 == 0 {
                    (0..(case + k) % 4)
                        .map(|i| ITEMS[(case * 7 + k * 3 + i) % ITEMS.len()].to_string())
                        .collect::<Vec<_>>()
                        .into()
                } else {
                    SCALARS[(case * 5 + k * 11) % SCALARS.len()].into()
                };
                metadata.insert(format!("key_{k}"), value);
            }
            let doc = Markdown::new(metadata, BODIES[case % BODIES.len()]);

            let rendered = render(&doc);
            assert_eq!(parse(&rendered), doc, "case {case} changed:\n{rendered}");
        }
    }

    #[test]
    fn metadata_equality_ignores_order() {
        let a = meta(&[("a", "1".into()), ("b", "2".into())]);
        let b = meta(&[("b", "2".into()), ("a", "1".into())]);
        assert_eq!(a, b);
    }

    #[test]
    fn add_metadata_overlays_without_touching_input() {
        let original = Markdown::new(meta(&[("id", "1".into()), ("title", "old".into())]), "body");
        let patch = meta(&[("title", "new".into()), ("saved", "2024".into())]);

        let patched = add_metadata(&original, &patch);

        assert_eq!(original.metadata.get_text("title"), Some("old"));
        assert_eq!(original.metadata.len(), 2);
        assert_eq!(patched.metadata.get_text("title"), Some("new"));
        assert_eq!(patched.metadata.get_text("saved"), Some("2024"));
        assert_eq!(patched.metadata.get_text("id"), Some("1"));
        assert_eq!(patched.body, "body");
    }

    #[test]
    fn legacy_unquoted_values_parse_as_before() {
        let doc = parse("---\nauthor: \"Bob\" and co\nlist: [5\" screen, b]\n---\nx");
        assert_eq!(doc.metadata.get_text("author"), Some("\"Bob\" and co"));
        assert_eq!(
            doc.metadata.get("list"),
            Some(&MetaValue::List(vec!["5\" screen".into(), "b".into()]))
        );
    }
}
