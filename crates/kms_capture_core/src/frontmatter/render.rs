//! Capture → markdown rendering.
//!
//! The layout is a compatibility contract with external note tools:
//! `---` header lines in fixed field order, a closing `---`, then body
//! sections with no blank line after the closing separator.
//!
//! Content and clipboard lines that would read back as a section heading get
//! one extra leading backslash; parsing removes exactly one again.

use crate::model::capture::CaptureRecord;
use crate::model::media::{MediaKind, MediaRef};
use chrono::SecondsFormat;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;
use std::borrow::Cow;

pub(crate) const SEPARATOR: &str = "---";
pub(crate) const CONTENT_HEADING: &str = "## Content";
pub(crate) const CLIPBOARD_HEADING: &str = "## Clipboard";
const FENCE: &str = "```";

static PLAIN_SCALAR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_](?:[A-Za-z0-9_ ./+-]*[A-Za-z0-9_./+-])?$").expect("valid scalar regex")
});

/// A known section heading, optionally preceded by escaping backslashes.
static HEADING_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    let headings = [CONTENT_HEADING.to_string(), CLIPBOARD_HEADING.to_string()]
        .into_iter()
        .chain(MediaKind::ALL.into_iter().map(media_heading))
        .map(|heading| regex::escape(&heading))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?m)^(\\*)((?:{headings})[^\S\n]*)$")).expect("valid heading regex")
});

const RESERVED_PLAIN_WORDS: &[&str] = &[
    "true", "false", "yes", "no", "on", "off", "y", "n", "null",
];

/// Rendered capture document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedCapture {
    /// `{identifier}.md`
    pub file_name: String,
    pub text: String,
}

/// Renders a capture into its file name and markdown text.
///
/// `media_link_base` is the media root as seen from the capture directory
/// (`media` for the default layout, empty when both are the same directory).
pub fn render_capture(record: &CaptureRecord, media_link_base: &str) -> RenderedCapture {
    let mut text = render_header(record);
    text.push_str(&render_body(record, media_link_base));
    RenderedCapture {
        file_name: record.id.file_name(),
        text,
    }
}

fn render_header(record: &CaptureRecord) -> String {
    let id = yaml_scalar(record.id.as_str());
    let mut lines = vec![
        SEPARATOR.to_string(),
        format!(
            "timestamp: {}",
            record.timestamp.to_rfc3339_opts(SecondsFormat::Secs, false)
        ),
        format!("id: {id}"),
        format!("aliases: [{id}]"),
        format!(
            "modalities: {}",
            flow_sequence(record.modalities.iter().map(|m| m.as_str()))
        ),
        format!(
            "context: {}",
            flow_sequence(record.context.iter().map(String::as_str))
        ),
        format!("sources: {}", flow_sequence(record.sources.iter())),
        format!("tags: {}", flow_sequence(record.tags.iter())),
        format!(
            "location: {}",
            record
                .location
                .as_ref()
                .map(flow_value)
                .unwrap_or_else(|| "null".to_string())
        ),
        format!("metadata: {}", flow_mapping(&record.metadata)),
        format!("processing_status: {}", record.status.as_str()),
        format!("created_date: {}", record.created_date.format("%Y-%m-%d")),
        format!(
            "last_edited_date: {}",
            record.last_edited_date.format("%Y-%m-%d")
        ),
        format!(
            "importance: {}",
            record
                .importance
                .map(|value| value.to_string())
                .unwrap_or_else(|| "null".to_string())
        ),
        SEPARATOR.to_string(),
    ];
    lines.push(String::new());
    lines.join("\n")
}

fn render_body(record: &CaptureRecord, media_link_base: &str) -> String {
    let mut body = String::new();

    let content = record.content.trim_end_matches(['\n', '\r']);
    if !content.trim().is_empty() {
        body.push_str(CONTENT_HEADING);
        body.push('\n');
        body.push_str(&escape_headings(content));
        body.push('\n');
    }

    if let Some(clipboard) = record.clipboard.as_deref() {
        let clipboard = clipboard.trim_end_matches(['\n', '\r']);
        if !clipboard.trim().is_empty() {
            let clipboard = escape_headings(clipboard);
            body.push_str(CLIPBOARD_HEADING);
            body.push('\n');
            if clipboard.trim_start().starts_with(FENCE) {
                body.push_str(&clipboard);
                body.push('\n');
            } else {
                body.push_str(&format!("{FENCE}\n{clipboard}\n{FENCE}\n"));
            }
        }
    }

    for kind in MediaKind::ALL {
        let refs = record
            .media
            .iter()
            .filter(|media| media.kind == kind)
            .collect::<Vec<_>>();
        if refs.is_empty() {
            continue;
        }
        body.push_str(&media_heading(kind));
        body.push('\n');
        for media in refs {
            body.push_str(&media_line(media, media_link_base));
            body.push('\n');
        }
    }

    body
}

/// Adds one backslash to every line that is a section heading once leading
/// backslashes are stripped.
pub(crate) fn escape_headings(text: &str) -> Cow<'_, str> {
    HEADING_LINE_RE.replace_all(text, r"\${1}${2}")
}

/// Inverse of [`escape_headings`]; unescaped heading lines are left alone.
pub(crate) fn unescape_headings(text: &str) -> Cow<'_, str> {
    HEADING_LINE_RE.replace_all(text, |caps: &Captures<'_>| {
        let slashes = &caps[1];
        format!("{}{}", &slashes[slashes.len().min(1)..], &caps[2])
    })
}

pub(crate) fn media_heading(kind: MediaKind) -> String {
    let title = match kind {
        MediaKind::Screenshot => "Screenshot",
        MediaKind::Audio => "Audio",
        MediaKind::Image => "Image",
        MediaKind::File => "File",
    };
    format!("## {title}")
}

fn media_line(media: &MediaRef, media_link_base: &str) -> String {
    let label = media.name.replace(['[', ']', '\n', '\r'], "");
    let link = media_link(media_link_base, &media.relative_path);
    match media.kind {
        MediaKind::Screenshot | MediaKind::Image => format!("- ![{label}]({link})"),
        MediaKind::Audio | MediaKind::File => format!("- [{label}]({link})"),
    }
}

/// Joins the link base and a media-root-relative path with `/`.
pub fn media_link(media_link_base: &str, relative_path: &str) -> String {
    let base = media_link_base.trim_end_matches('/');
    if base.is_empty() {
        relative_path.to_string()
    } else {
        format!("{base}/{relative_path}")
    }
}

fn flow_sequence<'a>(items: impl Iterator<Item = &'a str>) -> String {
    let rendered = items.map(yaml_scalar).collect::<Vec<_>>();
    format!("[{}]", rendered.join(", "))
}

fn flow_mapping(map: &serde_json::Map<String, Value>) -> String {
    let entries = map
        .iter()
        .map(|(key, value)| format!("{}: {}", yaml_scalar(key), flow_value(value)))
        .collect::<Vec<_>>();
    format!("{{{}}}", entries.join(", "))
}

fn flow_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::String(text) => yaml_scalar(text),
        Value::Array(items) => {
            let rendered = items.iter().map(flow_value).collect::<Vec<_>>();
            format!("[{}]", rendered.join(", "))
        }
        Value::Object(map) => flow_mapping(map),
    }
}

/// Renders a string as a YAML scalar safe in both block and flow context.
///
/// Simple words stay plain; anything that YAML could read as another type
/// (numbers, booleans, dates) or that contains indicators is double-quoted.
pub(crate) fn yaml_scalar(value: &str) -> String {
    if PLAIN_SCALAR_RE.is_match(value)
        && !RESERVED_PLAIN_WORDS.contains(&value.to_ascii_lowercase().as_str())
    {
        return value.to_string();
    }
    quote_double(value)
}

fn quote_double(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            ch if ch.is_control() => out.push_str(&format!("\\u{:04x}", ch as u32)),
            ch => out.push(ch),
        }
    }
    out.push('"');
    out
}
