//! Markdown → capture parsing for read-back and update flows.

use crate::frontmatter::render::{
    media_heading, unescape_headings, CLIPBOARD_HEADING, CONTENT_HEADING, SEPARATOR,
};
use crate::model::capture::{CaptureRecord, LabelSet, Modality, ProcessingStatus};
use crate::model::capture_id::CaptureId;
use crate::model::media::{MediaKind, MediaRef};
use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

static MEDIA_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^- !?\[([^\]]*)\]\(([^)]+)\)$").expect("valid media line regex"));

/// Header parse failures.
#[derive(Debug)]
pub enum FrontmatterParseError {
    MissingOpeningSeparator,
    MissingClosingSeparator,
    Yaml(serde_yaml::Error),
}

impl Display for FrontmatterParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingOpeningSeparator => {
                write!(f, "capture file does not start with `{SEPARATOR}`")
            }
            Self::MissingClosingSeparator => {
                write!(f, "capture header has no closing `{SEPARATOR}` line")
            }
            Self::Yaml(err) => write!(f, "invalid capture header: {err}"),
        }
    }
}

impl Error for FrontmatterParseError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Yaml(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_yaml::Error> for FrontmatterParseError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Yaml(value)
    }
}

/// Typed view of a capture header.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CaptureHeader {
    pub timestamp: DateTime<Utc>,
    pub id: CaptureId,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub modalities: Vec<Modality>,
    #[serde(default)]
    pub context: Vec<String>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub location: Option<serde_json::Value>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub processing_status: ProcessingStatus,
    pub created_date: NaiveDate,
    pub last_edited_date: NaiveDate,
    #[serde(default)]
    pub importance: Option<f64>,
}

/// Parsed capture file: typed header plus raw body text.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCapture {
    pub header: CaptureHeader,
    pub body: String,
}

impl ParsedCapture {
    /// Rebuilds a capture record from the header and body sections.
    ///
    /// `media_link_base` must match the base used when rendering, so media
    /// links map back to media-root-relative paths. Content hashes are not
    /// stored in the document and come back as `None`.
    pub fn to_record(&self, media_link_base: &str) -> CaptureRecord {
        let header = &self.header;
        let mut record = CaptureRecord::with_id(header.id.clone(), header.timestamp, "");
        record.modalities = header.modalities.iter().copied().collect::<BTreeSet<_>>();
        for entity in &header.context {
            record.add_context(entity);
        }
        record.tags = header.tags.iter().collect::<LabelSet>();
        record.sources = header.sources.iter().collect::<LabelSet>();
        record.location = header.location.clone().filter(|value| !value.is_null());
        record.metadata = header.metadata.clone();
        record.status = header.processing_status;
        record.importance = header.importance;
        record.created_date = header.created_date;
        record.last_edited_date = header.last_edited_date;

        let sections = split_sections(&self.body);
        if let Some(content) = section(&sections, CONTENT_HEADING) {
            record.content = unescape_headings(content).into_owned();
        }
        if let Some(clipboard) = section(&sections, CLIPBOARD_HEADING) {
            record.clipboard = Some(unescape_headings(unwrap_plain_fence(clipboard)).into_owned());
        }
        let prefix = media_link_base.trim_end_matches('/');
        for kind in MediaKind::ALL {
            let Some(lines) = section(&sections, &media_heading(kind)) else {
                continue;
            };
            for line in lines.lines() {
                let Some(caps) = MEDIA_LINE_RE.captures(line.trim_end()) else {
                    continue;
                };
                let link = &caps[2];
                let relative_path = if prefix.is_empty() {
                    link
                } else {
                    link.strip_prefix(prefix)
                        .and_then(|rest| rest.strip_prefix('/'))
                        .unwrap_or(link)
                };
                record.media.push(MediaRef {
                    name: caps[1].to_string(),
                    kind,
                    relative_path: relative_path.to_string(),
                    content_hash: None,
                });
            }
        }
        record
    }
}

/// Splits a capture document into its typed header and body.
pub fn parse_capture(text: &str) -> Result<ParsedCapture, FrontmatterParseError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let rest = text
        .strip_prefix("---\n")
        .or_else(|| text.strip_prefix("---\r\n"))
        .ok_or(FrontmatterParseError::MissingOpeningSeparator)?;

    let mut offset = 0;
    let mut header_end = None;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(['\n', '\r']) == SEPARATOR {
            header_end = Some((offset, offset + line.len()));
            break;
        }
        offset += line.len();
    }
    let (yaml_end, body_start) = header_end.ok_or(FrontmatterParseError::MissingClosingSeparator)?;

    let header: CaptureHeader = serde_yaml::from_str(&rest[..yaml_end])?;
    Ok(ParsedCapture {
        header,
        body: rest[body_start..].to_string(),
    })
}

fn is_known_heading(line: &str) -> bool {
    line == CONTENT_HEADING
        || line == CLIPBOARD_HEADING
        || MediaKind::ALL
            .iter()
            .any(|kind| line == media_heading(*kind))
}

/// Splits the body on known section headings. Unknown `## ` lines stay part
/// of the surrounding section, so user headings inside content survive.
fn split_sections(body: &str) -> Vec<(String, String)> {
    let mut sections: Vec<(String, String)> = Vec::new();
    for line in body.lines() {
        if is_known_heading(line.trim_end()) {
            sections.push((line.trim_end().to_string(), String::new()));
            continue;
        }
        if let Some((_, text)) = sections.last_mut() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(line);
        }
    }
    sections
}

fn section<'a>(sections: &'a [(String, String)], heading: &str) -> Option<&'a str> {
    sections
        .iter()
        .find(|(name, _)| name == heading)
        .map(|(_, text)| text.as_str())
}

fn unwrap_plain_fence(block: &str) -> &str {
    block
        .strip_prefix("```\n")
        .and_then(|inner| inner.strip_suffix("\n```"))
        .unwrap_or(block)
}

#[cfg(test)]
mod tests {
    use super::{parse_capture, FrontmatterParseError};

    #[test]
    fn parse_rejects_missing_separators() {
        assert!(matches!(
            parse_capture("# no header"),
            Err(FrontmatterParseError::MissingOpeningSeparator)
        ));
        assert!(matches!(
            parse_capture("---\nid: x\n"),
            Err(FrontmatterParseError::MissingClosingSeparator)
        ));
    }

    #[test]
    fn parse_reads_minimal_header_with_defaults() {
        let text = "---\n\
                    timestamp: 2025-01-02T03:04:05+00:00\n\
                    id: \"20250102_030405_000\"\n\
                    created_date: 2025-01-02\n\
                    last_edited_date: 2025-01-03\n\
                    ---\n\
                    ## Content\n\
                    hello\n";
        let parsed = parse_capture(text).unwrap();
        assert_eq!(parsed.header.id.as_str(), "20250102_030405_000");
        assert!(parsed.header.tags.is_empty());
        assert_eq!(parsed.header.importance, None);
        assert_eq!(parsed.body, "## Content\nhello\n");
        assert_eq!(parsed.to_record("media").content, "hello");
    }

    #[test]
    fn user_headings_stay_inside_content() {
        let text = "---\n\
                    timestamp: 2025-01-02T03:04:05+00:00\n\
                    id: abc\n\
                    created_date: 2025-01-02\n\
                    last_edited_date: 2025-01-02\n\
                    ---\n\
                    ## Content\n\
                    intro\n\
                    ## My heading\n\
                    details\n\
                    ## Clipboard\n\
                    ```\n\
                    copied\n\
                    ```\n";
        let record = parse_capture(text).unwrap().to_record("media");
        assert_eq!(record.content, "intro\n## My heading\ndetails");
        assert_eq!(record.clipboard.as_deref(), Some("copied"));
    }

    #[test]
    fn escaped_section_headings_read_back_as_content() {
        let text = "---\n\
                    timestamp: 2025-01-02T03:04:05+00:00\n\
                    id: abc\n\
                    created_date: 2025-01-02\n\
                    last_edited_date: 2025-01-02\n\
                    ---\n\
                    ## Content\n\
                    todo list\n\
                    \\## File\n\
                    \\\\## Audio\n\
                    submit taxes\n\
                    ## File\n\
                    - [a.pdf](media/a.pdf)\n";
        let record = parse_capture(text).unwrap().to_record("media");
        assert_eq!(record.content, "todo list\n## File\n\\## Audio\nsubmit taxes");
        assert_eq!(record.media.len(), 1);
        assert_eq!(record.media[0].relative_path, "a.pdf");
    }
}
