//! File preview routing
//!
//! A file's extension decides how it is previewed: images and documents
//! get a temporary link the browser can render inline, small text files
//! are streamed and returned as content, anything else has no preview.
//! Unknown types never cause a temporary link to be issued.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::providers::TempLink;

const IMAGE_EXTENSIONS: &[&str] = &[
    "bmp", "gif", "jpeg", "jpg", "png", "svg", "tif", "tiff", "webp",
];

const TEXT_EXTENSIONS: &[&str] = &[
    "c", "cfg", "conf", "cpp", "csv", "err", "h", "in", "ini", "inp", "java", "js", "json", "log",
    "m", "md", "out", "py", "r", "sh", "tcl", "tsv", "txt", "xml", "yaml", "yml",
];

const DOCUMENT_EXTENSIONS: &[&str] = &[
    "doc", "docx", "odp", "ods", "odt", "pdf", "ppt", "pptx", "xls", "xlsx",
];

/// Preview class of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Image,
    Text,
    Document,
    Unsupported,
}

impl FileKind {
    /// Classify by extension (with or without the leading dot, any case)
    pub fn classify(ext: &str) -> Self {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        if ext.is_empty() {
            return FileKind::Unsupported;
        }
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            return FileKind::Image;
        }
        if TEXT_EXTENSIONS.contains(&ext.as_str()) {
            return FileKind::Text;
        }
        if DOCUMENT_EXTENSIONS.contains(&ext.as_str()) {
            return FileKind::Document;
        }

        match mime_guess::from_ext(&ext).first() {
            Some(mime) if mime.type_() == mime_guess::mime::IMAGE => FileKind::Image,
            Some(mime) if mime.type_() == mime_guess::mime::TEXT => FileKind::Text,
            _ => FileKind::Unsupported,
        }
    }
}

/// What to do for a given kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewStrategy {
    /// Temporary link rendered inline (img tag)
    InlineLink,
    /// Temporary link opened in an embedded viewer
    ViewerLink,
    /// Read the file and return its content
    StreamContent,
    NoPreview,
}

impl PreviewStrategy {
    pub fn issues_link(&self) -> bool {
        matches!(self, PreviewStrategy::InlineLink | PreviewStrategy::ViewerLink)
    }
}

const STRATEGY_TABLE: &[(FileKind, PreviewStrategy)] = &[
    (FileKind::Image, PreviewStrategy::InlineLink),
    (FileKind::Text, PreviewStrategy::StreamContent),
    (FileKind::Document, PreviewStrategy::ViewerLink),
    (FileKind::Unsupported, PreviewStrategy::NoPreview),
];

pub fn strategy_for(kind: FileKind) -> PreviewStrategy {
    STRATEGY_TABLE
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, strategy)| *strategy)
        .unwrap_or(PreviewStrategy::NoPreview)
}

/// Output format requested by the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewFormat {
    #[default]
    Json,
    Html,
}

impl FromStr for PreviewFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(PreviewFormat::Json),
            "html" => Ok(PreviewFormat::Html),
            other => Err(format!("unknown preview format '{}'", other)),
        }
    }
}

impl fmt::Display for PreviewFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreviewFormat::Json => write!(f, "json"),
            PreviewFormat::Html => write!(f, "html"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PreviewAction {
    Link { link: TempLink, inline: bool },
    Content { text: String, truncated: bool },
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preview {
    pub file_id: String,
    pub kind: FileKind,
    #[serde(flatten)]
    pub action: PreviewAction,
    /// Rendered fragment when the HTML format was requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
}

impl Preview {
    pub fn new(file_id: String, kind: FileKind, action: PreviewAction, format: PreviewFormat) -> Self {
        let html = match format {
            PreviewFormat::Html => Some(render_html(&file_id, &action)),
            PreviewFormat::Json => None,
        };
        Self {
            file_id,
            kind,
            action,
            html,
        }
    }
}

/// Decode streamed bytes, keeping at most `limit` bytes on a char boundary
pub fn text_excerpt(bytes: &[u8], limit: usize) -> (String, bool) {
    let truncated = bytes.len() > limit;
    let text = String::from_utf8_lossy(&bytes[..bytes.len().min(limit)]);
    let mut text = text.into_owned();
    if truncated && text.ends_with('\u{FFFD}') {
        // cut mid-character
        text.pop();
    }
    (text, truncated)
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn render_html(file_id: &str, action: &PreviewAction) -> String {
    let title = escape_html(file_id.rsplit('/').next().unwrap_or(file_id));
    match action {
        PreviewAction::Link { link, inline: true } => {
            format!("<img src=\"{}\" alt=\"{}\">", escape_html(&link.url), title)
        }
        PreviewAction::Link { link, inline: false } => format!(
            "<iframe src=\"{}\" title=\"{}\" frameborder=\"0\"></iframe>",
            escape_html(&link.url),
            title
        ),
        PreviewAction::Content { text, truncated } => {
            let note = if *truncated { "<p>Preview truncated.</p>" } else { "" };
            format!("<pre>{}</pre>{}", escape_html(text), note)
        }
        PreviewAction::Unavailable => format!("<p>No preview available for {}.</p>", title),
    }
}
