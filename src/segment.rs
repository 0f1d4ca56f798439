use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Docx,
    Xlsx,
    Pptx,
    Markdown,
    Text,
    Pdf,
}

impl FileKind {
    pub const ALL: [FileKind; 6] = [
        FileKind::Docx,
        FileKind::Xlsx,
        FileKind::Pptx,
        FileKind::Markdown,
        FileKind::Text,
        FileKind::Pdf,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Docx => "docx",
            FileKind::Xlsx => "xlsx",
            FileKind::Pptx => "pptx",
            FileKind::Markdown => "md",
            FileKind::Text => "txt",
            FileKind::Pdf => "pdf",
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, PipelineError> {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .ok_or_else(|| PipelineError::UnsupportedFormat(path.display().to_string()))?;
        ext.parse()
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileKind {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().trim_start_matches('.').to_ascii_lowercase();
        match normalized.as_str() {
            "markdown" => Ok(FileKind::Markdown),
            "text" => Ok(FileKind::Text),
            ext => FileKind::ALL
                .into_iter()
                .find(|kind| kind.as_str() == ext)
                .ok_or_else(|| PipelineError::UnsupportedFormat(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    #[default]
    Replace,
    Parallel,
}

impl FromStr for DisplayMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "replace" | "1" => Ok(DisplayMode::Replace),
            "parallel" | "2" => Ok(DisplayMode::Parallel),
            other => Err(anyhow::anyhow!(
                "unknown display mode '{}' (expected replace or parallel)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SegmentKind {
    Paragraph,
    Heading,
    ListItem,
    Cell,
    Code,
    TextRun,
}

/// Where a segment lives inside its document, resolved again on reinjection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Location {
    Paragraph { part: String, paragraph: usize },
    Shape {
        slide: usize,
        shape: Option<String>,
        paragraph: usize,
    },
    Cell { sheet: String, cell: String },
    Lines { start: usize, end: usize },
    Page { page: u32, paragraph: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Segment {
    pub index: usize,
    #[serde(rename = "type")]
    pub kind: SegmentKind,
    pub text: String,
    pub location: Location,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
}

impl Segment {
    pub fn new(index: usize, kind: SegmentKind, text: impl Into<String>, location: Location) -> Self {
        Self {
            index,
            kind,
            text: text.into(),
            location,
            prefix: None,
            suffix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Preview {
    pub content: Vec<Segment>,
    pub total_chars: usize,
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelPreview {
    pub source_content: Vec<Segment>,
    pub translated_content: Vec<Segment>,
    pub source_total_chars: usize,
    pub translated_total_chars: usize,
    pub truncated: bool,
}
