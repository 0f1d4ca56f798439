use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::segment::{DisplayMode, FileKind, Location, Segment, SegmentKind};

use super::docx::{DocxAdapter, build_docx};
use super::{FormatAdapter, read_source};

/// Page-description documents are lifted into a generated word-processing
/// document and translated through the docx adapter. The result is a `.docx`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfAdapter;

#[derive(Debug, Clone, PartialEq, Eq)]
struct PdfParagraph {
    page: u32,
    text: String,
}

impl FormatAdapter for PdfAdapter {
    fn kind(&self) -> FileKind {
        FileKind::Pdf
    }

    fn extract(&self, path: &Path) -> Result<Vec<Segment>, PipelineError> {
        let paragraphs = read_paragraphs(path)?;
        let mut segments = Vec::with_capacity(paragraphs.len());
        let mut ordinal = 0usize;
        let mut last_page = None;
        for paragraph in paragraphs {
            if last_page != Some(paragraph.page) {
                ordinal = 0;
                last_page = Some(paragraph.page);
            }
            segments.push(Segment::new(
                segments.len(),
                SegmentKind::Paragraph,
                paragraph.text,
                Location::Page {
                    page: paragraph.page,
                    paragraph: ordinal,
                },
            ));
            ordinal += 1;
        }
        Ok(segments)
    }

    fn reinject(
        &self,
        path: &Path,
        translations: &[String],
        mode: DisplayMode,
        output_dir: &Path,
    ) -> Result<PathBuf, PipelineError> {
        let paragraphs = read_paragraphs(path)?;
        super::ensure_translation_count(paragraphs.len(), translations)?;

        let workdir = tempfile::tempdir().map_err(|err| PipelineError::reinject(path, err))?;
        let stem = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("document");
        let lifted = workdir.path().join(format!("{}.docx", stem));
        let bytes = build_docx(&layout(&paragraphs)).map_err(|err| PipelineError::reinject(path, err))?;
        fs::write(&lifted, bytes).map_err(|err| PipelineError::reinject(&lifted, err))?;
        debug!("lifted {} into {}", path.display(), lifted.display());

        DocxAdapter.reinject(&lifted, translations, mode, output_dir)
    }
}

/// Paragraph texts with a page break between pages.
fn layout(paragraphs: &[PdfParagraph]) -> Vec<Option<&str>> {
    let mut out = Vec::with_capacity(paragraphs.len());
    let mut last_page = None;
    for paragraph in paragraphs {
        if last_page.is_some() && last_page != Some(paragraph.page) {
            out.push(None);
        }
        last_page = Some(paragraph.page);
        out.push(Some(paragraph.text.as_str()));
    }
    out
}

fn read_paragraphs(path: &Path) -> Result<Vec<PdfParagraph>, PipelineError> {
    let bytes = read_source(path)?;
    let doc = lopdf::Document::load_mem(&bytes).map_err(|err| PipelineError::parse(path, err))?;
    let mut paragraphs = Vec::new();
    for (page, _) in doc.get_pages() {
        let text = match doc.extract_text(&[page]) {
            Ok(text) => text,
            Err(err) => {
                warn!("failed to extract text from page {} of {}: {}", page, path.display(), err);
                continue;
            }
        };
        paragraphs.extend(
            group_lines(&text)
                .into_iter()
                .map(|text| PdfParagraph { page, text }),
        );
    }
    Ok(paragraphs)
}

/// Joins extracted lines into paragraphs. A blank line always ends a paragraph;
/// a line ending in terminal punctuation ends one when it is noticeably shorter
/// than the longest line on the page.
fn group_lines(text: &str) -> Vec<String> {
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    let widest = lines
        .iter()
        .map(|line| line.chars().count())
        .max()
        .unwrap_or_default();
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    for line in lines {
        if line.is_empty() {
            flush(&mut current, &mut paragraphs);
            continue;
        }
        join_line(&mut current, line);
        let short = line.chars().count() * 10 < widest * 8;
        if short && ends_sentence(line) {
            flush(&mut current, &mut paragraphs);
        }
    }
    flush(&mut current, &mut paragraphs);
    paragraphs
}

fn join_line(current: &mut String, line: &str) {
    if current.is_empty() {
        current.push_str(line);
        return;
    }
    if let Some(stripped) = current.strip_suffix('-')
        && stripped.chars().last().is_some_and(char::is_alphabetic)
    {
        current.pop();
        current.push_str(line);
        return;
    }
    let cjk_boundary = current.chars().last().is_some_and(is_cjk)
        && line.chars().next().is_some_and(is_cjk);
    if !cjk_boundary {
        current.push(' ');
    }
    current.push_str(line);
}

fn flush(current: &mut String, paragraphs: &mut Vec<String>) {
    let text = current.trim();
    if !text.is_empty() {
        paragraphs.push(text.to_string());
    }
    current.clear();
}

fn ends_sentence(line: &str) -> bool {
    line.chars()
        .last()
        .is_some_and(|ch| matches!(ch, '.' | '!' | '?' | ':' | '。' | '！' | '？' | '：'))
}

fn is_cjk(ch: char) -> bool {
    matches!(ch as u32,
        0x3040..=0x30FF | 0x3400..=0x4DBF | 0x4E00..=0x9FFF | 0xAC00..=0xD7AF | 0xF900..=0xFAFF | 0xFF00..=0xFFEF)
}
