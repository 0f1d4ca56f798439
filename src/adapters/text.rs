use std::path::{Path, PathBuf};

use crate::error::PipelineError;
use crate::segment::{DisplayMode, FileKind, Location, Segment, SegmentKind};

use super::util::{Edit, splice, split_text_bounds};
use super::{FormatAdapter, ensure_translation_count, read_source, result_path, write_result};

#[derive(Debug, Clone, Copy, Default)]
pub struct TextAdapter;

impl FormatAdapter for TextAdapter {
    fn kind(&self) -> FileKind {
        FileKind::Text
    }

    fn extract(&self, path: &Path) -> Result<Vec<Segment>, PipelineError> {
        let source = read_text(path)?;
        Ok(paragraphs(&source)
            .into_iter()
            .enumerate()
            .map(|(index, paragraph)| {
                Segment::new(
                    index,
                    SegmentKind::Paragraph,
                    &source[paragraph.start..paragraph.end],
                    Location::Lines {
                        start: paragraph.first_line,
                        end: paragraph.last_line,
                    },
                )
            })
            .collect())
    }

    fn reinject(
        &self,
        path: &Path,
        translations: &[String],
        mode: DisplayMode,
        output_dir: &Path,
    ) -> Result<PathBuf, PipelineError> {
        let source = read_text(path)?;
        let output = translate_text(&source, translations, mode)?;
        let target = result_path(output_dir, path, "txt")?;
        write_result(&target, output.as_bytes())?;
        Ok(target)
    }
}

fn read_text(path: &Path) -> Result<String, PipelineError> {
    let bytes = read_source(path)?;
    String::from_utf8(bytes).map_err(|err| PipelineError::parse(path, err))
}

fn translate_text(
    source: &str,
    translations: &[String],
    mode: DisplayMode,
) -> Result<String, PipelineError> {
    let found = paragraphs(source);
    ensure_translation_count(found.len(), translations)?;
    let edits = found
        .iter()
        .zip(translations)
        .map(|(paragraph, translated)| match mode {
            DisplayMode::Replace => Edit::replace(paragraph.start, paragraph.end, translated.trim()),
            DisplayMode::Parallel => {
                Edit::insert(paragraph.end, format!("\n\n{}", translated.trim()))
            }
        })
        .collect();
    Ok(splice(source, edits))
}

/// Byte range of a blank-line separated paragraph, trimmed, with 1-based lines.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Paragraph {
    start: usize,
    end: usize,
    first_line: usize,
    last_line: usize,
}

fn paragraphs(source: &str) -> Vec<Paragraph> {
    let mut found = Vec::new();
    let mut current: Option<(usize, usize, usize, usize)> = None;
    let mut offset = 0usize;

    for (number, line) in source.split_inclusive('\n').enumerate() {
        let line_start = offset;
        offset += line.len();
        if line.trim().is_empty() {
            if let Some(block) = current.take() {
                push_paragraph(source, block, &mut found);
            }
            continue;
        }
        let line_end = line_start + line.trim_end_matches(['\n', '\r']).len();
        current = Some(match current {
            Some((start, _, first, _)) => (start, line_end, first, number + 1),
            None => (line_start, line_end, number + 1, number + 1),
        });
    }
    if let Some(block) = current.take() {
        push_paragraph(source, block, &mut found);
    }
    found
}

fn push_paragraph(
    source: &str,
    (start, end, first_line, last_line): (usize, usize, usize, usize),
    found: &mut Vec<Paragraph>,
) {
    if let Some((s, e)) = split_text_bounds(&source[start..end]) {
        found.push(Paragraph {
            start: start + s,
            end: start + e,
            first_line,
            last_line,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn paragraphs_are_split_on_blank_lines() {
        let source = "  First line\nstill first\n\n \n\r\nSecond\r\n";
        let found = paragraphs(source);
        assert_eq!(found.len(), 2);
        assert_eq!(&source[found[0].start..found[0].end], "First line\nstill first");
        assert_eq!((found[0].first_line, found[0].last_line), (1, 2));
        assert_eq!(&source[found[1].start..found[1].end], "Second");
        assert_eq!(found[1].first_line, 6);
    }

    #[test]
    fn replace_keeps_spacing_between_paragraphs() {
        let out = translate_text(
            "Hello\n\n\nWorld\n",
            &strings(&["你好", "世界"]),
            DisplayMode::Replace,
        )
        .expect("translate");
        assert_eq!(out, "你好\n\n\n世界\n");
    }

    #[test]
    fn parallel_appends_translation_after_each_paragraph() {
        let out = translate_text("Hello\n\nWorld", &strings(&["你好", "世界"]), DisplayMode::Parallel)
            .expect("translate");
        assert_eq!(out, "Hello\n\n你好\n\nWorld\n\n世界");
    }

    #[test]
    fn empty_document_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = dir.path().join("empty.txt");
        std::fs::write(&source, "\n\n").expect("write");
        assert!(TextAdapter.extract(&source).expect("extract").is_empty());
        let out = TextAdapter
            .reinject(&source, &[], DisplayMode::Replace, dir.path())
            .expect("reinject");
        assert_eq!(std::fs::read_to_string(out).expect("read"), "\n\n");
    }
}
