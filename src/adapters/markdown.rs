use pulldown_cmark::{Event, Options, Parser, Tag};
use std::path::{Path, PathBuf};

use crate::error::PipelineError;
use crate::segment::{DisplayMode, FileKind, Location, Segment, SegmentKind};

use super::util::{Edit, content_line_end, line_end, line_start, splice, split_text_bounds};
use super::{FormatAdapter, ensure_translation_count, read_source, result_path, write_result};

#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownAdapter;

impl FormatAdapter for MarkdownAdapter {
    fn kind(&self) -> FileKind {
        FileKind::Markdown
    }

    fn extract(&self, path: &Path) -> Result<Vec<Segment>, PipelineError> {
        let source = read_markdown(path)?;
        Ok(scan_blocks(&source)
            .into_iter()
            .enumerate()
            .map(|(index, block)| block.segment(index, &source))
            .collect())
    }

    fn reinject(
        &self,
        path: &Path,
        translations: &[String],
        mode: DisplayMode,
        output_dir: &Path,
    ) -> Result<PathBuf, PipelineError> {
        let source = read_markdown(path)?;
        let output = translate_markdown(&source, translations, mode)?;
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("md");
        let target = result_path(output_dir, path, ext)?;
        write_result(&target, output.as_bytes())?;
        Ok(target)
    }
}

fn read_markdown(path: &Path) -> Result<String, PipelineError> {
    let bytes = read_source(path)?;
    String::from_utf8(bytes).map_err(|err| PipelineError::parse(path, err))
}

pub(crate) fn translate_markdown(
    source: &str,
    translations: &[String],
    mode: DisplayMode,
) -> Result<String, PipelineError> {
    let blocks = scan_blocks(source);
    ensure_translation_count(blocks.len(), translations)?;
    let edits = blocks
        .iter()
        .zip(translations)
        .map(|(block, translated)| block.edit(source, translated.trim(), mode))
        .collect();
    Ok(splice(source, edits))
}

/// A translatable leaf block. `start..end` spans its trimmed inline content,
/// `text` is that content with the container prefix of every continuation
/// line (`> `, list indentation) removed and `gutter` is the prefix to restore.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Block {
    kind: SegmentKind,
    start: usize,
    end: usize,
    insert_at: usize,
    text: String,
    gutter: String,
}

impl Block {
    fn prefix<'a>(&self, source: &'a str) -> &'a str {
        if self.kind == SegmentKind::Cell {
            return "";
        }
        &source[line_start(source, self.start)..self.start]
    }

    fn suffix<'a>(&self, source: &'a str) -> &'a str {
        if self.kind == SegmentKind::Cell {
            return "";
        }
        &source[self.end..line_end(source, self.end)]
    }

    fn segment(&self, index: usize, source: &str) -> Segment {
        let line = |pos: usize| source[..pos].matches('\n').count() + 1;
        let mut segment = Segment::new(
            index,
            self.kind,
            &self.text,
            Location::Lines {
                start: line(self.start),
                end: line(self.end),
            },
        );
        let prefix = self.prefix(source);
        if !prefix.is_empty() {
            segment.prefix = Some(prefix.to_string());
        }
        let suffix = self.suffix(source);
        if !suffix.is_empty() {
            segment.suffix = Some(suffix.to_string());
        }
        segment
    }

    /// Puts the gutter back in front of every line after the first.
    fn relayout(&self, translated: &str) -> String {
        if self.gutter.is_empty() {
            return translated.to_string();
        }
        translated.replace('\n', &format!("\n{}", self.gutter))
    }

    fn edit(&self, source: &str, translated: &str, mode: DisplayMode) -> Edit {
        match mode {
            DisplayMode::Replace => Edit::replace(self.start, self.end, self.relayout(translated)),
            DisplayMode::Parallel => {
                let text = match self.kind {
                    SegmentKind::Cell => format!("<br>{}", translated),
                    SegmentKind::Heading | SegmentKind::ListItem => format!(
                        "\n{}{}{}",
                        self.prefix(source),
                        self.relayout(translated),
                        self.suffix(source)
                    ),
                    _ => format!("\n\n{}{}", self.prefix(source), self.relayout(translated)),
                };
                Edit::insert(self.insert_at, text)
            }
        }
    }
}

struct OpenLeaf {
    kind: SegmentKind,
    range: Option<(usize, usize)>,
    /// Start offsets of the inline events seen so far.
    starts: Vec<usize>,
}

impl OpenLeaf {
    fn new(kind: SegmentKind) -> Self {
        Self {
            kind,
            range: None,
            starts: Vec::new(),
        }
    }

    fn extend(&mut self, start: usize, end: usize) {
        self.starts.push(start);
        self.range = Some(match self.range {
            Some((s, e)) => (s.min(start), e.max(end)),
            None => (start, end),
        });
    }
}

fn options() -> Options {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);
    options.insert(Options::ENABLE_FOOTNOTES);
    options
}

/// Leaf blocks in document order. Code blocks are never collected.
fn scan_blocks(source: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut open: Option<OpenLeaf> = None;
    let mut item_depth = 0usize;
    let mut code_depth = 0usize;

    for (event, range) in Parser::new_ext(source, options()).into_offset_iter() {
        match event {
            Event::Start(Tag::Paragraph) => {
                close(&mut open, None, source, &mut blocks);
                let kind = if item_depth > 0 {
                    SegmentKind::ListItem
                } else {
                    SegmentKind::Paragraph
                };
                open = Some(OpenLeaf::new(kind));
            }
            Event::Start(Tag::Heading(..)) => {
                close(&mut open, None, source, &mut blocks);
                open = Some(OpenLeaf::new(SegmentKind::Heading));
            }
            Event::Start(Tag::TableCell) => {
                close(&mut open, None, source, &mut blocks);
                open = Some(OpenLeaf::new(SegmentKind::Cell));
            }
            Event::End(Tag::Paragraph) | Event::End(Tag::Heading(..)) | Event::End(Tag::TableCell) => {
                close(&mut open, Some(range.end), source, &mut blocks);
            }
            Event::Start(Tag::CodeBlock(_)) => {
                close(&mut open, None, source, &mut blocks);
                code_depth += 1;
            }
            Event::End(Tag::CodeBlock(_)) => code_depth = code_depth.saturating_sub(1),
            Event::Start(Tag::Item) => {
                close(&mut open, None, source, &mut blocks);
                item_depth += 1;
            }
            Event::End(Tag::Item) => {
                close(&mut open, None, source, &mut blocks);
                item_depth = item_depth.saturating_sub(1);
            }
            Event::Start(
                Tag::List(_)
                | Tag::BlockQuote
                | Tag::Table(_)
                | Tag::TableHead
                | Tag::TableRow
                | Tag::FootnoteDefinition(_),
            )
            | Event::End(
                Tag::List(_)
                | Tag::BlockQuote
                | Tag::Table(_)
                | Tag::TableHead
                | Tag::TableRow
                | Tag::FootnoteDefinition(_),
            )
            | Event::Rule => close(&mut open, None, source, &mut blocks),
            Event::Text(_)
            | Event::Code(_)
            | Event::Html(_)
            | Event::FootnoteReference(_)
            | Event::Start(_)
            | Event::End(_) => {
                if code_depth > 0 {
                    continue;
                }
                if open.is_none() {
                    if item_depth == 0 || matches!(event, Event::Html(_) | Event::End(_)) {
                        continue;
                    }
                    open = Some(OpenLeaf::new(SegmentKind::ListItem));
                }
                if let Some(leaf) = open.as_mut() {
                    leaf.extend(range.start, range.end);
                }
            }
            Event::SoftBreak | Event::HardBreak | Event::TaskListMarker(_) => {}
        }
    }
    close(&mut open, None, source, &mut blocks);
    blocks
}

fn close(open: &mut Option<OpenLeaf>, block_end: Option<usize>, source: &str, blocks: &mut Vec<Block>) {
    let Some(leaf) = open.take() else {
        return;
    };
    let Some((start, end)) = leaf.range else {
        return;
    };
    let Some((s, e)) = split_text_bounds(&source[start..end]) else {
        return;
    };
    let (start, end) = (start + s, start + e);
    let insert_at = match leaf.kind {
        SegmentKind::Cell => end,
        _ => content_line_end(source, block_end.unwrap_or(end).max(end)),
    };
    let (text, gutter) = strip_gutters(source, start, end, &leaf.starts);
    blocks.push(Block {
        kind: leaf.kind,
        start,
        end,
        insert_at,
        text,
        gutter,
    });
}

/// Content of `start..end` without the container prefix of each continuation
/// line. A line's content begins at its first inline event; lazy continuation
/// lines have an empty prefix. Returns the text and the first non-empty prefix.
fn strip_gutters(source: &str, start: usize, end: usize, starts: &[usize]) -> (String, String) {
    let mut text = String::with_capacity(end - start);
    let mut gutter = String::new();
    let mut line_begin = start;
    for (number, line) in source[start..end].split('\n').enumerate() {
        let line_stop = line_begin + line.len();
        if number == 0 {
            text.push_str(line);
        } else {
            let content = starts
                .iter()
                .copied()
                .filter(|pos| (line_begin..=line_stop).contains(pos))
                .min()
                .unwrap_or(line_begin);
            if gutter.is_empty() {
                gutter = source[line_begin..content].to_string();
            }
            text.push('\n');
            text.push_str(&source[content..line_stop]);
        }
        line_begin = line_stop + 1;
    }
    (text, gutter)
}
