use anyhow::{Context, Result, anyhow};
use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::{HashMap, VecDeque};
use std::io::{Cursor, Read, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::error::PipelineError;
use crate::segment::{DisplayMode, Location, Segment, SegmentKind};

use super::util::{keep_bounds, split_text_bounds};

pub(crate) fn entry_names(bytes: &[u8]) -> Result<Vec<String>> {
    let archive =
        ZipArchive::new(Cursor::new(bytes)).with_context(|| "failed to read zip archive")?;
    Ok(archive.file_names().map(str::to_string).collect())
}

pub(crate) fn read_entry(bytes: &[u8], name: &str) -> Result<Vec<u8>> {
    let mut archive =
        ZipArchive::new(Cursor::new(bytes)).with_context(|| "failed to read zip archive")?;
    let mut file = archive
        .by_name(name)
        .with_context(|| format!("missing zip entry: {}", name))?;
    let mut data = Vec::new();
    file.read_to_end(&mut data)
        .with_context(|| format!("failed to read zip entry: {}", name))?;
    Ok(data)
}

/// Copies every entry of the package, passing entry contents through `rewrite`.
/// `rewrite` returns `None` to keep an entry unchanged.
pub(crate) fn rewrite_package(
    bytes: &[u8],
    mut rewrite: impl FnMut(&str, &[u8]) -> Result<Option<Vec<u8>>>,
) -> Result<Vec<u8>> {
    let mut archive =
        ZipArchive::new(Cursor::new(bytes)).with_context(|| "failed to read zip archive")?;
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .with_context(|| "failed to read zip entry")?;
        let name = file.name().to_string();
        let file_options = FileOptions::default().compression_method(file.compression());
        if file.is_dir() {
            writer
                .add_directory(name, file_options)
                .with_context(|| "failed to write zip directory")?;
            continue;
        }

        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .with_context(|| "failed to read zip entry content")?;
        drop(file);

        let output = match rewrite(&name, &data)? {
            Some(output) => output,
            None => data,
        };

        writer
            .start_file(name, file_options)
            .with_context(|| "failed to write zip entry")?;
        writer
            .write_all(&output)
            .with_context(|| "failed to write zip content")?;
    }

    let bytes = writer
        .finish()
        .with_context(|| "failed to finalize zip output")?
        .into_inner();
    Ok(bytes)
}

/// Trailing number of names like `ppt/slides/slide12.xml`.
pub(crate) fn part_number(name: &str, prefix: &str) -> Option<usize> {
    let rest = name.strip_prefix(prefix)?.strip_suffix(".xml")?;
    if rest.is_empty() {
        return Some(0);
    }
    rest.parse().ok()
}

pub(crate) fn attr_value(element: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == key)
        .map(|attr| String::from_utf8_lossy(attr.value.as_ref()).into_owned())
}

/// Element names of one OOXML paragraph vocabulary.
pub(crate) struct Dialect {
    pub paragraph: &'static [u8],
    pub text: &'static [u8],
    pub cell: &'static [u8],
    /// Resets `context` when it opens.
    pub scope: Option<&'static [u8]>,
    /// `(element, attribute)` pairs remembered in `context` while walking.
    pub watch: &'static [(&'static [u8], &'static [u8])],
    pub parallel: fn(&Dialect, &[Event<'static>], &str) -> Vec<Event<'static>>,
}

pub(crate) struct ParagraphScan<'a> {
    pub ordinal: usize,
    pub text: &'a str,
    pub in_cell: bool,
    pub events: &'a [Event<'static>],
    pub context: &'a HashMap<&'static [u8], String>,
}

pub(crate) enum ParagraphEdit {
    Keep,
    Replace(String),
    Parallel(String),
}

struct Frame {
    events: Vec<Event<'static>>,
    text: String,
    in_cell: bool,
}

/// Walks every paragraph of an OOXML part. Each paragraph is buffered until it
/// closes, so nested paragraphs (text boxes) are visited before their parent.
pub(crate) fn transform_paragraphs(
    xml: &[u8],
    dialect: &Dialect,
    visit: &mut dyn FnMut(ParagraphScan<'_>) -> Result<ParagraphEdit>,
) -> Result<Vec<u8>> {
    let mut reader = Reader::from_reader(Cursor::new(xml));
    reader.trim_text(false);
    let mut writer = Writer::new(Vec::new());
    let mut buf = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();
    let mut context: HashMap<&'static [u8], String> = HashMap::new();
    let mut in_text = false;
    let mut cell_depth = 0usize;
    let mut ordinal = 0usize;

    loop {
        let event = match reader.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,
            Ok(event) => event.into_owned(),
            Err(err) => {
                return Err(anyhow!(
                    "failed to parse xml at {}: {}",
                    reader.buffer_position(),
                    err
                ));
            }
        };
        buf.clear();

        let mut closes_paragraph = false;
        match &event {
            Event::Start(e) => {
                let name = e.name();
                if name.as_ref() == dialect.paragraph {
                    stack.push(Frame {
                        events: Vec::new(),
                        text: String::new(),
                        in_cell: cell_depth > 0,
                    });
                } else if name.as_ref() == dialect.text && !stack.is_empty() {
                    in_text = true;
                } else if name.as_ref() == dialect.cell {
                    cell_depth += 1;
                }
                if dialect.scope == Some(name.as_ref()) {
                    context.clear();
                }
                remember(dialect, e, &mut context);
            }
            Event::Empty(e) => remember(dialect, e, &mut context),
            Event::End(e) => {
                let name = e.name();
                if name.as_ref() == dialect.text {
                    in_text = false;
                } else if name.as_ref() == dialect.cell {
                    cell_depth = cell_depth.saturating_sub(1);
                } else if name.as_ref() == dialect.paragraph {
                    closes_paragraph = !stack.is_empty();
                }
            }
            Event::Text(e) if in_text => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&e.unescape()?);
                }
            }
            Event::CData(e) if in_text => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&String::from_utf8_lossy(e));
                }
            }
            _ => {}
        }

        if !closes_paragraph {
            emit(&mut stack, &mut writer, event)?;
            continue;
        }

        let Some(mut frame) = stack.pop() else {
            continue;
        };
        frame.events.push(event);
        let edit = visit(ParagraphScan {
            ordinal,
            text: &frame.text,
            in_cell: frame.in_cell,
            events: &frame.events,
            context: &context,
        })?;
        ordinal += 1;
        let output = match edit {
            ParagraphEdit::Keep => frame.events,
            ParagraphEdit::Replace(translated) => replace_text(dialect, frame.events, &translated),
            ParagraphEdit::Parallel(translated) => {
                let extra = (dialect.parallel)(dialect, &frame.events, &translated);
                let mut events = frame.events;
                events.extend(extra);
                events
            }
        };
        for event in output {
            emit(&mut stack, &mut writer, event)?;
        }
    }

    // Unbalanced documents still round-trip whatever was buffered.
    for frame in stack {
        for event in frame.events {
            writer.write_event(event)?;
        }
    }
    Ok(writer.into_inner())
}

fn emit(stack: &mut [Frame], writer: &mut Writer<Vec<u8>>, event: Event<'static>) -> Result<()> {
    match stack.last_mut() {
        Some(frame) => frame.events.push(event),
        None => writer.write_event(event)?,
    }
    Ok(())
}

fn remember(
    dialect: &Dialect,
    element: &BytesStart<'_>,
    context: &mut HashMap<&'static [u8], String>,
) {
    for (name, attr) in dialect.watch {
        if element.name().as_ref() == *name
            && let Some(value) = attr_value(element, attr)
        {
            context.insert(*name, value);
        }
    }
}

/// Puts the translation in the paragraph's first text element and empties the others.
fn replace_text(
    dialect: &Dialect,
    events: Vec<Event<'static>>,
    translated: &str,
) -> Vec<Event<'static>> {
    let mut out = Vec::with_capacity(events.len());
    let mut depth = 0usize;
    let mut in_text = false;
    let mut written = false;
    for event in events {
        match &event {
            Event::Start(e) if e.name().as_ref() == dialect.paragraph => depth += 1,
            Event::End(e) if e.name().as_ref() == dialect.paragraph => {
                depth = depth.saturating_sub(1)
            }
            Event::Start(e) if depth == 1 && e.name().as_ref() == dialect.text => in_text = true,
            Event::End(e) if depth == 1 && e.name().as_ref() == dialect.text => {
                if in_text && !written {
                    out.push(Event::Text(BytesText::new(translated).into_owned()));
                    written = true;
                }
                in_text = false;
            }
            Event::Text(_) | Event::CData(_) if in_text => {
                if !written {
                    out.push(Event::Text(BytesText::new(translated).into_owned()));
                    written = true;
                }
                continue;
            }
            _ => {}
        }
        out.push(event);
    }
    out
}

/// Events that belong to the paragraph itself, skipping nested paragraphs.
pub(crate) fn own_events<'a>(
    dialect: &Dialect,
    events: &'a [Event<'static>],
) -> Vec<&'a Event<'static>> {
    let mut depth = 0usize;
    let mut out = Vec::new();
    for event in events {
        match event {
            Event::Start(e) if e.name().as_ref() == dialect.paragraph => {
                depth += 1;
                if depth == 1 {
                    out.push(event);
                }
                continue;
            }
            Event::End(e) if e.name().as_ref() == dialect.paragraph => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    out.push(event);
                }
                continue;
            }
            _ => {}
        }
        if depth == 1 {
            out.push(event);
        }
    }
    out
}

/// First start or empty element called `name` among the paragraph's own events.
pub(crate) fn find_element<'a>(
    dialect: &Dialect,
    events: &'a [Event<'static>],
    name: &[u8],
) -> Option<&'a BytesStart<'static>> {
    own_events(dialect, events)
        .into_iter()
        .find_map(|event| match event {
            Event::Start(e) | Event::Empty(e) if e.name().as_ref() == name => Some(e),
            _ => None,
        })
}

/// One OOXML package whose translatable units are paragraphs.
pub(crate) struct ParagraphPackage {
    pub dialect: &'static Dialect,
    pub select_parts: fn(Vec<String>) -> Vec<String>,
    pub describe: fn(&str, &ParagraphScan<'_>) -> (SegmentKind, Location),
}

impl ParagraphPackage {
    pub(crate) fn extract(&self, path: &Path, bytes: &[u8]) -> Result<Vec<Segment>, PipelineError> {
        let tagged = self
            .extract_tagged(bytes)
            .map_err(|err| PipelineError::parse(path, err))?;
        Ok(tagged.into_iter().map(|(_, segment)| segment).collect())
    }

    /// Segments paired with the name of the part they were read from.
    fn extract_tagged(&self, bytes: &[u8]) -> Result<Vec<(String, Segment)>> {
        let parts = (self.select_parts)(entry_names(bytes)?);
        let mut segments: Vec<(String, Segment)> = Vec::new();
        for part in parts {
            let xml = read_entry(bytes, &part)?;
            transform_paragraphs(&xml, self.dialect, &mut |scan| {
                if let Some((start, end)) = split_text_bounds(scan.text) {
                    let (kind, location) = (self.describe)(&part, &scan);
                    let segment =
                        Segment::new(segments.len(), kind, &scan.text[start..end], location);
                    segments.push((part.clone(), segment));
                }
                Ok(ParagraphEdit::Keep)
            })
            .with_context(|| format!("failed to read {}", part))?;
        }
        Ok(segments)
    }

    pub(crate) fn reinject(
        &self,
        path: &Path,
        bytes: &[u8],
        translations: &[String],
        mode: DisplayMode,
    ) -> Result<Vec<u8>, PipelineError> {
        let tagged = self
            .extract_tagged(bytes)
            .map_err(|err| PipelineError::parse(path, err))?;
        super::ensure_translation_count(tagged.len(), translations)?;

        let mut queues: HashMap<String, VecDeque<&str>> = HashMap::new();
        for ((part, _), translated) in tagged.iter().zip(translations) {
            queues
                .entry(part.clone())
                .or_default()
                .push_back(translated.as_str());
        }

        let output = rewrite_package(bytes, |name, data| {
            let Some(queue) = queues.get_mut(name) else {
                return Ok(None);
            };
            let xml = transform_paragraphs(data, self.dialect, &mut |scan| {
                if split_text_bounds(scan.text).is_none() {
                    return Ok(ParagraphEdit::Keep);
                }
                let translated = queue
                    .pop_front()
                    .ok_or_else(|| anyhow!("ran out of translations in {}", name))?;
                Ok(match mode {
                    DisplayMode::Replace => {
                        ParagraphEdit::Replace(keep_bounds(scan.text, translated))
                    }
                    DisplayMode::Parallel => ParagraphEdit::Parallel(translated.trim().to_string()),
                })
            })?;
            Ok(Some(xml))
        })
        .map_err(|err| PipelineError::reinject(path, err))?;

        let leftover: usize = queues.values().map(VecDeque::len).sum();
        if leftover > 0 {
            return Err(PipelineError::SegmentMismatch {
                expected: translations.len() - leftover,
                actual: translations.len(),
            });
        }
        Ok(output)
    }
}
