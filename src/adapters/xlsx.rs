use anyhow::{Context, Result, anyhow};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::path::{Path, PathBuf};

use crate::error::PipelineError;
use crate::segment::{DisplayMode, FileKind, Location, Segment, SegmentKind};

use super::office::{attr_value, entry_names, part_number, read_entry, rewrite_package};
use super::util::{keep_bounds, split_text_bounds};
use super::{FormatAdapter, ensure_translation_count, read_source, result_path, write_result};

const SHEET_PREFIX: &str = "xl/worksheets/sheet";
const SHARED_STRINGS: &str = "xl/sharedStrings.xml";
const PARALLEL_COLOR: &str = "FF808080";

#[derive(Debug, Clone, Copy, Default)]
pub struct XlsxAdapter;

impl FormatAdapter for XlsxAdapter {
    fn kind(&self) -> FileKind {
        FileKind::Xlsx
    }

    fn extract(&self, path: &Path) -> Result<Vec<Segment>, PipelineError> {
        let bytes = read_source(path)?;
        let tagged = extract_cells(&bytes).map_err(|err| PipelineError::parse(path, err))?;
        Ok(tagged.into_iter().map(|(_, segment)| segment).collect())
    }

    fn reinject(
        &self,
        path: &Path,
        translations: &[String],
        mode: DisplayMode,
        output_dir: &Path,
    ) -> Result<PathBuf, PipelineError> {
        let bytes = read_source(path)?;
        let tagged = extract_cells(&bytes).map_err(|err| PipelineError::parse(path, err))?;
        ensure_translation_count(tagged.len(), translations)?;

        let shared = shared_strings(&bytes).map_err(|err| PipelineError::parse(path, err))?;
        let mut queues: HashMap<String, VecDeque<&str>> = HashMap::new();
        for ((part, _), translated) in tagged.iter().zip(translations) {
            queues
                .entry(part.clone())
                .or_default()
                .push_back(translated.as_str());
        }
        let output = rewrite_package(&bytes, |name, data| {
            let Some(queue) = queues.get_mut(name) else {
                return Ok(None);
            };
            let xml = transform_cells(data, &shared, &mut |cell| {
                let Some(source) = cell.translatable() else {
                    return Ok(None);
                };
                let translated = queue
                    .pop_front()
                    .ok_or_else(|| anyhow!("ran out of translations in {}", name))?;
                Ok(Some(match mode {
                    DisplayMode::Replace => vec![(keep_bounds(source, translated), false)],
                    DisplayMode::Parallel => vec![
                        (source.to_string(), false),
                        (format!("\n{}", translated.trim()), true),
                    ],
                }))
            })?;
            Ok(Some(xml))
        })
        .map_err(|err| PipelineError::reinject(path, err))?;

        let target = result_path(output_dir, path, "xlsx")?;
        write_result(&target, &output)?;
        Ok(target)
    }
}

fn sheet_parts(bytes: &[u8]) -> Result<Vec<(usize, String)>> {
    let mut sheets: Vec<(usize, String)> = entry_names(bytes)?
        .into_iter()
        .filter_map(|name| part_number(&name, SHEET_PREFIX).map(|number| (number, name)))
        .collect();
    sheets.sort();
    Ok(sheets)
}

/// Segments paired with the worksheet part they were read from.
fn extract_cells(bytes: &[u8]) -> Result<Vec<(String, Segment)>> {
    let shared = shared_strings(bytes)?;
    let mut segments: Vec<(String, Segment)> = Vec::new();
    for (number, part) in sheet_parts(bytes)? {
        let xml = read_entry(bytes, &part)?;
        transform_cells(&xml, &shared, &mut |cell| {
            if let Some(text) = cell.translatable() {
                let segment = Segment::new(
                    segments.len(),
                    SegmentKind::Cell,
                    text.trim(),
                    Location::Cell {
                        sheet: format!("sheet{}", number),
                        cell: cell.reference.clone(),
                    },
                );
                segments.push((part.clone(), segment));
            }
            Ok(None)
        })
        .with_context(|| format!("failed to read {}", part))?;
    }
    Ok(segments)
}

fn shared_strings(bytes: &[u8]) -> Result<Vec<String>> {
    if !entry_names(bytes)?.iter().any(|name| name == SHARED_STRINGS) {
        return Ok(Vec::new());
    }
    let xml = read_entry(bytes, SHARED_STRINGS)?;
    let mut reader = Reader::from_reader(Cursor::new(xml));
    reader.trim_text(false);
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut phonetic = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"si" => current.clear(),
                b"rPh" => phonetic += 1,
                b"t" if phonetic == 0 => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.name().as_ref() == b"si" => strings.push(String::new()),
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"si" => strings.push(std::mem::take(&mut current)),
                b"rPh" => phonetic = phonetic.saturating_sub(1),
                b"t" => in_text = false,
                _ => {}
            },
            Ok(Event::Text(e)) if in_text => current.push_str(&e.unescape()?),
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => return Err(anyhow!("failed to parse shared strings: {}", err)),
        }
        buf.clear();
    }
    Ok(strings)
}

struct Cell {
    reference: String,
    text: Option<String>,
    formula: bool,
}

impl Cell {
    fn translatable(&self) -> Option<&str> {
        if self.formula {
            return None;
        }
        let text = self.text.as_deref()?;
        let (start, _) = split_text_bounds(text)?;
        if text[start..].starts_with('=') {
            return None;
        }
        Some(text)
    }
}

/// Runs of an inline rich string: `(text, muted)`.
type CellRuns = Vec<(String, bool)>;

/// Walks every `c` element of a worksheet. `visit` returning runs rewrites the
/// cell as an inline string.
fn transform_cells(
    xml: &[u8],
    shared: &[String],
    visit: &mut dyn FnMut(&Cell) -> Result<Option<CellRuns>>,
) -> Result<Vec<u8>> {
    let mut reader = Reader::from_reader(Cursor::new(xml));
    reader.trim_text(false);
    let mut writer = Writer::new(Vec::new());
    let mut buf = Vec::new();
    let mut pending: Option<(BytesStart<'static>, Vec<Event<'static>>)> = None;
    let mut cell_type = String::new();
    let mut value = String::new();
    let mut inline = String::new();
    let mut formula = false;
    let mut element: Vec<u8> = Vec::new();
    let mut phonetic = 0usize;

    loop {
        let event = match reader.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,
            Ok(event) => event.into_owned(),
            Err(err) => return Err(anyhow!("failed to parse worksheet: {}", err)),
        };
        buf.clear();

        if pending.is_none() {
            if let Event::Start(e) = &event
                && e.name().as_ref() == b"c"
            {
                cell_type = attr_value(e, b"t").unwrap_or_default();
                value.clear();
                inline.clear();
                formula = false;
                pending = Some((e.clone(), Vec::new()));
                continue;
            }
            writer.write_event(event)?;
            continue;
        }

        match &event {
            Event::Start(e) | Event::Empty(e) => {
                let name = e.name().as_ref().to_vec();
                if name == b"f" {
                    formula = true;
                } else if name == b"rPh" && matches!(event, Event::Start(_)) {
                    phonetic += 1;
                }
                if matches!(event, Event::Start(_)) {
                    element = name;
                }
            }
            Event::Text(e) => {
                let text = e.unescape()?;
                if element == b"v" {
                    value.push_str(&text);
                } else if element == b"t" && phonetic == 0 {
                    inline.push_str(&text);
                }
            }
            Event::End(e) => {
                let name = e.name();
                if name.as_ref() == b"rPh" {
                    phonetic = phonetic.saturating_sub(1);
                }
                element.clear();
                if name.as_ref() == b"c" {
                    let Some((start, events)) = pending.take() else {
                        continue;
                    };
                    let reference = attr_value(&start, b"r").unwrap_or_default();
                    let text = match cell_type.as_str() {
                        "s" => value
                            .trim()
                            .parse::<usize>()
                            .ok()
                            .and_then(|idx| shared.get(idx).cloned()),
                        "inlineStr" => Some(inline.clone()),
                        _ => None,
                    };
                    let cell = Cell {
                        reference,
                        text,
                        formula: formula || cell_type == "str",
                    };
                    match visit(&cell)? {
                        Some(runs) => {
                            for event in inline_cell(&start, &runs) {
                                writer.write_event(event)?;
                            }
                        }
                        None => {
                            writer.write_event(Event::Start(start))?;
                            for event in events {
                                writer.write_event(event)?;
                            }
                            writer.write_event(Event::End(BytesEnd::new("c")))?;
                        }
                    }
                    continue;
                }
            }
            _ => {}
        }
        if let Some((_, events)) = pending.as_mut() {
            events.push(event);
        }
    }
    Ok(writer.into_inner())
}

fn inline_cell(start: &BytesStart<'static>, runs: &[(String, bool)]) -> Vec<Event<'static>> {
    let mut cell = BytesStart::new("c");
    for attr in start.attributes().flatten() {
        if attr.key.as_ref() != b"t" {
            cell.push_attribute(attr);
        }
    }
    cell.push_attribute(("t", "inlineStr"));

    let mut out = vec![Event::Start(cell.into_owned()), Event::Start(BytesStart::new("is"))];
    let rich = runs.len() > 1;
    for (text, muted) in runs {
        if rich {
            out.push(Event::Start(BytesStart::new("r")));
        }
        if *muted {
            out.push(Event::Start(BytesStart::new("rPr")));
            out.push(Event::Empty(BytesStart::new("i")));
            out.push(Event::Empty(
                BytesStart::new("color").with_attributes([("rgb", PARALLEL_COLOR)]),
            ));
            out.push(Event::End(BytesEnd::new("rPr")));
        }
        out.push(Event::Start(
            BytesStart::new("t").with_attributes([("xml:space", "preserve")]),
        ));
        out.push(Event::Text(BytesText::new(text).into_owned()));
        out.push(Event::End(BytesEnd::new("t")));
        if rich {
            out.push(Event::End(BytesEnd::new("r")));
        }
    }
    out.push(Event::End(BytesEnd::new("is")));
    out.push(Event::End(BytesEnd::new("c")));
    out
}
