use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use std::path::{Path, PathBuf};

use crate::error::PipelineError;
use crate::segment::{DisplayMode, FileKind, Location, Segment, SegmentKind};

use super::office::{Dialect, ParagraphPackage, ParagraphScan, find_element, part_number};
use super::{FormatAdapter, read_source, result_path, write_result};

const SLIDE_PREFIX: &str = "ppt/slides/slide";
const PARALLEL_COLOR: &str = "7F7F7F";

static DRAWING: Dialect = Dialect {
    paragraph: b"a:p",
    text: b"a:t",
    cell: b"a:tc",
    scope: Some(b"p:sp"),
    watch: &[(b"p:cNvPr", b"id"), (b"p:ph", b"type")],
    parallel: parallel_paragraph,
};

static PACKAGE: ParagraphPackage = ParagraphPackage {
    dialect: &DRAWING,
    select_parts,
    describe,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct PptxAdapter;

impl FormatAdapter for PptxAdapter {
    fn kind(&self) -> FileKind {
        FileKind::Pptx
    }

    fn extract(&self, path: &Path) -> Result<Vec<Segment>, PipelineError> {
        let bytes = read_source(path)?;
        PACKAGE.extract(path, &bytes)
    }

    fn reinject(
        &self,
        path: &Path,
        translations: &[String],
        mode: DisplayMode,
        output_dir: &Path,
    ) -> Result<PathBuf, PipelineError> {
        let bytes = read_source(path)?;
        let output = PACKAGE.reinject(path, &bytes, translations, mode)?;
        let target = result_path(output_dir, path, "pptx")?;
        write_result(&target, &output)?;
        Ok(target)
    }
}

fn select_parts(names: Vec<String>) -> Vec<String> {
    let mut slides: Vec<(usize, String)> = names
        .into_iter()
        .filter_map(|name| part_number(&name, SLIDE_PREFIX).map(|number| (number, name)))
        .collect();
    slides.sort();
    slides.into_iter().map(|(_, name)| name).collect()
}

fn describe(part: &str, scan: &ParagraphScan<'_>) -> (SegmentKind, Location) {
    let placeholder = scan.context.get(b"p:ph".as_slice()).map(String::as_str);
    let kind = if scan.in_cell {
        SegmentKind::Cell
    } else if matches!(placeholder, Some("title" | "ctrTitle")) {
        SegmentKind::Heading
    } else {
        SegmentKind::Paragraph
    };
    (
        kind,
        Location::Shape {
            slide: part_number(part, SLIDE_PREFIX).unwrap_or_default(),
            shape: scan.context.get(b"p:cNvPr".as_slice()).cloned(),
            paragraph: scan.ordinal,
        },
    )
}

/// A gray paragraph that keeps the source paragraph's properties and run size.
fn parallel_paragraph(dialect: &Dialect, events: &[Event<'static>], text: &str) -> Vec<Event<'static>> {
    let mut out = vec![Event::Start(BytesStart::new("a:p"))];
    if let Some(props) = find_element(dialect, events, b"a:pPr") {
        out.push(Event::Empty(props.clone()));
    }
    let run_props = match find_element(dialect, events, b"a:rPr") {
        Some(props) => props.clone(),
        None => BytesStart::new("a:rPr"),
    };
    out.push(Event::Start(BytesStart::new("a:r")));
    out.push(Event::Start(run_props));
    out.push(Event::Start(BytesStart::new("a:solidFill")));
    out.push(Event::Empty(
        BytesStart::new("a:srgbClr").with_attributes([("val", PARALLEL_COLOR)]),
    ));
    out.push(Event::End(BytesEnd::new("a:solidFill")));
    out.push(Event::End(BytesEnd::new("a:rPr")));
    out.push(Event::Start(BytesStart::new("a:t")));
    out.push(Event::Text(BytesText::new(text).into_owned()));
    out.push(Event::End(BytesEnd::new("a:t")));
    out.push(Event::End(BytesEnd::new("a:r")));
    out.push(Event::End(BytesEnd::new("a:p")));
    out
}
