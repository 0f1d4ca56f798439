use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use std::path::{Path, PathBuf};

use crate::error::PipelineError;
use crate::segment::{DisplayMode, FileKind, Location, Segment, SegmentKind};

use super::office::{
    Dialect, ParagraphPackage, ParagraphScan, attr_value, find_element, part_number,
};
use super::{FormatAdapter, read_source, result_path, write_result};

static WORD: Dialect = Dialect {
    paragraph: b"w:p",
    text: b"w:t",
    cell: b"w:tc",
    scope: None,
    watch: &[],
    parallel: parallel_paragraph,
};

static PACKAGE: ParagraphPackage = ParagraphPackage {
    dialect: &WORD,
    select_parts,
    describe,
};

const PARALLEL_COLOR: &str = "808080";

#[derive(Debug, Clone, Copy, Default)]
pub struct DocxAdapter;

impl FormatAdapter for DocxAdapter {
    fn kind(&self) -> FileKind {
        FileKind::Docx
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
        let target = result_path(output_dir, path, "docx")?;
        write_result(&target, &output)?;
        Ok(target)
    }
}

/// Body first, then headers, footers and notes.
fn select_parts(names: Vec<String>) -> Vec<String> {
    let mut parts: Vec<((u8, usize), String)> = names
        .into_iter()
        .filter_map(|name| part_rank(&name).map(|rank| (rank, name)))
        .collect();
    parts.sort();
    parts.into_iter().map(|(_, name)| name).collect()
}

fn part_rank(name: &str) -> Option<(u8, usize)> {
    if name == "word/document.xml" {
        return Some((0, 0));
    }
    if let Some(number) = part_number(name, "word/header") {
        return Some((1, number));
    }
    if let Some(number) = part_number(name, "word/footer") {
        return Some((2, number));
    }
    match name {
        "word/footnotes.xml" => Some((3, 0)),
        "word/endnotes.xml" => Some((4, 0)),
        _ => None,
    }
}

fn describe(part: &str, scan: &ParagraphScan<'_>) -> (SegmentKind, Location) {
    let style = find_element(&WORD, scan.events, b"w:pStyle")
        .and_then(|element| attr_value(element, b"w:val"))
        .unwrap_or_default();
    let kind = if scan.in_cell {
        SegmentKind::Cell
    } else if style.starts_with("Heading") || style.starts_with("heading") || style == "Title" {
        SegmentKind::Heading
    } else if find_element(&WORD, scan.events, b"w:numPr").is_some() {
        SegmentKind::ListItem
    } else {
        SegmentKind::Paragraph
    };
    (
        kind,
        Location::Paragraph {
            part: part.to_string(),
            paragraph: scan.ordinal,
        },
    )
}

/// A muted italic paragraph carrying the source paragraph's style and alignment.
fn parallel_paragraph(dialect: &Dialect, events: &[Event<'static>], text: &str) -> Vec<Event<'static>> {
    let mut out = vec![Event::Start(BytesStart::new("w:p"))];
    let props: Vec<Event<'static>> = [b"w:pStyle".as_slice(), b"w:jc".as_slice()]
        .into_iter()
        .filter_map(|name| find_element(dialect, events, name))
        .map(|element| Event::Empty(element.clone()))
        .collect();
    if !props.is_empty() {
        out.push(Event::Start(BytesStart::new("w:pPr")));
        out.extend(props);
        out.push(Event::End(BytesEnd::new("w:pPr")));
    }
    out.push(Event::Start(BytesStart::new("w:r")));
    out.push(Event::Start(BytesStart::new("w:rPr")));
    out.push(Event::Empty(BytesStart::new("w:i")));
    out.push(Event::Empty(
        BytesStart::new("w:color").with_attributes([("w:val", PARALLEL_COLOR)]),
    ));
    out.push(Event::End(BytesEnd::new("w:rPr")));
    out.push(Event::Start(
        BytesStart::new("w:t").with_attributes([("xml:space", "preserve")]),
    ));
    out.push(Event::Text(BytesText::new(text).into_owned()));
    out.push(Event::End(BytesEnd::new("w:t")));
    out.push(Event::End(BytesEnd::new("w:r")));
    out.push(Event::End(BytesEnd::new("w:p")));
    out
}

/// Minimal word-processing package, one paragraph per entry. An entry of
/// `None` becomes a page break.
pub(crate) fn build_docx(paragraphs: &[Option<&str>]) -> anyhow::Result<Vec<u8>> {
    let mut body = String::new();
    for paragraph in paragraphs {
        match paragraph {
            Some(text) => {
                body.push_str("<w:p><w:r><w:t xml:space=\"preserve\">");
                body.push_str(&quick_xml::escape::escape(*text));
                body.push_str("</w:t></w:r></w:p>");
            }
            None => body.push_str("<w:p><w:r><w:br w:type=\"page\"/></w:r></w:p>"),
        }
    }
    package_docx(&body)
}

/// Wraps `body` (the children of `w:body`) into a word-processing package.
pub(crate) fn package_docx(body: &str) -> anyhow::Result<Vec<u8>> {
    use anyhow::Context;
    use std::io::{Cursor, Write};
    use zip::write::FileOptions;
    use zip::{CompressionMethod, ZipWriter};

    let document = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
<w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\">\
<w:body>{}<w:sectPr/></w:body></w:document>",
        body
    );
    let entries = [
        ("[Content_Types].xml", CONTENT_TYPES.to_string()),
        ("_rels/.rels", ROOT_RELS.to_string()),
        ("word/document.xml", document),
    ];

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, content) in entries {
        writer
            .start_file(name, options)
            .with_context(|| "failed to write zip entry")?;
        writer
            .write_all(content.as_bytes())
            .with_context(|| "failed to write zip content")?;
    }
    Ok(writer
        .finish()
        .with_context(|| "failed to finalize zip output")?
        .into_inner())
}

const CONTENT_TYPES: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
<Types xmlns=\"http://schemas.openxmlformats.org/package/2006/content-types\">\
<Default Extension=\"rels\" ContentType=\"application/vnd.openxmlformats-package.relationships+xml\"/>\
<Default Extension=\"xml\" ContentType=\"application/xml\"/>\
<Override PartName=\"/word/document.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml\"/>\
</Types>";

const ROOT_RELS: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
<Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">\
<Relationship Id=\"rId1\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument\" Target=\"word/document.xml\"/>\
</Relationships>";
