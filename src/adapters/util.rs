pub(crate) fn split_text_bounds(text: &str) -> Option<(usize, usize)> {
    let mut start = None;
    let mut end = None;
    for (idx, ch) in text.char_indices() {
        if !ch.is_whitespace() {
            start = Some(idx);
            break;
        }
    }
    for (idx, ch) in text.char_indices().rev() {
        if !ch.is_whitespace() {
            end = Some(idx + ch.len_utf8());
            break;
        }
    }
    match (start, end) {
        (Some(s), Some(e)) if s < e => Some((s, e)),
        _ => None,
    }
}

/// Puts `translated` between the leading and trailing whitespace of `original`.
pub(crate) fn keep_bounds(original: &str, translated: &str) -> String {
    match split_text_bounds(original) {
        Some((start, end)) => format!(
            "{}{}{}",
            &original[..start],
            translated.trim(),
            &original[end..]
        ),
        None => translated.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Edit {
    pub start: usize,
    pub end: usize,
    pub replacement: String,
}

impl Edit {
    pub(crate) fn replace(start: usize, end: usize, replacement: impl Into<String>) -> Self {
        Self {
            start,
            end,
            replacement: replacement.into(),
        }
    }

    pub(crate) fn insert(at: usize, text: impl Into<String>) -> Self {
        Self::replace(at, at, text)
    }
}

/// Applies non-overlapping byte range edits to `source`.
pub(crate) fn splice(source: &str, mut edits: Vec<Edit>) -> String {
    edits.sort_by(|a, b| a.start.cmp(&b.start).then(a.end.cmp(&b.end)));
    let mut out = String::with_capacity(source.len());
    let mut cursor = 0usize;
    for edit in edits {
        if edit.start < cursor {
            continue;
        }
        out.push_str(&source[cursor..edit.start]);
        out.push_str(&edit.replacement);
        cursor = edit.end;
    }
    out.push_str(&source[cursor..]);
    out
}

pub(crate) fn line_start(source: &str, pos: usize) -> usize {
    source[..pos].rfind('\n').map(|idx| idx + 1).unwrap_or(0)
}

pub(crate) fn line_end(source: &str, pos: usize) -> usize {
    source[pos..]
        .find('\n')
        .map(|idx| pos + idx)
        .unwrap_or(source.len())
}

/// End of the last line that has content before `pos`, skipping trailing newlines.
pub(crate) fn content_line_end(source: &str, pos: usize) -> usize {
    let trimmed = source[..pos].trim_end_matches(['\n', '\r']).len();
    let end = line_end(source, trimmed);
    if end > 0 && source.as_bytes()[end - 1] == b'\r' {
        end - 1
    } else {
        end
    }
}
