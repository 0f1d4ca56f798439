mod docx;
mod markdown;
mod office;
mod pdf;
mod pptx;
mod text;
mod util;
mod xlsx;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::PipelineError;
use crate::segment::{DisplayMode, FileKind, Preview, Segment};

pub use docx::DocxAdapter;
pub use markdown::MarkdownAdapter;
pub use pdf::PdfAdapter;
pub use pptx::PptxAdapter;
pub use text::TextAdapter;
pub use xlsx::XlsxAdapter;

/// Extraction and reinjection for one document kind.
///
/// `extract` and `reinject` walk the document in the same order; the n-th
/// translation handed to `reinject` belongs to the n-th extracted segment.
pub trait FormatAdapter: Send + Sync {
    fn kind(&self) -> FileKind;

    fn extract(&self, path: &Path) -> Result<Vec<Segment>, PipelineError>;

    fn extract_preview(&self, path: &Path, max_chars: usize) -> Result<Preview, PipelineError> {
        let segments = self.extract(path)?;
        Ok(budget_preview(segments, max_chars))
    }

    /// Writes a translated copy of `path` into `output_dir` and returns its path.
    fn reinject(
        &self,
        path: &Path,
        translations: &[String],
        mode: DisplayMode,
        output_dir: &Path,
    ) -> Result<PathBuf, PipelineError>;
}

#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<FileKind, Arc<dyn FormatAdapter>>,
}

impl AdapterRegistry {
    pub(crate) fn empty() -> Self {
        Self::default()
    }

    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(DocxAdapter));
        registry.register(Arc::new(XlsxAdapter));
        registry.register(Arc::new(PptxAdapter));
        registry.register(Arc::new(MarkdownAdapter));
        registry.register(Arc::new(TextAdapter));
        registry.register(Arc::new(PdfAdapter));
        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn FormatAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn get(&self, kind: FileKind) -> Result<Arc<dyn FormatAdapter>, PipelineError> {
        self.adapters
            .get(&kind)
            .cloned()
            .ok_or_else(|| PipelineError::UnsupportedFormat(kind.to_string()))
    }

    /// Looks up the adapter for a free-form file type such as `"docx"` or `".md"`.
    pub fn resolve(&self, file_type: &str) -> Result<Arc<dyn FormatAdapter>, PipelineError> {
        let kind: FileKind = file_type.parse()?;
        self.get(kind)
    }
}

pub(crate) fn budget_preview(segments: Vec<Segment>, max_chars: usize) -> Preview {
    let total_chars = segments
        .iter()
        .map(|segment| segment.text.chars().count())
        .sum();
    let mut used = 0usize;
    let mut truncated = false;
    let mut content = Vec::new();
    for mut segment in segments {
        let len = segment.text.chars().count();
        if used + len <= max_chars {
            used += len;
            content.push(segment);
            continue;
        }
        truncated = true;
        let remaining = max_chars - used;
        if remaining > 0 {
            segment.text = segment.text.chars().take(remaining).collect();
            content.push(segment);
        }
        break;
    }
    Preview {
        content,
        total_chars,
        truncated,
    }
}

pub(crate) fn read_source(path: &Path) -> Result<Vec<u8>, PipelineError> {
    fs::read(path).map_err(|err| PipelineError::unreadable(path, err))
}

pub(crate) fn ensure_translation_count(
    segments: usize,
    translations: &[String],
) -> Result<(), PipelineError> {
    if segments != translations.len() {
        return Err(PipelineError::SegmentMismatch {
            expected: segments,
            actual: translations.len(),
        });
    }
    Ok(())
}

/// `{stem}_translated_{8 hex}.{ext}` inside `output_dir`.
pub(crate) fn result_path(
    output_dir: &Path,
    source: &Path,
    ext: &str,
) -> Result<PathBuf, PipelineError> {
    fs::create_dir_all(output_dir).map_err(|err| PipelineError::reinject(output_dir, err))?;
    let stem = source
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.trim().is_empty())
        .unwrap_or("document");
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    let digest = md5::compute(format!("{}:{}", source.display(), nanos));
    let suffix = &format!("{:x}", digest)[..8];
    Ok(output_dir.join(format!("{}_translated_{}.{}", stem, suffix, ext)))
}

pub(crate) fn write_result(path: &Path, bytes: &[u8]) -> Result<(), PipelineError> {
    fs::write(path, bytes).map_err(|err| PipelineError::reinject(path, err))
}
