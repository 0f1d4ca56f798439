use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use doc_translator_rust::adapters::DocxAdapter;
use doc_translator_rust::cache::SqliteCache;
use doc_translator_rust::providers::{CompletionRequest, ProviderFuture, ProviderResponse};
use doc_translator_rust::settings::{Settings, builtin_settings};
use doc_translator_rust::translator::RetryPolicy;
use doc_translator_rust::{
    AdapterRegistry, DisplayMode, Engine, FormatAdapter, Job, JobStatus, MemoryJobStore,
    MemoryProgressStore, PipelineError, Provider,
};
use zip::ZipWriter;
use zip::write::FileOptions;

#[derive(Clone)]
struct Dictionary {
    entries: Arc<HashMap<String, String>>,
    calls: Arc<AtomicUsize>,
}

impl Dictionary {
    fn new(pairs: &[(&str, &str)]) -> Self {
        Self {
            entries: Arc::new(
                pairs
                    .iter()
                    .map(|(from, to)| (from.to_string(), to.to_string()))
                    .collect(),
            ),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Provider for Dictionary {
    fn complete(&self, request: CompletionRequest) -> ProviderFuture {
        let dictionary = self.clone();
        Box::pin(async move {
            dictionary.calls.fetch_add(1, Ordering::SeqCst);
            let content = dictionary
                .entries
                .get(&request.user)
                .cloned()
                .unwrap_or_else(|| request.user.clone());
            Ok(ProviderResponse {
                content,
                model: Some(request.model),
                usage: None,
            })
        })
    }

    fn endpoint(&self) -> &str {
        "https://dictionary.test/v1"
    }

    fn credential(&self) -> &str {
        "test-key"
    }
}

fn settings(output_dir: &Path) -> Settings {
    let mut settings = builtin_settings().expect("settings");
    settings.output_dir = output_dir.to_path_buf();
    settings.retry = RetryPolicy::immediate();
    settings.progress_interval = Duration::ZERO;
    settings
}

fn engine(
    provider: Dictionary,
    output_dir: &Path,
) -> (Engine<Dictionary>, Arc<MemoryJobStore>) {
    let jobs = Arc::new(MemoryJobStore::new());
    let engine = Engine::new(
        settings(output_dir),
        AdapterRegistry::standard(),
        provider,
        jobs.clone(),
        Arc::new(MemoryProgressStore::default()),
    );
    (engine, jobs)
}

fn write_docx(path: &Path, paragraphs: &[&str]) {
    let body: String = paragraphs
        .iter()
        .map(|text| format!("<w:p><w:pPr><w:jc w:val=\"center\"/></w:pPr><w:r><w:rPr><w:b/></w:rPr><w:t>{}</w:t></w:r></w:p>", text))
        .collect();
    let document = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
<w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\">\
<w:body>{}</w:body></w:document>",
        body
    );
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default();
    writer.start_file("[Content_Types].xml", options).expect("start");
    writer.write_all(b"<Types/>").expect("write");
    writer.start_file("word/document.xml", options).expect("start");
    writer.write_all(document.as_bytes()).expect("write");
    let bytes = writer.finish().expect("finish").into_inner();
    std::fs::write(path, bytes).expect("write docx");
}

fn docx_texts(path: &Path) -> Vec<String> {
    DocxAdapter
        .extract(path)
        .expect("extract")
        .into_iter()
        .map(|segment| segment.text)
        .collect()
}

#[tokio::test]
async fn docx_job_replaces_paragraph_text() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = dir.path().join("greeting.docx");
    write_docx(&source, &["Hello", "World", "Test"]);

    let segments = DocxAdapter.extract(&source).expect("extract");
    let indices: Vec<usize> = segments.iter().map(|segment| segment.index).collect();
    assert_eq!(indices, vec![0, 1, 2]);

    let provider = Dictionary::new(&[("Hello", "你好"), ("World", "世界"), ("Test", "测试")]);
    let (engine, jobs) = engine(provider, &dir.path().join("out"));
    jobs.insert(Job::new("scenario-a", &source, "zh", "gpt-4o-mini"))
        .expect("insert");

    let result: PathBuf = engine
        .start_job("scenario-a")
        .await
        .expect("join")
        .expect("job");

    assert_eq!(docx_texts(&result), vec!["你好", "世界", "测试"]);
    assert!(result.starts_with(dir.path().join("out")));
    let job = jobs.get("scenario-a").expect("job");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.translated_segments, 3);
}

#[tokio::test]
async fn parallel_docx_keeps_source_paragraphs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = dir.path().join("greeting.docx");
    write_docx(&source, &["Hello", "World"]);

    let provider = Dictionary::new(&[("Hello", "你好"), ("World", "世界")]);
    let (engine, jobs) = engine(provider, dir.path());
    let mut job = Job::new("parallel", &source, "zh", "gpt-4o-mini");
    job.display_mode = DisplayMode::Parallel;
    jobs.insert(job).expect("insert");

    let result = engine.run_job("parallel").await.expect("job");
    assert_eq!(docx_texts(&result), vec!["Hello", "你好", "World", "世界"]);
}

#[tokio::test]
async fn shared_cache_serves_repeated_jobs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = dir.path().join("notes.txt");
    std::fs::write(&source, "Hello\n\nWorld\n").expect("write");
    let cache = Arc::new(SqliteCache::open(&dir.path().join("cache.sqlite")).expect("cache"));

    let provider = Dictionary::new(&[("Hello", "Hola"), ("World", "Mundo")]);
    let (engine, jobs) = engine(provider.clone(), dir.path());
    let engine = engine.with_cache(cache);
    for id in ["first", "second"] {
        jobs.insert(Job::new(id, &source, "es", "gpt-4o-mini"))
            .expect("insert");
        let result = engine.run_job(id).await.expect("job");
        assert_eq!(
            std::fs::read_to_string(result).expect("read"),
            "Hola\n\nMundo\n"
        );
    }
    assert_eq!(provider.calls(), 2);
}

#[tokio::test]
async fn empty_document_completes_without_requests() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = dir.path().join("blank.md");
    std::fs::write(&source, "```\ncode only\n```\n").expect("write");

    let provider = Dictionary::new(&[]);
    let (engine, jobs) = engine(provider.clone(), dir.path());
    jobs.insert(Job::new("blank", &source, "de", "gpt-4o-mini"))
        .expect("insert");

    let result = engine.run_job("blank").await.expect("job");
    assert_eq!(
        std::fs::read_to_string(result).expect("read"),
        "```\ncode only\n```\n"
    );
    assert_eq!(provider.calls(), 0);
    let progress = engine.get_progress("blank").expect("progress");
    assert_eq!(progress.progress_percent, 100);
}

#[test]
fn preview_errors_are_distinct() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (engine, _) = engine(Dictionary::new(&[]), dir.path());

    let unsupported = engine
        .extract_preview(&dir.path().join("slides.odp"), "odp", 100)
        .expect_err("unsupported");
    assert!(matches!(unsupported, PipelineError::UnsupportedFormat(_)));

    let missing = engine
        .extract_preview(&dir.path().join("missing.docx"), "docx", 100)
        .expect_err("missing");
    assert!(matches!(missing, PipelineError::SourceUnreadable { .. }));
}
