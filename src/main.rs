use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use doc_translator_rust::DisplayMode;

#[derive(Parser, Debug)]
#[command(
    name = "doc-translator-rust",
    version,
    about = "Translate office documents with an LLM while keeping their structure"
)]
struct Cli {
    /// Document to translate (docx/xlsx/pptx/md/txt/pdf)
    #[arg(short = 'd', long = "data")]
    file: PathBuf,

    /// Target language code (e.g. zh, en, ja)
    #[arg(short = 'l', long = "lang", default_value = "en")]
    lang: String,

    /// Primary model (defaults to settings [translator] model)
    #[arg(short = 'm', long = "model")]
    model: Option<String>,

    /// Backup model used after rate-limit or auth failures
    #[arg(short = 'b', long = "backup-model")]
    backup_model: Option<String>,

    /// API key (overrides OPENAI_API_KEY)
    #[arg(short = 'k', long = "key")]
    key: Option<String>,

    /// replace (1) or parallel (2)
    #[arg(long = "display-mode", default_value = "replace")]
    display_mode: DisplayMode,

    /// Concurrent requests, 1-10
    #[arg(short = 'c', long = "concurrency")]
    concurrency: Option<usize>,

    /// Directory for translated documents
    #[arg(short = 'o', long = "output-dir")]
    output_dir: Option<PathBuf>,

    /// Domain prompt key from settings [prompts]
    #[arg(long = "domain")]
    domain: Option<String>,

    /// Source language code. Use "auto" to detect.
    #[arg(short = 'L', long = "source-lang", default_value = "auto")]
    source_lang: String,

    /// Skip the translation cache
    #[arg(long = "no-cache")]
    no_cache: bool,

    /// Print the extracted segments as JSON instead of translating
    #[arg(long = "preview")]
    preview: bool,

    /// Character budget for --preview and --compare
    #[arg(long = "max-chars", default_value_t = 5000)]
    max_chars: usize,

    /// Print source and translated segments of a finished result side by side
    #[arg(long = "compare")]
    compare: Option<PathBuf>,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<String>,

    /// Enable verbose logging
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    doc_translator_rust::logging::init(cli.verbose)?;

    let output = doc_translator_rust::run(doc_translator_rust::Config {
        file: cli.file,
        lang: cli.lang,
        model: cli.model,
        backup_model: cli.backup_model,
        key: cli.key,
        display_mode: cli.display_mode,
        concurrency: cli.concurrency,
        output_dir: cli.output_dir,
        domain: cli.domain,
        source_lang: cli.source_lang,
        no_cache: cli.no_cache,
        preview: cli.preview,
        max_chars: cli.max_chars,
        compare: cli.compare,
        settings_path: cli.read_settings,
    })
    .await?;

    println!("{}", output);
    Ok(())
}
