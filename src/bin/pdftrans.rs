//! CLI binary for pdf-translate.
//!
//! A thin shim over the library crate that maps CLI flags and an optional
//! JSON config file to `TranslationConfig` and prints per-document results.

use anyhow::{Context, Result};
use clap::Parser;
use pdf_translate::pipeline::input::resolve_input;
use pdf_translate::terminology::write_template;
use pdf_translate::{
    CancelFlag, FileConfig, ProgressCallback, TranslationConfig, TranslationProgressCallback,
    TranslationStats, Translator,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

/// One bar per document, reset on each `on_document_start`. Pages finish
/// out of order, so the bar only counts them.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Extracting…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl TranslationProgressCallback for CliProgressCallback {
    fn on_document_start(&self, name: &str, total_pages: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_style(style);
        self.bar.set_length(total_pages as u64);
        self.bar.set_position(0);
        self.bar.set_prefix("Translating");
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{name} ({total_pages} pages)"))
        ));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, stats: &TranslationStats) {
        let fallbacks = stats.total_fallbacks();
        let mark = if fallbacks == 0 { green("✓") } else { cyan("⚠") };
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}",
            mark,
            page_num,
            total,
            dim(&format!(
                "{} translated, {} original",
                stats.total_translated(),
                fallbacks
            )),
        ));
        self.bar.inc(1);
    }

    fn on_document_complete(&self, name: &str, stats: &TranslationStats) {
        self.bar.println(format!(
            "{} {}  {}",
            green("✔"),
            bold(name),
            dim(&format!(
                "{} items translated, {} kept original, {}ms",
                stats.total_translated(),
                stats.total_fallbacks(),
                stats.extract_duration_ms + stats.translate_duration_ms
            )),
        ));
    }

    fn on_document_error(&self, name: &str, error: &str) {
        // Keep long error messages on one line.
        let msg: String = error.lines().next().unwrap_or_default().chars().take(100).collect();
        self.bar.println(format!("{} {}  {}", red("✗"), bold(name), red(&msg)));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Translate one paper into output/
  pdftrans paper.pdf

  # Translate every PDF in a directory with a terminology domain
  pdftrans pdfs/ --terminology-dir terminology --domain machine_learning

  # Only one file out of a directory
  pdftrans pdfs/ --pdf attention.pdf

  # Build a term list instead of translating
  pdftrans pdfs/ --extract-terms --terminology-dir terminology

  # Settings from a JSON config file (flags still win)
  pdftrans --config config.json

  # Continue an interrupted run from its checkpoints
  pdftrans pdfs/ --resume

OUTPUT FILES (per document, in --output-dir):
  <stem>_translation_data.json   checkpoint (blocks + translations)
  <stem>_report.md               bilingual Markdown report
  <stem>_images/                 extracted figures
  translation_summary.json       per-batch counts and usage

TERMINOLOGY FILES (in --terminology-dir, file stem = domain):
  machine_learning.csv    english,chinese,definition
  physics.json            [{"english": "...", "chinese": "...", "definition": "..."}]
  Missing directories are created with template.csv / template.json.

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium
  RUST_LOG                Log filter (overrides -v / -q)
"#;

/// Translate PDF documents into bilingual reports using LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "pdftrans",
    version,
    about = "Translate PDF documents into bilingual reports using LLMs",
    long_about = "Translate PDF files (or every PDF in a directory) into bilingual Markdown \
reports. Text, formulas, tables and figure captions are translated with content-specific \
prompts; a terminology directory keeps domain vocabulary consistent.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF file, directory of PDFs, or HTTP/HTTPS URL. Defaults to `pdf_dir` from --config.
    input: Option<String>,

    /// JSON config file (pdf_dir, output_dir, terminology_dir, model, default_domain, …).
    #[arg(long, env = "PDFTRANS_CONFIG")]
    config: Option<PathBuf>,

    /// Process only this PDF (file name or stem) from the input directory.
    #[arg(long, env = "PDFTRANS_PDF")]
    pdf: Option<String>,

    /// Directory for checkpoints, reports and figures.
    #[arg(short, long, env = "PDFTRANS_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Directory holding terminology CSV/JSON files.
    #[arg(long, env = "PDFTRANS_TERMINOLOGY_DIR")]
    terminology_dir: Option<PathBuf>,

    /// Terminology domain (file stem) to prefer, e.g. machine_learning.
    #[arg(long, env = "PDFTRANS_DOMAIN")]
    domain: Option<String>,

    /// Extract candidate terms instead of translating.
    #[arg(long)]
    extract_terms: bool,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1-mini).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Target language.
    #[arg(long, env = "PDFTRANS_TARGET_LANGUAGE")]
    target_language: Option<String>,

    /// Requests allowed per minute (≥ 1).
    #[arg(long, env = "PDFTRANS_RATE_LIMIT")]
    rate_limit: Option<usize>,

    /// Pages translated concurrently.
    #[arg(short, long, env = "PDFTRANS_CONCURRENCY")]
    concurrency: Option<usize>,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDFTRANS_PASSWORD")]
    password: Option<String>,

    /// Continue from existing checkpoints instead of re-extracting.
    #[arg(long, env = "PDFTRANS_RESUME")]
    resume: bool,

    /// Do not write extracted figures.
    #[arg(long, env = "PDFTRANS_NO_IMAGES")]
    no_images: bool,

    /// Prepend YAML front-matter to each report.
    #[arg(long, env = "PDFTRANS_METADATA")]
    metadata: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDFTRANS_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDFTRANS_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDFTRANS_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Config ───────────────────────────────────────────────────────────
    let file = match cli.config {
        Some(ref path) => FileConfig::load(path).context("Failed to load config file")?,
        None => FileConfig::default(),
    };

    let input = cli
        .input
        .clone()
        .or_else(|| file.pdf_dir.as_ref().map(|d| d.display().to_string()))
        .context("No input given: pass a PDF, a directory, or set pdf_dir in --config")?;
    let output_dir = cli
        .output_dir
        .clone()
        .or_else(|| file.output_dir.clone())
        .unwrap_or_else(|| PathBuf::from("output"));

    let cli_progress = show_progress.then(CliProgressCallback::new);
    let progress = cli_progress
        .clone()
        .map(|cb| cb as ProgressCallback);
    let config = build_config(&cli, &file, progress)?;

    if let Some(ref dir) = config.terminology_dir {
        if !dir.exists() {
            write_template(dir)
                .await
                .context("Failed to create terminology templates")?;
            warn!("Created terminology templates in {}", dir.display());
        }
    }

    // ── Resolve input & build translator (fatal on failure) ─────────────
    let resolved = resolve_input(&input, cli.pdf.as_deref(), config.download_timeout_secs)
        .await
        .context("Failed to resolve input")?;
    info!("{} PDF(s) to process", resolved.pdfs().len());

    let translator = Translator::from_config(config)
        .await
        .context("Failed to initialise translator")?;

    // ── Extract-terms mode ───────────────────────────────────────────────
    if cli.extract_terms {
        let (path, terms) = translator
            .extract_terms(resolved.pdfs(), &output_dir)
            .await
            .context("Term extraction failed")?;
        if let Some(ref cb) = cli_progress {
            cb.bar.finish_and_clear();
        }
        if !cli.quiet {
            eprintln!(
                "{} {} terms  →  {}",
                green("✔"),
                terms.len(),
                bold(&path.display().to_string())
            );
        }
        return Ok(());
    }

    // ── Batch translation ────────────────────────────────────────────────
    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received: finishing the current document");
                cancel.cancel();
            }
        });
    }

    let summary = translator
        .translate_batch(resolved.pdfs(), &output_dir, &cancel)
        .await
        .context("Translation failed")?;
    if let Some(ref cb) = cli_progress {
        cb.bar.finish_and_clear();
    }

    if !cli.quiet {
        for doc in &summary.completed {
            eprintln!(
                "{} {}  {} translated, {} kept original",
                if doc.stats.total_fallbacks() == 0 {
                    green("✔")
                } else {
                    cyan("⚠")
                },
                doc.title,
                doc.stats.total_translated(),
                doc.stats.total_fallbacks()
            );
        }
        for failed in &summary.failed {
            eprintln!("{} {}  {}", red("✘"), failed.source.display(), red(&failed.error));
        }
        if !summary.skipped.is_empty() {
            eprintln!("{} {} document(s) skipped after interrupt", cyan("⚠"), summary.skipped.len());
        }
        let usage = &summary.usage;
        eprintln!(
            "   {} requests  /  {} cache hits  /  {} failed calls  →  {}",
            dim(&usage.total_requests.to_string()),
            dim(&usage.cache_hits.to_string()),
            dim(&usage.failed_calls.to_string()),
            bold(&output_dir.display().to_string()),
        );
    }

    Ok(())
}

/// Map the config file and CLI args to `TranslationConfig`. Flags win.
fn build_config(
    cli: &Cli,
    file: &FileConfig,
    progress: Option<ProgressCallback>,
) -> Result<TranslationConfig> {
    let mut builder = TranslationConfig::builder()
        .file_config(file)
        .resume(cli.resume)
        .save_images(!cli.no_images)
        .include_metadata(cli.metadata);

    if let Some(ref dir) = cli.terminology_dir {
        builder = builder.terminology_dir(dir.clone());
    }
    if let Some(ref domain) = cli.domain {
        builder = builder.domain(domain.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref lang) = cli.target_language {
        builder = builder.target_language(lang.clone());
    }
    if let Some(k) = cli.rate_limit {
        builder = builder.rate_limit_per_minute(k);
    }
    if let Some(n) = cli.concurrency {
        builder = builder.concurrency(n);
    }
    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
