//! CLI binary for beamerize.
//!
//! A thin shim over the library crate that maps CLI flags and the config
//! file to `ConversionConfig`, then runs one document or a whole folder.

use anyhow::{bail, Context, Result};
use beamerize::config::{export_api_key, FileConfig, KeySource};
use beamerize::{
    run_batch, write_plan_json, BatchProgressCallback, BatchReport, ConversionConfig, Method,
    Pipeline, ProgressCallback,
};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress for batch runs. Documents finish out of order, so
/// every line names its document.
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Discovering");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total: usize, skipped: usize) {
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {pos:>3}/{len} documents  \
                 ⏱ {elapsed_precise}  ETA {eta_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        self.bar.set_length(total as u64);
        self.bar.set_prefix("Converting");
        self.bar.println(format!(
            "{} {}  {}",
            cyan("◆"),
            bold(&format!("{total} documents to convert")),
            dim(&format!("{skipped} skipped")),
        ));
    }

    fn on_document_start(&self, _index: usize, _total: usize, source: &str) {
        self.bar.set_message(source.to_string());
    }

    fn on_document_complete(&self, _index: usize, _total: usize, source: &str, slides: usize) {
        self.bar.println(format!(
            "  {} {}  {}",
            green("✓"),
            source,
            dim(&format!("{slides} slides"))
        ));
        self.bar.inc(1);
    }

    fn on_document_error(&self, _index: usize, _total: usize, source: &str, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let first_line = error.lines().next().unwrap_or(error);
        let msg = if first_line.chars().count() > 80 {
            format!("{}\u{2026}", first_line.chars().take(79).collect::<String>())
        } else {
            first_line.to_string()
        };
        self.bar
            .println(format!("  {} {}  {}", red("✗"), source, red(&msg)));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, _succeeded: usize, _failed: usize, _cancelled: usize) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # One LaTeX report to Beamer (offline, deterministic)
  beamerize --source-path report/main.tex --output-path slides.tex

  # A PDF, printing the Beamer source to stdout
  beamerize --source-path paper.pdf

  # LLM outline + local retrieval, 12 slides, plan exported for inspection
  beamerize --method rag --slides 12 --source-path paper.pdf \
            --output-path paper-slides.tex --plan-json plan.json

  # Every .tex/.pdf under papers/, mirrored into slides/
  beamerize --source-folder papers --target-folder slides

  # Only PDFs, regenerating existing outputs
  beamerize --source-folder papers --target-folder slides --suffix .pdf --refresh

CONFIG FILE (beamerize.toml, or --config / BEAMERIZE_CONFIG):
  [llm]
  provider = "openai"
  model = "gpt-4o"
  api_key = "sk-..."        # lowest precedence

  [planner]
  max_items = 5
  max_weight = 6.0

  [render]
  theme = "Madrid"
  outline_frame = true

CREDENTIALS (rag only), highest precedence first:
  --api-key  >  OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY  >  config file

ENVIRONMENT VARIABLES:
  BEAMERIZE_*             Every option, e.g. BEAMERIZE_METHOD=rag
  EDGEQUAKE_LLM_PROVIDER  Provider auto-detection override
  EDGEQUAKE_MODEL         Model auto-detection override
  PDFIUM_LIB_PATH         Directory or file of libpdfium (PDF input)
  RUST_LOG                Log filter, overrides -v / -q
"#;

/// Convert PDF documents and LaTeX reports into Beamer presentations.
#[derive(Parser, Debug)]
#[command(
    name = "beamerize",
    version,
    about = "Convert PDF documents and LaTeX reports into LaTeX Beamer presentations",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Source document (.tex or .pdf).
    #[arg(long, env = "BEAMERIZE_SOURCE_PATH", conflicts_with = "source_folder")]
    source_path: Option<PathBuf>,

    /// Write the Beamer source here instead of stdout.
    #[arg(long, env = "BEAMERIZE_OUTPUT_PATH", requires = "source_path")]
    output_path: Option<PathBuf>,

    /// Folder searched recursively for documents.
    #[arg(long, env = "BEAMERIZE_SOURCE_FOLDER", requires = "target_folder")]
    source_folder: Option<PathBuf>,

    /// Folder receiving the mirrored outputs.
    #[arg(long, env = "BEAMERIZE_TARGET_FOLDER", requires = "source_folder")]
    target_folder: Option<PathBuf>,

    /// Slide planning method.
    #[arg(long, env = "BEAMERIZE_METHOD", value_enum, default_value = "direct")]
    method: MethodArg,

    /// File suffix to convert in batch mode (repeatable). Default: .tex and .pdf.
    #[arg(long = "suffix", env = "BEAMERIZE_SUFFIX", value_delimiter = ',')]
    suffixes: Vec<String>,

    /// Regenerate outputs that already exist.
    #[arg(long, env = "BEAMERIZE_REFRESH")]
    refresh: bool,

    /// API key for the rag method's provider.
    #[arg(long)]
    api_key: Option<String>,

    /// LLM provider: openai, anthropic, gemini, mistral, ollama.
    #[arg(long, env = "BEAMERIZE_PROVIDER")]
    provider: Option<String>,

    /// LLM model ID (default gpt-4o).
    #[arg(long, env = "BEAMERIZE_MODEL")]
    model: Option<String>,

    /// Config file (TOML).
    #[arg(long, env = "BEAMERIZE_CONFIG")]
    config: Option<PathBuf>,

    /// Also write the slide plan as JSON (single document only).
    #[arg(long, env = "BEAMERIZE_PLAN_JSON", requires = "source_path")]
    plan_json: Option<PathBuf>,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "BEAMERIZE_PASSWORD")]
    password: Option<String>,

    /// Maximum bullet items per slide.
    #[arg(long, env = "BEAMERIZE_MAX_ITEMS")]
    max_items: Option<usize>,

    /// Maximum visual weight per slide.
    #[arg(long, env = "BEAMERIZE_MAX_WEIGHT")]
    max_weight: Option<f32>,

    /// Target slide count (the rag outline size; advisory for direct).
    #[arg(long, env = "BEAMERIZE_SLIDES")]
    slides: Option<usize>,

    /// Beamer theme.
    #[arg(long, env = "BEAMERIZE_THEME")]
    theme: Option<String>,

    /// Add an outline frame after the title page.
    #[arg(long, env = "BEAMERIZE_OUTLINE")]
    outline: bool,

    /// Path to a text file replacing the outline system prompt.
    #[arg(long, env = "BEAMERIZE_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Documents converted concurrently in batch mode.
    #[arg(short, long, env = "BEAMERIZE_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Disable the progress bar.
    #[arg(long, env = "BEAMERIZE_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "BEAMERIZE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "BEAMERIZE_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum MethodArg {
    Direct,
    Rag,
}

impl From<MethodArg> for Method {
    fn from(v: MethodArg) -> Self {
        match v {
            MethodArg::Direct => Method::Direct,
            MethodArg::Rag => Method::Rag,
        }
    }
}

enum Mode {
    Single {
        source: PathBuf,
        output: Option<PathBuf>,
    },
    Batch {
        source: PathBuf,
        target: PathBuf,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let batch = cli.source_folder.is_some();
    let show_progress = batch && !cli.quiet && !cli.no_progress;
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

    let mode = match (&cli.source_path, &cli.source_folder, &cli.target_folder) {
        (Some(source), None, _) => Mode::Single {
            source: source.clone(),
            output: cli.output_path.clone(),
        },
        (None, Some(source), Some(target)) => Mode::Batch {
            source: source.clone(),
            target: target.clone(),
        },
        _ => bail!("Pass either --source-path or --source-folder with --target-folder"),
    };

    // ── Config file + credentials (before any runtime thread exists) ────
    let file = match FileConfig::locate(cli.config.as_deref())? {
        Some(path) => {
            tracing::debug!("using config file {}", path.display());
            Some(FileConfig::load(&path)?)
        }
        None => None,
    };
    let method: Method = cli.method.into();
    if method == Method::Rag {
        let provider = cli
            .provider
            .clone()
            .or_else(|| file.as_ref().and_then(|f| f.llm.provider.clone()))
            .unwrap_or_else(|| beamerize::config::DEFAULT_PROVIDER.to_string());
        let file_key = file.as_ref().and_then(|f| f.llm.api_key.clone());
        match export_api_key(&provider, cli.api_key.as_deref(), file_key.as_deref()) {
            Some(KeySource::Explicit) => tracing::debug!("API key from --api-key"),
            Some(_) => {}
            None => tracing::debug!("no API key for {provider}; relying on auto-detection"),
        }
    }

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, file, method, progress_cb)?;

    // ── Runtime ──────────────────────────────────────────────────────────
    let runtime = match mode {
        Mode::Single { .. } => tokio::runtime::Builder::new_current_thread(),
        Mode::Batch { .. } => tokio::runtime::Builder::new_multi_thread(),
    }
    .enable_all()
    .build()
    .context("Failed to start the async runtime")?;

    let pipeline = Pipeline::new(config).context("Invalid configuration")?;
    runtime.block_on(async {
        match mode {
            Mode::Single { source, output } => {
                run_single(&cli, &pipeline, source, output).await?;
                Ok::<_, anyhow::Error>(ExitCode::SUCCESS)
            }
            Mode::Batch { source, target } => {
                let report = run_batch(&pipeline, &source, &target)
                    .await
                    .context("Batch conversion failed")?;
                print_report(&cli, &report);
                Ok(if report.is_success() {
                    ExitCode::SUCCESS
                } else {
                    ExitCode::FAILURE
                })
            }
        }
    })
}

async fn run_single(
    cli: &Cli,
    pipeline: &Pipeline,
    source: PathBuf,
    output: Option<PathBuf>,
) -> Result<()> {
    let result = match output {
        Some(ref path) => pipeline.convert_to_file(&source, path).await,
        None => pipeline.convert(&source).await,
    }
    .with_context(|| format!("Conversion of '{}' failed", source.display()))?;

    if let Some(ref plan_path) = cli.plan_json {
        write_plan_json(plan_path, &result)
            .with_context(|| format!("Failed to write plan to {:?}", plan_path))?;
    }

    match output {
        Some(ref path) => {
            if !cli.quiet {
                eprintln!(
                    "{}  {} slides  {}ms  →  {}",
                    green("✔"),
                    result.stats.slides,
                    result.stats.total_duration_ms,
                    bold(&path.display().to_string()),
                );
            }
        }
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(result.beamer.as_bytes())
                .context("Failed to write to stdout")?;
        }
    }
    Ok(())
}

fn print_report(cli: &Cli, report: &BatchReport) {
    if cli.quiet {
        return;
    }
    for failure in report.failures() {
        if let beamerize::DocumentStatus::Failed { ref stage, ref error } = failure.status {
            eprintln!(
                "{} {} [{}]\n    {}",
                red("✗"),
                failure.source.display(),
                stage,
                error.replace('\n', "\n    ")
            );
        }
    }
    let mark = if report.is_success() {
        green("✔")
    } else if report.succeeded() == 0 {
        red("✘")
    } else {
        cyan("⚠")
    };
    eprintln!(
        "{} {} converted  {}  {}  {}",
        mark,
        bold(&report.succeeded().to_string()),
        dim(&format!("{} skipped", report.skipped())),
        if report.failed() > 0 {
            red(&format!("{} failed", report.failed()))
        } else {
            dim("0 failed")
        },
        dim(&format!("{} cancelled", report.cancelled())),
    );
}

/// Map the config file and CLI args to `ConversionConfig`. CLI values win.
fn build_config(
    cli: &Cli,
    file: Option<FileConfig>,
    method: Method,
    progress: Option<ProgressCallback>,
) -> Result<ConversionConfig> {
    let mut builder = ConversionConfig::builder();
    if let Some(file) = file {
        builder = builder.file_config(file);
    }
    builder = builder.method(method).refresh(cli.refresh);

    if let Some(n) = cli.max_items {
        builder = builder.max_items(n);
    }
    if let Some(w) = cli.max_weight {
        builder = builder.max_weight(w);
    }
    if let Some(n) = cli.slides {
        builder = builder.target_slides(n);
    }
    if let Some(ref theme) = cli.theme {
        builder = builder.theme(theme.clone());
    }
    if cli.outline {
        builder = builder.outline_frame(true);
    }
    if let Some(ref name) = cli.provider {
        builder = builder.provider_name(name.clone());
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref path) = cli.system_prompt {
        let prompt = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd.clone());
    }
    if let Some(n) = cli.concurrency {
        builder = builder.concurrency(n);
    }
    if !cli.suffixes.is_empty() {
        builder = builder.suffixes(cli.suffixes.iter().cloned());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
