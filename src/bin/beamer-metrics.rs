//! CLI binary scoring a generated Beamer presentation against a reference.
//!
//! `bert` matches frame titles (or contents) by embedding similarity and
//! reports precision/recall/F1 and Kendall's tau; `rouge` compares all
//! frame text. The report is JSON, written to `--output` or stdout.

use anyhow::{Context, Result};
use beamerize::metrics::bert::ProviderEmbedder;
use beamerize::metrics::presentation::Presentation;
use beamerize::metrics::{
    evaluate_matching, evaluate_rouge, MatchOn, ScoreReport, ScoringMethod, DEFAULT_THRESHOLD,
};
use clap::Parser;
use edgequake_llm::ProviderFactory;
use serde_json::json;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Match frame titles by embedding similarity (default)
  beamer-metrics --predictions-file out/paper.tex --reference-file ref/paper.tex

  # Match frame contents at a stricter threshold, write the report
  beamer-metrics -p out/paper.tex -r ref/paper.tex --match content -t 0.8 -o scores.json

  # ROUGE over all frame text (no provider needed)
  beamer-metrics -s rouge -p out/paper.tex -r ref/paper.tex

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          Embedding provider key (bert method)
  EDGEQUAKE_LLM_PROVIDER  Provider auto-detection override
"#;

/// Score a generated Beamer presentation against a reference one.
#[derive(Parser, Debug)]
#[command(
    name = "beamer-metrics",
    version,
    about = "Score generated Beamer presentations against references",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Generated presentation (.tex).
    #[arg(short, long)]
    predictions_file: PathBuf,

    /// Reference presentation (.tex).
    #[arg(short, long)]
    reference_file: PathBuf,

    /// Scoring method.
    #[arg(short, long, value_enum, default_value = "bert")]
    scoring_method: MethodArg,

    /// Elements matched by the bert method.
    #[arg(short, long = "match", value_enum, default_value = "title")]
    match_on: MatchArg,

    /// F1 needed for two elements to match.
    #[arg(short, long, default_value_t = DEFAULT_THRESHOLD)]
    threshold: f64,

    /// Write the JSON report here instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum MethodArg {
    Bert,
    Rouge,
}

impl From<MethodArg> for ScoringMethod {
    fn from(v: MethodArg) -> Self {
        match v {
            MethodArg::Bert => ScoringMethod::Bert,
            MethodArg::Rouge => ScoringMethod::Rouge,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum MatchArg {
    Title,
    Content,
}

impl From<MatchArg> for MatchOn {
    fn from(v: MatchArg) -> Self {
        match v {
            MatchArg::Title => MatchOn::Title,
            MatchArg::Content => MatchOn::Content,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    if !(0.0..=1.0).contains(&cli.threshold) {
        anyhow::bail!("--threshold must be within 0.0–1.0, got {}", cli.threshold);
    }

    let candidate = Presentation::load(&cli.predictions_file)
        .with_context(|| format!("Failed to read {:?}", cli.predictions_file))?;
    let reference = Presentation::load(&cli.reference_file)
        .with_context(|| format!("Failed to read {:?}", cli.reference_file))?;
    info!(
        "{} candidate frames, {} reference frames",
        candidate.frame_count(),
        reference.frame_count()
    );

    let report = match ScoringMethod::from(cli.scoring_method) {
        ScoringMethod::Rouge => ScoreReport::Rouge(evaluate_rouge(&candidate, &reference)),
        ScoringMethod::Bert => {
            let (_llm, embedding) = ProviderFactory::from_env().map_err(|e| {
                anyhow::anyhow!(
                    "No embedding provider could be auto-detected ({e}); set OPENAI_API_KEY"
                )
            })?;
            let embedder = ProviderEmbedder::new("auto", Arc::clone(&embedding));
            let report = evaluate_matching(
                &embedder,
                &candidate,
                &reference,
                cli.match_on.into(),
                cli.threshold,
            )
            .await
            .context("Embedding-based scoring failed")?;
            ScoreReport::Bert(report)
        }
    };

    let mut value = serde_json::to_value(&report).context("Failed to serialise report")?;
    if let Some(obj) = value.as_object_mut() {
        obj.insert(
            "file".to_string(),
            json!(cli.predictions_file.display().to_string()),
        );
        obj.insert(
            "reference".to_string(),
            json!(cli.reference_file.display().to_string()),
        );
    }
    let text = serde_json::to_string_pretty(&value).context("Failed to serialise report")?;

    match cli.output {
        Some(ref path) => std::fs::write(path, format!("{text}\n"))
            .with_context(|| format!("Failed to write report to {:?}", path))?,
        None => println!("{text}"),
    }
    Ok(())
}
