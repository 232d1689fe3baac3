//! # beamerize
//!
//! Turn PDF documents and LaTeX reports into LaTeX Beamer presentations.
//!
//! ## Why this crate?
//!
//! A report already has the structure a talk needs: sections become slide
//! runs, paragraphs become bullets, figures and tables become slides of
//! their own. This crate recovers that structure (from LaTeX source, or
//! from the font sizes of a PDF text layer), packs it into slides under an
//! item and weight budget, and emits Beamer source that compiles without
//! editing.
//!
//! ## Pipeline Overview
//!
//! ```text
//! .tex / .pdf
//!  │
//!  ├─ 1. Load     flatten \input / read the PDF text layer (pdfium)
//!  ├─ 2. Extract  blocks + section tree (arena, integer ids)
//!  ├─ 3. Plan     direct: pack sections into slides
//!  │              rag:    outline from the LLM, BM25 retrieval per slide
//!  └─ 4. Render   escaped Beamer source, one frame per slide
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use beamerize::{convert_to_file, ConversionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConversionConfig::default();
//!     let stats = convert_to_file("report.tex", "report-slides.tex", &config).await?;
//!     eprintln!("{} slides from {} blocks", stats.slides, stats.blocks);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `beamerize` and `beamer-metrics` binaries |
//!
//! ## Methods
//!
//! | Method   | Network | Deterministic | Notes |
//! |----------|---------|---------------|-------|
//! | `direct` | no      | yes           | Default |
//! | `rag`    | one LLM call per document | at temperature 0 | Needs a provider key |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod convert;
pub mod error;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{run_batch, BatchReport, CancelFlag, DocumentOutcome, DocumentStatus};
pub use config::{ConversionConfig, ConversionConfigBuilder, FileConfig, LlmSettings, Method};
pub use convert::{
    convert, convert_sync, convert_to_file, write_plan_json, ConversionOutput, ConversionStats,
    Pipeline, PlanningStrategy,
};
pub use error::{
    BeamerError, ConfigError, ExternalServiceError, ExtractionError, LoadError, RenderError,
};
pub use model::{DocumentKind, DocumentTree, PresentationPlan, SlideUnit};
pub use pipeline::llm::{GenerationError, GenerationRequest, TextGenerator};
pub use pipeline::plan::PlannerConfig;
pub use pipeline::render::RenderConfig;
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
