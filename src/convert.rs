//! Single-document conversion entry points.
//!
//! A [`Pipeline`] is built once from a [`ConversionConfig`] and reused for
//! every document: provider resolution (and with it every configuration
//! error) happens in [`Pipeline::new`], before any document is touched.
//!
//! ## Stages
//!
//! ```text
//! path ─▶ load + extract ─▶ plan ─▶ render ─▶ Beamer source
//!         (spawn_blocking)   │
//!                            └─ direct: pure packing
//!                               rag:    outline call + BM25 retrieval
//! ```
//!
//! The document tree never leaves [`Pipeline::convert`]: the plan borrows
//! from it, so the plan is exported as JSON before the tree is dropped.

use crate::config::{provider_env_var, ConversionConfig, LlmSettings, Method, DEFAULT_MODEL};
use crate::error::{BeamerError, ConfigError};
use crate::model::DocumentKind;
use crate::pipeline::llm::{LlmGenerator, TextGenerator};
use crate::pipeline::plan::plan_direct;
use crate::pipeline::rag::RagPlanner;
use crate::pipeline::{extract, input, render};
use edgequake_llm::{LLMProvider, ProviderFactory};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

// ── Output types ─────────────────────────────────────────────────────────

/// Result of converting one document.
#[derive(Debug, Clone)]
pub struct ConversionOutput {
    /// Complete Beamer source.
    pub beamer: String,
    /// The presentation plan, serialised for `--plan-json`.
    pub plan: serde_json::Value,
    pub stats: ConversionStats,
}

/// Counts and timings for one document.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionStats {
    pub source: String,
    pub kind: DocumentKind,
    pub method: Method,
    /// Content blocks recovered by the extractor.
    pub blocks: usize,
    /// Section nodes, root excluded.
    pub sections: usize,
    pub slides: usize,
    pub extract_duration_ms: u64,
    pub plan_duration_ms: u64,
    pub total_duration_ms: u64,
}

// ── Planning strategy ────────────────────────────────────────────────────

/// How a [`Pipeline`] turns a document tree into a plan.
#[derive(Debug)]
pub enum PlanningStrategy {
    Direct,
    Rag(RagPlanner),
}

impl PlanningStrategy {
    pub fn method(&self) -> Method {
        match self {
            PlanningStrategy::Direct => Method::Direct,
            PlanningStrategy::Rag(_) => Method::Rag,
        }
    }
}

// ── Pipeline ─────────────────────────────────────────────────────────────

/// A configured conversion pipeline, shareable across batch workers.
#[derive(Debug)]
pub struct Pipeline {
    config: ConversionConfig,
    strategy: PlanningStrategy,
}

impl Pipeline {
    /// Resolve the planning strategy for `config`.
    ///
    /// # Errors
    /// [`ConfigError`] when the `rag` method has no usable provider.
    pub fn new(config: ConversionConfig) -> Result<Self, ConfigError> {
        let strategy = match config.method {
            Method::Direct => PlanningStrategy::Direct,
            Method::Rag => {
                let generator = match config.generator {
                    Some(ref g) => Arc::clone(g),
                    None => resolve_generator(&config.llm)?,
                };
                info!("rag planning via {}", generator.name());
                PlanningStrategy::Rag(
                    RagPlanner::new(generator)
                        .system_prompt(config.llm.system_prompt.clone())
                        .temperature(config.llm.temperature)
                        .max_tokens(config.llm.max_tokens)
                        .retry(config.llm.retry_policy()),
                )
            }
        };
        Ok(Self { config, strategy })
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    pub fn method(&self) -> Method {
        self.strategy.method()
    }

    /// Convert one document to Beamer source.
    pub async fn convert(&self, source: &Path) -> Result<ConversionOutput, BeamerError> {
        let total_start = Instant::now();
        info!("Starting conversion: {}", source.display());

        // ── Load + extract (blocking: file I/O, pdfium) ──────────────────
        let extract_start = Instant::now();
        let path = source.to_path_buf();
        let password = self.config.password.clone();
        let (kind, tree) = tokio::task::spawn_blocking(move || {
            let doc = input::load_document(&path, password.as_deref())?;
            let kind = doc.kind();
            let tree = extract::extract(doc)?;
            Ok::<_, BeamerError>((kind, tree))
        })
        .await
        .map_err(|e| BeamerError::Internal(format!("extraction task panicked: {e}")))??;
        let extract_duration_ms = extract_start.elapsed().as_millis() as u64;
        debug!(
            "{}: {} blocks in {} sections",
            tree.id(),
            tree.blocks().len(),
            tree.node_count() - 1
        );

        // ── Plan ─────────────────────────────────────────────────────────
        let plan_start = Instant::now();
        let plan = match &self.strategy {
            PlanningStrategy::Direct => plan_direct(&tree, &self.config.planner),
            PlanningStrategy::Rag(planner) => planner.plan(&tree, &self.config.planner).await?,
        };
        let plan_duration_ms = plan_start.elapsed().as_millis() as u64;

        // ── Render ───────────────────────────────────────────────────────
        let beamer = render::render(&plan, &self.config.render)?;
        let plan_json = serde_json::to_value(&plan)
            .map_err(|e| BeamerError::Internal(format!("plan serialisation failed: {e}")))?;

        let stats = ConversionStats {
            source: tree.id().to_string(),
            kind,
            method: self.method(),
            blocks: tree.blocks().len(),
            sections: tree.node_count() - 1,
            slides: plan.slide_count(),
            extract_duration_ms,
            plan_duration_ms,
            total_duration_ms: total_start.elapsed().as_millis() as u64,
        };
        info!(
            "Conversion complete: {} → {} slides, {}ms total",
            stats.source, stats.slides, stats.total_duration_ms
        );

        Ok(ConversionOutput {
            beamer,
            plan: plan_json,
            stats,
        })
    }

    /// Convert one document and write the Beamer source to `output`.
    ///
    /// The file is written atomically: nothing is left at `output` when any
    /// stage fails.
    pub async fn convert_to_file(
        &self,
        source: &Path,
        output: &Path,
    ) -> Result<ConversionOutput, BeamerError> {
        let result = self.convert(source).await?;
        write_atomic(output, &result.beamer)?;
        info!("Wrote {}", output.display());
        Ok(result)
    }
}

// ── Free functions ───────────────────────────────────────────────────────

/// Convert one document with a one-off [`Pipeline`].
pub async fn convert(
    source: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, BeamerError> {
    Pipeline::new(config.clone())?.convert(source.as_ref()).await
}

/// Convert one document and write it to `output`.
pub async fn convert_to_file(
    source: impl AsRef<Path>,
    output: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionStats, BeamerError> {
    let pipeline = Pipeline::new(config.clone())?;
    let result = pipeline
        .convert_to_file(source.as_ref(), output.as_ref())
        .await?;
    Ok(result.stats)
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary current-thread tokio runtime internally.
pub fn convert_sync(
    source: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, BeamerError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| BeamerError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(source, config))
}

/// Write the serialised plan of `output` as pretty-printed JSON.
pub fn write_plan_json(path: &Path, output: &ConversionOutput) -> Result<(), BeamerError> {
    let json = serde_json::to_string_pretty(&output.plan)
        .map_err(|e| BeamerError::Internal(format!("plan serialisation failed: {e}")))?;
    write_atomic(path, &json)
}

/// Write `contents` to `path` through a temp file in the same directory.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<(), BeamerError> {
    let write_failed = |source: std::io::Error| BeamerError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent).map_err(write_failed)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&parent).map_err(write_failed)?;
    tmp.write_all(contents.as_bytes()).map_err(write_failed)?;
    tmp.persist(path).map_err(|e| write_failed(e.error))?;
    Ok(())
}

// ── Provider resolution ──────────────────────────────────────────────────

fn create_generator(provider_name: &str, model: &str) -> Result<Arc<dyn TextGenerator>, ConfigError> {
    let provider: Arc<dyn LLMProvider> = ProviderFactory::create_llm_provider(provider_name, model)
        .map_err(|e| ConfigError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        })?;
    Ok(Arc::new(LlmGenerator::new(
        format!("{provider_name}/{model}"),
        provider,
    )))
}

fn needs_api_key(provider: &str) -> bool {
    !matches!(
        provider.to_ascii_lowercase().as_str(),
        "ollama" | "lmstudio" | "mock"
    )
}

fn env_is_set(var: &str) -> bool {
    std::env::var(var).map(|v| !v.is_empty()).unwrap_or(false)
}

/// Resolve the generative provider, from most-specific to least-specific.
///
/// 1. **Named provider** (`llm.provider`, `--provider`): its API key must
///    already be in the provider's environment variable (the CLI exports the
///    resolved `--api-key` / config-file key there before startup).
/// 2. **`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`**, when both are set.
/// 3. **OpenAI** when `OPENAI_API_KEY` is set, so users holding several keys
///    get a predictable default.
/// 4. **[`ProviderFactory::from_env`]** auto-detection.
fn resolve_generator(llm: &LlmSettings) -> Result<Arc<dyn TextGenerator>, ConfigError> {
    let model = llm.model.as_deref().unwrap_or(DEFAULT_MODEL);

    if let Some(ref name) = llm.provider {
        let var = provider_env_var(name);
        if needs_api_key(name) && !env_is_set(var) {
            return Err(ConfigError::MissingCredential {
                env_var: var.to_string(),
            });
        }
        return create_generator(name, model);
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_generator(&prov, &env_model);
        }
    }

    if env_is_set("OPENAI_API_KEY") {
        return create_generator("openai", model);
    }

    let (provider, _embedding) = ProviderFactory::from_env().map_err(|e| {
        debug!("provider auto-detection failed: {e}");
        ConfigError::MissingCredential {
            env_var: provider_env_var("openai").to_string(),
        }
    })?;
    Ok(Arc::new(LlmGenerator::new("auto", provider)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_pipeline_needs_no_provider() {
        let pipeline = Pipeline::new(ConversionConfig::default()).unwrap();
        assert_eq!(pipeline.method(), Method::Direct);
    }

    #[test]
    fn local_providers_need_no_key() {
        assert!(!needs_api_key("ollama"));
        assert!(needs_api_key("openai"));
        assert!(needs_api_key("Anthropic"));
    }

    #[test]
    fn atomic_write_creates_parents_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deep/nested/out.tex");
        write_atomic(&path, "first").unwrap();
        write_atomic(&path, "second").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        let leftovers = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[tokio::test]
    async fn missing_source_is_a_load_error() {
        let pipeline = Pipeline::new(ConversionConfig::default()).unwrap();
        let err = pipeline
            .convert(Path::new("/definitely/not/here.tex"))
            .await
            .unwrap_err();
        assert_eq!(err.stage(), "load");
    }
}
