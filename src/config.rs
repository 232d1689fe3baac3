//! Configuration types for document-to-Beamer conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. Keeping every knob in one struct makes
//! it trivial to share a config across batch workers and to log exactly what
//! a run used.
//!
//! # Config file
//!
//! Settings can also come from a TOML file with `[llm]`, `[planner]` and
//! `[render]` tables ([`FileConfig`]). The file is located by an explicit
//! path, then `BEAMERIZE_CONFIG`, then `./beamerize.toml`. Builder setters
//! applied after [`ConversionConfigBuilder::file_config`] win over the file.
//!
//! # Credentials
//!
//! The `rag` method needs an API key for the provider. The precedence is:
//! explicit key (`--api-key`) > provider environment variable
//! (`OPENAI_API_KEY`, …) > `api_key` in the config file. See
//! [`resolve_api_key`].

use crate::error::ConfigError;
use crate::pipeline::llm::{RetryPolicy, TextGenerator, MAX_ATTEMPTS};
use crate::pipeline::plan::PlannerConfig;
use crate::pipeline::render::RenderConfig;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "BEAMERIZE_CONFIG";

/// Config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "beamerize.toml";

/// Provider used for the `rag` method when none is named.
pub const DEFAULT_PROVIDER: &str = "openai";

/// Model used for the `rag` method when none is named.
pub const DEFAULT_MODEL: &str = "gpt-4o";

// ── Method ───────────────────────────────────────────────────────────────

/// How slides are planned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// Deterministic, offline: one slide run per section.
    #[default]
    Direct,
    /// Outline from the generative service, content from local retrieval.
    Rag,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Direct => write!(f, "direct"),
            Method::Rag => write!(f, "rag"),
        }
    }
}

// ── Generative service ───────────────────────────────────────────────────

/// Settings for the generative-text service (`rag` method only).
#[derive(Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// Provider name ("openai", "anthropic", "gemini", "mistral", "ollama").
    pub provider: Option<String>,
    /// Model identifier. Default: [`DEFAULT_MODEL`].
    pub model: Option<String>,
    /// API key; lowest precedence, see [`resolve_api_key`].
    pub api_key: Option<String>,
    /// Sampling temperature. Default: 0.0.
    pub temperature: f32,
    /// Maximum tokens for the outline answer. Default: 2048.
    pub max_tokens: usize,
    /// Attempts per call, including the first. Default: 3.
    pub max_attempts: u32,
    /// Initial backoff between attempts. Default: 500.
    pub retry_backoff_ms: u64,
    /// Per-call timeout. Default: 60.
    pub api_timeout_secs: u64,
    /// Replaces the built-in outline system prompt.
    pub system_prompt: Option<String>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: None,
            model: None,
            api_key: None,
            temperature: 0.0,
            max_tokens: 2048,
            max_attempts: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            system_prompt: None,
        }
    }
}

impl fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmSettings")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_attempts", &self.max_attempts)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .finish()
    }
}

impl LlmSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff_ms: self.retry_backoff_ms,
            timeout_secs: self.api_timeout_secs,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.as_deref().unwrap_or(DEFAULT_PROVIDER)
    }
}

// ── Config file ──────────────────────────────────────────────────────────

/// Contents of a `beamerize.toml` file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub llm: LlmSettings,
    pub planner: PlannerConfig,
    pub render: RenderConfig,
}

impl FileConfig {
    /// Parse a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::ConfigFile {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        Self::parse(&text).map_err(|detail| ConfigError::ConfigFile {
            path: path.to_path_buf(),
            detail,
        })
    }

    pub fn parse(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| e.to_string())
    }

    /// Find the config file to use: `explicit`, then `BEAMERIZE_CONFIG`, then
    /// `./beamerize.toml` if it exists. An explicitly named file must exist.
    pub fn locate(explicit: Option<&Path>) -> Result<Option<PathBuf>, ConfigError> {
        let named = explicit.map(Path::to_path_buf).or_else(|| {
            std::env::var(CONFIG_ENV)
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        });
        if let Some(path) = named {
            if !path.is_file() {
                return Err(ConfigError::ConfigFile {
                    path,
                    detail: "file does not exist".into(),
                });
            }
            return Ok(Some(path));
        }
        let local = PathBuf::from(DEFAULT_CONFIG_FILE);
        Ok(local.is_file().then_some(local))
    }
}

// ── Credentials ──────────────────────────────────────────────────────────

/// Environment variable the provider factory reads the API key from.
pub fn provider_env_var(provider: &str) -> &'static str {
    match provider.to_ascii_lowercase().as_str() {
        "anthropic" => "ANTHROPIC_API_KEY",
        "gemini" | "google" => "GEMINI_API_KEY",
        "mistral" => "MISTRAL_API_KEY",
        "azure" => "AZURE_OPENAI_API_KEY",
        _ => "OPENAI_API_KEY",
    }
}

/// Where the API key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Explicit,
    Environment,
    ConfigFile,
}

/// Pick the API key by precedence: explicit > environment > config file.
/// `env_value` is the current value of the provider's variable.
pub fn resolve_api_key(
    explicit: Option<&str>,
    env_value: Option<&str>,
    file_value: Option<&str>,
) -> Option<(String, KeySource)> {
    let non_empty = |v: Option<&str>| v.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string);
    non_empty(explicit)
        .map(|k| (k, KeySource::Explicit))
        .or_else(|| non_empty(env_value).map(|k| (k, KeySource::Environment)))
        .or_else(|| non_empty(file_value).map(|k| (k, KeySource::ConfigFile)))
}

/// Resolve the key for `provider` and export it to the provider's variable
/// so the provider factory finds it. Call before starting the runtime.
pub fn export_api_key(provider: &str, explicit: Option<&str>, file_value: Option<&str>) -> Option<KeySource> {
    let var = provider_env_var(provider);
    let env_value = std::env::var(var).ok();
    let (key, source) = resolve_api_key(explicit, env_value.as_deref(), file_value)?;
    if source != KeySource::Environment {
        std::env::set_var(var, key);
    }
    debug!("API key for {} taken from {:?}", provider, source);
    Some(source)
}

// ── Conversion config ────────────────────────────────────────────────────

/// Configuration for a conversion run (single document or batch).
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use beamerize::{ConversionConfig, Method};
///
/// let config = ConversionConfig::builder()
///     .method(Method::Direct)
///     .max_items(4)
///     .theme("Madrid")
///     .build()
///     .unwrap();
/// assert_eq!(config.planner.max_items, 4);
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Planning method. Default: [`Method::Direct`].
    pub method: Method,

    /// Slide budget.
    pub planner: PlannerConfig,

    /// Beamer output options.
    pub render: RenderConfig,

    /// Generative-service settings, used by [`Method::Rag`] only.
    pub llm: LlmSettings,

    /// Pre-constructed generator. Takes precedence over `llm.provider`.
    pub generator: Option<Arc<dyn TextGenerator>>,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Documents converted concurrently in batch mode. Default: available
    /// parallelism.
    pub concurrency: usize,

    /// File suffixes discovered in batch mode. Default: `.tex`, `.pdf`.
    pub suffixes: Vec<String>,

    /// Re-convert documents whose output already exists. Default: false.
    pub refresh: bool,

    /// Batch progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            method: Method::default(),
            planner: PlannerConfig::default(),
            render: RenderConfig::default(),
            llm: LlmSettings::default(),
            generator: None,
            password: None,
            concurrency: default_concurrency(),
            suffixes: vec![".tex".to_string(), ".pdf".to_string()],
            refresh: false,
            progress_callback: None,
        }
    }
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("method", &self.method)
            .field("planner", &self.planner)
            .field("render", &self.render)
            .field("llm", &self.llm)
            .field("generator", &self.generator.as_ref().map(|g| g.name().to_string()))
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("concurrency", &self.concurrency)
            .field("suffixes", &self.suffixes)
            .field("refresh", &self.refresh)
            .field("progress_callback", &self.progress_callback.as_ref().map(|_| "<dyn BatchProgressCallback>"))
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    /// Apply every table of a config file.
    pub fn file_config(mut self, file: FileConfig) -> Self {
        self.config.llm = file.llm;
        self.config.planner = file.planner;
        self.config.render = file.render;
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        self.config.method = method;
        self
    }

    pub fn max_items(mut self, n: usize) -> Self {
        self.config.planner.max_items = n;
        self
    }

    pub fn max_weight(mut self, w: f32) -> Self {
        self.config.planner.max_weight = w;
        self
    }

    pub fn target_slides(mut self, n: usize) -> Self {
        self.config.planner.target_slides = Some(n.max(1));
        self
    }

    pub fn theme(mut self, theme: impl Into<String>) -> Self {
        self.config.render.theme = theme.into();
        self
    }

    pub fn title_page(mut self, v: bool) -> Self {
        self.config.render.title_page = v;
        self
    }

    pub fn outline_frame(mut self, v: bool) -> Self {
        self.config.render.outline_frame = v;
        self
    }

    pub fn use_markup(mut self, v: bool) -> Self {
        self.config.render.use_markup = v;
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.llm.provider = Some(name.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.llm.model = Some(model.into());
        self
    }

    pub fn generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.config.generator = Some(generator);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.llm.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.llm.max_tokens = n;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.llm.max_attempts = n.max(1);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.llm.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.llm.api_timeout_secs = secs;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.llm.system_prompt = Some(prompt.into());
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn suffixes<I, S>(mut self, suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.suffixes = suffixes
            .into_iter()
            .map(|s| {
                let s: String = s.into();
                if s.starts_with('.') {
                    s
                } else {
                    format!(".{s}")
                }
            })
            .collect();
        self
    }

    pub fn refresh(mut self, v: bool) -> Self {
        self.config.refresh = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, ConfigError> {
        let c = &self.config;
        if c.planner.max_items == 0 {
            return Err(ConfigError::Invalid(
                "max_items must be ≥ 1".into(),
            ));
        }
        if !(c.planner.max_weight > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "max_weight must be > 0, got {}",
                c.planner.max_weight
            )));
        }
        if c.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be ≥ 1".into()));
        }
        if c.suffixes.is_empty() || c.suffixes.iter().any(|s| s.len() < 2) {
            return Err(ConfigError::Invalid(format!(
                "suffixes must be non-empty file extensions, got {:?}",
                c.suffixes
            )));
        }
        if c.render.theme.trim().is_empty()
            || !c.render.theme.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '-')
        {
            return Err(ConfigError::Invalid(format!(
                "theme must be a Beamer theme name, got '{}'",
                c.render.theme
            )));
        }
        if !(1..=MAX_ATTEMPTS).contains(&c.llm.max_attempts) {
            return Err(ConfigError::Invalid(format!(
                "max_attempts must be 1–{MAX_ATTEMPTS}, got {}",
                c.llm.max_attempts
            )));
        }
        if !(0.0..=2.0).contains(&c.llm.temperature) {
            return Err(ConfigError::Invalid(format!(
                "temperature must be 0.0–2.0, got {}",
                c.llm.temperature
            )));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_retry_counts_are_rejected() {
        let err = ConversionConfig::builder().max_attempts(70).build().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let file = FileConfig::parse("[llm]\nmax_attempts = 70\n").unwrap();
        let err = ConversionConfig::builder().file_config(file).build().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let config = ConversionConfig::builder()
            .max_attempts(MAX_ATTEMPTS)
            .build()
            .unwrap();
        assert_eq!(config.llm.retry_policy().max_attempts, MAX_ATTEMPTS);
    }

    #[test]
    fn defaults_build() {
        let config = ConversionConfig::builder().build().unwrap();
        assert_eq!(config.method, Method::Direct);
        assert_eq!(config.planner.max_items, 5);
        assert_eq!(config.suffixes, vec![".tex", ".pdf"]);
        assert!(config.concurrency >= 1);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(ConversionConfig::builder().max_items(0).build().is_err());
        assert!(ConversionConfig::builder().max_weight(0.0).build().is_err());
        assert!(ConversionConfig::builder().theme("bad theme}").build().is_err());
        let no_suffix: Vec<String> = vec![];
        assert!(ConversionConfig::builder().suffixes(no_suffix).build().is_err());
    }

    #[test]
    fn suffixes_gain_a_dot() {
        let config = ConversionConfig::builder().suffixes(["tex"]).build().unwrap();
        assert_eq!(config.suffixes, vec![".tex"]);
    }

    #[test]
    fn file_config_parses_all_tables() {
        let file = FileConfig::parse(
            r#"
[llm]
provider = "anthropic"
model = "claude-sonnet-4-20250514"
api_key = "sk-file"

[planner]
max_items = 4
target_slides = 12

[render]
theme = "Madrid"
outline_frame = true
"#,
        )
        .unwrap();
        assert_eq!(file.llm.provider.as_deref(), Some("anthropic"));
        assert_eq!(file.llm.max_attempts, 3);
        assert_eq!(file.planner.max_items, 4);
        assert_eq!(file.planner.max_weight, 6.0);
        assert_eq!(file.planner.target_slides, Some(12));
        assert!(file.render.outline_frame);
        assert!(file.render.title_page);

        let config = ConversionConfig::builder()
            .file_config(file)
            .max_items(3)
            .build()
            .unwrap();
        assert_eq!(config.planner.max_items, 3);
        assert_eq!(config.render.theme, "Madrid");
    }

    #[test]
    fn unknown_table_is_an_error() {
        assert!(FileConfig::parse("[renderer]\ntheme = \"x\"\n").is_err());
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        let err = FileConfig::locate(Some(Path::new("/no/such/beamerize.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::ConfigFile { .. }));
    }

    #[test]
    fn api_key_precedence() {
        assert_eq!(
            resolve_api_key(Some("cli"), Some("env"), Some("file")),
            Some(("cli".to_string(), KeySource::Explicit))
        );
        assert_eq!(
            resolve_api_key(None, Some("env"), Some("file")),
            Some(("env".to_string(), KeySource::Environment))
        );
        assert_eq!(
            resolve_api_key(Some("  "), Some(""), Some("file")),
            Some(("file".to_string(), KeySource::ConfigFile))
        );
        assert_eq!(resolve_api_key(None, None, None), None);
    }

    #[test]
    fn provider_variables() {
        assert_eq!(provider_env_var("openai"), "OPENAI_API_KEY");
        assert_eq!(provider_env_var("Anthropic"), "ANTHROPIC_API_KEY");
        assert_eq!(provider_env_var("gemini"), "GEMINI_API_KEY");
    }

    #[test]
    fn debug_redacts_secrets() {
        let config = ConversionConfig::builder().password("hunter2").build().unwrap();
        let mut llm = LlmSettings::default();
        llm.api_key = Some("sk-secret".into());
        let shown = format!("{:?} {:?}", config, llm);
        assert!(!shown.contains("hunter2"));
        assert!(!shown.contains("sk-secret"));
    }
}
