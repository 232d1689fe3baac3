//! Error types for the beamerize library.
//!
//! Each pipeline stage owns one error enum so callers can tell *where* a
//! document failed without string matching:
//!
//! * [`LoadError`]: the source could not be read or has no text.
//! * [`ExtractionError`]: no usable structure could be recovered.
//! * [`RenderError`]: a payload cannot be expressed as Beamer source.
//! * [`ExternalServiceError`]: the generative-text service failed
//!   (only reachable with the `rag` method).
//! * [`ConfigError`]: invalid options; always fatal at startup.
//!
//! [`BeamerError`] wraps all of them and is what the top-level `convert*`
//! functions return. In batch mode it is recorded per document inside
//! [`crate::batch::DocumentOutcome`] instead of aborting the run.

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the beamerize library.
#[derive(Debug, Error)]
pub enum BeamerError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    ExternalService(#[from] ExternalServiceError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Could not create or write the output Beamer file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Unexpected internal error (e.g. a worker task panicked).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BeamerError {
    /// Whether this error means every remaining document of a batch would
    /// fail the same way (bad configuration, rejected credentials).
    pub fn is_fatal_for_batch(&self) -> bool {
        matches!(
            self,
            BeamerError::Config(_) | BeamerError::ExternalService(ExternalServiceError::AuthFailed { .. })
        )
    }

    /// Short stage label used in logs and batch reports.
    pub fn stage(&self) -> &'static str {
        match self {
            BeamerError::Load(_) => "load",
            BeamerError::Extraction(_) => "extract",
            BeamerError::Render(_) => "render",
            BeamerError::ExternalService(_) => "generate",
            BeamerError::Config(_) => "config",
            BeamerError::OutputWriteFailed { .. } => "write",
            BeamerError::Internal(_) => "internal",
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────

/// The source document could not be loaded.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Input file was not found at the given path.
    #[error("Source file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// Any other I/O failure while reading.
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Neither a PDF nor a LaTeX source.
    #[error("Unsupported source format for '{path}'\nExpected a PDF (.pdf) or LaTeX (.tex) file.")]
    UnsupportedFormat { path: PathBuf },

    /// LaTeX source is not valid UTF-8.
    #[error("LaTeX source '{path}' is not valid UTF-8")]
    InvalidEncoding { path: PathBuf },

    /// The file was read but contains no text (empty file, scanned PDF).
    #[error("Source '{path}' contains no extractable text")]
    Empty { path: PathBuf },

    /// pdfium could not be bound.
    #[error(
        "Failed to bind to the pdfium library: {detail}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium on the library path."
    )]
    PdfEngineUnavailable { detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },
}

// ── Extractor ────────────────────────────────────────────────────────────

/// No usable document structure could be recovered.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Segmentation produced no content blocks at all.
    #[error("No recognisable content in '{id}' (only preamble, comments or markup)")]
    NoContent { id: String },

    /// A LaTeX environment opened in the document body is never closed.
    #[error("Environment '{env}' opened in '{id}' is never closed")]
    UnbalancedEnvironment { id: String, env: String },
}

// ── Renderer ─────────────────────────────────────────────────────────────

/// A payload cannot be expressed as Beamer source.
#[derive(Debug, Error)]
pub enum RenderError {
    /// A control character has no LaTeX representation.
    #[error("Slide '{slide}': unescapable character U+{code:04X} in block {ordinal}")]
    UnescapableCharacter {
        slide: String,
        ordinal: usize,
        code: u32,
    },

    /// Source-native markup is not well-formed.
    #[error("Slide '{slide}': malformed markup in block {ordinal}: {reason}")]
    MalformedMarkup {
        slide: String,
        ordinal: usize,
        reason: String,
    },
}

// ── Generative service ───────────────────────────────────────────────────

/// The generative-text service failed (the `rag` method only).
#[derive(Debug, Error)]
pub enum ExternalServiceError {
    /// Transient failures persisted through every attempt.
    #[error("Generative service failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// The service rejected the credentials.
    #[error("Authentication error from provider '{provider}': {detail}")]
    AuthFailed { provider: String, detail: String },

    /// The service answered, but not with what was asked for.
    #[error("Malformed response from generative service: {detail}")]
    MalformedResponse { detail: String },

    /// Any other non-retryable API error.
    #[error("Generative service error: {detail}")]
    Rejected { detail: String },
}

// ── Configuration ────────────────────────────────────────────────────────

/// Invalid option or option combination.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// The `rag` method needs a generative-text provider.
    #[error(
        "Method 'rag' needs a generative-text provider but none is configured.\n\
Pass --api-key, set {env_var}, or add `api_key` under [llm] in the config file."
    )]
    MissingCredential { env_var: String },

    /// The provider factory refused the provider/model pair.
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The TOML config file could not be read or parsed.
    #[error("Failed to load config file '{path}': {detail}")]
    ConfigFile { path: PathBuf, detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_error_mentions_path() {
        let e = BeamerError::from(LoadError::FileNotFound {
            path: PathBuf::from("/tmp/missing.tex"),
        });
        assert!(e.to_string().contains("/tmp/missing.tex"), "got: {e}");
        assert_eq!(e.stage(), "load");
    }

    #[test]
    fn auth_failures_stop_a_batch() {
        let e = BeamerError::from(ExternalServiceError::AuthFailed {
            provider: "openai".into(),
            detail: "invalid key".into(),
        });
        assert!(e.is_fatal_for_batch());
        assert!(e.to_string().contains("invalid key"));
    }

    #[test]
    fn transient_exhaustion_does_not_stop_a_batch() {
        let e = BeamerError::from(ExternalServiceError::RetriesExhausted {
            attempts: 3,
            last_error: "429".into(),
        });
        assert!(!e.is_fatal_for_batch());
        assert!(e.to_string().contains("3 attempts"));
    }

    #[test]
    fn render_error_display() {
        let e = RenderError::UnescapableCharacter {
            slide: "Intro".into(),
            ordinal: 4,
            code: 0x07,
        };
        assert!(e.to_string().contains("U+0007"), "got: {e}");
    }

    #[test]
    fn missing_credential_names_the_variable() {
        let e = ConfigError::MissingCredential {
            env_var: "OPENAI_API_KEY".into(),
        };
        assert!(e.to_string().contains("OPENAI_API_KEY"));
    }
}
