//! Document loading: resolve a path to a [`SourceDocument`].
//!
//! ## Kind detection
//!
//! The extension decides first (`.pdf`, `.tex`). Files with other
//! extensions are sniffed: the `%PDF` magic bytes mean PDF, UTF-8 text
//! containing `\documentclass`, `\begin{document}` or `\section` means
//! LaTeX. Anything else is rejected before any parsing is attempted.
//!
//! ## LaTeX flattening
//!
//! `\input`, `\include`, `\subfile` and `\import` are inlined recursively
//! relative to the including file, so the extractor sees one flat source.
//! Missing include files are logged and skipped rather than failing the
//! whole document; a file that includes itself (directly or not) is
//! inlined only once per chain.

use crate::error::LoadError;
use crate::model::{DocumentKind, SourceDocument};
use crate::pipeline::{latex, pdf};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use unicode_normalization::UnicodeNormalization;

static RE_INCLUDE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\(?:input|include|subfile)\s*\{([^}]+)\}|\\(?:sub)?import\s*\{([^}]*)\}\s*\{([^}]+)\}")
        .unwrap()
});

static RE_BEAMER_CLASS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\documentclass\s*(?:\[[^\]]*\])?\s*\{beamer\}").unwrap());

static RE_LATEX_HINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\(?:documentclass|begin\{document\}|section\*?\{|chapter\*?\{)").unwrap()
});

/// Load a document from disk. Blocking; run it on `spawn_blocking` from
/// async code.
pub fn load_document(path: &Path, password: Option<&str>) -> Result<SourceDocument, LoadError> {
    let kind = detect_kind(path)?;
    let id = path.display().to_string();
    info!("Loading {} ({:?})", id, kind);

    let doc = match kind {
        DocumentKind::Latex => {
            let root = path.parent().map(Path::to_path_buf).unwrap_or_default();
            let text = flatten_latex(path, &root, &mut Vec::new())?;
            let text = latex::strip_comments(&text);
            let text: String = text.nfkc().collect();
            SourceDocument::new(id, kind, text)
        }
        DocumentKind::Pdf => {
            let (lines, metadata) = pdf::read_text_layer(path, password)?;
            let text = lines
                .iter()
                .map(|l| l.text.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            SourceDocument::new(id, kind, text)
                .with_layout(lines)
                .with_metadata(metadata)
        }
    };

    if doc.text().trim().is_empty() {
        return Err(LoadError::Empty {
            path: path.to_path_buf(),
        });
    }
    debug!("Loaded {}: {} chars", doc.id(), doc.text().len());
    Ok(doc)
}

/// Whether a `.tex` file is a main document rather than an included
/// fragment.
pub fn is_main_latex_file(path: &Path) -> bool {
    std::fs::read_to_string(path)
        .map(|s| s.contains("\\begin{document}"))
        .unwrap_or(false)
}

/// Whether a `.tex` file is already a Beamer presentation.
pub fn is_beamer_presentation(path: &Path) -> bool {
    std::fs::read_to_string(path)
        .map(|s| RE_BEAMER_CLASS.is_match(&s))
        .unwrap_or(false)
}

/// Decide the document kind, validating that the file exists and is
/// readable.
pub fn detect_kind(path: &Path) -> Result<DocumentKind, LoadError> {
    let mut file = open(path)?;
    if path.is_dir() {
        return Err(LoadError::UnsupportedFormat {
            path: path.to_path_buf(),
        });
    }

    if let Some(kind) = DocumentKind::from_path(path) {
        return Ok(kind);
    }

    let mut head = Vec::with_capacity(4096);
    file.by_ref()
        .take(4096)
        .read_to_end(&mut head)
        .map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    if head.starts_with(b"%PDF") {
        return Ok(DocumentKind::Pdf);
    }
    let text = String::from_utf8_lossy(&head);
    if RE_LATEX_HINT.is_match(&text) {
        return Ok(DocumentKind::Latex);
    }
    Err(LoadError::UnsupportedFormat {
        path: path.to_path_buf(),
    })
}

fn open(path: &Path) -> Result<std::fs::File, LoadError> {
    std::fs::File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => LoadError::FileNotFound {
            path: path.to_path_buf(),
        },
        std::io::ErrorKind::PermissionDenied => LoadError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => LoadError::Io {
            path: path.to_path_buf(),
            source: e,
        },
    })
}

fn read_latex(path: &Path) -> Result<String, LoadError> {
    let mut bytes = Vec::new();
    open(path)?
        .read_to_end(&mut bytes)
        .map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    String::from_utf8(bytes).map_err(|_| LoadError::InvalidEncoding {
        path: path.to_path_buf(),
    })
}

/// Inline include commands recursively. Targets resolve against the
/// including file first, then the main file's directory. `chain` holds
/// the files currently being expanded.
fn flatten_latex(path: &Path, root: &Path, chain: &mut Vec<PathBuf>) -> Result<String, LoadError> {
    let source = read_latex(path)?;
    let source = latex::strip_comments(&source);
    let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    chain.push(path.to_path_buf());

    let mut failure = None;
    let flattened = RE_INCLUDE.replace_all(&source, |caps: &Captures| {
        let relative = match (caps.get(1), caps.get(2), caps.get(3)) {
            (Some(file), _, _) => PathBuf::from(file.as_str().trim()),
            (None, Some(sub), Some(file)) => Path::new(sub.as_str().trim()).join(file.as_str().trim()),
            _ => return String::new(),
        };
        let relative = with_tex_extension(relative);
        let target = [dir.join(&relative), root.join(&relative)]
            .into_iter()
            .find(|p| p.is_file())
            .unwrap_or_else(|| dir.join(&relative));

        if chain.contains(&target) {
            warn!("Include cycle at {}; skipped", target.display());
            return String::new();
        }
        if !target.is_file() {
            warn!("Included file {} not found; skipped", target.display());
            return String::new();
        }
        match flatten_latex(&target, root, chain) {
            Ok(text) => text,
            Err(e) => {
                failure.get_or_insert(e);
                String::new()
            }
        }
    });

    chain.pop();
    match failure {
        Some(e) => Err(e),
        None => Ok(flattened.into_owned()),
    }
}

fn with_tex_extension(path: PathBuf) -> PathBuf {
    if path.extension().is_some() {
        path
    } else {
        path.with_extension("tex")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn missing_file_is_file_not_found() {
        let err = load_document(Path::new("/definitely/not/here.tex"), None).unwrap_err();
        assert!(matches!(err, LoadError::FileNotFound { .. }), "got {err:?}");
    }

    #[test]
    fn unsupported_format_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, "just some notes").unwrap();
        let err = load_document(&path, None).unwrap_err();
        assert!(matches!(err, LoadError::UnsupportedFormat { .. }), "got {err:?}");
    }

    #[test]
    fn sniffs_latex_without_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paper");
        fs::write(&path, "\\documentclass{article}\n\\begin{document}\nHi\n\\end{document}\n").unwrap();
        assert_eq!(detect_kind(&path).unwrap(), DocumentKind::Latex);
    }

    #[test]
    fn empty_latex_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.tex");
        fs::write(&path, "% only a comment\n\n").unwrap();
        let err = load_document(&path, None).unwrap_err();
        assert!(matches!(err, LoadError::Empty { .. }), "got {err:?}");
    }

    #[test]
    fn includes_are_inlined_and_cycles_broken() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sections")).unwrap();
        fs::write(
            dir.path().join("main.tex"),
            "\\begin{document}\n\\input{sections/intro}\n\\include{missing}\n\\end{document}\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("sections/intro.tex"),
            "\\section{Intro} % comment\nHello.\n\\input{sections/intro}\n",
        )
        .unwrap();

        let doc = load_document(&dir.path().join("main.tex"), None).unwrap();
        assert_eq!(doc.kind(), DocumentKind::Latex);
        assert!(doc.text().contains("\\section{Intro}"));
        assert!(doc.text().contains("Hello."));
        assert!(!doc.text().contains("comment"));
        assert!(!doc.text().contains("\\input"));
        assert!(is_main_latex_file(&dir.path().join("main.tex")));
        assert!(!is_main_latex_file(&dir.path().join("sections/intro.tex")));
    }

    #[test]
    fn beamer_decks_are_recognised() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("deck.tex"), "\\documentclass[11pt]{beamer}\n").unwrap();
        fs::write(dir.path().join("paper.tex"), "\\documentclass{article}\n").unwrap();
        assert!(is_beamer_presentation(&dir.path().join("deck.tex")));
        assert!(!is_beamer_presentation(&dir.path().join("paper.tex")));
        assert!(!is_beamer_presentation(&dir.path().join("absent.tex")));
    }

    #[test]
    fn ligatures_are_normalised() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lig.tex");
        fs::write(&path, "\\begin{document}\n\u{FB01}nal\n\\end{document}\n").unwrap();
        let doc = load_document(&path, None).unwrap();
        assert!(doc.text().contains("final"));
    }
}
