//! Batch ("recursive") conversion of a folder tree.
//!
//! Every file under the source folder whose name ends in one of the
//! configured suffixes is a candidate. Relative paths are mirrored under the
//! target folder with a `.tex` extension; when that would overwrite the
//! source itself or another source document (converting `paper.pdf` next
//! to `paper.tex` in place) the output gets a `-beamer.tex` name instead
//! (see [`output_path_for`]).
//!
//! A candidate is skipped (not attempted, not a failure) when:
//!
//! * it is a LaTeX fragment without `\begin{document}`;
//! * it is a previous output (a `-beamer.tex` name or a LaTeX file using
//!   the beamer class), or lives inside the target folder nested in the
//!   source folder;
//! * its output already exists and `refresh` is off;
//! * another candidate already claimed the same output path.
//!
//! Documents run concurrently, bounded by
//! [`crate::config::ConversionConfig::concurrency`]. A failure is recorded
//! in the [`BatchReport`] and the run goes on, unless the error means every
//! other document would fail the same way ([`BeamerError::is_fatal_for_batch`]):
//! then the [`CancelFlag`] is raised and queued documents are reported as
//! cancelled while in-flight ones finish.

use crate::convert::Pipeline;
use crate::error::{BeamerError, ConfigError};
use crate::model::DocumentKind;
use crate::pipeline::input::{is_beamer_presentation, is_main_latex_file};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Suffix given to outputs that would otherwise overwrite their source.
pub const BEAMER_SUFFIX: &str = "-beamer.tex";

// ── Report ───────────────────────────────────────────────────────────────

/// What happened to one discovered document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DocumentStatus {
    Succeeded { slides: usize },
    Failed { stage: String, error: String },
    Skipped { reason: String },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentOutcome {
    pub source: PathBuf,
    pub output: PathBuf,
    #[serde(flatten)]
    pub status: DocumentStatus,
}

/// Per-document outcomes of a batch run, sorted by source path.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub outcomes: Vec<DocumentOutcome>,
}

impl BatchReport {
    fn count(&self, pred: impl Fn(&DocumentStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.status)).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(|s| matches!(s, DocumentStatus::Succeeded { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, DocumentStatus::Failed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, DocumentStatus::Skipped { .. }))
    }

    pub fn cancelled(&self) -> usize {
        self.count(|s| matches!(s, DocumentStatus::Cancelled))
    }

    /// True when no document failed or was cancelled.
    pub fn is_success(&self) -> bool {
        self.failed() == 0 && self.cancelled() == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &DocumentOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, DocumentStatus::Failed { .. }))
    }
}

// ── Cancellation ─────────────────────────────────────────────────────────

/// Shared stop signal for queued documents.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ── Discovery ────────────────────────────────────────────────────────────

/// One document to convert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchJob {
    pub source: PathBuf,
    pub output: PathBuf,
}

/// Mirror `source` (under `source_root`) into `target_root` with a `.tex`
/// extension.
///
/// The mirrored path is off limits when it is `source` itself or one of
/// `sources` (a sibling `paper.tex` next to `paper.pdf`, converted in
/// place). LaTeX sources then write `<stem>-beamer.tex`, other kinds
/// `<stem>-<ext>-beamer.tex`, so a PDF and its LaTeX sibling never share
/// an output.
pub fn output_path_for(
    source_root: &Path,
    target_root: &Path,
    source: &Path,
    sources: &HashSet<PathBuf>,
) -> PathBuf {
    let relative = source.strip_prefix(source_root).unwrap_or(source);
    let mirrored = target_root.join(relative).with_extension("tex");
    if mirrored != source && !sources.contains(&mirrored) {
        return mirrored;
    }
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match source.extension().map(|e| e.to_string_lossy()) {
        Some(ext) if !is_latex(source) => format!("{stem}-{ext}{BEAMER_SUFFIX}"),
        _ => format!("{stem}{BEAMER_SUFFIX}"),
    };
    mirrored.with_file_name(name)
}

fn is_latex(path: &Path) -> bool {
    DocumentKind::from_path(path) == Some(DocumentKind::Latex)
}

/// A previous output: named `*-beamer.tex`, or LaTeX already using the
/// beamer class.
fn is_generated(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.ends_with(BEAMER_SUFFIX) || (is_latex(path) && is_beamer_presentation(path))
}

/// Find the documents under `source_root`. Returns the jobs to run and the
/// candidates that were skipped.
pub fn discover(
    source_root: &Path,
    target_root: &Path,
    suffixes: &[String],
    refresh: bool,
) -> Result<(Vec<BatchJob>, Vec<DocumentOutcome>), ConfigError> {
    if !source_root.is_dir() {
        return Err(ConfigError::Invalid(format!(
            "source folder '{}' is not a directory",
            source_root.display()
        )));
    }

    let root = glob::Pattern::escape(&source_root.to_string_lossy());
    let mut candidates = Vec::new();
    for suffix in suffixes {
        let pattern = format!("{}/**/*{}", root, glob::Pattern::escape(suffix));
        let entries = glob::glob(&pattern)
            .map_err(|e| ConfigError::Invalid(format!("Invalid suffix '{suffix}': {e}")))?;
        candidates.extend(entries.flatten().filter(|p| p.is_file()));
    }
    candidates.sort();
    candidates.dedup();

    let nested_target = target_root != source_root && target_root.starts_with(source_root);
    let generated: HashSet<PathBuf> = candidates
        .iter()
        .filter(|p| is_generated(p))
        .cloned()
        .collect();
    let sources: HashSet<PathBuf> = candidates
        .iter()
        .filter(|p| !generated.contains(*p))
        .cloned()
        .collect();

    let mut jobs = Vec::new();
    let mut skipped = Vec::new();
    let mut claimed: HashSet<PathBuf> = HashSet::new();

    for source in candidates {
        let output = output_path_for(source_root, target_root, &source, &sources);

        let reason = if nested_target && source.starts_with(target_root) {
            Some("inside the target folder".to_string())
        } else if generated.contains(&source) {
            Some("generated presentation".to_string())
        } else if is_latex(&source) && !is_main_latex_file(&source) {
            Some("LaTeX fragment without \\begin{document}".to_string())
        } else if claimed.contains(&output) {
            Some(format!("output '{}' already claimed by another source", output.display()))
        } else if output.exists() && !refresh {
            Some("output exists (use --refresh to regenerate)".to_string())
        } else {
            None
        };

        match reason {
            Some(reason) => {
                debug!("skip {}: {}", source.display(), reason);
                skipped.push(DocumentOutcome {
                    source,
                    output,
                    status: DocumentStatus::Skipped { reason },
                });
            }
            None => {
                claimed.insert(output.clone());
                jobs.push(BatchJob { source, output });
            }
        }
    }

    info!(
        "Discovered {} documents under {} ({} skipped)",
        jobs.len(),
        source_root.display(),
        skipped.len()
    );
    Ok((jobs, skipped))
}

// ── Run ──────────────────────────────────────────────────────────────────

/// Convert every document under `source_root` into `target_root`.
///
/// Only discovery errors are returned as `Err`; per-document failures live
/// in the report.
pub async fn run_batch(
    pipeline: &Pipeline,
    source_root: &Path,
    target_root: &Path,
) -> Result<BatchReport, ConfigError> {
    let config = pipeline.config();
    let (jobs, skipped) = discover(source_root, target_root, &config.suffixes, config.refresh)?;
    let total = jobs.len();
    let cancel = CancelFlag::new();
    let callback = config.progress_callback.clone();

    if let Some(ref cb) = callback {
        cb.on_batch_start(total, skipped.len());
    }

    let attempted: Vec<DocumentOutcome> = stream::iter(jobs.into_iter().enumerate().map(|(i, job)| {
        let cancel = cancel.clone();
        let callback = callback.clone();
        async move {
            let index = i + 1;
            let label = job.source.display().to_string();
            if cancel.is_cancelled() {
                return DocumentOutcome {
                    source: job.source,
                    output: job.output,
                    status: DocumentStatus::Cancelled,
                };
            }
            if let Some(ref cb) = callback {
                cb.on_document_start(index, total, &label);
            }

            let status = match pipeline.convert_to_file(&job.source, &job.output).await {
                Ok(result) => {
                    if let Some(ref cb) = callback {
                        cb.on_document_complete(index, total, &label, result.stats.slides);
                    }
                    DocumentStatus::Succeeded {
                        slides: result.stats.slides,
                    }
                }
                Err(e) => {
                    record_failure(&label, &e, &cancel);
                    if let Some(ref cb) = callback {
                        cb.on_document_error(index, total, &label, &e.to_string());
                    }
                    DocumentStatus::Failed {
                        stage: e.stage().to_string(),
                        error: e.to_string(),
                    }
                }
            };
            DocumentOutcome {
                source: job.source,
                output: job.output,
                status,
            }
        }
    }))
    .buffer_unordered(config.concurrency)
    .collect()
    .await;

    let mut outcomes = skipped;
    outcomes.extend(attempted);
    outcomes.sort_by(|a, b| a.source.cmp(&b.source));
    let report = BatchReport { outcomes };

    info!(
        "Batch complete: {} succeeded, {} failed, {} skipped, {} cancelled",
        report.succeeded(),
        report.failed(),
        report.skipped(),
        report.cancelled()
    );
    if let Some(ref cb) = callback {
        cb.on_batch_complete(report.succeeded(), report.failed(), report.cancelled());
    }
    Ok(report)
}

fn record_failure(label: &str, e: &BeamerError, cancel: &CancelFlag) {
    if e.is_fatal_for_batch() {
        error!("{}: {} (stopping the batch)", label, e);
        cancel.cancel();
    } else {
        warn!("{}: {} failed: {}", label, e.stage(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const MAIN: &str = "\\documentclass{article}\n\\begin{document}\n\\section{A}\nText.\n\\end{document}\n";

    fn suffixes() -> Vec<String> {
        vec![".tex".into(), ".pdf".into()]
    }

    #[test]
    fn output_paths_mirror_and_avoid_overwriting() {
        let src = Path::new("/data/in");
        let none = HashSet::new();
        assert_eq!(
            output_path_for(src, Path::new("/data/out"), Path::new("/data/in/a/paper.pdf"), &none),
            PathBuf::from("/data/out/a/paper.tex")
        );
        assert_eq!(
            output_path_for(src, src, Path::new("/data/in/a/report.tex"), &none),
            PathBuf::from("/data/in/a/report-beamer.tex")
        );
        assert_eq!(
            output_path_for(src, src, Path::new("/data/in/paper.pdf"), &none),
            PathBuf::from("/data/in/paper.tex")
        );

        let sibling: HashSet<PathBuf> = [PathBuf::from("/data/in/paper.tex")].into();
        assert_eq!(
            output_path_for(src, src, Path::new("/data/in/paper.pdf"), &sibling),
            PathBuf::from("/data/in/paper-pdf-beamer.tex")
        );
    }

    #[test]
    fn discovery_applies_skip_rules() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in");
        let out = dir.path().join("out");
        fs::create_dir_all(src.join("sub")).unwrap();
        fs::create_dir_all(&out).unwrap();
        fs::write(src.join("main.tex"), MAIN).unwrap();
        fs::write(src.join("sub/chapter.tex"), "\\section{Only a fragment}\n").unwrap();
        fs::write(src.join("sub/done.tex"), MAIN).unwrap();
        fs::create_dir_all(out.join("sub")).unwrap();
        fs::write(out.join("sub/done.tex"), "old").unwrap();
        fs::write(src.join("notes.txt"), "ignored").unwrap();

        let (jobs, skipped) = discover(&src, &out, &suffixes(), false).unwrap();
        assert_eq!(
            jobs,
            vec![BatchJob {
                source: src.join("main.tex"),
                output: out.join("main.tex"),
            }]
        );
        assert_eq!(skipped.len(), 2);

        let (jobs, skipped) = discover(&src, &out, &suffixes(), true).unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(skipped.len(), 1);
    }

    #[test]
    fn colliding_outputs_keep_the_first_source() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in");
        let out = dir.path().join("out");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("paper.pdf"), b"%PDF-1.4").unwrap();
        fs::write(src.join("paper.tex"), MAIN).unwrap();

        let (jobs, skipped) = discover(&src, &out, &suffixes(), false).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].source, src.join("paper.pdf"));
        assert!(matches!(skipped[0].status, DocumentStatus::Skipped { .. }));
    }

    #[test]
    fn in_place_batch_ignores_previous_outputs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("talk.tex"), MAIN).unwrap();
        fs::write(dir.path().join("talk-beamer.tex"), MAIN).unwrap();

        let (jobs, skipped) = discover(dir.path(), dir.path(), &suffixes(), true).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].output, dir.path().join("talk-beamer.tex"));
        assert_eq!(skipped.len(), 1);
    }

    #[test]
    fn in_place_pdf_never_writes_over_its_latex_sibling() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("paper.pdf"), b"%PDF-1.4").unwrap();
        fs::write(dir.path().join("paper.tex"), MAIN).unwrap();

        let (jobs, skipped) = discover(dir.path(), dir.path(), &suffixes(), true).unwrap();
        assert!(skipped.is_empty());
        assert_eq!(
            jobs,
            vec![
                BatchJob {
                    source: dir.path().join("paper.pdf"),
                    output: dir.path().join("paper-pdf-beamer.tex"),
                },
                BatchJob {
                    source: dir.path().join("paper.tex"),
                    output: dir.path().join("paper-beamer.tex"),
                },
            ]
        );
    }

    #[test]
    fn beamer_deck_next_to_a_pdf_is_not_a_source() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("paper.pdf"), b"%PDF-1.4").unwrap();
        fs::write(
            dir.path().join("paper.tex"),
            "\\documentclass{beamer}\n\\begin{document}\n\\begin{frame}{A}\nx\n\\end{frame}\n\\end{document}\n",
        )
        .unwrap();

        // The deck is the earlier output of the PDF.
        let (jobs, skipped) = discover(dir.path(), dir.path(), &suffixes(), false).unwrap();
        assert!(jobs.is_empty());
        assert_eq!(skipped.len(), 2);
        let deck = skipped
            .iter()
            .find(|o| o.source == dir.path().join("paper.tex"))
            .unwrap();
        assert_eq!(
            deck.status,
            DocumentStatus::Skipped {
                reason: "generated presentation".into()
            }
        );

        let (jobs, _) = discover(dir.path(), dir.path(), &suffixes(), true).unwrap();
        assert_eq!(
            jobs,
            vec![BatchJob {
                source: dir.path().join("paper.pdf"),
                output: dir.path().join("paper.tex"),
            }]
        );
    }

    #[test]
    fn missing_source_folder_is_a_config_error() {
        let err = discover(Path::new("/no/such/dir"), Path::new("/tmp"), &suffixes(), false).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_cancelled());
        flag.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn report_counts() {
        let outcome = |status| DocumentOutcome {
            source: PathBuf::from("a"),
            output: PathBuf::from("b"),
            status,
        };
        let report = BatchReport {
            outcomes: vec![
                outcome(DocumentStatus::Succeeded { slides: 3 }),
                outcome(DocumentStatus::Skipped { reason: "x".into() }),
                outcome(DocumentStatus::Failed {
                    stage: "load".into(),
                    error: "y".into(),
                }),
            ],
        };
        assert_eq!((report.succeeded(), report.failed(), report.skipped()), (1, 1, 1));
        assert!(!report.is_success());
        assert_eq!(report.failures().count(), 1);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcomes"][0]["status"], "succeeded");
        assert_eq!(json["outcomes"][0]["slides"], 3);
    }
}
