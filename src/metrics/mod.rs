//! Scoring generated presentations against reference presentations.
//!
//! ## Element matching
//!
//! The elements compared are either frame titles or frame contents
//! ([`MatchOn`]). Duplicates are removed (first occurrence wins), then every
//! candidate/reference pair is scored. Identical strings score 1.0 without
//! consulting the embedder; any other pair is kept as a match when its F1
//! reaches the threshold. One candidate may match several references.
//!
//! From the matches:
//!
//! * confusion matrix: TP = matches, FP = distinct candidates never
//!   matched, FN = distinct references never matched, TN = 0;
//! * precision, recall and F1 from that matrix;
//! * Kendall's tau-b between the candidate and reference indices of the
//!   matches (order agreement; a single match counts as 1.0).
//!
//! ## ROUGE
//!
//! The `rouge` method skips matching and compares the concatenated frame
//! contents of both presentations.

pub mod bert;
pub mod presentation;
pub mod rouge;

use crate::error::ExternalServiceError;
use bert::{Embedder, TokenVectors};
use presentation::Presentation;
use rouge::RougeScores;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

/// Default F1 needed for two elements to match.
pub const DEFAULT_THRESHOLD: f64 = 0.7;

/// Which elements of the presentations are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchOn {
    #[default]
    Title,
    Content,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoringMethod {
    #[default]
    Bert,
    Rouge,
}

/// Precision, recall and F1.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Score {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

impl Score {
    pub fn from_precision_recall(precision: f64, recall: f64) -> Self {
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        Self {
            precision,
            recall,
            f1,
        }
    }

    fn exact() -> Self {
        Self {
            precision: 1.0,
            recall: 1.0,
            f1: 1.0,
        }
    }

    fn rounded(self) -> Self {
        Self {
            precision: round3(self.precision),
            recall: round3(self.recall),
            f1: round3(self.f1),
        }
    }
}

pub fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexedElement {
    pub element: String,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ElementMatch {
    pub candidate: IndexedElement,
    pub reference: IndexedElement,
    pub score: Score,
}

// ── Matching ─────────────────────────────────────────────────────────────

/// Remove duplicates, keeping the first occurrence.
pub fn dedupe(elements: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    elements
        .iter()
        .filter(|e| seen.insert(e.as_str()))
        .cloned()
        .collect()
}

/// Keep the pairs that are identical or whose F1 reaches `threshold`.
/// `score` is only called for non-identical pairs.
pub fn select_matches(
    candidates: &[String],
    references: &[String],
    threshold: f64,
    mut score: impl FnMut(&str, &str) -> Score,
) -> Vec<ElementMatch> {
    let candidates = dedupe(candidates);
    let references = dedupe(references);
    let mut matches = Vec::new();
    for (i, cand) in candidates.iter().enumerate() {
        for (j, reference) in references.iter().enumerate() {
            let s = if cand == reference {
                Score::exact()
            } else {
                score(cand, reference)
            };
            if cand == reference || s.f1 >= threshold {
                matches.push(ElementMatch {
                    candidate: IndexedElement {
                        element: cand.clone(),
                        index: i,
                    },
                    reference: IndexedElement {
                        element: reference.clone(),
                        index: j,
                    },
                    score: s.rounded(),
                });
            }
        }
    }
    debug!("{} matches at threshold {}", matches.len(), threshold);
    matches
}

/// Match elements by embedding similarity.
pub async fn match_elements(
    embedder: &dyn Embedder,
    candidates: &[String],
    references: &[String],
    threshold: f64,
) -> Result<Vec<ElementMatch>, ExternalServiceError> {
    let texts: Vec<&str> = candidates
        .iter()
        .chain(references)
        .map(String::as_str)
        .collect();
    let vectors = TokenVectors::build(embedder, &texts).await?;
    Ok(select_matches(candidates, references, threshold, |c, r| {
        vectors.score(c, r)
    }))
}

// ── Aggregates ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfusionMatrix {
    pub tp: usize,
    pub fp: usize,
    pub fn_: usize,
    pub tn: usize,
}

impl ConfusionMatrix {
    pub fn from_matches(
        candidates: &[String],
        references: &[String],
        matches: &[ElementMatch],
    ) -> Self {
        let distinct = |xs: &[String]| xs.iter().collect::<HashSet<_>>().len();
        let matched_cands: HashSet<&str> = matches
            .iter()
            .map(|m| m.candidate.element.as_str())
            .collect();
        let matched_refs: HashSet<&str> = matches
            .iter()
            .map(|m| m.reference.element.as_str())
            .collect();
        Self {
            tp: matches.len(),
            fp: distinct(candidates) - matched_cands.len(),
            fn_: distinct(references) - matched_refs.len(),
            tn: 0,
        }
    }

    /// `[[TP, FP], [FN, TN]]`
    pub fn rows(&self) -> [[usize; 2]; 2] {
        [[self.tp, self.fp], [self.fn_, self.tn]]
    }

    /// Precision, recall and F1; an empty denominator gives 0.
    pub fn score(&self) -> Score {
        let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };
        let precision = ratio(self.tp, self.tp + self.fp);
        let recall = ratio(self.tp, self.tp + self.fn_);
        Score::from_precision_recall(precision, recall).rounded()
    }
}

/// Kendall's tau-b between matched candidate and reference indices.
pub fn kendall_tau(matches: &[ElementMatch]) -> f64 {
    if matches.len() == 1 {
        return 1.0;
    }
    let xs: Vec<usize> = matches.iter().map(|m| m.candidate.index).collect();
    let ys: Vec<usize> = matches.iter().map(|m| m.reference.index).collect();
    let n = xs.len();
    let (mut concordant, mut discordant, mut x_ties, mut y_ties) = (0i64, 0i64, 0i64, 0i64);
    for i in 0..n {
        for j in i + 1..n {
            let dx = (xs[i] as i64 - xs[j] as i64).signum();
            let dy = (ys[i] as i64 - ys[j] as i64).signum();
            if dx == 0 {
                x_ties += 1;
            }
            if dy == 0 {
                y_ties += 1;
            }
            match dx * dy {
                1 => concordant += 1,
                -1 => discordant += 1,
                _ => {}
            }
        }
    }
    let total = (n * n.saturating_sub(1) / 2) as i64;
    let denom = (((total - x_ties) * (total - y_ties)) as f64).sqrt();
    if denom == 0.0 || denom.is_nan() {
        return 0.0;
    }
    round3((concordant - discordant) as f64 / denom)
}

// ── Reports ──────────────────────────────────────────────────────────────

/// Result of the `bert` scoring method.
#[derive(Debug, Clone, Serialize)]
pub struct MatchReport {
    pub match_on: MatchOn,
    pub f1_threshold: f64,
    pub candidates: Vec<String>,
    pub references: Vec<String>,
    pub matches: Vec<ElementMatch>,
    pub confusion_matrix: [[usize; 2]; 2],
    pub precision_recall_f1: Score,
    pub kendall_tau: f64,
}

impl MatchReport {
    pub fn from_matches(
        match_on: MatchOn,
        threshold: f64,
        candidates: Vec<String>,
        references: Vec<String>,
        matches: Vec<ElementMatch>,
    ) -> Self {
        let cm = ConfusionMatrix::from_matches(&candidates, &references, &matches);
        Self {
            match_on,
            f1_threshold: threshold,
            kendall_tau: kendall_tau(&matches),
            precision_recall_f1: cm.score(),
            confusion_matrix: cm.rows(),
            candidates,
            references,
            matches,
        }
    }
}

/// One score report, tagged by method.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "scoring_method", rename_all = "lowercase")]
pub enum ScoreReport {
    Bert(MatchReport),
    Rouge(RougeScores),
}

/// The elements of `p` compared under `on`.
pub fn elements(p: &Presentation, on: MatchOn) -> Vec<String> {
    match on {
        MatchOn::Title => p.frame_titles(),
        MatchOn::Content => p.contents(),
    }
}

/// Score `candidate` against `reference` by element matching.
pub async fn evaluate_matching(
    embedder: &dyn Embedder,
    candidate: &Presentation,
    reference: &Presentation,
    on: MatchOn,
    threshold: f64,
) -> Result<MatchReport, ExternalServiceError> {
    let candidates = elements(candidate, on);
    let references = elements(reference, on);
    let matches = match_elements(embedder, &candidates, &references, threshold).await?;
    Ok(MatchReport::from_matches(
        on, threshold, candidates, references, matches,
    ))
}

/// Score `candidate` against `reference` with ROUGE over all frame text.
pub fn evaluate_rouge(candidate: &Presentation, reference: &Presentation) -> RougeScores {
    rouge::score(
        &candidate.contents().join("\n"),
        &reference.contents().join("\n"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::bert::tests::OneHot;

    fn strings(xs: &[&str]) -> Vec<String> {
        xs.iter().map(|s| s.to_string()).collect()
    }

    fn word_overlap(a: &str, b: &str) -> Score {
        let aw: HashSet<&str> = a.split_whitespace().collect();
        let bw: HashSet<&str> = b.split_whitespace().collect();
        let common = aw.intersection(&bw).count() as f64;
        Score::from_precision_recall(common / aw.len() as f64, common / bw.len() as f64)
    }

    #[test]
    fn exact_matches_score_one_and_duplicates_collapse() {
        let cands = strings(&["Intro", "Intro", "Results"]);
        let refs = strings(&["Intro", "Method"]);
        let matches = select_matches(&cands, &refs, 0.7, word_overlap);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].score, Score::exact());
        assert_eq!(matches[0].candidate.index, 0);
    }

    #[test]
    fn threshold_filters_partial_matches() {
        let cands = strings(&["main results table"]);
        let refs = strings(&["main results", "unrelated words"]);
        // f1 of 2/3 and 1 is 0.8
        assert_eq!(select_matches(&cands, &refs, 0.7, word_overlap).len(), 1);
        assert_eq!(select_matches(&cands, &refs, 0.9, word_overlap).len(), 0);
    }

    #[test]
    fn confusion_matrix_and_scores() {
        let cands = strings(&["a", "b", "c"]);
        let refs = strings(&["a", "b", "d", "e"]);
        let matches = select_matches(&cands, &refs, 0.7, word_overlap);
        let cm = ConfusionMatrix::from_matches(&cands, &refs, &matches);
        assert_eq!(cm.rows(), [[2, 1], [2, 0]]);
        let s = cm.score();
        assert_eq!(s.precision, 0.667);
        assert_eq!(s.recall, 0.5);
        assert_eq!(s.f1, 0.571);
    }

    #[test]
    fn no_matches_scores_zero() {
        let cm = ConfusionMatrix::from_matches(&strings(&["a"]), &strings(&["b"]), &[]);
        assert_eq!(cm.score(), Score::default());
    }

    fn pairs(idx: &[(usize, usize)]) -> Vec<ElementMatch> {
        idx.iter()
            .map(|&(i, j)| ElementMatch {
                candidate: IndexedElement {
                    element: format!("c{i}"),
                    index: i,
                },
                reference: IndexedElement {
                    element: format!("r{j}"),
                    index: j,
                },
                score: Score::exact(),
            })
            .collect()
    }

    #[test]
    fn kendall_tau_orders() {
        assert_eq!(kendall_tau(&pairs(&[(0, 0), (1, 1), (2, 2)])), 1.0);
        assert_eq!(kendall_tau(&pairs(&[(0, 2), (1, 1), (2, 0)])), -1.0);
        assert_eq!(kendall_tau(&pairs(&[(4, 7)])), 1.0);
        assert_eq!(kendall_tau(&[]), 0.0);
        // every x tied: undefined, reported as 0
        assert_eq!(kendall_tau(&pairs(&[(0, 0), (0, 1)])), 0.0);
        // 5 concordant, 0 discordant, 1 tie in y: 5 / sqrt(6 * 5)
        let tau = kendall_tau(&pairs(&[(0, 0), (1, 0), (2, 1), (3, 2)]));
        assert_eq!(tau, round3(5.0 / 30f64.sqrt()));
    }

    #[tokio::test]
    async fn titles_are_matched_end_to_end() {
        let candidate = Presentation::parse(
            "\\begin{frame}{Red car}x\\end{frame}\\begin{frame}{Results}y\\end{frame}",
        );
        let reference = Presentation::parse(
            "\\begin{frame}{Red automobile}x\\end{frame}\\begin{frame}{Outlook}z\\end{frame}",
        );
        let report = evaluate_matching(&OneHot, &candidate, &reference, MatchOn::Title, 0.7)
            .await
            .unwrap();
        assert_eq!(report.matches.len(), 1);
        assert_eq!(report.confusion_matrix, [[1, 1], [1, 0]]);
        assert_eq!(report.kendall_tau, 1.0);
        let json = serde_json::to_value(ScoreReport::Bert(report)).unwrap();
        assert_eq!(json["scoring_method"], "bert");
        assert_eq!(json["match_on"], "title");
    }

    #[test]
    fn rouge_compares_contents() {
        let p = Presentation::parse("\\begin{frame}{T}the same words\\end{frame}");
        let s = evaluate_rouge(&p, &p);
        assert_eq!(s.rouge1, 1.0);
    }
}
