//! Integration tests scoring generated presentations.

use beamerize::metrics::bert::Embedder;
use beamerize::metrics::presentation::Presentation;
use beamerize::metrics::{evaluate_matching, evaluate_rouge, MatchOn, ScoreReport, DEFAULT_THRESHOLD};
use beamerize::{convert, ExternalServiceError, ConversionConfig};
use futures::future::BoxFuture;

const REPORT: &str = r"\documentclass{article}
\title{Sparse Graphs}
\author{Ada Lovelace}
\begin{document}
\section{Intro}
Graphs are everywhere in modern data.
\section{Method}
We sample edges with a random walk.
\section{Results}
Accuracy improves by ten points.
\end{document}
";

/// Every distinct token in a call gets its own axis.
struct Orthogonal;

impl Embedder for Orthogonal {
    fn name(&self) -> &str {
        "orthogonal"
    }

    fn embed<'a>(
        &'a self,
        texts: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<Vec<f32>>, ExternalServiceError>> {
        Box::pin(async move {
            Ok((0..texts.len())
                .map(|i| {
                    let mut v = vec![0.0f32; texts.len()];
                    v[i] = 1.0;
                    v
                })
                .collect())
        })
    }
}

async fn generated() -> Presentation {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("report.tex");
    std::fs::write(&src, REPORT).unwrap();
    let out = convert(&src, &ConversionConfig::default()).await.unwrap();
    Presentation::parse(&out.beamer)
}

fn deck(titles: &[&str]) -> Presentation {
    let frames: String = titles
        .iter()
        .map(|t| format!("\\begin{{frame}}{{{t}}}\n  Some words about {t}.\n\\end{{frame}}\n"))
        .collect();
    Presentation::parse(&format!(
        "\\documentclass{{beamer}}\n\\begin{{document}}\n{frames}\\end{{document}}\n"
    ))
}

#[tokio::test]
async fn generated_deck_parses_back() {
    let p = generated().await;
    assert_eq!(p.title.as_deref(), Some("Sparse Graphs"));
    assert_eq!(p.authors, vec!["Ada Lovelace"]);
    assert_eq!(p.frame_titles(), vec!["Intro", "Method", "Results"]);
    assert!(p.frames.iter().any(|f| f.is_title_page));
    assert!(p.contents()[0].starts_with("Sparse Graphs"));
}

#[tokio::test]
async fn a_deck_matches_itself_perfectly() {
    let p = generated().await;
    let report = evaluate_matching(&Orthogonal, &p, &p, MatchOn::Title, DEFAULT_THRESHOLD)
        .await
        .unwrap();
    assert_eq!(report.matches.len(), 3);
    assert_eq!(report.confusion_matrix, [[3, 0], [0, 0]]);
    assert_eq!(report.precision_recall_f1.f1, 1.0);
    assert_eq!(report.kendall_tau, 1.0);

    let rouge = evaluate_rouge(&p, &p);
    assert_eq!(rouge.rouge1, 1.0);
    assert_eq!(rouge.rouge_l, 1.0);
}

#[tokio::test]
async fn missing_and_reordered_frames_are_penalised() {
    let candidate = generated().await;
    let reference = deck(&["Results", "Method", "Intro", "Appendix"]);

    let report = evaluate_matching(
        &Orthogonal,
        &candidate,
        &reference,
        MatchOn::Title,
        DEFAULT_THRESHOLD,
    )
    .await
    .unwrap();
    assert_eq!(report.precision_recall_f1.precision, 1.0);
    assert_eq!(report.precision_recall_f1.recall, 0.75);
    assert_eq!(report.kendall_tau, -1.0);

    let json = serde_json::to_value(ScoreReport::Bert(report)).unwrap();
    assert_eq!(json["scoring_method"], "bert");
    assert_eq!(json["match_on"], "title");
}

#[tokio::test]
async fn unrelated_decks_share_no_matches() {
    let a = deck(&["Zebras", "Savanna"]);
    let b = deck(&["Compilers", "Parsing"]);
    let report = evaluate_matching(&Orthogonal, &a, &b, MatchOn::Title, DEFAULT_THRESHOLD)
        .await
        .unwrap();
    assert!(report.matches.is_empty());
    assert_eq!(report.precision_recall_f1.f1, 0.0);
    assert_eq!(report.confusion_matrix, [[0, 2], [2, 0]]);
}
