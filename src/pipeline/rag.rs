//! Retrieval-augmented planning.
//!
//! ## Flow
//!
//! ```text
//! tree ──▶ outline prompt ──▶ generative service ──▶ {"outline":[…]}
//!                                                        │
//!          BM25 index over blocks ◀── title + keywords ──┘
//!                   │
//!                   └──▶ best unused blocks per entry ──▶ SlideUnit
//! ```
//!
//! The service proposes *what* the slides are about; the text on every
//! slide is still borrowed from the document. Each block is used at most
//! once, blocks keep document order within a slide, and the item and
//! weight budgets of [`PlannerConfig`] hold exactly as for the direct plan.

use crate::error::ExternalServiceError;
use crate::model::{BlockId, DocumentTree, PresentationPlan, SlideUnit};
use crate::pipeline::llm::{generate_with_retry, GenerationRequest, RetryPolicy, TextGenerator};
use crate::pipeline::plan::{block_weight, plan_direct, PlannerConfig};
use crate::prompts::{outline_user_prompt, OUTLINE_SYSTEM_PROMPT};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Slides requested from the service when no target is configured.
pub const DEFAULT_RAG_SLIDES: usize = 9;

/// Outline entry the renderer's title page already covers.
const TITLE_SLIDE: &str = "title slide";

// ── Outline ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OutlineEntry {
    pub title: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Outline {
    outline: Vec<OutlineEntry>,
}

static RE_JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*\n?(.*?)```").unwrap());

/// Parse the service answer. Accepts bare JSON, JSON inside a fenced
/// block, or JSON surrounded by prose.
pub fn parse_outline(response: &str) -> Result<Vec<OutlineEntry>, ExternalServiceError> {
    let body = match RE_JSON_FENCE.captures(response) {
        Some(caps) => caps[1].trim().to_string(),
        None => {
            let start = response.find('{');
            let end = response.rfind('}');
            match (start, end) {
                (Some(s), Some(e)) if s < e => response[s..=e].to_string(),
                _ => {
                    return Err(ExternalServiceError::MalformedResponse {
                        detail: format!("no JSON object in response: {}", preview(response)),
                    })
                }
            }
        }
    };

    let outline: Outline =
        serde_json::from_str(&body).map_err(|e| ExternalServiceError::MalformedResponse {
            detail: format!("outline JSON did not parse ({}): {}", e, preview(&body)),
        })?;
    Ok(outline.outline)
}

fn preview(s: &str) -> String {
    let s = s.trim();
    if s.chars().count() > 120 {
        format!("{}…", s.chars().take(120).collect::<String>())
    } else {
        s.to_string()
    }
}

// ── Retrieval ────────────────────────────────────────────────────────────

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "have", "in",
        "into", "is", "it", "its", "of", "on", "or", "our", "that", "the", "their", "this",
        "to", "was", "we", "were", "which", "with",
    ]
    .into_iter()
    .collect()
});

/// Lowercased alphanumeric terms without stopwords.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(t.as_str()))
        .collect()
}

/// Okapi BM25 over a fixed set of documents.
#[derive(Debug)]
pub struct Bm25Index {
    terms: Vec<HashMap<String, usize>>,
    lengths: Vec<usize>,
    avg_len: f32,
    doc_freq: HashMap<String, usize>,
}

impl Bm25Index {
    const K1: f32 = 1.5;
    const B: f32 = 0.75;

    pub fn new<I, S>(docs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut terms = Vec::new();
        let mut lengths = Vec::new();
        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        for doc in docs {
            let tokens = tokenize(doc.as_ref());
            lengths.push(tokens.len());
            let mut tf: HashMap<String, usize> = HashMap::new();
            for t in tokens {
                *tf.entry(t).or_default() += 1;
            }
            for t in tf.keys() {
                *doc_freq.entry(t.clone()).or_default() += 1;
            }
            terms.push(tf);
        }
        let avg_len = if lengths.is_empty() {
            0.0
        } else {
            lengths.iter().sum::<usize>() as f32 / lengths.len() as f32
        };
        Self {
            terms,
            lengths,
            avg_len,
            doc_freq,
        }
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn score(&self, query: &[String], doc: usize) -> f32 {
        let n = self.terms.len() as f32;
        let len = self.lengths[doc] as f32;
        let norm = if self.avg_len > 0.0 { len / self.avg_len } else { 0.0 };
        query
            .iter()
            .map(|q| {
                let tf = *self.terms[doc].get(q).unwrap_or(&0) as f32;
                if tf == 0.0 {
                    return 0.0;
                }
                let df = *self.doc_freq.get(q).unwrap_or(&0) as f32;
                let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                idf * tf * (Self::K1 + 1.0) / (tf + Self::K1 * (1.0 - Self::B + Self::B * norm))
            })
            .sum()
    }

    /// Documents with a positive score, best first; ties keep index order.
    pub fn rank(&self, query: &str, skip: &HashSet<usize>) -> Vec<(usize, f32)> {
        let query = tokenize(query);
        let mut hits: Vec<(usize, f32)> = (0..self.terms.len())
            .filter(|d| !skip.contains(d))
            .map(|d| (d, self.score(&query, d)))
            .filter(|(_, s)| *s > 0.0)
            .collect();
        hits.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        hits
    }
}

// ── Planner ──────────────────────────────────────────────────────────────

/// The `rag` planning strategy.
pub struct RagPlanner {
    generator: Arc<dyn TextGenerator>,
    system_prompt: Option<String>,
    temperature: f32,
    max_tokens: usize,
    retry: RetryPolicy,
}

impl std::fmt::Debug for RagPlanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RagPlanner")
            .field("generator", &self.generator.name())
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("retry", &self.retry)
            .finish()
    }
}

impl RagPlanner {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            generator,
            system_prompt: None,
            temperature: 0.0,
            max_tokens: 2048,
            retry: RetryPolicy::default(),
        }
    }

    pub fn system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.max_tokens = n;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Ask for an outline, then fill it from the document.
    pub async fn plan<'t>(
        &self,
        tree: &'t DocumentTree,
        cfg: &PlannerConfig,
    ) -> Result<PresentationPlan<'t>, ExternalServiceError> {
        let n_slides = cfg.target_slides.unwrap_or(DEFAULT_RAG_SLIDES);
        let request = GenerationRequest {
            system: self
                .system_prompt
                .clone()
                .unwrap_or_else(|| OUTLINE_SYSTEM_PROMPT.to_string()),
            user: outline_user_prompt(tree, n_slides),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        let response = generate_with_retry(self.generator.as_ref(), &request, &self.retry).await?;
        let outline = parse_outline(&response)?;
        info!("{}: outline with {} entries", tree.id(), outline.len());

        let slides = fill_outline(tree, &outline, cfg);
        if slides.is_empty() {
            warn!(
                "{}: outline retrieved no content; falling back to the direct plan",
                tree.id()
            );
            return Ok(plan_direct(tree, cfg));
        }

        Ok(PresentationPlan {
            title: tree.title().map(str::to_string),
            authors: tree.metadata().authors.clone(),
            slides,
        })
    }
}

/// Select blocks for each outline entry.
pub fn fill_outline<'t>(
    tree: &'t DocumentTree,
    outline: &[OutlineEntry],
    cfg: &PlannerConfig,
) -> Vec<SlideUnit<'t>> {
    let candidates: Vec<usize> = tree
        .blocks()
        .iter()
        .enumerate()
        .filter(|(_, b)| !b.is_heading())
        .map(|(i, _)| i)
        .collect();
    // Section headings are indexed with their blocks so a keyword that only
    // names the section still finds its content.
    let docs = candidates.iter().map(|&i| {
        let owner = tree.owner(BlockId(i));
        match tree.heading_text(owner) {
            Some(h) => format!("{} {}", h, tree.blocks()[i].text),
            None => tree.blocks()[i].text.clone(),
        }
    });
    let index = Bm25Index::new(docs);

    let max_items = cfg.max_items.max(1);
    let max_weight = cfg.max_weight.max(1.0);
    let mut used: HashSet<usize> = HashSet::new();
    let mut slides = Vec::new();

    for entry in outline {
        let title = entry.title.trim();
        if title.is_empty() || title.eq_ignore_ascii_case(TITLE_SLIDE) {
            continue;
        }
        let query = format!("{} {}", title, entry.keywords.join(" "));
        let mut chosen: Vec<usize> = Vec::new();
        let mut weight = 0.0;
        for (doc, score) in index.rank(&query, &used) {
            if chosen.len() == max_items {
                break;
            }
            let w = block_weight(&tree.blocks()[candidates[doc]]);
            if !chosen.is_empty() && weight + w > max_weight {
                continue;
            }
            debug!("'{}': block {} scores {:.3}", title, candidates[doc], score);
            chosen.push(doc);
            weight += w;
        }
        if chosen.is_empty() {
            debug!("'{}': nothing retrieved", title);
            continue;
        }
        used.extend(chosen.iter().copied());
        chosen.sort_unstable();

        let mut slide = SlideUnit::new(title, None, false);
        for doc in chosen {
            let block = &tree.blocks()[candidates[doc]];
            slide.weight += block_weight(block);
            slide.blocks.push(block);
        }
        slides.push(slide);
    }
    slides
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BlockKind, ContentBlock, DocumentMetadata};
    use crate::pipeline::extract::build_tree;
    use crate::pipeline::llm::GenerationError;
    use futures::future::BoxFuture;

    struct Canned(String);

    impl TextGenerator for Canned {
        fn name(&self) -> &str {
            "canned"
        }

        fn generate<'a>(
            &'a self,
            _request: &'a GenerationRequest,
        ) -> BoxFuture<'a, Result<String, GenerationError>> {
            let text = self.0.clone();
            Box::pin(async move { Ok(text) })
        }
    }

    fn tree() -> DocumentTree {
        build_tree(
            "paper",
            DocumentMetadata {
                title: Some("Sparse Graphs".into()),
                authors: vec!["A. Author".into()],
            },
            vec![
                ContentBlock::new(BlockKind::Heading, 3, 0, "Introduction"),
                ContentBlock::new(BlockKind::Paragraph, 0, 0, "Dense graphs are expensive to store."),
                ContentBlock::new(BlockKind::Heading, 3, 0, "Method"),
                ContentBlock::new(BlockKind::Paragraph, 0, 0, "We prune edges by spectral sparsification."),
                ContentBlock::new(BlockKind::Equation, 0, 0, "L = D - A"),
                ContentBlock::new(BlockKind::Heading, 3, 0, "Results"),
                ContentBlock::new(BlockKind::Paragraph, 0, 0, "Sparsification keeps accuracy within one percent."),
                ContentBlock::new(BlockKind::Figure, 0, 0, "Figure 1: accuracy versus edges kept"),
            ],
        )
    }

    #[test]
    fn parses_fenced_and_bare_outlines() {
        let fenced = "Sure!\n```json\n{\"outline\": [{\"title\": \"Intro\", \"keywords\": [\"a\"]}]}\n```";
        assert_eq!(parse_outline(fenced).unwrap()[0].title, "Intro");
        let bare = "Here: {\"outline\": [{\"title\": \"Method\"}]} done";
        let entries = parse_outline(bare).unwrap();
        assert_eq!(entries[0].title, "Method");
        assert!(entries[0].keywords.is_empty());
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            parse_outline("I cannot help with that."),
            Err(ExternalServiceError::MalformedResponse { .. })
        ));
        assert!(matches!(
            parse_outline("{\"slides\": []}"),
            Err(ExternalServiceError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn tokenizer_drops_stopwords() {
        assert_eq!(tokenize("The Graph, of EDGES!"), vec!["graph", "edges"]);
    }

    #[test]
    fn bm25_prefers_matching_documents() {
        let index = Bm25Index::new([
            "cats purr",
            "dogs dogs bark",
            "cats and dogs play outside together",
        ]);
        let ranked = index.rank("dogs", &HashSet::new());
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].0, 1);
        let skipped = index.rank("dogs", &[1].into_iter().collect());
        assert_eq!(skipped[0].0, 2);
        assert!(index.rank("giraffe", &HashSet::new()).is_empty());
    }

    #[test]
    fn blocks_are_used_once_and_keep_document_order() {
        let tree = tree();
        let outline = vec![
            OutlineEntry {
                title: "Title Slide".into(),
                keywords: vec![],
            },
            OutlineEntry {
                title: "Spectral pruning".into(),
                keywords: vec!["sparsification".into(), "edges".into()],
            },
            OutlineEntry {
                title: "Motivation".into(),
                keywords: vec!["dense".into(), "graphs".into()],
            },
        ];
        let slides = fill_outline(&tree, &outline, &PlannerConfig::default());
        assert_eq!(slides.len(), 2);
        assert_eq!(slides[0].title, "Spectral pruning");

        let mut seen = HashSet::new();
        for slide in &slides {
            let ordinals: Vec<usize> = slide.blocks.iter().map(|b| b.ordinal).collect();
            let mut sorted = ordinals.clone();
            sorted.sort_unstable();
            assert_eq!(ordinals, sorted);
            for o in ordinals {
                assert!(seen.insert(o), "block {o} used twice");
            }
            assert!(slide.blocks.len() <= 5);
            assert!(slide.weight <= 6.0);
        }
    }

    #[tokio::test]
    async fn plan_uses_the_outline() {
        let tree = tree();
        let generator = Arc::new(Canned(
            r#"{"outline":[{"title":"Title Slide","keywords":[]},{"title":"Results","keywords":["accuracy"]}]}"#
                .into(),
        ));
        let plan = RagPlanner::new(generator)
            .plan(&tree, &PlannerConfig::default())
            .await
            .unwrap();
        assert_eq!(plan.slides[0].title, "Results");
        assert_eq!(plan.title.as_deref(), Some("Sparse Graphs"));
    }

    #[tokio::test]
    async fn empty_retrieval_falls_back_to_direct() {
        let tree = tree();
        let generator = Arc::new(Canned(
            r#"{"outline":[{"title":"Zebras","keywords":["savanna"]}]}"#.into(),
        ));
        let plan = RagPlanner::new(generator)
            .plan(&tree, &PlannerConfig::default())
            .await
            .unwrap();
        let titles: Vec<&str> = plan.slides.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Introduction", "Method", "Results"]);
    }

    #[tokio::test]
    async fn malformed_answer_is_an_error() {
        let tree = tree();
        let generator = Arc::new(Canned("no json here".into()));
        let err = RagPlanner::new(generator)
            .plan(&tree, &PlannerConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ExternalServiceError::MalformedResponse { .. }));
    }
}
