//! Direct slide planning: walk the section tree depth-first and pack each
//! section's content into slides under an item and weight budget.
//!
//! ## Packing rules
//!
//! - Every section with direct content gets at least one slide titled by
//!   its heading; the synthetic root is titled by the document title.
//! - A nested section always closes the current slide. Parent content
//!   that follows a nested section lands on a continuation slide.
//! - When the next block would exceed `max_items` or `max_weight`, a
//!   continuation slide `"<title> (cont.)"` is opened first. Figures,
//!   tables and equations are never split; a single block heavier than
//!   the whole budget still gets a slide of its own.

use crate::model::{
    BlockKind, ContentBlock, DocumentTree, NodeChild, NodeId, PresentationPlan, SlideUnit,
};
use serde::Deserialize;
use tracing::{debug, info};

/// Title used for the synthetic root when the document has none.
pub const UNTITLED: &str = "(untitled)";

/// Suffix appended to continuation slide titles.
pub const CONTINUATION_SUFFIX: &str = " (cont.)";

/// Words per unit of paragraph weight.
const WORDS_PER_UNIT: usize = 40;

/// Slide budget shared by both planning methods.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Maximum content blocks per slide. Default: 5.
    pub max_items: usize,
    /// Maximum summed block weight per slide. Default: 6.0.
    pub max_weight: f32,
    /// Desired slide count. A hint for the direct planner, a request for
    /// the rag planner.
    pub target_slides: Option<usize>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_items: 5,
            max_weight: 6.0,
            target_slides: None,
        }
    }
}

/// Estimated visual weight of one block.
pub fn block_weight(block: &ContentBlock) -> f32 {
    match block.kind {
        BlockKind::Heading => 0.0,
        BlockKind::Bullet => 1.0,
        BlockKind::Paragraph => {
            let words = block.text.split_whitespace().count().max(1);
            words.div_ceil(WORDS_PER_UNIT) as f32
        }
        BlockKind::Equation => 1.5,
        BlockKind::Figure | BlockKind::Table => 3.0,
    }
}

/// Continuation title for `title`.
pub fn continuation_title(title: &str) -> String {
    format!("{title}{CONTINUATION_SUFFIX}")
}

/// Deterministic plan: one slide run per section, in document order.
pub fn plan_direct<'t>(tree: &'t DocumentTree, cfg: &PlannerConfig) -> PresentationPlan<'t> {
    let mut planner = Packer::new(cfg);
    let root_title = tree.title().unwrap_or(UNTITLED).to_string();
    walk(tree, tree.root(), &root_title, &mut planner);
    let slides = planner.finish();

    if let Some(target) = cfg.target_slides {
        if slides.len() > target {
            info!(
                "Direct plan for {} has {} slides (target {})",
                tree.id(),
                slides.len(),
                target
            );
        }
    }
    debug!("Planned {} slides for {}", slides.len(), tree.id());

    PresentationPlan {
        title: tree.title().map(str::to_string),
        authors: tree.metadata().authors.clone(),
        slides,
    }
}

fn walk<'t>(tree: &'t DocumentTree, node: NodeId, title: &str, packer: &mut Packer<'t>) {
    let section = tree
        .top_section(node)
        .and_then(|top| tree.heading_text(top))
        .map(str::to_string);
    packer.open(title, section.clone());

    for child in tree.node(node).children() {
        match child {
            NodeChild::Block(id) => packer.push(tree.block(*id)),
            NodeChild::Section(sub) => {
                let sub_title = tree.heading_text(*sub).unwrap_or(UNTITLED);
                let emitted = packer.emitted();
                packer.close();
                walk(tree, *sub, sub_title, packer);
                // Back in the parent: a continuation only if it already
                // has a slide of its own.
                packer.reopen(title, section.clone(), emitted);
            }
        }
    }
    packer.close();
}

/// Fills slides for one section at a time.
pub(crate) struct Packer<'t> {
    max_items: usize,
    max_weight: f32,
    title: String,
    section: Option<String>,
    /// Whether the current section has started a slide, which makes the
    /// next one a continuation.
    continued: bool,
    current: Option<SlideUnit<'t>>,
    slides: Vec<SlideUnit<'t>>,
}

impl<'t> Packer<'t> {
    pub(crate) fn new(cfg: &PlannerConfig) -> Self {
        Self {
            max_items: cfg.max_items.max(1),
            max_weight: cfg.max_weight.max(1.0),
            title: String::new(),
            section: None,
            continued: false,
            current: None,
            slides: Vec::new(),
        }
    }

    /// Start a new section. No slide is emitted until content arrives.
    pub(crate) fn open(&mut self, title: &str, section: Option<String>) {
        self.close();
        self.title = title.to_string();
        self.section = section;
        self.continued = false;
    }

    /// Whether the current section has started a slide.
    fn emitted(&self) -> bool {
        self.continued
    }

    /// Return to a section whose content was interrupted by a subsection.
    /// `emitted` is what [`Self::emitted`] said before the interruption.
    fn reopen(&mut self, title: &str, section: Option<String>, emitted: bool) {
        self.open(title, section);
        self.continued = emitted;
    }

    pub(crate) fn push(&mut self, block: &'t ContentBlock) {
        if block.is_heading() {
            return;
        }
        let weight = block_weight(block);
        let fits = self.current.as_ref().is_some_and(|slide| {
            slide.blocks.len() < self.max_items && slide.weight + weight <= self.max_weight
        });
        if !fits {
            self.close();
            let title = if self.continued {
                continuation_title(&self.title)
            } else {
                self.title.clone()
            };
            self.current = Some(SlideUnit::new(title, self.section.clone(), self.continued));
            self.continued = true;
        }
        if let Some(slide) = self.current.as_mut() {
            slide.blocks.push(block);
            slide.weight += weight;
        }
    }

    pub(crate) fn close(&mut self) {
        if let Some(slide) = self.current.take() {
            if !slide.is_empty() {
                self.slides.push(slide);
            }
        }
    }

    pub(crate) fn finish(mut self) -> Vec<SlideUnit<'t>> {
        self.close();
        self.slides
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DocumentMetadata;
    use crate::pipeline::extract::build_tree;

    fn block(kind: BlockKind, level: u8, text: &str) -> ContentBlock {
        ContentBlock::new(kind, level, 0, text)
    }

    fn titles(plan: &PresentationPlan<'_>) -> Vec<String> {
        plan.slides.iter().map(|s| s.title.clone()).collect()
    }

    #[test]
    fn weights() {
        assert_eq!(block_weight(&block(BlockKind::Bullet, 1, "x")), 1.0);
        assert_eq!(block_weight(&block(BlockKind::Equation, 0, "x")), 1.5);
        assert_eq!(block_weight(&block(BlockKind::Figure, 0, "x")), 3.0);
        let long = vec!["word"; 41].join(" ");
        assert_eq!(block_weight(&block(BlockKind::Paragraph, 0, &long)), 2.0);
        assert_eq!(block_weight(&block(BlockKind::Paragraph, 0, "")), 1.0);
    }

    #[test]
    fn intro_method_results_gives_three_slides() {
        let tree = build_tree(
            "paper",
            DocumentMetadata::default(),
            vec![
                block(BlockKind::Heading, 3, "Intro"),
                block(BlockKind::Paragraph, 0, "p1"),
                block(BlockKind::Paragraph, 0, "p2"),
                block(BlockKind::Heading, 3, "Method"),
                block(BlockKind::Paragraph, 0, "p3"),
                block(BlockKind::Heading, 3, "Results"),
                block(BlockKind::Paragraph, 0, "p4"),
            ],
        );
        let plan = plan_direct(&tree, &PlannerConfig::default());
        assert_eq!(titles(&plan), vec!["Intro", "Method", "Results"]);
        assert_eq!(plan.slides[0].blocks.len(), 2);
        assert_eq!(plan.slides[2].section.as_deref(), Some("Results"));
    }

    #[test]
    fn intro_method_results_bullets_fit_three_per_slide() {
        let mut blocks = Vec::new();
        for section in ["Intro", "Method", "Results"] {
            blocks.push(block(BlockKind::Heading, 3, section));
            blocks.push(block(BlockKind::Bullet, 1, &format!("{section} first")));
            blocks.push(block(BlockKind::Bullet, 1, &format!("{section} second")));
        }
        let tree = build_tree("paper", DocumentMetadata::default(), blocks);
        let cfg = PlannerConfig {
            max_items: 3,
            ..Default::default()
        };
        let plan = plan_direct(&tree, &cfg);

        assert_eq!(titles(&plan), vec!["Intro", "Method", "Results"]);
        for slide in &plan.slides {
            assert_eq!(slide.blocks.len(), 2);
            assert!(slide.blocks.iter().all(|b| b.kind == BlockKind::Bullet));
            assert!(!slide.continuation);
        }
    }

    #[test]
    fn resumed_section_without_slides_is_not_a_continuation() {
        // Two unrelated sections share a title; the second only gets
        // content after its subsection.
        let mut tree = DocumentTree::new("paper", DocumentMetadata::default());
        let root = tree.root();
        let first = tree.push_section(root, block(BlockKind::Heading, 3, "Setup"));
        tree.push_block(first, block(BlockKind::Paragraph, 0, "first setup"));
        let second = tree.push_section(root, block(BlockKind::Heading, 3, "Setup"));
        let details = tree.push_section(second, block(BlockKind::Heading, 4, "Details"));
        tree.push_block(details, block(BlockKind::Paragraph, 0, "details"));
        tree.push_block(second, block(BlockKind::Paragraph, 0, "tail"));

        let plan = plan_direct(&tree, &PlannerConfig::default());
        assert_eq!(titles(&plan), vec!["Setup", "Details", "Setup"]);
        assert!(!plan.slides[2].continuation);
    }

    #[test]
    fn resumed_section_with_a_slide_continues() {
        let mut tree = DocumentTree::new("paper", DocumentMetadata::default());
        let root = tree.root();
        let method = tree.push_section(root, block(BlockKind::Heading, 3, "Method"));
        tree.push_block(method, block(BlockKind::Paragraph, 0, "overview"));
        let data = tree.push_section(method, block(BlockKind::Heading, 4, "Data"));
        tree.push_block(data, block(BlockKind::Paragraph, 0, "data"));
        tree.push_block(method, block(BlockKind::Paragraph, 0, "wrap-up"));

        let plan = plan_direct(&tree, &PlannerConfig::default());
        assert_eq!(titles(&plan), vec!["Method", "Data", "Method (cont.)"]);
        assert!(plan.slides[2].continuation);
    }

    #[test]
    fn untitled_document_splits_into_continuation() {
        let blocks = (1..=5)
            .map(|i| block(BlockKind::Paragraph, 0, &format!("paragraph {i}")))
            .collect();
        let tree = build_tree("notes", DocumentMetadata::default(), blocks);
        let cfg = PlannerConfig {
            max_items: 3,
            ..Default::default()
        };
        let plan = plan_direct(&tree, &cfg);
        assert_eq!(titles(&plan), vec!["(untitled)", "(untitled) (cont.)"]);
        assert_eq!(plan.slides[0].blocks.len(), 3);
        assert_eq!(plan.slides[1].blocks.len(), 2);
        assert!(plan.slides[1].continuation);
    }

    #[test]
    fn item_bound_holds_and_atomic_blocks_are_not_split() {
        let mut blocks = vec![block(BlockKind::Heading, 3, "Results")];
        for i in 0..4 {
            blocks.push(block(BlockKind::Bullet, 1, &format!("b{i}")));
        }
        blocks.push(block(BlockKind::Figure, 0, "Figure 1: plot"));
        blocks.push(block(BlockKind::Table, 0, "Table 1: numbers"));
        let tree = build_tree("r", DocumentMetadata::default(), blocks);
        let cfg = PlannerConfig::default();
        let plan = plan_direct(&tree, &cfg);

        for slide in &plan.slides {
            assert!(slide.blocks.len() <= cfg.max_items);
        }
        // 4 bullets (4.0) + figure (3.0) exceeds 6.0, so the figure moves on.
        assert_eq!(plan.slides[0].blocks.len(), 4);
        assert_eq!(plan.slides[1].blocks[0].kind, BlockKind::Figure);
        assert_eq!(plan.slides[1].title, "Results (cont.)");
        let figures: usize = plan
            .slides
            .iter()
            .flat_map(|s| &s.blocks)
            .filter(|b| b.kind.is_atomic())
            .count();
        assert_eq!(figures, 2);
    }

    #[test]
    fn nested_sections_start_new_slides_and_empty_sections_emit_none() {
        let tree = build_tree(
            "paper",
            DocumentMetadata {
                title: Some("Paper".into()),
                authors: vec![],
            },
            vec![
                block(BlockKind::Heading, 3, "Method"),
                block(BlockKind::Paragraph, 0, "overview"),
                block(BlockKind::Heading, 4, "Data"),
                block(BlockKind::Paragraph, 0, "data"),
                block(BlockKind::Heading, 4, "Empty"),
                block(BlockKind::Heading, 3, "Results"),
                block(BlockKind::Paragraph, 0, "r"),
            ],
        );
        let plan = plan_direct(&tree, &PlannerConfig::default());
        assert_eq!(titles(&plan), vec!["Method", "Data", "Results"]);
        assert_eq!(plan.slides[1].section.as_deref(), Some("Method"));
        assert_eq!(plan.title.as_deref(), Some("Paper"));
    }

    #[test]
    fn skipped_levels_still_nest() {
        let tree = build_tree(
            "paper",
            DocumentMetadata::default(),
            vec![
                block(BlockKind::Heading, 3, "Method"),
                block(BlockKind::Paragraph, 0, "before"),
                block(BlockKind::Heading, 5, "Detail"),
                block(BlockKind::Paragraph, 0, "inner"),
            ],
        );
        let plan = plan_direct(&tree, &PlannerConfig::default());
        assert_eq!(titles(&plan), vec!["Method", "Detail"]);
    }

    #[test]
    fn oversized_block_gets_its_own_slide() {
        let huge = vec!["w"; 400].join(" ");
        let tree = build_tree(
            "d",
            DocumentMetadata::default(),
            vec![
                block(BlockKind::Paragraph, 0, "short"),
                block(BlockKind::Paragraph, 0, &huge),
                block(BlockKind::Paragraph, 0, "tail"),
            ],
        );
        let plan = plan_direct(&tree, &PlannerConfig::default());
        assert_eq!(plan.slide_count(), 3);
        assert_eq!(plan.slides[1].blocks.len(), 1);
    }
}
