//! Prompts for the `rag` planning method.
//!
//! The generative service only ever proposes an outline: slide titles with
//! retrieval keywords. Slide content always comes from the document itself,
//! selected by the local retriever, so the prompt asks for nothing else.
//!
//! Callers can override the system prompt through
//! [`crate::config::LlmSettings::system_prompt`]; the constants here are used
//! only when no override is provided.

use crate::model::{DocumentTree, NodeChild};

/// Default system prompt for outline generation.
pub const OUTLINE_SYSTEM_PROMPT: &str = r#"You plan LaTeX Beamer presentations for academic reports.

Given the table of contents of a report and the opening sentences of each
section, propose an outline for a presentation.

Rules:
1. The first entry has the title "Title Slide" and no keywords.
2. Each further entry covers one main topic of the report: objectives,
   methodology, key findings, conclusions.
3. Titles are short (at most 8 words) and never repeat.
4. Give 3 to 6 keywords per entry, taken from the report's own vocabulary,
   that locate the supporting text.

Output ONLY JSON of the form:
{"outline": [{"title": "slide title", "keywords": ["kw1", "kw2", "kw3"]}]}
Do not add commentary."#;

/// Maximum number of lead sentences quoted per section.
const LEAD_SENTENCES: usize = 2;

/// Build the user message: requested slide count, document title, then the
/// table of contents with lead sentences.
pub fn outline_user_prompt(tree: &DocumentTree, n_slides: usize) -> String {
    let mut out = format!(
        "Create an outline with {} slides (including the title slide).\n\n",
        n_slides
    );
    if let Some(title) = tree.title() {
        out.push_str(&format!("Report title: {}\n\n", title));
    }
    out.push_str("Table of contents:\n");

    let mut stack = vec![(tree.root(), 0usize)];
    while let Some((node, depth)) = stack.pop() {
        let section = tree.node(node);
        if let Some(heading) = tree.heading_text(node) {
            out.push_str(&format!("{}- {}\n", "  ".repeat(depth.saturating_sub(1)), heading));
        }
        let lead = lead_sentences(tree, section.children());
        if !lead.is_empty() {
            out.push_str(&format!("{}  > {}\n", "  ".repeat(depth.saturating_sub(1)), lead));
        }
        let subsections: Vec<_> = section
            .children()
            .iter()
            .filter_map(|c| match c {
                NodeChild::Section(n) => Some(*n),
                NodeChild::Block(_) => None,
            })
            .collect();
        for sub in subsections.into_iter().rev() {
            stack.push((sub, depth + 1));
        }
    }
    out
}

fn lead_sentences(tree: &DocumentTree, children: &[NodeChild]) -> String {
    let text = children.iter().find_map(|c| match c {
        NodeChild::Block(b) if !tree.block(*b).is_heading() => Some(tree.block(*b).text.as_str()),
        _ => None,
    });
    let Some(text) = text else {
        return String::new();
    };
    let mut lead = String::new();
    let mut count = 0;
    for sentence in text.split_inclusive(". ") {
        lead.push_str(sentence);
        count += 1;
        if count == LEAD_SENTENCES {
            break;
        }
    }
    lead.trim().to_string()
}
