//! Structure extraction: segment a [`SourceDocument`] and nest the blocks
//! into a [`DocumentTree`].
//!
//! ## Nesting
//!
//! Blocks are scanned in document order with a stack of open sections.
//! A heading at level `L` closes every open section at level `>= L` and
//! opens a new one under whatever remains on top. Headings whose level
//! could not be determined go one level below the current top, so they
//! never close a section. Everything else attaches to the top of the
//! stack. A document without headings simply leaves all blocks under the
//! synthetic root.

use crate::error::ExtractionError;
use crate::model::{
    ContentBlock, DocumentKind, DocumentMetadata, DocumentTree, NodeId, SourceDocument,
    LEVEL_UNDETERMINED,
};
use crate::pipeline::{latex, layout};
use tracing::{debug, info};

/// Extract the section hierarchy of a loaded document.
pub fn extract(doc: SourceDocument) -> Result<DocumentTree, ExtractionError> {
    let (id, kind, text, lines, mut metadata) = doc.into_parts();

    let blocks = match kind {
        DocumentKind::Latex => {
            let seg = latex::segment(&id, &text)?;
            if metadata.title.is_none() {
                metadata.title = seg.title;
            }
            if metadata.authors.is_empty() {
                metadata.authors = seg.authors;
            }
            seg.blocks
        }
        DocumentKind::Pdf => {
            let seg = layout::segment(&lines, metadata.title.as_deref());
            metadata.title = seg.title;
            seg.blocks
        }
    };

    if blocks.is_empty() {
        return Err(ExtractionError::NoContent { id });
    }

    let tree = build_tree(id, metadata, blocks);
    info!(
        "Extracted {}: {} blocks, {} sections",
        tree.id(),
        tree.blocks().len(),
        tree.node_count() - 1
    );
    Ok(tree)
}

/// Nest an ordered block sequence into a section tree.
pub fn build_tree(
    id: impl Into<String>,
    metadata: DocumentMetadata,
    blocks: Vec<ContentBlock>,
) -> DocumentTree {
    let mut tree = DocumentTree::new(id, metadata);
    let mut stack: Vec<(NodeId, u8)> = vec![(tree.root(), 0)];

    for (ordinal, mut block) in blocks.into_iter().enumerate() {
        block.ordinal = ordinal;
        if block.is_heading() {
            let top_level = stack.last().map(|(_, l)| *l).unwrap_or(0);
            let level = if block.level == LEVEL_UNDETERMINED {
                top_level.saturating_add(1)
            } else {
                block.level
            };
            while stack.len() > 1 && stack.last().is_some_and(|(_, l)| *l >= level) {
                stack.pop();
            }
            block.level = level;
            let parent = stack.last().map(|(n, _)| *n).unwrap_or(tree.root());
            debug!("section '{}' at level {}", block.text, level);
            let node = tree.push_section(parent, block);
            stack.push((node, level));
        } else {
            let parent = stack.last().map(|(n, _)| *n).unwrap_or(tree.root());
            tree.push_block(parent, block);
        }
    }
    tree
}
