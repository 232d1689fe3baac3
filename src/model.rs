//! Data model shared by every pipeline stage.
//!
//! ## Ownership
//!
//! ```text
//! SourceDocument ──(consumed)──▶ DocumentTree ──(borrowed)──▶ PresentationPlan<'t>
//! ```
//!
//! The [`DocumentTree`] owns every [`ContentBlock`]. Sections are stored in
//! an arena and point at each other through integer ids ([`NodeId`],
//! [`BlockId`]), so the hierarchy has no reference cycles and no `Rc`.
//! A [`SlideUnit`] only *borrows* blocks from the tree; the borrow checker
//! guarantees the tree outlives the plan built from it.

use serde::Serialize;
use std::path::Path;

// ── Source ───────────────────────────────────────────────────────────────

/// The format a source document was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Latex,
}

impl DocumentKind {
    /// Guess the kind from a file extension alone.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(DocumentKind::Pdf),
            "tex" | "ltx" | "latex" => Some(DocumentKind::Latex),
            _ => None,
        }
    }
}

/// One line of the PDF text layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayoutLine {
    pub text: String,
    /// Dominant (char-weighted) font size of the line, in points.
    pub font_size: f32,
    /// 1-indexed page number.
    pub page: usize,
}

/// Title and authors, when the source exposes them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub authors: Vec<String>,
}

/// A loaded document. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    id: String,
    kind: DocumentKind,
    text: String,
    layout: Vec<LayoutLine>,
    metadata: DocumentMetadata,
}

impl SourceDocument {
    pub fn new(id: impl Into<String>, kind: DocumentKind, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            text: text.into(),
            layout: Vec::new(),
            metadata: DocumentMetadata::default(),
        }
    }

    /// Attach the PDF text layer. `text` is usually the lines joined by `\n`.
    pub fn with_layout(mut self, layout: Vec<LayoutLine>) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_metadata(mut self, metadata: DocumentMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn layout(&self) -> &[LayoutLine] {
        &self.layout
    }

    pub fn metadata(&self) -> &DocumentMetadata {
        &self.metadata
    }

    pub(crate) fn into_parts(self) -> (String, DocumentKind, String, Vec<LayoutLine>, DocumentMetadata) {
        (self.id, self.kind, self.text, self.layout, self.metadata)
    }
}

// ── Content ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    Heading,
    Paragraph,
    Bullet,
    Figure,
    Table,
    Equation,
}

impl BlockKind {
    /// Figures, tables and equations are never split or merged by the planner.
    pub fn is_atomic(self) -> bool {
        matches!(self, BlockKind::Figure | BlockKind::Table | BlockKind::Equation)
    }
}

/// Heading level used by segmenters when the depth cannot be determined.
/// The tree builder resolves it to one level below the enclosing section.
pub const LEVEL_UNDETERMINED: u8 = 0;

/// A unit of document content.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentBlock {
    pub kind: BlockKind,
    /// Heading depth for headings, list nesting depth for bullets, 0 otherwise.
    pub level: u8,
    /// Position in the document, 0-based, dense.
    pub ordinal: usize,
    /// Plain-text payload.
    pub text: String,
    /// Source-native LaTeX, only for blocks read from LaTeX sources.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub markup: Option<String>,
}

impl ContentBlock {
    pub fn new(kind: BlockKind, level: u8, ordinal: usize, text: impl Into<String>) -> Self {
        Self {
            kind,
            level,
            ordinal,
            text: text.into(),
            markup: None,
        }
    }

    pub fn with_markup(mut self, markup: impl Into<String>) -> Self {
        self.markup = Some(markup.into());
        self
    }

    pub fn is_heading(&self) -> bool {
        self.kind == BlockKind::Heading
    }
}

// ── Hierarchy ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl BlockId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeChild {
    Block(BlockId),
    Section(NodeId),
}

#[derive(Debug, Clone)]
pub struct SectionNode {
    heading: Option<BlockId>,
    parent: Option<NodeId>,
    level: u8,
    children: Vec<NodeChild>,
}

impl SectionNode {
    /// The heading block; `None` for the synthetic root.
    pub fn heading(&self) -> Option<BlockId> {
        self.heading
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn children(&self) -> &[NodeChild] {
        &self.children
    }
}

/// The extracted document: block storage plus the section arena.
///
/// Node 0 is always the synthetic root.
#[derive(Debug, Clone)]
pub struct DocumentTree {
    id: String,
    metadata: DocumentMetadata,
    blocks: Vec<ContentBlock>,
    /// Node that owns each block (by block index).
    owners: Vec<NodeId>,
    nodes: Vec<SectionNode>,
}

impl DocumentTree {
    pub(crate) fn new(id: impl Into<String>, metadata: DocumentMetadata) -> Self {
        Self {
            id: id.into(),
            metadata,
            blocks: Vec::new(),
            owners: Vec::new(),
            nodes: vec![SectionNode {
                heading: None,
                parent: None,
                level: 0,
                children: Vec::new(),
            }],
        }
    }

    /// Append a heading block and open a section for it under `parent`.
    pub(crate) fn push_section(&mut self, parent: NodeId, heading: ContentBlock) -> NodeId {
        let node = NodeId(self.nodes.len());
        let block = BlockId(self.blocks.len());
        self.nodes.push(SectionNode {
            heading: Some(block),
            parent: Some(parent),
            level: heading.level,
            children: Vec::new(),
        });
        self.blocks.push(heading);
        self.owners.push(node);
        self.nodes[parent.0].children.push(NodeChild::Section(node));
        node
    }

    /// Append a content block as the next child of `parent`.
    pub(crate) fn push_block(&mut self, parent: NodeId, block: ContentBlock) -> BlockId {
        let id = BlockId(self.blocks.len());
        self.blocks.push(block);
        self.owners.push(parent);
        self.nodes[parent.0].children.push(NodeChild::Block(id));
        id
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn metadata(&self) -> &DocumentMetadata {
        &self.metadata
    }

    pub fn title(&self) -> Option<&str> {
        self.metadata.title.as_deref()
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &SectionNode {
        &self.nodes[id.0]
    }

    pub fn block(&self, id: BlockId) -> &ContentBlock {
        &self.blocks[id.0]
    }

    /// All blocks in document order, headings included.
    pub fn blocks(&self) -> &[ContentBlock] {
        &self.blocks
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// The section that owns `block` (for a heading, the section it opens).
    pub fn owner(&self, block: BlockId) -> NodeId {
        self.owners[block.0]
    }

    /// Heading text of a section; `None` for the root.
    pub fn heading_text(&self, node: NodeId) -> Option<&str> {
        self.node(node)
            .heading
            .map(|b| self.blocks[b.0].text.as_str())
    }

    /// The child-of-root ancestor of `node` (itself if it is one).
    pub fn top_section(&self, node: NodeId) -> Option<NodeId> {
        let mut current = node;
        loop {
            match self.nodes[current.0].parent {
                None => return None,
                Some(p) if p == self.root() => return Some(current),
                Some(p) => current = p,
            }
        }
    }

    /// Sections directly under the root, with their heading text.
    pub fn top_sections(&self) -> impl Iterator<Item = (NodeId, &str)> + '_ {
        self.node(self.root()).children.iter().filter_map(|c| match c {
            NodeChild::Section(n) => self.heading_text(*n).map(|t| (*n, t)),
            NodeChild::Block(_) => None,
        })
    }
}

// ── Plan ─────────────────────────────────────────────────────────────────

/// One slide: a title and borrowed content.
#[derive(Debug, Clone, Serialize)]
pub struct SlideUnit<'t> {
    pub title: String,
    pub blocks: Vec<&'t ContentBlock>,
    /// Estimated visual weight of `blocks`.
    pub weight: f32,
    /// Title of the top-level section this slide belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    pub continuation: bool,
}

impl<'t> SlideUnit<'t> {
    pub fn new(title: impl Into<String>, section: Option<String>, continuation: bool) -> Self {
        Self {
            title: title.into(),
            blocks: Vec::new(),
            weight: 0.0,
            section,
            continuation,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Ordered slides plus what the title page needs.
#[derive(Debug, Clone, Serialize)]
pub struct PresentationPlan<'t> {
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub slides: Vec<SlideUnit<'t>>,
}

impl PresentationPlan<'_> {
    pub fn slide_count(&self) -> usize {
        self.slides.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_extension() {
        assert_eq!(DocumentKind::from_path(Path::new("a/b.PDF")), Some(DocumentKind::Pdf));
        assert_eq!(DocumentKind::from_path(Path::new("main.tex")), Some(DocumentKind::Latex));
        assert_eq!(DocumentKind::from_path(Path::new("notes.txt")), None);
        assert_eq!(DocumentKind::from_path(Path::new("Makefile")), None);
    }

    #[test]
    fn arena_tracks_owners_and_top_sections() {
        let mut tree = DocumentTree::new("doc", DocumentMetadata::default());
        let root = tree.root();
        let intro = tree.push_section(root, ContentBlock::new(BlockKind::Heading, 3, 0, "Intro"));
        let sub = tree.push_section(intro, ContentBlock::new(BlockKind::Heading, 4, 1, "Motivation"));
        let para = tree.push_block(sub, ContentBlock::new(BlockKind::Paragraph, 0, 2, "text"));

        assert_eq!(tree.owner(para), sub);
        assert_eq!(tree.top_section(sub), Some(intro));
        assert_eq!(tree.top_section(root), None);
        assert_eq!(tree.heading_text(sub), Some("Motivation"));
        assert_eq!(tree.top_sections().map(|(_, t)| t).collect::<Vec<_>>(), vec!["Intro"]);
        assert_eq!(tree.node(sub).parent(), Some(intro));
    }
}
