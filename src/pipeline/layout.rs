//! PDF layout segmentation: text lines with font sizes → content blocks.
//!
//! ## Heading detection
//!
//! The most frequent font size (weighted by characters) is the body size.
//! Lines at least 1.5 pt larger are headings, ranked by size with the
//! largest size the shallowest level. Numbered headings (`2.1 Method`)
//! take their level from the numbering depth instead, and short all-caps
//! lines at body size (`ABSTRACT`) become headings of undetermined level.
//!
//! ## Page furniture
//!
//! Page numbers are dropped everywhere. Running headers and footers are
//! dropped when the same line (digits ignored) shows up on at least half of
//! the pages of a document with three or more pages.

use crate::model::{BlockKind, ContentBlock, LayoutLine, LEVEL_UNDETERMINED};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Minimum size difference (pt) between body text and a heading.
const HEADING_DELTA: f32 = 1.5;

/// Level assigned to the largest heading size (a LaTeX `\section`).
const FIRST_HEADING_LEVEL: u8 = 3;

static RE_PAGE_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?i:page\s+)?\d{1,4}(?:\s*(?:/|of)\s*\d{1,4})?$|^[ivx]{1,4}$").unwrap()
});

static RE_NUMBERED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2}(?:\.\d{1,2})*)(\.?)\s+(\p{Lu}.*)$").unwrap());

static RE_BULLET_GLYPH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[•◦▪‣∙·●○■□–\-\*]\s+(.+)$").unwrap());

static RE_ENUMERATED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\(?(?:\d{1,2}|[a-z])[.)]\s+(.+)$").unwrap());

static RE_CAPTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(Figure|Fig\.|Table)\s+\d+[.:]?(?:\s|$)").unwrap());

/// Blocks plus the title guessed from the first page.
#[derive(Debug, Clone, Default)]
pub struct LayoutSegments {
    pub blocks: Vec<ContentBlock>,
    pub title: Option<String>,
}

// ── Font statistics ──────────────────────────────────────────────────────

/// Font size distribution of a document.
#[derive(Debug, Clone, Default)]
pub struct FontStatistics {
    /// Most common (char-weighted) size.
    pub body_size: f32,
    /// Distinct heading sizes, largest first.
    pub heading_sizes: Vec<f32>,
}

impl FontStatistics {
    pub fn from_lines<'a>(lines: impl IntoIterator<Item = &'a LayoutLine>) -> Self {
        let mut histogram: HashMap<i32, usize> = HashMap::new();
        for line in lines {
            if line.font_size > 0.0 {
                *histogram
                    .entry((line.font_size * 10.0).round() as i32)
                    .or_insert(0) += line.text.chars().count();
            }
        }
        let Some(body_key) = histogram
            .iter()
            .max_by(|(ka, ca), (kb, cb)| ca.cmp(cb).then(kb.cmp(ka)))
            .map(|(k, _)| *k)
        else {
            return Self {
                body_size: 10.0,
                heading_sizes: Vec::new(),
            };
        };
        let body_size = body_key as f32 / 10.0;

        let mut heading_sizes: Vec<f32> = histogram
            .keys()
            .map(|k| *k as f32 / 10.0)
            .filter(|s| *s >= body_size + HEADING_DELTA)
            .collect();
        heading_sizes.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

        Self {
            body_size,
            heading_sizes,
        }
    }

    pub fn is_heading_size(&self, size: f32) -> bool {
        size >= self.body_size + HEADING_DELTA
    }

    /// Heading level for a size, shallowest for the largest size. Sizes are
    /// folded into three levels.
    pub fn heading_level(&self, size: f32) -> Option<u8> {
        if !self.is_heading_size(size) {
            return None;
        }
        let rank = self
            .heading_sizes
            .iter()
            .position(|h| size >= h - 0.25)
            .unwrap_or(self.heading_sizes.len());
        Some(FIRST_HEADING_LEVEL + rank.min(2) as u8)
    }
}

// ── Segmentation ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum LineClass {
    Heading(u8),
    Bullet(String),
    Caption(BlockKind),
    Body,
}

/// Segment the PDF text layer into content blocks.
pub fn segment(lines: &[LayoutLine], metadata_title: Option<&str>) -> LayoutSegments {
    let mut content = drop_furniture(lines);
    let stats = FontStatistics::from_lines(content.iter().copied());

    let (title_lines, guessed_title) = find_title(&content, &stats);
    if title_lines > 0 {
        content.drain(..title_lines);
    }
    let title = metadata_title.map(str::to_string).or(guessed_title);

    let stats = FontStatistics::from_lines(content.iter().copied());
    debug!(
        "Layout: body {:.1}pt, heading sizes {:?}, {} lines",
        stats.body_size,
        stats.heading_sizes,
        content.len()
    );

    let short_line = short_line_threshold(&content, &stats);
    let mut builder = BlockBuilder::default();
    let mut prev: Option<&LayoutLine> = None;

    for line in content {
        match classify(line, &stats) {
            LineClass::Heading(level) => {
                builder.flush();
                builder.push(BlockKind::Heading, level, line.text.clone());
            }
            LineClass::Bullet(text) => {
                builder.flush();
                builder.start(BlockKind::Bullet, 1, text);
            }
            LineClass::Caption(kind) => {
                builder.flush();
                builder.start(kind, 0, line.text.clone());
            }
            LineClass::Body => {
                let continues = builder.pending.is_some()
                    && prev.is_some_and(|p| !is_paragraph_break(p, line, short_line));
                if continues {
                    builder.append(&line.text);
                } else {
                    builder.flush();
                    builder.start(BlockKind::Paragraph, 0, line.text.clone());
                }
            }
        }
        prev = Some(line);
    }
    builder.flush();

    LayoutSegments {
        blocks: builder.blocks,
        title,
    }
}

/// Drop page numbers and running headers/footers.
fn drop_furniture(lines: &[LayoutLine]) -> Vec<&LayoutLine> {
    let pages: HashSet<usize> = lines.iter().map(|l| l.page).collect();
    let mut running: HashSet<String> = HashSet::new();

    if pages.len() >= 3 {
        let mut seen: HashMap<String, HashSet<usize>> = HashMap::new();
        for line in lines {
            if line.text.chars().count() <= 80 {
                seen.entry(furniture_key(&line.text))
                    .or_default()
                    .insert(line.page);
            }
        }
        running = seen
            .into_iter()
            .filter(|(_, on)| on.len() * 2 >= pages.len())
            .map(|(key, _)| key)
            .collect();
    }

    lines
        .iter()
        .filter(|l| {
            let text = l.text.trim();
            !RE_PAGE_NUMBER.is_match(text) && !running.contains(&furniture_key(text))
        })
        .collect()
}

fn furniture_key(text: &str) -> String {
    text.trim()
        .chars()
        .map(|c| if c.is_ascii_digit() { '#' } else { c.to_ascii_lowercase() })
        .collect()
}

/// The first run of the largest lines on page 1, when they are clearly
/// larger than body text.
fn find_title(lines: &[&LayoutLine], stats: &FontStatistics) -> (usize, Option<String>) {
    let first_page: Vec<&&LayoutLine> = lines.iter().take_while(|l| l.page == lines[0].page).collect();
    let Some(max) = first_page
        .iter()
        .map(|l| l.font_size)
        .max_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
    else {
        return (0, None);
    };
    if !stats.is_heading_size(max) {
        return (0, None);
    }

    let Some(start) = first_page.iter().position(|l| (l.font_size - max).abs() < 0.25) else {
        return (0, None);
    };
    // Only lines before the title (e.g. a venue banner) may precede it.
    if start > 3 {
        return (0, None);
    }
    let run = first_page[start..]
        .iter()
        .take_while(|l| (l.font_size - max).abs() < 0.25)
        .count();
    let title = first_page[start..start + run]
        .iter()
        .map(|l| l.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    (start + run, Some(title))
}

fn classify(line: &LayoutLine, stats: &FontStatistics) -> LineClass {
    let text = line.text.trim();
    let words = text.split_whitespace().count();
    let ends_sentence = text.ends_with('.') || text.ends_with(',') || text.ends_with(';');

    if let Some(caps) = RE_NUMBERED.captures(text) {
        let depth = caps[1].split('.').count();
        let dotted_single = depth == 1 && !caps[2].is_empty();
        let large = stats.is_heading_size(line.font_size);
        if words <= 12 && !ends_sentence && (large || !dotted_single) {
            return LineClass::Heading(FIRST_HEADING_LEVEL - 1 + depth.min(3) as u8);
        }
    }

    if let Some(level) = stats.heading_level(line.font_size) {
        if words <= 15 && !ends_sentence {
            return LineClass::Heading(level);
        }
    }

    if RE_CAPTION.is_match(text) {
        let kind = if text.starts_with("Table") {
            BlockKind::Table
        } else {
            BlockKind::Figure
        };
        return LineClass::Caption(kind);
    }

    if let Some(caps) = RE_BULLET_GLYPH
        .captures(text)
        .or_else(|| RE_ENUMERATED.captures(text))
    {
        return LineClass::Bullet(caps[1].trim().to_string());
    }

    if is_all_caps_heading(text, words) {
        return LineClass::Heading(LEVEL_UNDETERMINED);
    }
    LineClass::Body
}

fn is_all_caps_heading(text: &str, words: usize) -> bool {
    let letters: Vec<char> = text.chars().filter(|c| c.is_alphabetic()).collect();
    words <= 6 && letters.len() >= 4 && letters.iter().all(|c| c.is_uppercase())
}

/// Lines shorter than this (in chars) that end a sentence close a paragraph.
fn short_line_threshold(lines: &[&LayoutLine], stats: &FontStatistics) -> usize {
    let mut lengths: Vec<usize> = lines
        .iter()
        .filter(|l| (l.font_size - stats.body_size).abs() < 0.5)
        .map(|l| l.text.chars().count())
        .collect();
    if lengths.is_empty() {
        return 60;
    }
    lengths.sort_unstable();
    lengths[lengths.len() / 2] * 4 / 5
}

fn is_paragraph_break(prev: &LayoutLine, line: &LayoutLine, short_line: usize) -> bool {
    let prev_text = prev.text.trim_end();
    let terminal = prev_text.ends_with(['.', '!', '?', ':'].as_slice());
    let short = prev_text.chars().count() < short_line;
    (terminal && short) || (prev.font_size - line.font_size).abs() > 1.0
}

#[derive(Default)]
struct BlockBuilder {
    blocks: Vec<ContentBlock>,
    pending: Option<(BlockKind, u8, String)>,
}

impl BlockBuilder {
    fn push(&mut self, kind: BlockKind, level: u8, text: String) {
        let ordinal = self.blocks.len();
        self.blocks.push(ContentBlock::new(kind, level, ordinal, text));
    }

    fn start(&mut self, kind: BlockKind, level: u8, text: String) {
        self.pending = Some((kind, level, text));
    }

    /// Join a continuation line, mending words hyphenated across lines.
    fn append(&mut self, line: &str) {
        let Some((_, _, text)) = self.pending.as_mut() else {
            return;
        };
        let line = line.trim();
        let mut tail = text.chars().rev();
        let hyphenated = tail.next() == Some('-')
            && tail.next().is_some_and(char::is_alphabetic)
            && line.chars().next().is_some_and(char::is_lowercase);
        if hyphenated {
            text.pop();
        } else {
            text.push(' ');
        }
        text.push_str(line);
    }

    fn flush(&mut self) {
        if let Some((kind, level, text)) = self.pending.take() {
            self.push(kind, level, text);
        }
    }
}
