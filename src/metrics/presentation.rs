//! Beamer presentation parser for scoring.
//!
//! Recovers what the metrics compare: frame titles, frame text and the
//! title page. Both `\begin{frame}…\end{frame}` and the `\frame{…}`
//! shorthand are recognised. Frame titles come from the first frame
//! argument or from `\frametitle`.
//!
//! ## Overlay frames
//!
//! Presentations often build a slide step by step with a run of frames
//! that repeat the previous content plus a little more. Such a run would
//! count as several near-identical slides, so a frame is dropped when at
//! least [`SEQUENTIAL_THRESHOLD`] of its tokens reappear in the next frame.

use crate::error::LoadError;
use crate::pipeline::latex::{
    find_command_group, find_env_end, parse_metadata, read_group, read_optional, strip_comments,
    to_plain,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

/// Share of a frame's tokens that must reappear in the next frame for the
/// first one to be treated as an overlay step.
pub const SEQUENTIAL_THRESHOLD: f64 = 0.9;

static RE_FRAME_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\begin\s*\{frame\}|\\frame\b").unwrap());

static RE_ENV_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\(?:begin|end)\s*\{[^}]*\}(?:\s*\[[^\]]*\])?").unwrap());

static RE_OVERLAY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\\[a-zA-Z]+\*?)\s*<[^>]*>").unwrap());

static RE_TITLE_PAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\(?:titlepage|maketitle)\b").unwrap());

static RE_ITEM: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\item\b").unwrap());

/// One frame of a presentation.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub title: Option<String>,
    /// Plain text of the frame body (a `\frametitle` included).
    pub text: String,
    pub is_title_page: bool,
    pub bullets: usize,
}

/// A parsed Beamer presentation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Presentation {
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub institutes: Vec<String>,
    pub frames: Vec<Frame>,
}

impl Presentation {
    /// Read and parse a `.tex` presentation.
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let bytes = std::fs::read(path).map_err(|source| match source.kind() {
            std::io::ErrorKind::NotFound => LoadError::FileNotFound {
                path: path.to_path_buf(),
            },
            std::io::ErrorKind::PermissionDenied => LoadError::PermissionDenied {
                path: path.to_path_buf(),
            },
            _ => LoadError::Io {
                path: path.to_path_buf(),
                source,
            },
        })?;
        let src = String::from_utf8(bytes).map_err(|_| LoadError::InvalidEncoding {
            path: path.to_path_buf(),
        })?;
        let presentation = Self::parse(&src);
        debug!(
            "{}: {} frames after overlay removal",
            path.display(),
            presentation.frames.len()
        );
        Ok(presentation)
    }

    pub fn parse(src: &str) -> Self {
        let src = strip_comments(src);
        let (title, authors) = parse_metadata(&src);
        let institutes = find_command_group(&src, "institute")
            .map(to_plain)
            .filter(|s| !s.is_empty())
            .into_iter()
            .collect();

        let frames = remove_sequential_frames(scan_frames(&src, title.as_deref()));
        Self {
            title,
            authors,
            institutes,
            frames,
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Titles of the frames that have one, in order.
    pub fn frame_titles(&self) -> Vec<String> {
        self.frames.iter().filter_map(|f| f.title.clone()).collect()
    }

    /// Text of every non-empty frame. The title page contributes the
    /// presentation title, authors and institutes.
    pub fn contents(&self) -> Vec<String> {
        self.frames
            .iter()
            .filter_map(|f| match (&self.title, f.is_title_page) {
                (Some(title), true) => {
                    let parts = [
                        title.clone(),
                        self.authors.join(" "),
                        self.institutes.join(" "),
                    ];
                    let merged = parts
                        .iter()
                        .filter(|p| !p.is_empty())
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(" ");
                    Some(merged)
                }
                _ => (!f.text.is_empty()).then(|| f.text.clone()),
            })
            .collect()
    }

    pub fn word_count(&self) -> usize {
        self.contents().iter().map(|c| c.split_whitespace().count()).sum()
    }

    pub fn bullets_per_frame(&self) -> f64 {
        if self.frames.is_empty() {
            return 0.0;
        }
        let bullets: usize = self.frames.iter().map(|f| f.bullets).sum();
        bullets as f64 / self.frames.len() as f64
    }

    pub fn words_per_frame(&self) -> f64 {
        if self.frames.is_empty() {
            return 0.0;
        }
        self.word_count() as f64 / self.frames.len() as f64
    }
}

fn scan_frames(src: &str, doc_title: Option<&str>) -> Vec<Frame> {
    let mut frames = Vec::new();
    let mut pos = 0;
    while let Some(m) = RE_FRAME_START.find_at(src, pos) {
        let environment = m.as_str().starts_with("\\begin");
        let mut p = skip_overlay(src, m.end());
        let (_, after_opt) = read_optional(src, p);
        p = after_opt;

        let (arg_title, body, end) = if environment {
            let (arg_title, body_start) = match read_group(src, p) {
                Some((g, after)) => (Some(g), after),
                None => (None, p),
            };
            match find_env_end(src, body_start, "frame") {
                Some((body_end, after)) => (arg_title, &src[body_start..body_end], after),
                None => (arg_title, &src[body_start..], src.len()),
            }
        } else {
            match read_group(src, p) {
                Some((g, after)) => (None, g, after),
                None => {
                    pos = m.end();
                    continue;
                }
            }
        };
        frames.push(build_frame(arg_title, body, doc_title));
        pos = end.max(m.end());
    }
    frames
}

fn skip_overlay(src: &str, pos: usize) -> usize {
    let rest = &src[pos..];
    let trimmed = rest.trim_start();
    if trimmed.starts_with('<') {
        if let Some(close) = trimmed.find('>') {
            return pos + (rest.len() - trimmed.len()) + close + 1;
        }
    }
    pos
}

fn build_frame(arg_title: Option<&str>, body: &str, doc_title: Option<&str>) -> Frame {
    let in_arg = arg_title.is_some_and(|t| RE_TITLE_PAGE.is_match(t));
    let is_title_page = in_arg || RE_TITLE_PAGE.is_match(body);

    let title = if is_title_page && doc_title.is_some() {
        doc_title.map(str::to_string)
    } else if let Some(t) = arg_title.filter(|_| !in_arg) {
        Some(plain(t))
    } else {
        find_command_group(body, "frametitle").map(plain)
    }
    .filter(|t| !t.is_empty());

    Frame {
        title,
        text: plain(body),
        is_title_page,
        bullets: RE_ITEM.find_iter(body).count(),
    }
}

fn plain(fragment: &str) -> String {
    let without_overlays = RE_OVERLAY.replace_all(fragment, "$1");
    let without_envs = RE_ENV_MARKER.replace_all(&without_overlays, " ");
    to_plain(&without_envs)
}

/// Drop each frame whose tokens reappear (by the threshold) in the frame
/// that follows it.
fn remove_sequential_frames(frames: Vec<Frame>) -> Vec<Frame> {
    let token_sets: Vec<(usize, HashSet<&str>)> = frames
        .iter()
        .map(|f| {
            let tokens: Vec<&str> = f.text.split_whitespace().collect();
            let set = tokens.iter().copied().collect();
            (tokens.len(), set)
        })
        .collect();

    let mut keep = vec![true; frames.len()];
    for i in 1..frames.len() {
        let prev_tokens: Vec<&str> = frames[i - 1].text.split_whitespace().collect();
        if prev_tokens.is_empty() {
            continue;
        }
        let next = &token_sets[i].1;
        let common = prev_tokens.iter().filter(|t| next.contains(*t)).count();
        if common as f64 / token_sets[i - 1].0 as f64 >= SEQUENTIAL_THRESHOLD {
            debug!("dropping overlay frame {}", i - 1);
            keep[i - 1] = false;
        }
    }

    frames
        .into_iter()
        .zip(keep)
        .filter_map(|(f, k)| k.then_some(f))
        .collect()
}
