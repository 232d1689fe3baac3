//! LaTeX segmentation: turn a flattened LaTeX source into content blocks.
//!
//! The segmenter is a single forward scan over the document body. It does
//! not build a TeX parse tree; it recognises the handful of constructs that
//! carry presentational structure (sectioning commands, lists, floats,
//! display math) and treats everything else as paragraph text.
//!
//! ## Payloads
//!
//! Every block gets a plain-text `text` (used for retrieval and as the
//! escaped fallback) and, when it survives [`validate_markup`], the
//! original LaTeX as `markup` so inline formatting and math render as the
//! author wrote them.
//!
//! ## Scope of the body
//!
//! Only the part between `\begin{document}` and `\end{document}` is read,
//! and scanning stops at the bibliography or `\appendix`.

use crate::error::ExtractionError;
use crate::model::{BlockKind, ContentBlock, LEVEL_UNDETERMINED};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Blocks plus the title-page metadata found in the source.
#[derive(Debug, Clone, Default)]
pub struct LatexSegments {
    pub blocks: Vec<ContentBlock>,
    pub title: Option<String>,
    pub authors: Vec<String>,
}

/// Segment a flattened LaTeX source (includes resolved, comments removed).
pub fn segment(id: &str, src: &str) -> Result<LatexSegments, ExtractionError> {
    let (title, authors) = parse_metadata(src);
    let body = document_body(src);
    let top_level = top_sectioning_level(body);
    debug!("{}: body {} bytes, top sectioning level {}", id, body.len(), top_level);

    let blocks = Segmenter::new(id, body, top_level).run()?;
    Ok(LatexSegments {
        blocks,
        title,
        authors,
    })
}

// ── Comments ─────────────────────────────────────────────────────────────

/// Remove `%` comments. Whole-line comments disappear without leaving a
/// blank line behind, so they never split a paragraph.
pub fn strip_comments(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    for line in src.lines() {
        if line.trim_start().starts_with('%') {
            continue;
        }
        out.push_str(strip_line_comment(line));
        out.push('\n');
    }
    out
}

fn strip_line_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'%' => return &line[..i],
            _ => i += 1,
        }
    }
    line
}

// ── Body & metadata ──────────────────────────────────────────────────────

static RE_BODY_END: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\(?:appendix\b|bibliography\s*\{|printbibliography\b|begin\{thebibliography\})")
        .unwrap()
});

static RE_SECTIONING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\(part|chapter|section|subsection|subsubsection)\*?\s*[\[{]").unwrap()
});

static RE_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\(?:icml)?title\s*(?:\[[^\]]*\])?\s*\{").unwrap());

static RE_AUTHOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\author\s*(?:\[[^\]]*\])?\s*\{").unwrap());

static RE_ICML_AUTHOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\icmlauthor\s*\{").unwrap());

static RE_AND: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\and\b").unwrap());

static RE_REFERENCES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"~?\\(?:cite[a-zA-Z]*|label|ref|eqref|autoref|cref|Cref|pageref)\*?(?:\[[^\]]*\])*\{[^}]*\}",
    )
    .unwrap()
});

static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// The document body: between `\begin{document}` and `\end{document}`,
/// cut at the bibliography or appendix.
fn document_body(src: &str) -> &str {
    let start = src
        .find("\\begin{document}")
        .map(|i| i + "\\begin{document}".len())
        .unwrap_or(0);
    let mut end = src[start..]
        .find("\\end{document}")
        .map(|i| start + i)
        .unwrap_or(src.len());
    if let Some(m) = RE_BODY_END.find(&src[start..end]) {
        end = start + m.start();
    }
    &src[start..end]
}

/// The shallowest sectioning level used in the body (section if none).
fn top_sectioning_level(body: &str) -> u8 {
    RE_SECTIONING
        .captures_iter(body)
        .filter_map(|c| section_level(&c[1]))
        .min()
        .unwrap_or(3)
}

pub(crate) fn parse_metadata(src: &str) -> (Option<String>, Vec<String>) {
    let title = RE_TITLE
        .find(src)
        .and_then(|m| read_group(src, m.end() - 1))
        .map(|(g, _)| to_plain(g))
        .filter(|t| !t.is_empty());

    let mut authors = Vec::new();
    if let Some((group, _)) = RE_AUTHOR
        .find(src)
        .and_then(|m| read_group(src, m.end() - 1))
    {
        for part in RE_AND.split(group) {
            let name = part.split("\\\\").next().unwrap_or_default();
            let name = to_plain(name);
            let name = name.trim_matches(|c: char| c == ',' || c.is_whitespace());
            if !name.is_empty() {
                authors.push(name.to_string());
            }
        }
    }
    for m in RE_ICML_AUTHOR.find_iter(src) {
        if let Some((group, _)) = read_group(src, m.end() - 1) {
            let name = to_plain(group);
            if !name.is_empty() && !authors.contains(&name) {
                authors.push(name);
            }
        }
    }
    (title, authors)
}

fn section_level(cmd: &str) -> Option<u8> {
    match cmd {
        "part" => Some(1),
        "chapter" => Some(2),
        "section" => Some(3),
        "subsection" => Some(4),
        "subsubsection" => Some(5),
        "paragraph" | "subparagraph" => Some(LEVEL_UNDETERMINED),
        _ => None,
    }
}

// ── Lexical helpers ──────────────────────────────────────────────────────

fn skip_ws(s: &str, mut pos: usize) -> usize {
    let bytes = s.as_bytes();
    while pos < bytes.len() && matches!(bytes[pos], b' ' | b'\t' | b'\n' | b'\r') {
        pos += 1;
    }
    pos
}

/// Read a `{…}` group at `pos` (after optional whitespace). Returns the
/// inner text and the position after the closing brace.
pub(crate) fn read_group(s: &str, pos: usize) -> Option<(&str, usize)> {
    let start = skip_ws(s, pos);
    let bytes = s.as_bytes();
    if bytes.get(start) != Some(&b'{') {
        return None;
    }
    let mut depth = 0usize;
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                i += 2;
                continue;
            }
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some((&s[start + 1..i], i + 1));
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Read an optional `[…]` argument at `pos`.
pub(crate) fn read_optional(s: &str, pos: usize) -> (Option<&str>, usize) {
    let start = skip_ws(s, pos);
    let bytes = s.as_bytes();
    if bytes.get(start) != Some(&b'[') {
        return (None, pos);
    }
    let mut depth = 0usize;
    let mut braces = 0usize;
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                i += 2;
                continue;
            }
            b'{' => braces += 1,
            b'}' => braces = braces.saturating_sub(1),
            b'[' if braces == 0 => depth += 1,
            b']' if braces == 0 => {
                depth -= 1;
                if depth == 0 {
                    return (Some(&s[start + 1..i]), i + 1);
                }
            }
            _ => {}
        }
        i += 1;
    }
    (None, pos)
}

/// Skip a `*`, any optional arguments and any directly following groups.
fn skip_arguments(s: &str, mut pos: usize) -> usize {
    if s.as_bytes().get(pos) == Some(&b'*') {
        pos += 1;
    }
    loop {
        let (opt, after) = read_optional(s, pos);
        if opt.is_some() {
            pos = after;
            continue;
        }
        match read_group(s, pos) {
            Some((_, after)) => pos = after,
            None => return pos,
        }
    }
}

/// Name of the command starting at `pos` (which holds a backslash).
/// Letter commands return the run of letters; symbol commands the one char.
fn command_name(s: &str, pos: usize) -> &str {
    let rest = &s[pos + 1..];
    let letters = rest
        .bytes()
        .take_while(|b| b.is_ascii_alphabetic())
        .count();
    if letters > 0 {
        &rest[..letters]
    } else {
        rest.chars()
            .next()
            .map(|c| &rest[..c.len_utf8()])
            .unwrap_or("")
    }
}

/// Find the `\end{name}` matching a `\begin{name}` whose content starts at
/// `from`. Returns (content end, position after `\end{name}`).
pub(crate) fn find_env_end(s: &str, from: usize, name: &str) -> Option<(usize, usize)> {
    let open = format!("\\begin{{{name}}}");
    let close = format!("\\end{{{name}}}");
    let mut depth = 1usize;
    let mut pos = from;
    loop {
        let next_close = s[pos..].find(&close).map(|i| pos + i)?;
        match s[pos..next_close].find(&open) {
            Some(i) => {
                depth += 1;
                pos = pos + i + open.len();
            }
            None => {
                depth -= 1;
                if depth == 0 {
                    return Some((next_close, next_close + close.len()));
                }
                pos = next_close + close.len();
            }
        }
    }
}

// ── Plain text & markup ──────────────────────────────────────────────────

const DROPPED_WITH_ARGS: &[&str] = &[
    "label", "ref", "eqref", "autoref", "cref", "Cref", "pageref", "footnote", "thanks",
    "vspace", "hspace", "includegraphics", "bibliographystyle", "index", "documentclass",
    "usepackage", "newcommand", "renewcommand", "providecommand", "DeclareMathOperator",
    "setlength", "setcounter", "graphicspath", "hypersetup", "def", "input", "include",
];

/// Convert a LaTeX fragment to plain text: formatting commands are
/// unwrapped, references and citations dropped, math kept as source.
pub fn to_plain(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    let bytes = src.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if i + 1 < bytes.len() => {
                let name = command_name(src, i);
                let after = i + 1 + name.len();
                if !name.as_bytes()[0].is_ascii_alphabetic() {
                    match name {
                        "\\" | "," | ";" | " " | "!" => out.push(' '),
                        "%" | "&" | "_" | "#" | "$" | "{" | "}" => out.push_str(name),
                        _ => {}
                    }
                    i = after;
                } else if name.starts_with("cite") || DROPPED_WITH_ARGS.contains(&name) {
                    i = skip_arguments(src, after);
                } else if name == "url" {
                    match read_group(src, after) {
                        Some((g, end)) => {
                            out.push_str(g);
                            i = end;
                        }
                        None => i = after,
                    }
                } else if name == "href" {
                    i = match read_group(src, after) {
                        Some((_, end)) => end,
                        None => after,
                    };
                } else {
                    let (_, end) = read_optional(src, after);
                    i = end;
                    if matches!(name, "item" | "quad" | "qquad" | "newline" | "par") {
                        out.push(' ');
                    }
                }
            }
            b'{' | b'}' | b'$' => i += 1,
            b'~' => {
                out.push(' ');
                i += 1;
            }
            _ => {
                let ch = src[i..].chars().next().unwrap_or(' ');
                out.push(ch);
                i += ch.len_utf8();
            }
        }
    }
    collapse_ws(&out)
}

fn collapse_ws(s: &str) -> String {
    RE_WS.replace_all(s.trim(), " ").into_owned()
}

/// Source markup with cross-references removed and whitespace collapsed.
fn clean_markup(raw: &str) -> String {
    collapse_ws(&RE_REFERENCES.replace_all(raw, ""))
}

/// Check that a markup fragment can be dropped into a frame verbatim.
///
/// Rejects control characters, unbalanced braces or `$`, mismatched
/// environments and document/frame delimiters.
pub fn validate_markup(markup: &str) -> Result<(), String> {
    if let Some(c) = markup
        .chars()
        .find(|c| c.is_control() && !matches!(c, '\n' | '\t' | '\r'))
    {
        return Err(format!("control character U+{:04X}", c as u32));
    }

    let bytes = markup.as_bytes();
    let mut depth: i64 = 0;
    let mut dollars = 0usize;
    let mut envs: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if i + 1 < bytes.len() => {
                let name = command_name(markup, i);
                let after = i + 1 + name.len();
                if name == "begin" || name == "end" {
                    let (env, end) = read_group(markup, after)
                        .ok_or_else(|| format!("\\{name} without environment name"))?;
                    if matches!(env, "document" | "frame") {
                        return Err(format!("'{env}' delimiter inside a payload"));
                    }
                    if name == "begin" {
                        envs.push(env);
                    } else if envs.pop() != Some(env) {
                        return Err(format!("unexpected \\end{{{env}}}"));
                    }
                    i = end;
                    continue;
                }
                if name == "documentclass" {
                    return Err("\\documentclass inside a payload".into());
                }
                i = after;
                continue;
            }
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth < 0 {
                    return Err("unbalanced '}'".into());
                }
            }
            b'$' => dollars += 1,
            _ => {}
        }
        i += 1;
    }
    if depth != 0 {
        return Err("unbalanced '{'".into());
    }
    if dollars % 2 != 0 {
        return Err("unbalanced '$'".into());
    }
    if let Some(env) = envs.last() {
        return Err(format!("environment '{env}' is never closed"));
    }
    Ok(())
}

// ── Segmenter ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnvClass {
    Math,
    Figure,
    Table,
    Tabular,
    List,
    Abstract,
    Skip,
    Transparent,
}

fn classify_env(name: &str) -> EnvClass {
    match name.trim_end_matches('*') {
        "equation" | "align" | "gather" | "multline" | "eqnarray" | "displaymath" | "flalign"
        | "alignat" => EnvClass::Math,
        "figure" | "wrapfigure" => EnvClass::Figure,
        "table" | "wraptable" => EnvClass::Table,
        "tabular" | "tabularx" | "longtable" => EnvClass::Tabular,
        "itemize" | "enumerate" | "description" => EnvClass::List,
        "abstract" => EnvClass::Abstract,
        "verbatim" | "Verbatim" | "lstlisting" | "minted" | "comment" | "tikzpicture"
        | "algorithm" | "algorithmic" | "thebibliography" => EnvClass::Skip,
        _ => EnvClass::Transparent,
    }
}

const SKIPPED_COMMANDS: &[&str] = &[
    "title", "author", "date", "thanks", "affiliation", "address", "email", "keywords",
    "icmltitle", "icmltitlerunning", "icmlauthor", "icmlaffiliation", "icmlcorrespondingauthor",
    "icmlkeywords", "icmlsetsymbol", "label", "bibliographystyle", "vspace", "hspace",
    "caption", "input", "include", "documentclass", "usepackage", "newcommand",
    "renewcommand", "providecommand", "setlength", "setcounter",
];

const DROPPED_COMMANDS: &[&str] = &[
    "maketitle", "tableofcontents", "listoffigures", "listoftables", "newpage", "clearpage",
    "cleardoublepage", "noindent", "centering", "onecolumn", "twocolumn", "pagebreak",
    "linebreak", "printAffiliationsAndNotice",
];

struct Segmenter<'s> {
    id: &'s str,
    src: &'s str,
    pos: usize,
    top_level: u8,
    blocks: Vec<ContentBlock>,
    para: String,
    item: Option<String>,
    list_depth: u8,
    /// Environments opened in the body and scanned through.
    envs: Vec<&'s str>,
}

impl<'s> Segmenter<'s> {
    fn new(id: &'s str, src: &'s str, top_level: u8) -> Self {
        Self {
            id,
            src,
            pos: 0,
            top_level,
            blocks: Vec::new(),
            para: String::new(),
            item: None,
            list_depth: 0,
            envs: Vec::new(),
        }
    }

    fn run(mut self) -> Result<Vec<ContentBlock>, ExtractionError> {
        let src = self.src;
        while self.pos < src.len() {
            let rest = &src[self.pos..];
            if rest.starts_with("\\[") {
                self.display_math("\\[", "\\]")?;
            } else if rest.starts_with("$$") {
                self.display_math("$$", "$$")?;
            } else if rest.starts_with('\\') && rest.len() > 1 {
                self.command()?;
            } else if rest.starts_with('\n') && is_blank_line(rest) {
                self.pos = skip_ws(src, self.pos);
                self.paragraph_break();
            } else {
                let ch = rest.chars().next().unwrap_or(' ');
                self.push_text(&rest[..ch.len_utf8()]);
                self.pos += ch.len_utf8();
            }
        }
        self.flush_item();
        self.flush_paragraph();

        if let Some(env) = self.envs.last() {
            return Err(ExtractionError::UnbalancedEnvironment {
                id: self.id.to_string(),
                env: env.to_string(),
            });
        }
        Ok(self.blocks)
    }

    // ── buffers ──

    fn push_text(&mut self, s: &str) {
        match self.item.as_mut() {
            Some(item) => item.push_str(s),
            None => self.para.push_str(s),
        }
    }

    fn paragraph_break(&mut self) {
        if self.item.is_some() {
            self.push_text(" ");
        } else {
            self.flush_paragraph();
        }
    }

    fn push_block(&mut self, kind: BlockKind, level: u8, text: String, markup: Option<String>) {
        let mut block = ContentBlock::new(kind, level, self.blocks.len(), text);
        if let Some(markup) = markup {
            match validate_markup(&markup) {
                Ok(()) => block.markup = Some(markup),
                Err(reason) => debug!(
                    "{}: block {} keeps plain text only ({})",
                    self.id, block.ordinal, reason
                ),
            }
        }
        self.blocks.push(block);
    }

    fn flush_paragraph(&mut self) {
        let raw = std::mem::take(&mut self.para);
        let text = to_plain(&raw);
        if text.is_empty() {
            return;
        }
        self.push_block(BlockKind::Paragraph, 0, text, Some(clean_markup(&raw)));
    }

    fn flush_item(&mut self) {
        if let Some(raw) = self.item.take() {
            let text = to_plain(&raw);
            if !text.is_empty() {
                let level = self.list_depth.max(1);
                self.push_block(BlockKind::Bullet, level, text, Some(clean_markup(&raw)));
            }
        }
    }

    /// Close the open paragraph/item before a block-level construct.
    fn interrupt(&mut self) {
        self.flush_item();
        self.flush_paragraph();
    }

    /// Reopen an item buffer when a block construct sat inside a list.
    fn resume(&mut self) {
        if self.list_depth > 0 {
            self.item = Some(String::new());
        }
    }

    fn unbalanced(&self, env: &str) -> ExtractionError {
        ExtractionError::UnbalancedEnvironment {
            id: self.id.to_string(),
            env: env.to_string(),
        }
    }

    // ── constructs ──

    fn command(&mut self) -> Result<(), ExtractionError> {
        let src = self.src;
        let name = command_name(src, self.pos);
        let after = self.pos + 1 + name.len();

        if name.is_empty() || !name.as_bytes()[0].is_ascii_alphabetic() {
            self.push_text(&src[self.pos..after]);
            self.pos = after;
            return Ok(());
        }

        match name {
            "begin" => return self.begin_env(after),
            "end" => {
                self.end_env(after);
                return Ok(());
            }
            "item" if self.list_depth > 0 => {
                self.flush_item();
                let (label, end) = read_optional(self.src, after);
                self.item = Some(match label {
                    Some(l) if self.envs.last() == Some(&"description") => format!("{l}: "),
                    _ => String::new(),
                });
                self.pos = end;
                return Ok(());
            }
            "includegraphics" => {
                self.interrupt();
                let (_, opt_end) = read_optional(self.src, after);
                match read_group(self.src, opt_end) {
                    Some((path, end)) => {
                        self.push_figure(None, &[path.trim()]);
                        self.pos = end;
                    }
                    None => self.pos = after,
                }
                self.resume();
                return Ok(());
            }
            "par" => {
                self.paragraph_break();
                self.pos = after;
                return Ok(());
            }
            _ => {}
        }

        if let Some(level) = section_level(name) {
            let mut p = after;
            if self.src.as_bytes().get(p) == Some(&b'*') {
                p += 1;
            }
            let (_, p) = read_optional(self.src, p);
            if let Some((title, end)) = read_group(self.src, p) {
                self.interrupt();
                let text = to_plain(title);
                if !text.is_empty() {
                    self.push_block(BlockKind::Heading, level, text, None);
                }
                self.pos = end;
                return Ok(());
            }
        }

        if SKIPPED_COMMANDS.contains(&name) {
            self.pos = skip_arguments(self.src, after);
        } else if DROPPED_COMMANDS.contains(&name) {
            self.pos = after;
        } else {
            self.push_text(&src[self.pos..after]);
            self.pos = after;
        }
        Ok(())
    }

    fn begin_env(&mut self, after_begin: usize) -> Result<(), ExtractionError> {
        let src = self.src;
        let Some((name, content_start)) = read_group(src, after_begin) else {
            self.push_text("\\begin");
            self.pos = after_begin;
            return Ok(());
        };
        let name = name.trim();

        match classify_env(name) {
            EnvClass::Math | EnvClass::Figure | EnvClass::Table | EnvClass::Tabular | EnvClass::Skip => {
                let (content_end, end) = find_env_end(src, content_start, name)
                    .ok_or_else(|| self.unbalanced(name))?;
                let content = &src[content_start..content_end];
                let class = classify_env(name);
                if class != EnvClass::Skip {
                    self.interrupt();
                }
                match class {
                    EnvClass::Math => self.push_equation(name, content),
                    EnvClass::Figure => self.figure_env(content),
                    EnvClass::Table => self.table_env(content),
                    EnvClass::Tabular => {
                        let source = &src[self.pos..end];
                        self.push_table(None, Some(source), content);
                    }
                    _ => {}
                }
                if class != EnvClass::Skip {
                    self.resume();
                }
                self.pos = end;
            }
            EnvClass::List => {
                self.interrupt();
                self.list_depth += 1;
                self.envs.push(name);
                self.pos = skip_arguments_opt(self.src, content_start);
            }
            EnvClass::Abstract => {
                self.interrupt();
                self.push_block(BlockKind::Heading, self.top_level, "Abstract".into(), None);
                self.envs.push(name);
                self.pos = content_start;
            }
            EnvClass::Transparent => {
                self.flush_paragraph();
                self.envs.push(name);
                self.pos = if matches!(name, "minipage" | "multicols" | "wrapfigure") {
                    skip_arguments(self.src, content_start)
                } else {
                    skip_arguments_opt(self.src, content_start)
                };
            }
        }
        Ok(())
    }

    fn end_env(&mut self, after_end: usize) {
        let Some((name, end)) = read_group(self.src, after_end) else {
            self.pos = after_end;
            return;
        };
        let name = name.trim();
        self.pos = end;

        if self.envs.last() != Some(&name) {
            debug!("{}: stray \\end{{{}}} ignored", self.id, name);
            return;
        }
        self.envs.pop();
        match classify_env(name) {
            EnvClass::List => {
                self.flush_item();
                self.list_depth = self.list_depth.saturating_sub(1);
                self.resume();
            }
            _ => {
                if self.item.is_none() {
                    self.flush_paragraph();
                }
            }
        }
    }

    fn display_math(&mut self, open: &str, close: &str) -> Result<(), ExtractionError> {
        let src = self.src;
        let start = self.pos + open.len();
        let end = src[start..]
            .find(close)
            .map(|i| start + i)
            .ok_or_else(|| self.unbalanced(open))?;
        self.interrupt();
        self.push_equation("equation*", &src[start..end]);
        self.resume();
        self.pos = end + close.len();
        Ok(())
    }

    fn push_equation(&mut self, env: &str, content: &str) {
        let math = clean_markup(content);
        let math = math
            .replace("\\nonumber", "")
            .replace("\\notag", "")
            .trim()
            .to_string();
        if math.is_empty() {
            return;
        }
        let env = match env.trim_end_matches('*') {
            "displaymath" => "equation".to_string(),
            base => base.to_string(),
        };
        let markup = format!("\\begin{{{env}*}}\n{math}\n\\end{{{env}*}}");
        self.push_block(BlockKind::Equation, 0, math, Some(markup));
    }

    fn figure_env(&mut self, content: &str) {
        let caption = find_command_group(content, "caption").map(to_plain);
        let paths: Vec<&str> = find_all_command_groups(content, "includegraphics")
            .into_iter()
            .map(str::trim)
            .collect();
        self.push_figure(caption, &paths);
    }

    fn push_figure(&mut self, caption: Option<String>, paths: &[&str]) {
        let text = caption
            .filter(|c| !c.is_empty())
            .or_else(|| paths.first().map(|p| figure_label(p)))
            .unwrap_or_else(|| "Figure".to_string());
        let markup = if paths.is_empty() {
            None
        } else {
            let width = 1.0 / paths.len() as f32 * 0.95;
            Some(
                paths
                    .iter()
                    .map(|p| {
                        format!(
                            "\\includegraphics[width={width:.2}\\linewidth,height=0.6\\textheight,keepaspectratio]{{{p}}}"
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\\hfill\n"),
            )
        };
        self.push_block(BlockKind::Figure, 0, text, markup);
    }

    fn table_env(&mut self, content: &str) {
        let caption = find_command_group(content, "caption").map(to_plain);
        let tabular = ["tabular", "tabular*", "tabularx", "longtable"]
            .iter()
            .find_map(|env| {
                let open = format!("\\begin{{{env}}}");
                let start = content.find(&open)?;
                let (inner_end, end) = find_env_end(content, start + open.len(), env)?;
                Some((&content[start..end], &content[start + open.len()..inner_end]))
            });
        match tabular {
            Some((source, inner)) => self.push_table(caption, Some(source), inner),
            None => self.push_table(caption, None, content),
        }
    }

    fn push_table(&mut self, caption: Option<String>, source: Option<&str>, inner: &str) {
        let text = caption
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| table_cells_text(inner));
        let text = if text.is_empty() { "Table".to_string() } else { text };
        let markup = source.map(|s| RE_REFERENCES.replace_all(s.trim(), "").into_owned());
        self.push_block(BlockKind::Table, 0, text, markup);
    }
}

fn is_blank_line(rest: &str) -> bool {
    rest[1..]
        .chars()
        .take_while(|c| *c != '\n')
        .all(|c| c == ' ' || c == '\t' || c == '\r')
        && rest[1..].contains('\n')
}

/// Skip only optional arguments (list and theorem environments).
fn skip_arguments_opt(s: &str, pos: usize) -> usize {
    let (_, end) = read_optional(s, pos);
    end
}

pub(crate) fn find_command_group<'a>(s: &'a str, cmd: &str) -> Option<&'a str> {
    find_all_command_groups(s, cmd).into_iter().next()
}

fn find_all_command_groups<'a>(s: &'a str, cmd: &str) -> Vec<&'a str> {
    let needle = format!("\\{cmd}");
    let mut out = Vec::new();
    let mut from = 0;
    while let Some(i) = s[from..].find(&needle) {
        let after = from + i + needle.len();
        from = after;
        if s[after..].starts_with(|c: char| c.is_ascii_alphabetic()) {
            continue;
        }
        let mut p = after;
        if s.as_bytes().get(p) == Some(&b'*') {
            p += 1;
        }
        let (_, p) = read_optional(s, p);
        if let Some((group, end)) = read_group(s, p) {
            out.push(group);
            from = end;
        }
    }
    out
}

/// "figs/model_overview.pdf" → "model overview"
fn figure_label(path: &str) -> String {
    let stem = path.rsplit('/').next().unwrap_or(path);
    let stem = stem.split('.').next().unwrap_or(stem);
    stem.replace(&['_', '-'][..], " ")
}

fn table_cells_text(inner: &str) -> String {
    let without_spec = match read_group(inner, 0) {
        Some((_, end)) => &inner[end..],
        None => inner,
    };
    let cells = without_spec
        .replace("\\\\", " ")
        .replace('&', " ")
        .replace("\\hline", " ");
    to_plain(&cells)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(seg: &LatexSegments) -> Vec<BlockKind> {
        seg.blocks.iter().map(|b| b.kind).collect()
    }

    #[test]
    fn strips_comments_but_not_escaped_percent() {
        let src = "a 50\\% rise % note\n% whole line\nnext";
        assert_eq!(strip_comments(src), "a 50\\% rise \nnext\n");
    }

    #[test]
    fn plain_text_unwraps_formatting_and_drops_citations() {
        let plain = to_plain("We \\textbf{propose} a \\emph{new} model~\\cite{x} for $O(n)$ \\% cases.");
        assert_eq!(plain, "We propose a new model for O(n) % cases.");
        assert_eq!(to_plain("\\href{http://a.b}{the site}"), "the site");
    }

    #[test]
    fn markup_validation() {
        assert!(validate_markup("a \\textbf{b} $x$").is_ok());
        assert!(validate_markup("a {b").is_err());
        assert!(validate_markup("a } b {").is_err());
        assert!(validate_markup("price $5").is_err());
        assert!(validate_markup("\\begin{itemize}\\item a").is_err());
        assert!(validate_markup("\\end{frame}").is_err());
        assert!(validate_markup("bell \u{7}").is_err());
        assert!(validate_markup("\\begin{tabular}{ll} a & b \\end{tabular}").is_ok());
    }

    #[test]
    fn sections_lists_and_paragraphs() {
        let src = r"\documentclass{article}
\title{A \textbf{Study}}
\author{Ann Lee \thanks{x} \and Bo Chen}
\begin{document}
\maketitle
\section{Intro}
First paragraph
spans two lines.

Second paragraph.
\subsection*{Goals}
\begin{itemize}
  \item one
  \item two
  \begin{enumerate}
    \item nested
  \end{enumerate}
\end{itemize}
\end{document}
";
        let seg = segment("t.tex", src).unwrap();
        assert_eq!(seg.title.as_deref(), Some("A Study"));
        assert_eq!(seg.authors, vec!["Ann Lee", "Bo Chen"]);
        assert_eq!(
            kinds(&seg),
            vec![
                BlockKind::Heading,
                BlockKind::Paragraph,
                BlockKind::Paragraph,
                BlockKind::Heading,
                BlockKind::Bullet,
                BlockKind::Bullet,
                BlockKind::Bullet,
            ]
        );
        assert_eq!(seg.blocks[0].level, 3);
        assert_eq!(seg.blocks[3].level, 4);
        assert_eq!(seg.blocks[1].text, "First paragraph spans two lines.");
        assert_eq!(seg.blocks[6].text, "nested");
        assert_eq!(seg.blocks[6].level, 2);
        assert_eq!(seg.blocks[5].level, 1);
        let ordinals: Vec<usize> = seg.blocks.iter().map(|b| b.ordinal).collect();
        assert_eq!(ordinals, (0..7).collect::<Vec<_>>());
    }

    #[test]
    fn floats_and_math() {
        let src = r"\begin{document}
\section{Results}
\begin{figure}[t]
\centering
\includegraphics[width=0.5\linewidth]{figs/arch.png}
\caption{Model \emph{architecture}.}
\label{fig:arch}
\end{figure}
\begin{equation}
E = mc^2 \label{eq:e}
\end{equation}
\[ a + b \]
\begin{table}
\caption{Scores}
\begin{tabular}{lc}
A & 1 \\
\end{tabular}
\end{table}
\end{document}";
        let seg = segment("t.tex", src).unwrap();
        assert_eq!(
            kinds(&seg),
            vec![
                BlockKind::Heading,
                BlockKind::Figure,
                BlockKind::Equation,
                BlockKind::Equation,
                BlockKind::Table,
            ]
        );
        let fig = &seg.blocks[1];
        assert_eq!(fig.text, "Model architecture.");
        assert!(fig.markup.as_deref().unwrap().contains("{figs/arch.png}"));
        let eq = &seg.blocks[2];
        assert_eq!(eq.markup.as_deref(), Some("\\begin{equation*}\nE = mc^2\n\\end{equation*}"));
        let table = &seg.blocks[4];
        assert_eq!(table.text, "Scores");
        assert!(table.markup.as_deref().unwrap().starts_with("\\begin{tabular}{lc}"));
    }

    #[test]
    fn abstract_becomes_heading_at_top_level() {
        let src = r"\begin{document}
\begin{abstract}
We study things.
\end{abstract}
\section{Intro}
Text.
\end{document}";
        let seg = segment("t.tex", src).unwrap();
        assert_eq!(seg.blocks[0].text, "Abstract");
        assert_eq!(seg.blocks[0].level, 3);
        assert_eq!(seg.blocks[1].text, "We study things.");
        assert_eq!(seg.blocks[2].text, "Intro");
    }

    #[test]
    fn stops_at_bibliography_and_appendix() {
        let src = "\\begin{document}\nBody.\n\\appendix\n\\section{Extra}\nMore.\n\\end{document}";
        let seg = segment("t.tex", src).unwrap();
        assert_eq!(seg.blocks.len(), 1);
        assert_eq!(seg.blocks[0].text, "Body.");
    }

    #[test]
    fn unclosed_environment_is_an_error() {
        let src = "\\begin{document}\n\\begin{itemize}\n\\item a\n\\end{document}";
        match segment("t.tex", src) {
            Err(ExtractionError::UnbalancedEnvironment { env, .. }) => assert_eq!(env, "itemize"),
            other => panic!("expected unbalanced environment, got {other:?}"),
        }
        let src = "\\begin{document}\n\\begin{equation} x = 1\n\\end{document}";
        assert!(matches!(
            segment("t.tex", src),
            Err(ExtractionError::UnbalancedEnvironment { .. })
        ));
    }

    #[test]
    fn verbatim_is_skipped_and_paragraph_heading_is_undetermined() {
        let src = "\\begin{document}\n\\paragraph{Note} text\n\\begin{verbatim}\ncode\n\\end{verbatim}\n\\end{document}";
        let seg = segment("t.tex", src).unwrap();
        assert_eq!(seg.blocks[0].kind, BlockKind::Heading);
        assert_eq!(seg.blocks[0].level, LEVEL_UNDETERMINED);
        assert_eq!(seg.blocks.len(), 2);
        assert_eq!(seg.blocks[1].text, "text");
    }
}
