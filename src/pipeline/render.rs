//! Beamer rendering: turn a [`PresentationPlan`] into LaTeX source.
//!
//! ## Determinism
//!
//! Rendering is a pure function of the plan and the [`RenderConfig`]: no
//! timestamps (`\date{}` is emitted empty), no hash-map iteration, no
//! environment lookups. Equal plans produce byte-identical output.
//!
//! ## Payloads
//!
//! Plain text is always escaped. Source-native markup (LaTeX inputs only)
//! is emitted verbatim after a well-formedness check; a payload that could
//! break the frame structure fails the render instead of producing a
//! document that does not compile.

use crate::error::RenderError;
use crate::model::{BlockKind, ContentBlock, PresentationPlan, SlideUnit};
use crate::pipeline::latex::validate_markup;
use serde::Deserialize;
use tracing::debug;

/// Presentation-level rendering options.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Beamer theme passed to `\usetheme`. Default: "default".
    pub theme: String,
    /// Emit a `\titlepage` frame when the title is known. Default: true.
    pub title_page: bool,
    /// Emit a `\tableofcontents` frame after the title page. Default: false.
    pub outline_frame: bool,
    /// Prefer source-native markup over escaped plain text. Default: true.
    pub use_markup: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            theme: "default".to_string(),
            title_page: true,
            outline_frame: false,
            use_markup: true,
        }
    }
}

/// Render the whole presentation.
pub fn render(plan: &PresentationPlan<'_>, cfg: &RenderConfig) -> Result<String, RenderError> {
    let mut out = String::with_capacity(4096);
    preamble(plan, cfg, &mut out)?;
    out.push_str("\\begin{document}\n\n");

    if cfg.title_page && plan.title.is_some() {
        out.push_str("\\begin{frame}\n  \\titlepage\n\\end{frame}\n\n");
    }
    if cfg.outline_frame {
        out.push_str("\\begin{frame}{Outline}\n  \\tableofcontents\n\\end{frame}\n\n");
    }

    let mut current_section: Option<&str> = None;
    for slide in &plan.slides {
        if let Some(section) = slide.section.as_deref() {
            if current_section != Some(section) {
                out.push_str(&format!("\\section{{{}}}\n\n", escape_title(section, slide)?));
                current_section = Some(section);
            }
        }
        frame(slide, cfg, &mut out)?;
    }

    out.push_str("\\end{document}\n");
    debug!("Rendered {} frames, {} bytes", plan.slides.len(), out.len());
    Ok(out)
}

fn preamble(plan: &PresentationPlan<'_>, cfg: &RenderConfig, out: &mut String) -> Result<(), RenderError> {
    out.push_str("\\documentclass{beamer}\n");
    out.push_str(&format!("\\usetheme{{{}}}\n", cfg.theme));
    out.push_str("\\usepackage[utf8]{inputenc}\n");
    out.push_str("\\usepackage{graphicx}\n");
    out.push_str("\\usepackage{amsmath}\n");
    out.push_str("\\usepackage{amssymb}\n\n");

    if let Some(title) = plan.title.as_deref() {
        let escaped = escape(title).map_err(|code| RenderError::UnescapableCharacter {
            slide: "title page".into(),
            ordinal: 0,
            code,
        })?;
        out.push_str(&format!("\\title{{{}}}\n", escaped));
    }
    if !plan.authors.is_empty() {
        let authors = plan
            .authors
            .iter()
            .map(|a| {
                escape(a).map_err(|code| RenderError::UnescapableCharacter {
                    slide: "title page".into(),
                    ordinal: 0,
                    code,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        out.push_str(&format!("\\author{{{}}}\n", authors.join(" \\and ")));
    }
    out.push_str("\\date{}\n\n");
    Ok(())
}

fn frame(slide: &SlideUnit<'_>, cfg: &RenderConfig, out: &mut String) -> Result<(), RenderError> {
    out.push_str(&format!("\\begin{{frame}}{{{}}}\n", escape_title(&slide.title, slide)?));

    let mut depth = 0u8;
    for block in &slide.blocks {
        if block.kind == BlockKind::Bullet {
            let level = block.level.clamp(1, depth + 1);
            while depth < level {
                indent(out, depth);
                out.push_str("\\begin{itemize}\n");
                depth += 1;
            }
            close_lists(out, &mut depth, level);
            indent(out, depth);
            out.push_str(&format!("\\item {}\n", payload(block, slide, cfg)?));
            continue;
        }
        close_lists(out, &mut depth, 0);
        match block.kind {
            BlockKind::Paragraph => {
                out.push_str(&format!("  {}\n\n", payload(block, slide, cfg)?));
            }
            BlockKind::Figure => figure(block, slide, cfg, out)?,
            BlockKind::Table => table(block, slide, cfg, out)?,
            BlockKind::Equation => equation(block, slide, cfg, out)?,
            BlockKind::Heading | BlockKind::Bullet => {}
        }
    }
    close_lists(out, &mut depth, 0);

    out.push_str("\\end{frame}\n\n");
    Ok(())
}

fn indent(out: &mut String, depth: u8) {
    for _ in 0..=depth {
        out.push_str("  ");
    }
}

fn close_lists(out: &mut String, depth: &mut u8, to: u8) {
    while *depth > to {
        *depth -= 1;
        indent(out, *depth);
        out.push_str("\\end{itemize}\n");
    }
}

fn figure(block: &ContentBlock, slide: &SlideUnit<'_>, cfg: &RenderConfig, out: &mut String) -> Result<(), RenderError> {
    let caption = escape_block(&block.text, block, slide)?;
    out.push_str("  \\begin{figure}\n    \\centering\n");
    match checked_markup(block, slide, cfg)? {
        Some(graphics) => {
            for line in graphics.lines() {
                out.push_str(&format!("    {}\n", line));
            }
        }
        None => out.push_str(
            "    \\fbox{\\parbox[c][0.4\\textheight][c]{0.8\\linewidth}{\\centering Figure}}\n",
        ),
    }
    out.push_str(&format!("    \\caption{{{}}}\n  \\end{{figure}}\n\n", caption));
    Ok(())
}

fn table(block: &ContentBlock, slide: &SlideUnit<'_>, cfg: &RenderConfig, out: &mut String) -> Result<(), RenderError> {
    let caption = escape_block(&block.text, block, slide)?;
    out.push_str("  \\begin{table}\n    \\centering\n");
    match checked_markup(block, slide, cfg)? {
        Some(tabular) => {
            out.push_str("    \\resizebox{\\linewidth}{!}{%\n");
            for line in tabular.lines() {
                out.push_str(&format!("    {}\n", line));
            }
            out.push_str("    }\n");
            out.push_str(&format!("    \\caption{{{}}}\n", caption));
        }
        None => {
            out.push_str(&format!(
                "    \\fbox{{\\parbox{{0.8\\linewidth}}{{\\centering {}}}}}\n",
                caption
            ));
        }
    }
    out.push_str("  \\end{table}\n\n");
    Ok(())
}

fn equation(block: &ContentBlock, slide: &SlideUnit<'_>, cfg: &RenderConfig, out: &mut String) -> Result<(), RenderError> {
    match checked_markup(block, slide, cfg)? {
        Some(math) => {
            for line in math.lines() {
                out.push_str(&format!("  {}\n", line));
            }
        }
        None => {
            let text = escape_block(&block.text, block, slide)?;
            out.push_str(&format!(
                "  \\begin{{equation*}}\n    \\text{{{}}}\n  \\end{{equation*}}\n",
                text
            ));
        }
    }
    out.push('\n');
    Ok(())
}

/// Inline payload for paragraphs and bullets.
fn payload(block: &ContentBlock, slide: &SlideUnit<'_>, cfg: &RenderConfig) -> Result<String, RenderError> {
    match checked_markup(block, slide, cfg)? {
        Some(markup) => Ok(markup.to_string()),
        None => escape_block(&block.text, block, slide),
    }
}

fn checked_markup<'b>(
    block: &'b ContentBlock,
    slide: &SlideUnit<'_>,
    cfg: &RenderConfig,
) -> Result<Option<&'b str>, RenderError> {
    if !cfg.use_markup {
        return Ok(None);
    }
    let Some(markup) = block.markup.as_deref() else {
        return Ok(None);
    };
    validate_markup(markup).map_err(|reason| RenderError::MalformedMarkup {
        slide: slide.title.clone(),
        ordinal: block.ordinal,
        reason,
    })?;
    Ok(Some(markup))
}

fn escape_block(text: &str, block: &ContentBlock, slide: &SlideUnit<'_>) -> Result<String, RenderError> {
    escape(text).map_err(|code| RenderError::UnescapableCharacter {
        slide: slide.title.clone(),
        ordinal: block.ordinal,
        code,
    })
}

fn escape_title(text: &str, slide: &SlideUnit<'_>) -> Result<String, RenderError> {
    escape(text).map_err(|code| RenderError::UnescapableCharacter {
        slide: slide.title.clone(),
        ordinal: slide.blocks.first().map(|b| b.ordinal).unwrap_or(0),
        code,
    })
}

/// Escape LaTeX special characters. Fails with the code point of the
/// first control character that has no text representation.
pub fn escape(text: &str) -> Result<String, u32> {
    let mut out = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\textbackslash{}"),
            '{' => out.push_str("\\{"),
            '}' => out.push_str("\\}"),
            '$' => out.push_str("\\$"),
            '&' => out.push_str("\\&"),
            '#' => out.push_str("\\#"),
            '%' => out.push_str("\\%"),
            '_' => out.push_str("\\_"),
            '^' => out.push_str("\\textasciicircum{}"),
            '~' => out.push_str("\\textasciitilde{}"),
            '\n' | '\t' | '\r' => out.push(' '),
            c if c.is_control() => return Err(c as u32),
            c => out.push(c),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan<'t>(title: Option<&str>, slides: Vec<SlideUnit<'t>>) -> PresentationPlan<'t> {
        PresentationPlan {
            title: title.map(str::to_string),
            authors: vec!["Ada Lovelace".into(), "Alan Turing".into()],
            slides,
        }
    }

    fn slide<'t>(title: &str, section: Option<&str>, blocks: &[&'t ContentBlock]) -> SlideUnit<'t> {
        let mut s = SlideUnit::new(title, section.map(str::to_string), false);
        s.blocks.extend_from_slice(blocks);
        s
    }

    #[test]
    fn escapes_specials() {
        assert_eq!(
            escape(r"50% of $x_1 & #2 {a} ~ ^ \").unwrap(),
            r"50\% of \$x\_1 \& \#2 \{a\} \textasciitilde{} \textasciicircum{} \textbackslash{}"
        );
        assert_eq!(escape("bell\u{7}"), Err(7));
    }

    #[test]
    fn renders_title_page_sections_and_frames() {
        let p1 = ContentBlock::new(BlockKind::Paragraph, 0, 1, "Costs rose 5%.");
        let p2 = ContentBlock::new(BlockKind::Paragraph, 0, 3, "We did things.");
        let plan = plan(
            Some("A & B"),
            vec![
                slide("Intro", Some("Intro"), &[&p1]),
                slide("Method", Some("Method"), &[&p2]),
            ],
        );
        let tex = render(&plan, &RenderConfig::default()).unwrap();
        assert!(tex.starts_with("\\documentclass{beamer}\n"));
        assert!(tex.contains("\\title{A \\& B}"));
        assert!(tex.contains("\\author{Ada Lovelace \\and Alan Turing}"));
        assert!(tex.contains("\\titlepage"));
        assert!(tex.contains("\\section{Intro}\n\n\\begin{frame}{Intro}"));
        assert!(tex.contains("Costs rose 5\\%."));
        assert_eq!(tex.matches("\\begin{frame}").count(), 3);
        assert!(tex.trim_end().ends_with("\\end{document}"));
    }

    #[test]
    fn untitled_plan_has_no_title_page() {
        let p = ContentBlock::new(BlockKind::Paragraph, 0, 0, "text");
        let plan = plan(None, vec![slide("(untitled)", None, &[&p])]);
        let tex = render(&plan, &RenderConfig::default()).unwrap();
        assert!(!tex.contains("\\titlepage"));
        assert!(!tex.contains("\\title{"));
        assert!(!tex.contains("\\section"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let b = ContentBlock::new(BlockKind::Bullet, 1, 0, "point");
        let plan = plan(Some("T"), vec![slide("S", Some("S"), &[&b])]);
        let cfg = RenderConfig {
            outline_frame: true,
            ..Default::default()
        };
        assert_eq!(render(&plan, &cfg).unwrap(), render(&plan, &cfg).unwrap());
    }

    #[test]
    fn nested_bullets_become_nested_itemize() {
        let a = ContentBlock::new(BlockKind::Bullet, 1, 0, "a");
        let b = ContentBlock::new(BlockKind::Bullet, 2, 1, "b");
        let c = ContentBlock::new(BlockKind::Bullet, 1, 2, "c");
        let p = ContentBlock::new(BlockKind::Paragraph, 0, 3, "after");
        let plan = plan(None, vec![slide("L", None, &[&a, &b, &c, &p])]);
        let tex = render(&plan, &RenderConfig::default()).unwrap();
        assert_eq!(tex.matches("\\begin{itemize}").count(), 2);
        assert_eq!(tex.matches("\\end{itemize}").count(), 2);
        let inner_end = tex.find("    \\end{itemize}").unwrap();
        assert!(tex.find("\\item b").unwrap() < inner_end);
        assert!(inner_end < tex.find("\\item c").unwrap());
        assert!(tex.find("\\item c").unwrap() < tex.find("after").unwrap());
    }

    #[test]
    fn figures_tables_equations() {
        let fig = ContentBlock::new(BlockKind::Figure, 0, 0, "Architecture")
            .with_markup("\\includegraphics[width=0.95\\linewidth]{arch.png}");
        let missing = ContentBlock::new(BlockKind::Figure, 0, 1, "Figure 2: loss");
        let tab = ContentBlock::new(BlockKind::Table, 0, 2, "Results")
            .with_markup("\\begin{tabular}{cc}\na & b \\\\\n\\end{tabular}");
        let eq = ContentBlock::new(BlockKind::Equation, 0, 3, "E = mc^2");
        let plan = plan(None, vec![slide("F", None, &[&fig, &missing, &tab, &eq])]);
        let tex = render(&plan, &RenderConfig::default()).unwrap();
        assert!(tex.contains("\\includegraphics[width=0.95\\linewidth]{arch.png}"));
        assert!(tex.contains("\\caption{Architecture}"));
        assert!(tex.contains("\\fbox"));
        assert!(tex.contains("\\begin{tabular}{cc}"));
        assert!(tex.contains("\\begin{equation*}\n    \\text{E = mc\\textasciicircum{}2}"));
    }

    #[test]
    fn control_character_fails() {
        let p = ContentBlock::new(BlockKind::Paragraph, 0, 7, "bad\u{1b}text");
        let plan = plan(None, vec![slide("Oops", None, &[&p])]);
        match render(&plan, &RenderConfig::default()) {
            Err(RenderError::UnescapableCharacter { ordinal, code, .. }) => {
                assert_eq!(ordinal, 7);
                assert_eq!(code, 0x1b);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn frame_delimiter_in_markup_fails() {
        let p = ContentBlock::new(BlockKind::Paragraph, 0, 2, "x").with_markup("\\end{frame} x");
        let plan = plan(None, vec![slide("Oops", None, &[&p])]);
        assert!(matches!(
            render(&plan, &RenderConfig::default()),
            Err(RenderError::MalformedMarkup { ordinal: 2, .. })
        ));
        let plain = RenderConfig {
            use_markup: false,
            ..Default::default()
        };
        assert!(render(&plan, &plain).is_ok());
    }
}
