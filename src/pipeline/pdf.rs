//! PDF text layer: lines, font sizes and document info via pdfium.
//!
//! ## Why per-character font sizes?
//!
//! The PDF text layer carries no structure. Headings are only recognisable
//! by their typography, so each line is tagged with its dominant font size
//! (counted per character, so a bold inline number does not skew it) and
//! the layout segmenter infers the hierarchy from the size distribution.
//!
//! pdfium is not async-safe; every function here is blocking and the
//! caller moves it onto `spawn_blocking`.

use crate::error::LoadError;
use crate::model::{DocumentMetadata, LayoutLine};
use pdfium_render::prelude::*;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};
use unicode_normalization::UnicodeNormalization;

/// Bind pdfium: `PDFIUM_LIB_PATH`, then the working directory, then the
/// system library path.
pub fn bind_pdfium() -> Result<Pdfium, LoadError> {
    let mut attempts = Vec::new();

    if let Ok(dir) = std::env::var("PDFIUM_LIB_PATH") {
        if !dir.is_empty() {
            let candidate = Path::new(&dir);
            let lib = if candidate.is_file() {
                candidate.to_path_buf()
            } else {
                Pdfium::pdfium_platform_library_name_at_path(&dir).into()
            };
            match Pdfium::bind_to_library(&lib) {
                Ok(bindings) => return Ok(Pdfium::new(bindings)),
                Err(e) => attempts.push(format!("{}: {:?}", lib.display(), e)),
            }
        }
    }

    let local = Pdfium::pdfium_platform_library_name_at_path("./");
    match Pdfium::bind_to_library(&local) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(e) => attempts.push(format!("./: {:?}", e)),
    }

    Pdfium::bind_to_system_library()
        .map(Pdfium::new)
        .map_err(|e| {
            attempts.push(format!("system: {:?}", e));
            LoadError::PdfEngineUnavailable {
                detail: attempts.join("; "),
            }
        })
}

/// Read every text line of the PDF with its dominant font size, plus the
/// title and author from the info dictionary.
pub fn read_text_layer(
    path: &Path,
    password: Option<&str>,
) -> Result<(Vec<LayoutLine>, DocumentMetadata), LoadError> {
    let pdfium = bind_pdfium()?;

    let document = pdfium
        .load_pdf_from_file(path, password)
        .map_err(|e| open_error(path, password, e))?;

    let metadata = read_metadata(&document);
    let mut lines = Vec::new();

    for (index, page) in document.pages().iter().enumerate() {
        let text = page.text().map_err(|e| LoadError::CorruptPdf {
            path: path.to_path_buf(),
            detail: format!("page {}: {:?}", index + 1, e),
        })?;

        let mut builder = LineBuilder::new(index + 1);
        for ch in text.chars().iter() {
            let Some(c) = ch.unicode_char() else {
                continue;
            };
            builder.push(c, ch.scaled_font_size().value);
        }
        let page_lines = builder.finish();
        debug!("Page {}: {} lines", index + 1, page_lines.len());
        lines.extend(page_lines);
    }

    info!(
        "PDF text layer: {} pages, {} lines",
        document.pages().len(),
        lines.len()
    );
    Ok((lines, metadata))
}

fn open_error(path: &Path, password: Option<&str>, e: PdfiumError) -> LoadError {
    let detail = format!("{:?}", e);
    if detail.contains("Password") || detail.contains("password") {
        if password.is_some() {
            LoadError::WrongPassword {
                path: path.to_path_buf(),
            }
        } else {
            LoadError::PasswordRequired {
                path: path.to_path_buf(),
            }
        }
    } else {
        LoadError::CorruptPdf {
            path: path.to_path_buf(),
            detail,
        }
    }
}

fn read_metadata(document: &PdfDocument) -> DocumentMetadata {
    let metadata = document.metadata();
    let get = |tag: PdfDocumentMetadataTagType| -> Option<String> {
        metadata.get(tag).and_then(|t| {
            let v = t.value().trim().to_string();
            if v.is_empty() {
                None
            } else {
                Some(v)
            }
        })
    };

    let authors = get(PdfDocumentMetadataTagType::Author)
        .map(|a| {
            a.split(|c: char| c == ',' || c == ';')
                .flat_map(|s| s.split(" and "))
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    DocumentMetadata {
        title: get(PdfDocumentMetadataTagType::Title),
        authors,
    }
}

/// Accumulates characters into lines, tracking the font size histogram of
/// the current line.
struct LineBuilder {
    page: usize,
    text: String,
    sizes: HashMap<i32, usize>,
    lines: Vec<LayoutLine>,
}

impl LineBuilder {
    fn new(page: usize) -> Self {
        Self {
            page,
            text: String::new(),
            sizes: HashMap::new(),
            lines: Vec::new(),
        }
    }

    fn push(&mut self, c: char, size: f32) {
        match c {
            '\r' => {}
            '\n' => self.end_line(),
            _ => {
                self.text.push(c);
                if !c.is_whitespace() && size > 0.0 {
                    *self.sizes.entry((size * 10.0).round() as i32).or_default() += 1;
                }
            }
        }
    }

    fn end_line(&mut self) {
        let text: String = self.text.trim().nfkc().collect();
        self.text.clear();
        let sizes = std::mem::take(&mut self.sizes);
        if text.is_empty() {
            return;
        }
        let font_size = sizes
            .into_iter()
            .max_by(|(sa, ca), (sb, cb)| ca.cmp(cb).then(sa.cmp(sb)))
            .map(|(s, _)| s as f32 / 10.0)
            .unwrap_or(0.0);
        self.lines.push(LayoutLine {
            text,
            font_size,
            page: self.page,
        });
    }

    fn finish(mut self) -> Vec<LayoutLine> {
        self.end_line();
        self.lines
    }
}
