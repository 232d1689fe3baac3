//! Pipeline stages for document-to-Beamer conversion.
//!
//! Each submodule implements exactly one transformation step.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ extract ──▶ plan / rag ──▶ render
//! (path)    (tree)      (slides)       (Beamer)
//!   │          │
//!   pdf     latex / layout
//! ```
//!
//! 1. [`input`]: detect the format and load a [`crate::model::SourceDocument`];
//!    [`pdf`] reads the PDF text layer through pdfium (blocking)
//! 2. [`extract`]: segment into blocks ([`latex`] or [`layout`]) and nest
//!    them into a section tree
//! 3. [`plan`]: deterministic slide packing; [`rag`] asks the generative
//!    service ([`llm`]) for an outline and retrieves content for it
//! 4. [`render`]: escape payloads and emit the Beamer source

pub mod extract;
pub mod input;
pub mod latex;
pub mod layout;
pub mod llm;
pub mod pdf;
pub mod plan;
pub mod rag;
pub mod render;
