//! Progress-callback trait for per-document batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to receive
//! events as the batch runner works through the discovered documents.
//!
//! # Why callbacks instead of channels?
//!
//! Callers can forward events to a terminal progress bar, a log file or a
//! channel without the library knowing how the host application
//! communicates. The trait is `Send + Sync` because documents are
//! converted concurrently.
//!
//! # Example
//!
//! ```rust
//! use beamerize::{BatchProgressCallback, ConversionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Counting {
//!     done: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for Counting {
//!     fn on_document_complete(&self, _index: usize, total: usize, source: &str, slides: usize) {
//!         let done = self.done.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{done}/{total} {source}: {slides} slides");
//!     }
//! }
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(Arc::new(Counting { done: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the batch runner as it processes each document.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. `on_document_*` may be called concurrently from
/// different tasks; protect shared state accordingly.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once after discovery, before any document is converted.
    ///
    /// * `total`: documents that will be attempted
    /// * `skipped`: discovered files that will not be attempted
    fn on_batch_start(&self, total: usize, skipped: usize) {
        let _ = (total, skipped);
    }

    /// Called when a worker picks up a document. `index` is 1-based.
    fn on_document_start(&self, index: usize, total: usize, source: &str) {
        let _ = (index, total, source);
    }

    /// Called when a document has been written.
    fn on_document_complete(&self, index: usize, total: usize, source: &str, slides: usize) {
        let _ = (index, total, source, slides);
    }

    /// Called when a document failed at any stage.
    fn on_document_error(&self, index: usize, total: usize, source: &str, error: &str) {
        let _ = (index, total, source, error);
    }

    /// Called once after every document was attempted or cancelled.
    fn on_batch_complete(&self, succeeded: usize, failed: usize, cancelled: usize) {
        let _ = (succeeded, failed, cancelled);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
