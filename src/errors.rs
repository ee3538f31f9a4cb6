//! Errors that callers of the indexing pipeline need to tell apart.
//!
//! Everything below the pipeline boundary uses [`anyhow::Error`]. Workers
//! convert their failures into [`PipelineError::Rasterize`] or
//! [`PipelineError::Ocr`], keeping the page number and the rendered error
//! chain.

use thiserror::Error;

/// Failures of an indexing run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The OCR engine binary or its language data could not be found. This is
    /// checked once, before any page is processed.
    #[error("OCR engine unavailable: {0}")]
    EngineUnavailable(String),

    /// The uploaded bytes are not a readable PDF.
    #[error("could not open document: {0}")]
    DocumentOpen(String),

    /// A single page could not be turned into pixels.
    #[error("could not rasterize page {page}: {message}")]
    Rasterize { page: usize, message: String },

    /// The OCR engine failed on a single page.
    #[error("could not recognize text on page {page}: {message}")]
    Ocr { page: usize, message: String },

    /// The run was torn down before every page finished.
    #[error("indexing was cancelled")]
    Cancelled,

    /// The collected pages do not cover `1..=expected` exactly once.
    #[error("index is incomplete: expected {expected} pages, found {found}")]
    IncompleteIndex { expected: usize, found: usize },
}

impl PipelineError {
    /// Is this a failure of one page, rather than of the whole run?
    pub fn is_per_page(&self) -> bool {
        matches!(self, Self::Rasterize { .. } | Self::Ocr { .. })
    }

    /// Build a per-page rasterization error from an [`anyhow::Error`].
    pub fn rasterize(page: usize, err: &anyhow::Error) -> Self {
        Self::Rasterize {
            page,
            message: format!("{err:#}"),
        }
    }

    /// Build a per-page OCR error from an [`anyhow::Error`].
    pub fn ocr(page: usize, err: &anyhow::Error) -> Self {
        Self::Ocr {
            page,
            message: format!("{err:#}"),
        }
    }
}
