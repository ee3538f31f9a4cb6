//! Pipeline configuration.
//!
//! The knobs are exposed as command-line options (with environment variable
//! fallbacks), and validated into a [`PipelineConfig`] before anything runs.

use clap::{Args, ValueEnum};

use crate::prelude::*;

/// Default zoom factor. 400 DPI relative to the 72 DPI PDF user space, which
/// upscales low-resolution scans enough for reliable recognition.
pub const DEFAULT_ZOOM: f32 = 400.0 / 72.0;

/// Default number of characters shown on each side of a match.
pub const DEFAULT_CONTEXT_CHARS: usize = 100;

/// What to do when a single page fails to rasterize or OCR.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum PageErrorPolicy {
    /// Index the failed page with empty text and keep going.
    #[default]
    Lenient,
    /// Fail the whole run on the first page error.
    Strict,
}

/// Options for building an index, shared by all subcommands that OCR.
#[derive(Args, Clone, Debug)]
pub struct PipelineOpts {
    /// Zoom factor used when rasterizing pages (pages are rendered at
    /// 72 × zoom DPI).
    #[clap(long, env = "OCR_SEARCH_ZOOM", default_value_t = DEFAULT_ZOOM)]
    pub zoom: f32,

    /// Number of pages to process at once. Defaults to the number of CPUs.
    #[clap(short = 'j', long = "jobs")]
    pub jobs: Option<usize>,

    /// Characters of context to show before and after each match.
    #[clap(long, default_value_t = DEFAULT_CONTEXT_CHARS)]
    pub context_chars: usize,

    /// Path to the `tesseract` binary. Searched for on `PATH` and next to
    /// this executable if not given.
    #[clap(long, env = "TESSERACT_PATH")]
    pub tesseract_path: Option<PathBuf>,

    /// Tesseract language code (for example `eng` or `deu+eng`).
    #[clap(long = "lang", env = "OCR_SEARCH_LANG")]
    pub language: Option<String>,

    /// How to handle pages that fail to rasterize or OCR.
    #[clap(long, value_enum, default_value = "lenient")]
    pub page_errors: PageErrorPolicy,
}

impl PipelineOpts {
    /// Validate our options.
    pub fn to_config(&self) -> Result<PipelineConfig> {
        if !self.zoom.is_finite() || self.zoom <= 0.0 {
            return Err(anyhow!("--zoom must be a positive number, not {}", self.zoom));
        }
        let jobs = self.jobs.unwrap_or_else(num_cpus::get);
        if jobs == 0 {
            return Err(anyhow!("--jobs must be at least 1"));
        }
        Ok(PipelineConfig {
            zoom: self.zoom,
            jobs,
            context_chars: self.context_chars,
            page_errors: self.page_errors,
        })
    }
}

/// Validated settings for one [`crate::pipeline::Pipeline`].
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    /// Rasterization zoom factor. Always finite and positive.
    pub zoom: f32,
    /// Size of the worker pool. Always at least 1.
    pub jobs: usize,
    /// Half-width of search snippets, in characters.
    pub context_chars: usize,
    /// Per-page failure handling.
    pub page_errors: PageErrorPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            zoom: DEFAULT_ZOOM,
            jobs: num_cpus::get(),
            context_chars: DEFAULT_CONTEXT_CHARS,
            page_errors: PageErrorPolicy::default(),
        }
    }
}
