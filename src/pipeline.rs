//! Splits a document into page jobs and OCRs them on a bounded worker pool.
//!
//! Pages finish in whatever order the workers get to them. We collect them
//! unordered and sort once at the end, so the finished [`DocumentIndex`]
//! never depends on scheduling.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use futures::{StreamExt as _, TryStreamExt as _, stream};
use tokio_util::sync::CancellationToken;

use crate::{
    config::{PageErrorPolicy, PipelineConfig},
    errors::PipelineError,
    index::{DocumentIndex, PageResult},
    ocr::OcrEngine,
    prelude::*,
    progress::ProgressSink,
    rasterize::PageSource,
};

/// One page awaiting rasterization and recognition.
pub struct PageJob {
    /// 0-based page index.
    pub index: usize,
    /// Where to render the page from.
    pub source: Arc<dyn PageSource>,
    /// Rasterization zoom factor.
    pub zoom: f32,
}

impl PageJob {
    /// The 1-based page number this job produces.
    pub fn page_number(&self) -> usize {
        self.index + 1
    }
}

/// Builds [`DocumentIndex`] values.
#[derive(Clone)]
pub struct Pipeline {
    engine: Arc<dyn OcrEngine>,
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a pipeline around an engine that has already been located.
    pub fn new(engine: Arc<dyn OcrEngine>, config: PipelineConfig) -> Self {
        Self { engine, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// OCR every page of `source` and build an index.
    ///
    /// Progress is reported once per finished page. If `cancel` fires first,
    /// in-flight jobs are dropped (which kills their child processes), queued
    /// jobs never start, and any finished pages are discarded.
    #[instrument(level = "debug", skip_all, fields(pages = source.page_count()))]
    pub async fn index(
        &self,
        source: Arc<dyn PageSource>,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<DocumentIndex, PipelineError> {
        let total = source.page_count();
        if total == 0 {
            progress.on_status("Document has no pages.");
            return Ok(DocumentIndex::empty());
        }
        progress.on_status(&format!(
            "Document loaded. Preparing to scan {total} total pages..."
        ));

        let completed = AtomicUsize::new(0);
        let jobs = (0..total).map(|index| PageJob {
            index,
            source: source.clone(),
            zoom: self.config.zoom,
        });
        let pages = stream::iter(jobs)
            .map(|job| self.run_job(job, total, &completed, progress))
            // Run up to `jobs` pages at once, taking results as they finish.
            .buffer_unordered(self.config.jobs)
            .try_collect::<Vec<_>>();

        let pages = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(
                    completed = completed.load(Ordering::SeqCst),
                    total,
                    "Indexing cancelled"
                );
                return Err(PipelineError::Cancelled);
            }
            pages = pages => pages?,
        };

        let index = DocumentIndex::from_pages(total, pages)?;
        progress.on_status("Document ready!");
        Ok(index)
    }

    /// Run a single job, applying our per-page error policy.
    async fn run_job(
        &self,
        job: PageJob,
        total: usize,
        completed: &AtomicUsize,
        progress: &dyn ProgressSink,
    ) -> Result<PageResult, PipelineError> {
        let page = job.page_number();
        let result = match self.recognize_page(job).await {
            Ok(text) => PageResult::new(page, &text),
            Err(err)
                if err.is_per_page() && self.config.page_errors == PageErrorPolicy::Lenient =>
            {
                warn!(page, "{}; indexing the page as empty", err);
                PageResult::new(page, "")
            }
            Err(err) => return Err(err),
        };

        let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
        progress.on_progress(done, total);
        progress.on_status(&format!("Scanning: page {done} of {total}..."));
        Ok(result)
    }

    /// Rasterize and recognize one page.
    #[instrument(level = "debug", skip_all, fields(page = job.page_number()))]
    async fn recognize_page(&self, job: PageJob) -> Result<String, PipelineError> {
        let page = job.page_number();
        let pixels = job
            .source
            .rasterize(job.index, job.zoom)
            .await
            .map_err(|err| PipelineError::rasterize(page, &err))?;
        let text = self
            .engine
            .recognize_text(pixels)
            .await
            .map_err(|err| PipelineError::ocr(page, &err))?;
        trace!(chars = text.len(), "Recognized page");
        Ok(text)
    }
}
