//! Opening uploaded PDFs.

use std::collections::BTreeMap;

use tempfile::TempDir;
use tokio::process::Command;

use crate::{
    async_utils::check_for_command_failure,
    cpu_limit::CpuLimit,
    errors::PipelineError,
    prelude::*,
    rasterize::{PageSource, PixelBuffer, check_page_index, rasterize_with_pdftocairo},
};

/// MIME type we accept.
const PDF_MIME_TYPE: &str = "application/pdf";

/// An opened PDF document, backed by a private copy on disk.
///
/// The copy and any rendered pages live in a temporary directory, which is
/// deleted when the document is dropped.
pub struct PdfDocument {
    /// Holds `path` and scratch space for rendered pages.
    tmpdir: TempDir,
    /// Our copy of the PDF.
    path: PathBuf,
    /// Number of pages, as reported by `pdfinfo`.
    page_count: usize,
    /// Shared limit on external processes.
    cpu_limit: CpuLimit,
}

impl PdfDocument {
    /// Open a PDF from raw bytes.
    #[instrument(level = "debug", skip_all, fields(bytes = bytes.len()))]
    pub async fn from_bytes(
        bytes: &[u8],
        cpu_limit: CpuLimit,
    ) -> Result<Self, PipelineError> {
        check_is_pdf(bytes)?;

        let tmpdir = TempDir::with_prefix("ocr-search").map_err(|err| {
            PipelineError::DocumentOpen(format!("cannot create temporary directory: {err}"))
        })?;
        let path = tmpdir.path().join("document.pdf");
        tokio::fs::write(&path, bytes).await.map_err(|err| {
            PipelineError::DocumentOpen(format!("cannot write temporary copy: {err}"))
        })?;

        let page_count = cpu_limit
            .run(|| get_pdf_page_count(&path))
            .await
            .map_err(|err| PipelineError::DocumentOpen(format!("{err:#}")))?;
        debug!(page_count, "Opened PDF");

        Ok(Self {
            tmpdir,
            path,
            page_count,
            cpu_limit,
        })
    }
}

#[async_trait]
impl PageSource for PdfDocument {
    fn page_count(&self) -> usize {
        self.page_count
    }

    async fn rasterize(&self, page_idx: usize, zoom: f32) -> Result<PixelBuffer> {
        check_page_index(page_idx, self.page_count)?;
        rasterize_with_pdftocairo(
            &self.path,
            self.tmpdir.path(),
            page_idx,
            zoom,
            &self.cpu_limit,
        )
        .await
    }
}

/// Make sure `bytes` look like a PDF before handing them to Poppler.
fn check_is_pdf(bytes: &[u8]) -> Result<(), PipelineError> {
    match infer::get(bytes) {
        Some(kind) if kind.mime_type() == PDF_MIME_TYPE => Ok(()),
        Some(kind) => Err(PipelineError::DocumentOpen(format!(
            "expected a PDF, found {}",
            kind.mime_type()
        ))),
        None if bytes.is_empty() => {
            Err(PipelineError::DocumentOpen("the file is empty".to_owned()))
        }
        None => Err(PipelineError::DocumentOpen(
            "the file is not a PDF".to_owned(),
        )),
    }
}

/// Get the number of pages in a PDF file.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn get_pdf_page_count(path: &Path) -> Result<usize> {
    // Run pdfinfo to get the number of pages.
    let output = Command::new("pdfinfo")
        .arg(path)
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("failed to run pdfinfo on {:?}", path.display()))?;
    check_for_command_failure("pdfinfo", &output, None)?;

    let output =
        String::from_utf8(output.stdout).context("pdfinfo output was not valid UTF-8")?;
    parse_pdfinfo_page_count(&output)
}

/// Find the `Pages:` property in `pdfinfo` output.
fn parse_pdfinfo_page_count(output: &str) -> Result<usize> {
    let properties = output
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim(), value.trim()))
        .collect::<BTreeMap<_, _>>();
    let pages = properties
        .get("Pages")
        .ok_or_else(|| anyhow!("failed to find page count in pdfinfo output"))?;
    pages
        .parse::<usize>()
        .with_context(|| format!("failed to parse page count {pages:?} from pdfinfo output"))
}
