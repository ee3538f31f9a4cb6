//! Turning PDF pages into grayscale pixels.
//!
//! We shell out to Poppler's `pdftocairo`, one process per page. Each process
//! opens the PDF on its own, so pages can be rendered in parallel without
//! sharing any document handle between threads.

use std::sync::LazyLock;

use image::{GrayImage, ImageFormat};
use regex::Regex;
use tokio::process::Command;

use crate::{
    async_utils::{check_for_command_failure, spawn_blocking_propagating_panics},
    cpu_limit::CpuLimit,
    prelude::*,
};

/// A default error regex for checking Poppler output.
static ERROR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)error").expect("failed to compile regex"));

/// Poppler complains about broken cross-reference tables, but then repairs
/// them and renders correctly.
static DOWNGRADE_TO_WARNING_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)error: xref num").expect("failed to compile regex")
});

/// Does this line of Poppler output contain an error?
pub fn is_error_line(line: &str) -> bool {
    ERROR_REGEX.is_match(line) && !DOWNGRADE_TO_WARNING_REGEX.is_match(line)
}

/// An 8-bit grayscale page image.
#[derive(Clone, Debug)]
pub struct PixelBuffer {
    image: GrayImage,
}

impl PixelBuffer {
    /// Wrap an existing grayscale image.
    pub fn new(image: GrayImage) -> Self {
        Self { image }
    }

    /// Decode an image in any supported format, converting it to grayscale.
    pub fn from_encoded(bytes: &[u8], format: ImageFormat) -> Result<Self> {
        let image = image::load_from_memory_with_format(bytes, format)
            .context("failed to decode page image")?;
        Ok(Self::new(image.into_luma8()))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// The underlying image.
    #[cfg(test)]
    pub fn as_image(&self) -> &GrayImage {
        &self.image
    }

    /// Encode as PNG, for handing to an external OCR engine.
    pub fn to_png(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.image
            .write_to(&mut std::io::Cursor::new(&mut bytes), ImageFormat::Png)
            .context("failed to encode page image as PNG")?;
        Ok(bytes)
    }
}

/// Something with pages we can rasterize.
///
/// Implementations must be safe to call concurrently for distinct pages. If
/// the underlying library cannot load pages from several threads at once,
/// the implementation is responsible for serializing page loading.
#[async_trait]
pub trait PageSource: Send + Sync + 'static {
    /// Total number of pages.
    fn page_count(&self) -> usize;

    /// Render page `page_idx` (0-based) at `zoom` × 72 DPI.
    async fn rasterize(&self, page_idx: usize, zoom: f32) -> Result<PixelBuffer>;
}

/// Convert a zoom factor into the DPI we pass to Poppler.
pub fn dpi_for_zoom(zoom: f32) -> Result<u32> {
    if !zoom.is_finite() || zoom <= 0.0 {
        return Err(anyhow!("zoom factor must be positive, not {zoom}"));
    }
    Ok(((72.0 * zoom).round() as u32).max(1))
}

/// Check that `page_idx` is a valid 0-based index.
pub fn check_page_index(page_idx: usize, page_count: usize) -> Result<()> {
    if page_idx < page_count {
        Ok(())
    } else {
        Err(anyhow!(
            "page index {} is out of range for a {}-page document",
            page_idx,
            page_count
        ))
    }
}

/// Render a single page of a PDF file with `pdftocairo`.
#[instrument(level = "debug", skip_all, fields(path = %pdf_path.display(), page = page_idx + 1))]
pub async fn rasterize_with_pdftocairo(
    pdf_path: &Path,
    scratch_dir: &Path,
    page_idx: usize,
    zoom: f32,
    cpu_limit: &CpuLimit,
) -> Result<PixelBuffer> {
    let dpi = dpi_for_zoom(zoom)?;

    // Poppler uses 1-based, inclusive page ranges. With `-singlefile` it
    // writes exactly `<out_base>.png`.
    let page_number = (page_idx + 1).to_string();
    let out_base = scratch_dir.join(format!("page-{:05}", page_idx + 1));
    let out_path = out_base.with_extension("png");

    let mut cmd = Command::new("pdftocairo");
    cmd.arg("-png")
        .arg("-gray")
        .arg("-singlefile")
        .arg("-r")
        .arg(dpi.to_string())
        .arg("-f")
        .arg(&page_number)
        .arg("-l")
        .arg(&page_number)
        .arg(pdf_path)
        .arg(&out_base)
        .kill_on_drop(true);
    let output = cpu_limit
        .run(|| async move {
            cmd.output().await.with_context(|| {
                format!("failed to run pdftocairo on {:?}", pdf_path.display())
            })
        })
        .await?;
    check_for_command_failure("pdftocairo", &output, Some(&is_error_line))?;

    let bytes = tokio::fs::read(&out_path)
        .await
        .with_context(|| format!("failed to read rendered page {:?}", out_path.display()))?;
    // Recover the space early. A leftover file is cleaned up with the
    // scratch directory anyway.
    if let Err(err) = tokio::fs::remove_file(&out_path).await {
        warn!(path = %out_path.display(), "failed to delete rendered page: {}", err);
    }

    // Grayscale conversion happens here, once, rather than inside the OCR
    // engine. Decoding a 400 DPI page is CPU-heavy, so keep it off the
    // executor.
    let pixels = spawn_blocking_propagating_panics(move || {
        PixelBuffer::from_encoded(&bytes, ImageFormat::Png)
    })
    .await??;
    debug!(width = pixels.width(), height = pixels.height(), dpi, "Rasterized page");
    Ok(pixels)
}
