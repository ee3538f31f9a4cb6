//! Text recognition.
//!
//! The engine is located and checked once at startup, then shared by handle
//! with every worker. Nothing here touches global state.

use std::env;

use tokio::process::Command;

use crate::{
    async_utils::{check_for_command_failure, spawn_blocking_propagating_panics},
    cpu_limit::CpuLimit,
    errors::PipelineError,
    prelude::*,
    rasterize::PixelBuffer,
};

/// Directory containing a bundled Tesseract, relative to our executable.
const BUNDLED_ENGINE_DIR: &str = "Tesseract-OCR";

/// Interface to an OCR engine.
#[async_trait]
pub trait OcrEngine: Send + Sync + 'static {
    /// Recognize the text in a single page image. The text is returned as the
    /// engine produced it, without case folding.
    async fn recognize_text(&self, pixels: PixelBuffer) -> Result<String>;
}

/// OCR engine wrapping the `tesseract` CLI tool.
#[derive(Debug)]
pub struct TesseractEngine {
    /// The binary we verified at startup.
    binary: PathBuf,
    /// Language to pass with `-l`, if any.
    language: Option<String>,
    /// Shared limit on external processes.
    cpu_limit: CpuLimit,
}

impl TesseractEngine {
    /// Find `tesseract`, make sure it runs, and make sure any requested
    /// language data is installed.
    #[instrument(level = "debug", skip_all)]
    pub async fn locate(
        explicit_path: Option<&Path>,
        language: Option<&str>,
        cpu_limit: CpuLimit,
    ) -> Result<Self, PipelineError> {
        let binary = resolve_engine_path(explicit_path)?;
        debug!(binary = %binary.display(), "Found tesseract");

        let version = run_engine_query(&binary, "--version").await?;
        info!(
            version = version.lines().next().unwrap_or("unknown").trim(),
            "Using tesseract"
        );

        if let Some(language) = language {
            let listing = run_engine_query(&binary, "--list-langs").await?;
            if !language_is_installed(&listing, language) {
                return Err(PipelineError::EngineUnavailable(format!(
                    "tesseract has no language data for {language:?}"
                )));
            }
        }

        Ok(Self {
            binary,
            language: language.map(str::to_owned),
            cpu_limit,
        })
    }

    /// The binary we are using.
    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    #[instrument(level = "debug", skip_all, fields(width = pixels.width(), height = pixels.height()))]
    async fn recognize_text(&self, pixels: PixelBuffer) -> Result<String> {
        let png = spawn_blocking_propagating_panics(move || pixels.to_png()).await??;

        // Write our input to a temporary file.
        let tmpdir = tempfile::TempDir::with_prefix("tesseract")?;
        let input_path = tmpdir.path().join("input.png");
        tokio::fs::write(&input_path, &png)
            .await
            .context("cannot write tesseract input file")?;

        // Run tesseract, writing the text to standard output.
        let mut cmd = Command::new(&self.binary);
        cmd.arg(&input_path).arg("stdout");
        if let Some(language) = &self.language {
            cmd.arg("-l").arg(language);
        }
        cmd.kill_on_drop(true);
        let output = self
            .cpu_limit
            .run(|| async move { cmd.output().await.context("cannot run tesseract") })
            .await?;
        check_for_command_failure("tesseract", &output, None)?;

        String::from_utf8(output.stdout).context("tesseract output was not valid UTF-8")
    }
}

/// Decide which `tesseract` binary to use.
///
/// An explicit path wins. Otherwise we search `PATH`, and finally look for a
/// copy bundled next to our own executable.
fn resolve_engine_path(explicit_path: Option<&Path>) -> Result<PathBuf, PipelineError> {
    if let Some(path) = explicit_path {
        return if path.is_file() {
            Ok(path.to_owned())
        } else {
            Err(PipelineError::EngineUnavailable(format!(
                "{:?} does not exist",
                path.display()
            )))
        };
    }

    if let Ok(path) = which::which("tesseract") {
        return Ok(path);
    }

    if let Some(path) = bundled_engine_path().filter(|path| path.is_file()) {
        return Ok(path);
    }

    Err(PipelineError::EngineUnavailable(format!(
        "could not find tesseract on PATH or in {BUNDLED_ENGINE_DIR}/ next to this program \
         (use --tesseract-path or TESSERACT_PATH)"
    )))
}

/// Where a bundled engine would live.
fn bundled_engine_path() -> Option<PathBuf> {
    let exe = env::current_exe().ok()?;
    let dir = exe.parent()?;
    Some(
        dir.join(BUNDLED_ENGINE_DIR)
            .join(format!("tesseract{}", env::consts::EXE_SUFFIX)),
    )
}

/// Run `tesseract <arg>` and return everything it printed.
///
/// Older versions print `--version` output on stderr, so we return both.
async fn run_engine_query(binary: &Path, arg: &str) -> Result<String, PipelineError> {
    let output = Command::new(binary)
        .arg(arg)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|err| {
            PipelineError::EngineUnavailable(format!(
                "cannot run {:?}: {err}",
                binary.display()
            ))
        })?;
    check_for_command_failure("tesseract", &output, None)
        .map_err(|err| PipelineError::EngineUnavailable(format!("{err:#}")))?;
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok(text)
}

/// Does `tesseract --list-langs` output include every language in `language`?
///
/// Tesseract accepts `eng+deu` style combinations.
fn language_is_installed(listing: &str, language: &str) -> bool {
    // The first line is a header like `List of available languages in ...`.
    let installed = listing
        .lines()
        .skip(1)
        .map(str::trim)
        .collect::<Vec<_>>();
    language
        .split('+')
        .all(|lang| installed.contains(&lang.trim()))
}

#[cfg(test)]
mod tests {
    use image::{GrayImage, Luma};

    use super::*;

    #[test]
    fn checks_language_listing() {
        let listing = "List of available languages in \"/usr/share/tessdata/\" (3):\neng\nosd\ndeu\n";
        assert!(language_is_installed(listing, "eng"));
        assert!(language_is_installed(listing, "deu+eng"));
        assert!(!language_is_installed(listing, "fra"));
        assert!(!language_is_installed(listing, "eng+fra"));
        assert!(!language_is_installed(listing, "List of available languages in"));
    }

    #[test]
    fn missing_explicit_path_is_engine_unavailable() {
        let result = resolve_engine_path(Some(Path::new("/nonexistent/tesseract")));
        assert!(matches!(result, Err(PipelineError::EngineUnavailable(_))));
    }

    #[test]
    fn bundled_engine_lives_next_to_executable() {
        let path = bundled_engine_path().expect("test binary has a parent directory");
        assert!(path.to_string_lossy().contains(BUNDLED_ENGINE_DIR));
    }

    #[tokio::test]
    async fn locate_fails_for_missing_binary() {
        let result = TesseractEngine::locate(
            Some(Path::new("/nonexistent/tesseract")),
            None,
            CpuLimit::new(1),
        )
        .await;
        assert!(matches!(result, Err(PipelineError::EngineUnavailable(_))));
    }

    #[tokio::test]
    #[ignore = "Requires tesseract to be installed"]
    async fn recognizes_blank_page_as_whitespace() -> Result<()> {
        let engine = TesseractEngine::locate(None, None, CpuLimit::per_cpu()).await?;
        let blank = PixelBuffer::new(GrayImage::from_pixel(200, 100, Luma([255])));
        let text = engine.recognize_text(blank).await?;
        assert!(text.trim().is_empty());
        Ok(())
    }
}
