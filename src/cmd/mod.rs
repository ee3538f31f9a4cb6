//! Command-line entry points.

use std::sync::Arc;

use clap::{Args, ValueEnum};

use crate::{
    config::PipelineOpts,
    cpu_limit::CpuLimit,
    index::DocumentIndex,
    ocr::TesseractEngine,
    pipeline::Pipeline,
    prelude::*,
    session::{Session, Upload},
    ui::{ProgressConfig, Ui},
};

pub mod index;
pub mod interactive;
pub mod schema;
pub mod search;

/// How to print search results.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable, with highlighted matches.
    #[default]
    Text,
    /// One JSON `SearchResult` per line.
    Jsonl,
}

/// Options for subcommands which write results somewhere.
#[derive(Args, Clone, Debug)]
pub struct OutputOpts {
    /// Output file. Defaults to standard output.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,
}

/// Locate the OCR engine and set up a session around it.
///
/// Ctrl-C cancels whatever the session is doing.
pub async fn start_session(ui: &Ui, opts: &PipelineOpts) -> Result<Arc<Session>> {
    let config = opts.to_config()?;
    let cpu_limit = CpuLimit::per_cpu();

    let spinner = ui.new_spinner(&ProgressConfig {
        emoji: "🔎",
        msg: "Locating OCR engine",
        done_msg: "Located OCR engine",
    });
    let engine = TesseractEngine::locate(
        opts.tesseract_path.as_deref(),
        opts.language.as_deref(),
        cpu_limit.clone(),
    )
    .await;
    let engine = match engine {
        Ok(engine) => {
            spinner.finish_using_style();
            engine
        }
        Err(err) => {
            spinner.abandon();
            return Err(err.into());
        }
    };
    debug!(binary = %engine.binary().display(), jobs = config.jobs, "Starting session");

    let session = Arc::new(Session::new(
        Pipeline::new(Arc::new(engine), config),
        cpu_limit,
    ));

    let shutdown = session.shutdown_token();
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown.cancelled() => {}
            result = tokio::signal::ctrl_c() => {
                match result {
                    Ok(()) => warn!("Interrupted, cancelling"),
                    Err(err) => error!("Cannot listen for Ctrl-C: {err}"),
                }
                shutdown.cancel();
            }
        }
    });

    Ok(session)
}

/// Read `path` and get its index, showing page progress once the document
/// has opened.
pub async fn open_document(
    ui: &Ui,
    session: &Session,
    path: &Path,
) -> Result<Arc<DocumentIndex>> {
    let upload = Upload::from_path(path).await?;
    let progress = ui.new_page_progress(&ProgressConfig {
        emoji: "📄",
        msg: "Scanning pages",
        done_msg: "Document ready",
    });
    match session.open(&upload, &progress).await {
        Ok(index) => {
            progress.finish();
            if index.is_empty() {
                warn!("{} has no pages", upload.name);
            } else {
                info!(pages = index.len(), "Indexed {}", upload.name);
            }
            Ok(index)
        }
        Err(err) => {
            progress.abandon();
            Err(err).with_context(|| format!("failed to index {:?}", path.display()))
        }
    }
}
