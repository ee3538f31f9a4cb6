use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing_subscriber::{
    EnvFilter, Layer as _, filter::Directive, fmt::format::FmtSpan, layer::SubscriberExt,
    util::SubscriberInitExt as _,
};

use self::{prelude::*, ui::Ui};

mod async_utils;
mod cmd;
mod config;
mod cpu_limit;
mod document;
mod errors;
mod index;
mod ocr;
mod pipeline;
mod prelude;
mod progress;
mod rasterize;
mod render;
mod session;
mod ui;

/// Search scanned PDFs by OCRing every page.
#[derive(Debug, Parser)]
#[clap(
    version,
    after_help = r#"
External Tools:
  - pdfinfo, pdftocairo (Poppler): page counting and rendering.
  - tesseract: text recognition. Searched for on PATH, then in
    Tesseract-OCR/ next to this program.

Environment Variables:
  - TESSERACT_PATH (optional): The tesseract binary to use.
  - OCR_SEARCH_LANG (optional): Tesseract language code, like "eng".
  - OCR_SEARCH_ZOOM (optional): Rendering zoom factor.
  - RUST_LOG (optional): Log filter, like "ocr_search=debug".

  These variables may be set in a standard `.env` file.
"#
)]
struct Opts {
    #[clap(subcommand)]
    subcmd: Cmd,
}

/// The subcommands we support.
#[derive(Debug, Subcommand)]
enum Cmd {
    /// OCR a PDF and print the pages matching each query.
    Search(cmd::search::SearchOpts),
    /// OCR a PDF and write its text as JSONL, one page per line.
    Index(cmd::index::IndexOpts),
    /// Open PDFs and run queries interactively.
    Interactive(cmd::interactive::InteractiveOpts),
    /// Print schemas for output formats.
    Schema(cmd::schema::SchemaOpts),
}

impl Cmd {
    /// Are we using stdout for output?
    fn using_stdout_for_output(&self) -> bool {
        match self {
            Cmd::Search(opts) => opts.output.output_path.is_none(),
            Cmd::Index(opts) => opts.output.output_path.is_none(),
            // Progress bars live on stderr, between queries.
            Cmd::Interactive(_) => false,
            Cmd::Schema(opts) => opts.output_path.is_none(),
        }
    }
}

/// Our entry point, which can return an error. [`anyhow::Result`] will
/// automatically print a nice error message with optional backtrace.
#[tokio::main]
async fn main() -> Result<()> {
    let ui = Ui::init();

    // Initialize tracing.
    let directive =
        Directive::from_str("info").expect("built-in directive should be valid");
    let env_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_writer(ui.get_stderr_writer())
        .with_filter(env_filter);

    tracing_subscriber::registry().with(subscriber).init();

    // Call our real `main` function now that logging is set up.
    real_main(ui).await
}

/// Our real entry point.
#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main(ui: Ui) -> Result<()> {
    // Load environment variables from a `.env` file, if it exists.
    dotenvy::dotenv().ok();

    // Parse command-line arguments.
    let opts = Opts::parse();
    debug!("Parsed options: {:?}", opts);

    // Hide the progress bar if we're using stdout for output.
    if opts.subcmd.using_stdout_for_output() {
        ui.hide_progress_bars();
    }

    // Run the appropriate subcommand.
    match &opts.subcmd {
        Cmd::Search(opts) => {
            cmd::search::cmd_search(ui, opts).await?;
        }
        Cmd::Index(opts) => {
            cmd::index::cmd_index(ui, opts).await?;
        }
        Cmd::Interactive(opts) => {
            cmd::interactive::cmd_interactive(ui, opts).await?;
        }
        Cmd::Schema(schema_opts) => {
            cmd::schema::cmd_schema(schema_opts).await?;
        }
    }
    Ok(())
}
