//! The `index` subcommand.

use clap::Args;

use super::{OutputOpts, open_document, start_session};
use crate::{
    async_utils::io::{to_jsonl, write_output},
    config::PipelineOpts,
    prelude::*,
    ui::Ui,
};

/// Index command line arguments.
#[derive(Debug, Args)]
pub struct IndexOpts {
    /// The scanned PDF to index.
    pub input_path: PathBuf,

    #[clap(flatten)]
    pub output: OutputOpts,

    #[clap(flatten)]
    pub pipeline: PipelineOpts,
}

/// The `index` subcommand. Writes one `PageResult` per line, in page order.
#[instrument(level = "debug", skip_all, fields(input = %opts.input_path.display()))]
pub async fn cmd_index(ui: Ui, opts: &IndexOpts) -> Result<()> {
    let session = start_session(&ui, &opts.pipeline).await?;
    let index = open_document(&ui, &session, &opts.input_path).await?;
    write_output(opts.output.output_path.as_deref(), &to_jsonl(index.pages())?).await?;
    session.close();
    Ok(())
}
