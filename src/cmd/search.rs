//! The `search` subcommand.

use clap::Args;

use super::{OutputFormat, OutputOpts, open_document, start_session};
use crate::{
    async_utils::io::{to_jsonl, write_output},
    config::PipelineOpts,
    index::DocumentIndex,
    prelude::*,
    render::render_text,
    ui::Ui,
};

/// Search command line arguments.
#[derive(Debug, Args)]
pub struct SearchOpts {
    /// The scanned PDF to search.
    pub input_path: PathBuf,

    /// One or more queries. Each is matched case-insensitively.
    #[clap(required = true)]
    pub queries: Vec<String>,

    /// Output format.
    #[clap(long, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Include the full text of each matching page in text output.
    #[clap(long)]
    pub full_text: bool,

    #[clap(flatten)]
    pub output: OutputOpts,

    #[clap(flatten)]
    pub pipeline: PipelineOpts,
}

/// The `search` subcommand.
#[instrument(level = "debug", skip_all, fields(input = %opts.input_path.display()))]
pub async fn cmd_search(ui: Ui, opts: &SearchOpts) -> Result<()> {
    let session = start_session(&ui, &opts.pipeline).await?;
    let index = open_document(&ui, &session, &opts.input_path).await?;
    let context_chars = session.pipeline().config().context_chars;

    let output = format_results(&index, &opts.queries, context_chars, opts)?;
    write_output(opts.output.output_path.as_deref(), &output).await?;
    session.close();
    Ok(())
}

/// Run every query and format the results.
fn format_results(
    index: &DocumentIndex,
    queries: &[String],
    context_chars: usize,
    opts: &SearchOpts,
) -> Result<String> {
    let mut out = String::new();
    for (i, query) in queries.iter().enumerate() {
        let results = index.search(query, context_chars);
        match opts.format {
            OutputFormat::Text => {
                if i > 0 {
                    out.push('\n');
                }
                out.push_str(&render_text(query, &results, opts.full_text));
            }
            OutputFormat::Jsonl => out.push_str(&to_jsonl(&results)?),
        }
    }
    Ok(out)
}
