//! The `interactive` subcommand: a small query loop over one document at a
//! time.

use std::{io::Write as _, sync::Arc};

use clap::Args;
use futures::StreamExt as _;
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tokio_stream::wrappers::LinesStream;

use super::{open_document, start_session};
use crate::{
    async_utils::io::write_output, config::PipelineOpts, index::DocumentIndex,
    prelude::*, render::render_text, session::Session, ui::Ui,
};

const HELP: &str = "\
Type a query to search the open document.
  :open <PDF>   open a document (reuses the index if the file is unchanged)
  :pages        show the open document and its page count
  :help         show this help
  :quit         exit
";

/// Interactive command line arguments.
#[derive(Debug, Args)]
pub struct InteractiveOpts {
    /// A PDF to open at startup.
    pub input_path: Option<PathBuf>,

    /// Include the full text of each matching page.
    #[clap(long)]
    pub full_text: bool,

    #[clap(flatten)]
    pub pipeline: PipelineOpts,
}

/// One line of user input.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Blank,
    Open(&'a Path),
    Pages,
    Help,
    Quit,
    Unknown(&'a str),
    Query(&'a str),
}

impl<'a> Input<'a> {
    fn parse(line: &'a str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Input::Blank;
        }
        let Some(command) = line.strip_prefix(':') else {
            return Input::Query(line);
        };
        let (name, arg) = command
            .split_once(char::is_whitespace)
            .map_or((command, ""), |(name, arg)| (name, arg.trim()));
        match (name, arg) {
            ("open" | "o", "") => Input::Unknown(line),
            ("open" | "o", path) => Input::Open(Path::new(path)),
            ("pages" | "p", _) => Input::Pages,
            ("help" | "h" | "?", _) => Input::Help,
            ("quit" | "q" | "exit", _) => Input::Quit,
            _ => Input::Unknown(line),
        }
    }
}

/// The `interactive` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_interactive(ui: Ui, opts: &InteractiveOpts) -> Result<()> {
    let session = start_session(&ui, &opts.pipeline).await?;
    let shutdown = session.shutdown_token();
    let context_chars = session.pipeline().config().context_chars;

    let mut current: Option<Arc<DocumentIndex>> = None;
    if let Some(path) = &opts.input_path {
        current = Some(open_document(&ui, &session, path).await?);
    }

    prompt(&ui, HELP);
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = LinesStream::new(stdin.lines());
    loop {
        prompt(&ui, "> ");
        let line = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            line = lines.next() => match line {
                Some(line) => line.context("failed to read from stdin")?,
                None => break,
            },
        };

        match Input::parse(&line) {
            Input::Blank => {}
            Input::Quit => break,
            Input::Help => prompt(&ui, HELP),
            Input::Unknown(line) => prompt(&ui, &format!("Unknown command {line:?}\n")),
            Input::Pages => prompt(&ui, &describe_current(&session, current.as_deref())),
            Input::Open(path) => match open_document(&ui, &session, path).await {
                Ok(index) => current = Some(index),
                // A cancelled run ends the loop on the next iteration.
                Err(err) => error!("{err:#}"),
            },
            Input::Query(query) => match &current {
                Some(index) => {
                    let results = index.search(query, context_chars);
                    write_output(None, &render_text(query, &results, opts.full_text))
                        .await?;
                }
                None => prompt(&ui, "No document open. Use :open <PDF>\n"),
            },
        }
    }

    session.close();
    Ok(())
}

/// Describe the open document.
fn describe_current(session: &Session, current: Option<&DocumentIndex>) -> String {
    match (session.current_document(), current) {
        (Some(identity), Some(index)) => {
            format!("{identity}: {} pages\n", index.len())
        }
        (None, Some(index)) => format!("{} pages\n", index.len()),
        (_, None) => "No document open.\n".to_owned(),
    }
}

/// Write a prompt or message to stderr without disturbing progress bars.
fn prompt(ui: &Ui, text: &str) {
    let mut stderr = ui.get_stderr_writer();
    if let Err(err) = stderr.write_all(text.as_bytes()).and_then(|()| stderr.flush()) {
        debug!("Cannot write prompt: {err}");
    }
}
