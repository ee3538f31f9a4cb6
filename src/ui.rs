//! Application UI. For now, this is mostly progress bars.
//!
//! This is adapted from `substudy` by Eric Kidd, which is licensed under
//! Apache-2.0 OR MIT. Used with permission.

use std::{
    borrow::Cow,
    io,
    sync::{Arc, OnceLock},
    time::Duration,
};

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::progress::ProgressSink;

/// Application UI state.
#[derive(Clone)]
pub struct Ui {
    /// Our progress bars, shared with the stderr writer used by `tracing`.
    multi_progress: Arc<MultiProgress>,
}

impl Ui {
    /// Create a new UI. This sets up logging and and progress bars.
    pub fn init() -> Ui {
        let multi_progress = Arc::new(MultiProgress::new());
        Ui { multi_progress }
    }

    /// Create a new UI for unit tests.
    #[cfg(test)]
    pub fn init_for_tests() -> Ui {
        let multi_progress =
            Arc::new(MultiProgress::with_draw_target(ProgressDrawTarget::hidden()));
        Ui { multi_progress }
    }

    /// Hide all our progress bars completely, for when we're writing actual
    /// output to `stdout`.
    pub fn hide_progress_bars(&self) {
        self.multi_progress
            .set_draw_target(ProgressDrawTarget::hidden());
    }

    /// Get a writer than can be used to write to stderr, for use with `tracing`
    /// and other output code.
    pub fn get_stderr_writer(&self) -> SafeStderrWriter {
        SafeStderrWriter { ui: self.clone() }
    }

    /// Get a reference to our progress bars.
    pub fn multi_progress(&self) -> &MultiProgress {
        &self.multi_progress
    }

    /// Create a new page progress bar. Nothing is drawn until the first
    /// status or progress update, so a document that fails to open never
    /// shows a bar.
    pub fn new_page_progress(&self, config: &ProgressConfig<'_>) -> PageProgress {
        PageProgress {
            ui: self.clone(),
            emoji: config.emoji.to_owned(),
            msg: config.msg.to_owned(),
            done_msg: config.done_msg.to_owned(),
            pb: OnceLock::new(),
        }
    }

    /// Create a new spinner with default settings.
    pub fn new_spinner(&self, config: &ProgressConfig<'_>) -> ProgressBar {
        let sp = ProgressBar::new_spinner().with_style(default_spinner_style());
        let sp = self.multi_progress.add(sp);
        #[cfg(test)]
        sp.set_draw_target(ProgressDrawTarget::hidden());
        sp.set_prefix(config.emoji.to_owned());
        sp.set_message(config.msg.to_owned());
        sp.enable_steady_tick(Duration::from_millis(250));
        sp.with_finish(indicatif::ProgressFinish::WithMessage(Cow::Owned(
            config.done_msg.to_owned(),
        )))
    }
}

/// Configuration for a progress bar.
pub struct ProgressConfig<'a> {
    /// Emoji to display in the progress bar.
    pub emoji: &'a str,
    /// Message to display in a running progress bar.
    pub msg: &'a str,
    /// Message to display in a progress bar when it is done.
    pub done_msg: &'a str,
}

fn default_progress_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("  {prefix:3}{msg:30} {pos:>4}/{len:4} {elapsed_precise} {wide_bar:.cyan/blue} {eta_precise}")
        .expect("bad progress bar template")
}

fn default_spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner} {prefix:3}{msg}")
        .expect("bad progress bar template")
}

/// A progress bar counting OCRed pages.
pub struct PageProgress {
    ui: Ui,
    emoji: String,
    msg: String,
    done_msg: String,
    pb: OnceLock<ProgressBar>,
}

impl PageProgress {
    /// Get our bar, adding it to the display the first time.
    fn bar(&self) -> &ProgressBar {
        self.pb.get_or_init(|| {
            let pb = ProgressBar::new(0).with_style(default_progress_style());
            let pb = self.ui.multi_progress.add(pb);
            #[cfg(test)]
            pb.set_draw_target(ProgressDrawTarget::hidden());
            pb.set_prefix(self.emoji.clone());
            pb.set_message(self.msg.clone());
            pb.enable_steady_tick(Duration::from_millis(250));
            pb.with_finish(indicatif::ProgressFinish::WithMessage(Cow::Owned(
                self.done_msg.clone(),
            )))
        })
    }

    /// Finish the bar, leaving the "done" message.
    pub fn finish(&self) {
        if let Some(pb) = self.pb.get() {
            pb.finish_using_style();
        }
    }

    /// Remove the bar, for runs that failed or were cancelled.
    pub fn abandon(&self) {
        if let Some(pb) = self.pb.get() {
            pb.abandon();
        }
    }

    #[cfg(test)]
    fn position(&self) -> Option<(u64, Option<u64>)> {
        self.pb.get().map(|pb| (pb.position(), pb.length()))
    }
}

impl ProgressSink for PageProgress {
    fn on_progress(&self, completed: usize, total: usize) {
        let pb = self.bar();
        pb.set_length(total as u64);
        // Updates may arrive slightly out of order from concurrent workers.
        // Never move the bar backwards.
        if completed as u64 > pb.position() {
            pb.set_position(completed as u64);
        }
    }

    fn on_status(&self, message: &str) {
        self.bar().set_message(message.to_owned());
    }
}

/// A writer which can used to write to `stderr`. It will hide and show progress
/// bars as needed, so that they don't interfere with the output.
#[derive(Clone)]
pub struct SafeStderrWriter {
    ui: Ui,
}

// The `tracing-indicatif` crate suggests that we should implement the following
// methods.
impl io::Write for SafeStderrWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ui.multi_progress().suspend(|| io::stderr().write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.ui.multi_progress().suspend(|| io::stderr().flush())
    }

    fn write_vectored(&mut self, bufs: &[io::IoSlice<'_>]) -> io::Result<usize> {
        self.ui
            .multi_progress()
            .suspend(|| io::stderr().write_vectored(bufs))
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.ui
            .multi_progress()
            .suspend(|| io::stderr().write_all(buf))
    }

    fn write_fmt(&mut self, fmt: std::fmt::Arguments<'_>) -> io::Result<()> {
        self.ui
            .multi_progress()
            .suspend(|| io::stderr().write_fmt(fmt))
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SafeStderrWriter {
    type Writer = SafeStderrWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
