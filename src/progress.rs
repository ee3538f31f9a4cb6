//! Progress reporting from the pipeline to whoever is watching.

/// Receives progress from an indexing run.
///
/// Workers call this concurrently. Implementations must not panic, and have
/// no way to push errors back into the pipeline.
pub trait ProgressSink: Send + Sync {
    /// `completed` of `total` pages are done.
    fn on_progress(&self, completed: usize, total: usize);

    /// A human-readable status line.
    fn on_status(&self, message: &str);
}

/// A [`ProgressSink`] that ignores everything.
#[cfg(test)]
pub struct NoProgress;

#[cfg(test)]
impl ProgressSink for NoProgress {
    fn on_progress(&self, _completed: usize, _total: usize) {}

    fn on_status(&self, _message: &str) {}
}
