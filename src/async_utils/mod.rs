//! Asynchronous utilities for use with Tokio.
//!
//! The pipeline spends nearly all of its time waiting on external processes
//! or on CPU-bound image work. The helpers here keep both of those off the
//! async executor's worker threads and report their failures uniformly.

use std::process::Output;

use crate::prelude::*;

pub mod io;

/// Wrapper around [`tokio::task::spawn_blocking`] that propagates panics from
/// the background task.
pub async fn spawn_blocking_propagating_panics<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(value) => Ok(value),
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(err) => Err(anyhow!("blocking task was cancelled: {err}")),
    }
}

/// Report any command failures, and include any error output.
///
/// Standard output and standard error are logged. If `is_error_line` is
/// supplied, a successful exit is still treated as a failure when any line of
/// standard error matches it.
pub fn check_for_command_failure(
    command_name: &str,
    output: &Output,
    is_error_line: Option<&dyn Fn(&str) -> bool>,
) -> Result<()> {
    let stderr = String::from_utf8_lossy(&output.stderr);
    trace!(
        command_name = command_name,
        bytes = output.stdout.len(),
        "Standard output from command"
    );

    if output.status.success() {
        if !stderr.trim().is_empty() {
            debug!(command_name = command_name, output = %stderr, "Standard error from command");
        }
        if let Some(is_error_line) = is_error_line {
            if stderr.lines().any(is_error_line) {
                return Err(anyhow!(
                    "{} printed error output:\n{}",
                    command_name,
                    stderr,
                ));
            }
        }
        Ok(())
    } else {
        error!(command_name = command_name, output = %stderr, "Standard error from command");
        if let Some(exit_code) = output.status.code() {
            Err(anyhow!(
                "{} failed with exit code {} and error output:\n{}",
                command_name,
                exit_code,
                stderr,
            ))
        } else {
            Err(anyhow!(
                "{} failed with error output:\n{}",
                command_name,
                stderr,
            ))
        }
    }
}
