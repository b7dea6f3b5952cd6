//! Progress monitoring for a running engine.
//!
//! The engine's diagnostic stream is free text. Only two substrings carry
//! meaning: [`DESCENT_MARKER`] marks one point completing a descent step and
//! [`SUMMARY_MARKER`] marks a cluster-count summary. Everything else is passed
//! through in verbose mode and ignored otherwise.

mod display;
mod source;

use std::{collections::VecDeque, io};

use thiserror::Error;

pub use display::TerminalDisplay;
pub use source::{Drain, LogTail, PipeTail, ProgressSource};

use crate::control::RunControl;

/// Substring identifying a per-point descent line.
pub const DESCENT_MARKER: &str = "s:";

/// Substring identifying a cluster-count summary line.
pub const SUMMARY_MARKER: &str = "Clusters";

/// Default number of raw lines retained for failure diagnostics.
pub const DEFAULT_TAIL_CAPACITY: usize = 20;

/// Progress counters accumulated over one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressState {
    /// Number of descent markers observed.
    pub descents: u64,
    /// Most recent summary line, if any.
    pub summary: Option<String>,
    /// Total number of raw lines observed.
    pub lines: u64,
}

/// A progress notification delivered to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressUpdate {
    /// A raw progress line, forwarded verbatim in verbose mode.
    ///
    /// The line terminator is stripped. Bytes that are not valid UTF-8 are
    /// replaced with `U+FFFD REPLACEMENT CHARACTER`, so such lines are not
    /// byte-for-byte identical to what the engine wrote.
    Line(String),
    /// The rolling descent counter, in non-verbose mode. Not sent once a
    /// summary has been shown.
    Descents(u64),
    /// A summary line replacing the rolling counter, in non-verbose mode.
    Summary(String),
}

/// Failure while draining a [`ProgressSource`] into a sink.
#[derive(Debug, Error)]
pub enum DrainError {
    /// The progress channel could not be read.
    #[error("failed to read progress channel: {0}")]
    Source(#[source] io::Error),
    /// The sink rejected an update.
    #[error("failed to publish progress: {0}")]
    Sink(#[source] io::Error),
}

/// Receives progress updates in arrival order.
pub trait ProgressSink {
    /// Handles one update.
    ///
    /// # Errors
    /// Returns [`io::Error`] when the update cannot be rendered; the session
    /// treats this as a failed run.
    fn publish(&mut self, update: &ProgressUpdate) -> io::Result<()>;
}

impl<F> ProgressSink for F
where
    F: FnMut(&ProgressUpdate),
{
    fn publish(&mut self, update: &ProgressUpdate) -> io::Result<()> {
        self(update);
        Ok(())
    }
}

/// Sink that discards every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn publish(&mut self, _update: &ProgressUpdate) -> io::Result<()> {
        Ok(())
    }
}

/// Folds raw progress lines into [`ProgressState`] and forwards updates to a
/// [`ProgressSink`].
///
/// # Examples
/// ```
/// use gravity_core::{ProgressMonitor, ProgressUpdate, RunControl};
///
/// let control = RunControl::new();
/// let mut seen = Vec::new();
/// let mut sink = |update: &ProgressUpdate| seen.push(update.clone());
/// let mut monitor = ProgressMonitor::new(false, 4, &mut sink, &control);
/// monitor.observe("s: 0".to_owned())?;
/// monitor.observe("Clusters: 3".to_owned())?;
/// let (state, _tail) = monitor.finish();
/// assert_eq!(state.descents, 1);
/// assert_eq!(
///     seen,
///     [ProgressUpdate::Descents(1), ProgressUpdate::Summary("Clusters: 3".to_owned())]
/// );
/// # Ok::<(), std::io::Error>(())
/// ```
pub struct ProgressMonitor<'a> {
    verbose: bool,
    state: ProgressState,
    tail: VecDeque<String>,
    tail_capacity: usize,
    sink: &'a mut dyn ProgressSink,
    control: &'a RunControl,
}

impl<'a> ProgressMonitor<'a> {
    /// Creates a monitor that retains at most `tail_capacity` raw lines.
    pub fn new(
        verbose: bool,
        tail_capacity: usize,
        sink: &'a mut dyn ProgressSink,
        control: &'a RunControl,
    ) -> Self {
        Self {
            verbose,
            state: ProgressState::default(),
            tail: VecDeque::with_capacity(tail_capacity),
            tail_capacity,
            sink,
            control,
        }
    }

    /// Processes one raw progress line.
    ///
    /// When a line carries both markers the summary wins.
    ///
    /// # Errors
    /// Propagates sink failures.
    pub fn observe(&mut self, line: String) -> io::Result<()> {
        self.state.lines += 1;
        self.remember(&line);

        let update = if line.contains(SUMMARY_MARKER) {
            self.state.summary = Some(line.clone());
            (!self.verbose).then(|| ProgressUpdate::Summary(line.clone()))
        } else if line.contains(DESCENT_MARKER) {
            self.state.descents += 1;
            // A shown summary is only replaced by a later summary.
            (!self.verbose && self.state.summary.is_none())
                .then_some(ProgressUpdate::Descents(self.state.descents))
        } else {
            None
        };
        self.control.set_progress(&self.state);

        if self.verbose {
            return self.sink.publish(&ProgressUpdate::Line(line));
        }
        match update {
            Some(update) => self.sink.publish(&update),
            None => Ok(()),
        }
    }

    /// Observes every line currently available from `source` without
    /// blocking, returning how many were processed.
    ///
    /// # Errors
    /// Returns [`DrainError::Source`] when the source cannot be read and
    /// [`DrainError::Sink`] when the sink fails.
    pub fn drain(&mut self, source: &mut ProgressSource) -> Result<usize, DrainError> {
        let mut processed = 0;
        for line in source.drain().map_err(DrainError::Source)? {
            self.observe(line).map_err(DrainError::Sink)?;
            processed += 1;
        }
        Ok(processed)
    }

    /// Returns the progress accumulated so far.
    #[must_use]
    pub const fn state(&self) -> &ProgressState {
        &self.state
    }

    /// Consumes the monitor, returning the final state and the retained tail
    /// of raw lines, oldest first.
    #[must_use]
    pub fn finish(self) -> (ProgressState, Vec<String>) {
        (self.state, self.tail.into_iter().collect())
    }

    fn remember(&mut self, line: &str) {
        if self.tail_capacity == 0 {
            return;
        }
        if self.tail.len() == self.tail_capacity {
            self.tail.pop_front();
        }
        self.tail.push_back(line.to_owned());
    }
}
