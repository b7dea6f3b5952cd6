//! Single-line terminal rendering of progress updates.

use std::io::{self, Write};

use super::{ProgressSink, ProgressUpdate};

/// Renders progress to a terminal-like writer.
///
/// The descent counter and summary lines share one display line that is
/// overwritten in place with a carriage return; verbose lines are written
/// verbatim, one per line.
///
/// # Examples
/// ```
/// use gravity_core::{ProgressSink, ProgressUpdate, TerminalDisplay};
///
/// let mut display = TerminalDisplay::new(Vec::new());
/// display.publish(&ProgressUpdate::Descents(1))?;
/// display.publish(&ProgressUpdate::Descents(2))?;
/// display.finish()?;
/// assert_eq!(display.into_inner(), b"\rdescended points: 1\rdescended points: 2\n");
/// # Ok::<(), std::io::Error>(())
/// ```
#[derive(Debug)]
pub struct TerminalDisplay<W> {
    writer: W,
    width: usize,
}

impl<W: Write> TerminalDisplay<W> {
    /// Wraps `writer`.
    pub const fn new(writer: W) -> Self {
        Self { writer, width: 0 }
    }

    /// Terminates the rolling line, if one is showing.
    ///
    /// # Errors
    /// Returns [`io::Error`] when the writer fails.
    pub fn finish(&mut self) -> io::Result<()> {
        if self.width > 0 {
            self.writer.write_all(b"\n")?;
            self.width = 0;
        }
        self.writer.flush()
    }

    /// Returns the wrapped writer.
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn overwrite(&mut self, text: &str) -> io::Result<()> {
        let width = text.chars().count();
        let padding = self.width.saturating_sub(width);
        write!(self.writer, "\r{text}{:padding$}", "")?;
        self.width = width;
        self.writer.flush()
    }
}

impl<W: Write> ProgressSink for TerminalDisplay<W> {
    fn publish(&mut self, update: &ProgressUpdate) -> io::Result<()> {
        match update {
            ProgressUpdate::Line(line) => {
                writeln!(self.writer, "{line}")?;
                self.writer.flush()
            }
            ProgressUpdate::Descents(count) => {
                self.overwrite(&format!("descended points: {count}"))
            }
            ProgressUpdate::Summary(line) => self.overwrite(line),
        }
    }
}
