//! Serialisation of a [`Dataset`] into the engine's tabular text format and
//! hand-off through the configured input channel.
//!
//! Rows are tab-separated and newline-terminated, with a trailing newline
//! after the last row. Values use Rust's shortest round-trip rendering of
//! `f64` (`1.0`, `0.1`, `1e-20`, `NaN`), which is independent of locale and
//! parses back to the identical value with `str::parse::<f64>`.

use std::{
    io::{self, Write},
    mem,
    path::Path,
};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::{config::InputMode, dataset::Dataset, params::InputArgument};

/// Renders a floating-point value in the fixed text representation shared by
/// the input table and numeric flags.
///
/// # Examples
/// ```
/// use gravity_core::format_float;
///
/// assert_eq!(format_float(1.0), "1.0");
/// assert_eq!(format_float(0.1), "0.1");
/// assert_eq!(format_float(1e-20), "1e-20");
/// ```
#[must_use]
pub fn format_float(value: f64) -> String {
    format!("{value:?}")
}

/// Serialises `dataset` into the engine's tab-separated input format.
///
/// # Examples
/// ```
/// use gravity_core::{Dataset, serialize};
///
/// let dataset = Dataset::try_from_rows(vec![vec![1.0, 2.0], vec![3.0, 4.0]])?;
/// assert_eq!(serialize(&dataset), "1.0\t2.0\n3.0\t4.0\n");
/// # Ok::<(), gravity_core::DatasetError>(())
/// ```
#[must_use]
pub fn serialize(dataset: &Dataset) -> String {
    let mut payload = String::new();
    for row in dataset.rows() {
        for (column, value) in row.iter().enumerate() {
            if column > 0 {
                payload.push('\t');
            }
            payload.push_str(&format_float(*value));
        }
        payload.push('\n');
    }
    payload
}

/// The transient channel carrying the serialised dataset to one engine run.
///
/// A file channel owns a uniquely named temporary file that is deleted when
/// the channel is released or dropped.
#[derive(Debug)]
pub enum InputChannel {
    /// Dataset persisted to a temporary file.
    File(NamedTempFile),
    /// Dataset held in memory until it is streamed to the engine's stdin.
    Pipe(Vec<u8>),
}

impl InputChannel {
    /// Persists `payload` through the channel selected by `mode`.
    ///
    /// File channels are created inside `scratch_dir` with a unique name so
    /// concurrent runs never share a path.
    ///
    /// # Errors
    /// Returns [`io::Error`] when the temporary file cannot be created,
    /// written, or flushed.
    pub fn write(payload: String, mode: InputMode, scratch_dir: &Path) -> io::Result<Self> {
        match mode {
            InputMode::Pipe => Ok(Self::Pipe(payload.into_bytes())),
            InputMode::File => {
                let mut file = tempfile::Builder::new()
                    .prefix("gravity-input-")
                    .suffix(".tsv")
                    .tempfile_in(scratch_dir)?;
                file.write_all(payload.as_bytes())?;
                file.flush()?;
                debug!(path = %file.path().display(), bytes = payload.len(), "input file written");
                Ok(Self::File(file))
            }
        }
    }

    /// Returns the input flags this channel requires.
    #[must_use]
    pub fn argument(&self) -> InputArgument<'_> {
        match self {
            Self::File(file) => InputArgument::File(file.path()),
            Self::Pipe(_) => InputArgument::Stdin,
        }
    }

    /// Takes the bytes to stream into the engine's stdin, leaving the channel
    /// empty. File channels yield `None`.
    pub fn take_stdin_payload(&mut self) -> Option<Vec<u8>> {
        match self {
            Self::Pipe(bytes) => Some(mem::take(bytes)),
            Self::File(_) => None,
        }
    }

    /// Returns the path of the temporary input file, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::File(file) => Some(file.path()),
            Self::Pipe(_) => None,
        }
    }

    /// Deletes the temporary input file, reporting any failure.
    ///
    /// # Errors
    /// Returns [`io::Error`] when the file cannot be removed.
    pub fn release(self) -> io::Result<()> {
        match self {
            Self::File(file) => file.close(),
            Self::Pipe(_) => Ok(()),
        }
    }
}
