//! Non-blocking readers over the engine's progress channel.
//!
//! A log file is tailed by reading whatever bytes have been appended since
//! the previous pass. A pipe is read on a dedicated thread that forwards
//! complete lines through a channel, so draining it never blocks either.

use std::{
    collections::VecDeque,
    fs::File,
    io::{self, BufRead, BufReader, Read},
    mem,
    sync::mpsc::{self, Receiver, TryIter},
    thread::{self, JoinHandle},
};

/// Source of raw progress lines for one run.
#[derive(Debug)]
pub enum ProgressSource {
    /// Tail of a log file the engine writes its diagnostics to.
    File(LogTail),
    /// Lines forwarded from the engine's stderr pipe.
    Pipe(PipeTail),
}

impl ProgressSource {
    /// Tails `file` from its current position.
    #[must_use]
    pub fn file(file: File) -> Self {
        Self::File(LogTail {
            file,
            pending: Vec::new(),
            ready: VecDeque::new(),
        })
    }

    /// Starts forwarding lines read from `reader` on a background thread.
    ///
    /// # Errors
    /// Returns [`io::Error`] when the reader thread cannot be started.
    pub fn pipe<R>(reader: R) -> io::Result<Self>
    where
        R: Read + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("gravity-progress".to_owned())
            .spawn(move || -> io::Result<()> {
                let mut reader = BufReader::new(reader);
                let mut buffer = Vec::new();
                loop {
                    buffer.clear();
                    if reader.read_until(b'\n', &mut buffer)? == 0 {
                        return Ok(());
                    }
                    // The receiver only disappears once the run is over.
                    if sender.send(decode_line(&buffer)).is_err() {
                        return Ok(());
                    }
                }
            })?;
        Ok(Self::Pipe(PipeTail {
            receiver,
            reader: Some(handle),
        }))
    }

    /// Returns the lines that are available right now.
    ///
    /// The returned iterator is finite and never blocks. Lines it does not
    /// yield before being dropped remain queued for the next drain.
    ///
    /// # Errors
    /// Returns [`io::Error`] when the log file cannot be read.
    pub fn drain(&mut self) -> io::Result<Drain<'_>> {
        match self {
            Self::File(tail) => {
                tail.read_available()?;
                Ok(Drain::Buffered(&mut tail.ready))
            }
            Self::Pipe(tail) => Ok(Drain::Channel(tail.receiver.try_iter())),
        }
    }

    /// Marks the end of the stream once the engine has exited.
    ///
    /// A trailing partial line in a log file becomes a complete line, and the
    /// pipe reader thread is joined so every forwarded line is queued. Call
    /// [`Self::drain`] afterwards to collect them.
    ///
    /// # Errors
    /// Returns [`io::Error`] when the final read fails or the pipe reader
    /// failed.
    pub fn close(&mut self) -> io::Result<()> {
        match self {
            Self::File(tail) => {
                tail.read_available()?;
                if !tail.pending.is_empty() {
                    let partial = mem::take(&mut tail.pending);
                    tail.ready.push_back(decode_line(&partial));
                }
                Ok(())
            }
            Self::Pipe(tail) => match tail.reader.take() {
                Some(handle) => handle
                    .join()
                    .map_err(|_| io::Error::other("progress reader thread panicked"))?,
                None => Ok(()),
            },
        }
    }
}

/// Incremental reader over an append-only log file.
#[derive(Debug)]
pub struct LogTail {
    file: File,
    pending: Vec<u8>,
    ready: VecDeque<String>,
}

impl LogTail {
    fn read_available(&mut self) -> io::Result<()> {
        // Regular files report EOF at the current end instead of blocking.
        self.file.read_to_end(&mut self.pending)?;
        while let Some(newline) = self.pending.iter().position(|byte| *byte == b'\n') {
            let rest = self.pending.split_off(newline + 1);
            let line = mem::replace(&mut self.pending, rest);
            self.ready.push_back(decode_line(&line));
        }
        Ok(())
    }
}

/// Channel-backed reader over the engine's stderr pipe.
#[derive(Debug)]
pub struct PipeTail {
    receiver: Receiver<String>,
    reader: Option<JoinHandle<io::Result<()>>>,
}

/// Lines available from a [`ProgressSource`] at the time of the drain.
pub enum Drain<'a> {
    /// Lines already split out of a log file.
    Buffered(&'a mut VecDeque<String>),
    /// Lines already forwarded by the pipe reader.
    Channel(TryIter<'a, String>),
}

impl Iterator for Drain<'_> {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Self::Buffered(lines) => lines.pop_front(),
            Self::Channel(lines) => lines.next(),
        }
    }
}

// Invalid UTF-8 is replaced rather than rejected.
fn decode_line(raw: &[u8]) -> String {
    let trimmed = raw.strip_suffix(b"\n").unwrap_or(raw);
    let trimmed = trimmed.strip_suffix(b"\r").unwrap_or(trimmed);
    String::from_utf8_lossy(trimmed).into_owned()
}
