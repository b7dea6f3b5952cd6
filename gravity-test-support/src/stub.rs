//! Helpers for the `stub_engine` binary.
//!
//! The stub reads a dataset the way the real engine does (`-stdin` or
//! `-c <file>`), writes one descent line per sample and a summary line to
//! stderr, and prints one label per sample to stdout. [`StubMode`] bends that
//! behaviour to provoke each failure a session must handle.
//!
//! Integration tests know the binary's path through
//! `env!("CARGO_BIN_EXE_stub_engine")` and use [`install_engine`] to wrap it in
//! a script that pins the mode, so the session under test sees an ordinary
//! executable.

use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
    str::FromStr,
};

/// Environment variable selecting the stub's behaviour.
pub const MODE_VAR: &str = "STUB_ENGINE_MODE";

/// Environment variable naming a file the stub writes its arguments to.
pub const ARGS_FILE_VAR: &str = "STUB_ENGINE_ARGS_FILE";

/// Number of extra stderr lines emitted by [`StubMode::Flood`].
pub const FLOOD_LINES: usize = 20_000;

/// Exit code used by [`StubMode::Fail`].
pub const FAIL_EXIT_CODE: i32 = 3;

/// Last stderr line written by [`StubMode::Fail`].
pub const FAIL_MESSAGE: &str = "fatal: field diverged";

/// Behaviour of one stub engine run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StubMode {
    /// Label every sample `index % 3` and exit successfully.
    #[default]
    Echo,
    /// Emit progress, then exit with [`FAIL_EXIT_CODE`].
    Fail,
    /// Emit one progress line, then sleep until killed.
    Hang,
    /// Print one label fewer than there are samples.
    Short,
    /// Print a non-numeric token among the labels.
    Garbage,
    /// Write [`FLOOD_LINES`] unmarked lines to stderr before the normal output.
    Flood,
    /// Exit successfully without printing any labels.
    Silent,
}

impl StubMode {
    /// Every mode, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::Echo,
        Self::Fail,
        Self::Hang,
        Self::Short,
        Self::Garbage,
        Self::Flood,
        Self::Silent,
    ];

    /// Returns the value accepted through [`MODE_VAR`].
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Echo => "echo",
            Self::Fail => "fail",
            Self::Hang => "hang",
            Self::Short => "short",
            Self::Garbage => "garbage",
            Self::Flood => "flood",
            Self::Silent => "silent",
        }
    }
}

impl fmt::Display for StubMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StubMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        if value.is_empty() {
            return Ok(Self::default());
        }
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(value))
            .ok_or_else(|| format!("invalid stub engine mode: {value}"))
    }
}

/// Returns the label the stub assigns to the sample at `index`.
#[must_use]
pub const fn label_for(index: usize) -> i64 {
    (index % 3) as i64
}

/// Counts the samples in a tab-separated payload.
#[must_use]
pub fn count_samples(payload: &str) -> usize {
    payload.lines().filter(|line| !line.trim().is_empty()).count()
}

/// Options for [`install_engine`].
#[derive(Clone, Debug, Default)]
pub struct StubEngine {
    mode: StubMode,
    args_file: Option<PathBuf>,
}

impl StubEngine {
    /// Creates an engine with the given behaviour.
    #[must_use]
    pub fn new(mode: StubMode) -> Self {
        Self {
            mode,
            args_file: None,
        }
    }

    /// Makes the engine record its arguments, one per line, in `path`.
    #[must_use]
    pub fn recording_args(mut self, path: impl Into<PathBuf>) -> Self {
        self.args_file = Some(path.into());
        self
    }

    /// Writes an executable wrapper at `dir/gravity-stub-<mode>` that runs
    /// `binary` with this configuration, returning its path.
    ///
    /// # Errors
    /// Returns [`io::Error`] when the script cannot be written or made
    /// executable.
    #[cfg(unix)]
    pub fn install(&self, dir: &Path, binary: &Path) -> io::Result<PathBuf> {
        use std::os::unix::fs::PermissionsExt;

        let mut env = format!("{MODE_VAR}={}", self.mode);
        if let Some(path) = &self.args_file {
            env.push_str(&format!(" {ARGS_FILE_VAR}={}", quote(path)));
        }
        let script = format!(
            "#!/bin/sh\nexec env {env} {} \"$@\"\n",
            quote(binary)
        );
        let path = dir.join(format!("gravity-stub-{}", self.mode));
        fs::write(&path, script)?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
        Ok(path)
    }
}

/// Installs a stub engine running in `mode`; see [`StubEngine::install`].
///
/// # Errors
/// Returns [`io::Error`] when the wrapper cannot be written.
#[cfg(unix)]
pub fn install_engine(dir: &Path, binary: &Path, mode: StubMode) -> io::Result<PathBuf> {
    StubEngine::new(mode).install(dir, binary)
}

#[cfg(unix)]
fn quote(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', r"'\''"))
}
