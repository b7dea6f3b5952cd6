//! Lifecycle management for one engine process.
//!
//! The engine is always started from a structured argument vector, never
//! through a shell. Its stdout is captured on a reader thread and its stdin,
//! when used, is fed from a writer thread so a full pipe on either side can
//! never stall the polling loop.

use std::{
    env,
    ffi::{OsStr, OsString},
    fmt,
    io::{self, Read, Write},
    path::{Path, PathBuf},
    process::{Child, ChildStdin, Command, Stdio},
    thread::{self, JoinHandle},
};

use tempfile::NamedTempFile;
use tracing::{debug, instrument, warn};

use crate::{
    Result,
    config::{EngineCommand, InputMode, InvocationConfig, ProgressMode},
    error::SessionError,
    params::{InputArgument, build_arguments},
    progress::ProgressSource,
};

/// Everything needed to start the engine once.
///
/// # Examples
/// ```
/// use std::path::PathBuf;
/// use gravity_core::{EngineCommand, EngineInvocation, InputArgument, InvocationConfig, ProgressMode};
///
/// let invocation = EngineInvocation::new(
///     PathBuf::from("/opt/gravity/bin/gravity_clustering"),
///     EngineCommand::Fit,
///     &InvocationConfig::new().with_steps(5),
///     InputArgument::Stdin,
///     ProgressMode::File,
/// );
/// assert_eq!(invocation.arguments(), ["fit", "-stdin", "-stdout", "-steps", "5"]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineInvocation {
    program: PathBuf,
    command: EngineCommand,
    arguments: Vec<OsString>,
    input: InputMode,
    progress: ProgressMode,
}

impl EngineInvocation {
    /// Builds the invocation for a resolved `program`.
    #[must_use]
    pub fn new(
        program: PathBuf,
        command: EngineCommand,
        config: &InvocationConfig,
        input: InputArgument<'_>,
        progress: ProgressMode,
    ) -> Self {
        let input_mode = match input {
            InputArgument::Stdin => InputMode::Pipe,
            InputArgument::File(_) => InputMode::File,
        };
        Self {
            program,
            command,
            arguments: build_arguments(command, config, input),
            input: input_mode,
            progress,
        }
    }

    /// Returns the resolved executable path.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Returns the command verb.
    #[must_use]
    pub const fn command(&self) -> EngineCommand {
        self.command
    }

    /// Returns the arguments passed after the executable path.
    #[must_use]
    pub fn arguments(&self) -> &[OsString] {
        &self.arguments
    }

    /// Returns how the engine receives its input.
    #[must_use]
    pub const fn input_mode(&self) -> InputMode {
        self.input
    }

    /// Returns where the engine's diagnostics are collected.
    #[must_use]
    pub const fn progress_mode(&self) -> ProgressMode {
        self.progress
    }
}

impl fmt::Display for EngineInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for argument in &self.arguments {
            write!(f, " {}", argument.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Locates the engine executable.
///
/// A `program` with more than one path component must name an existing file.
/// A bare name is searched for in each directory of `search_path` (normally
/// the `PATH` variable).
///
/// # Errors
/// Returns [`SessionError::EngineNotFound`] when no matching file exists.
pub fn resolve_engine(program: &Path, search_path: Option<&OsStr>) -> Result<PathBuf> {
    let not_found = || SessionError::EngineNotFound {
        program: program.to_path_buf(),
    };

    if program.as_os_str().is_empty() {
        return Err(not_found());
    }
    if program.components().count() > 1 || program.is_absolute() {
        return if program.is_file() {
            Ok(program.to_path_buf())
        } else {
            Err(not_found())
        };
    }

    search_path
        .into_iter()
        .flat_map(env::split_paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
        .ok_or_else(not_found)
}

/// Status reported by a non-blocking poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// The engine is still running.
    Running,
    /// The engine has exited; `None` means it was killed by a signal.
    Exited(Option<i32>),
}

/// Final status and captured stdout of an exited engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOutput {
    /// Exit code, or `None` when killed by a signal.
    pub code: Option<i32>,
    /// Raw bytes written to stdout.
    pub stdout: Vec<u8>,
}

/// Handle to a running engine process.
///
/// Dropping a handle whose process has not been waited on kills and reaps it.
#[derive(Debug)]
pub struct EngineProcess {
    child: Child,
    stdout: Option<JoinHandle<io::Result<Vec<u8>>>>,
    stdin: Option<JoinHandle<io::Result<()>>>,
    reaped: bool,
}

/// Starts the engine described by `invocation`.
///
/// `stdin_payload` is streamed to the engine's stdin when present. Stderr goes
/// to `progress_log` when one is given and to a pipe otherwise; the returned
/// [`ProgressSource`] reads from whichever was chosen.
///
/// # Errors
/// Returns [`SessionError::Spawn`] when the process cannot be started and
/// [`SessionError::Io`] when its channels cannot be wired.
#[instrument(
    name = "supervisor.spawn",
    err,
    skip_all,
    fields(program = %invocation.program.display(), command = %invocation.command),
)]
pub fn spawn(
    invocation: &EngineInvocation,
    stdin_payload: Option<Vec<u8>>,
    progress_log: Option<&NamedTempFile>,
) -> Result<(EngineProcess, ProgressSource)> {
    let mut command = Command::new(&invocation.program);
    command
        .args(&invocation.arguments)
        .stdout(Stdio::piped())
        .stdin(if stdin_payload.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

    let log_reader = match progress_log {
        Some(log) => {
            let writer = log
                .as_file()
                .try_clone()
                .map_err(SessionError::io("open progress log for the engine"))?;
            command.stderr(Stdio::from(writer));
            Some(log.reopen().map_err(SessionError::io("open progress log"))?)
        }
        None => {
            command.stderr(Stdio::piped());
            None
        }
    };

    let mut child = command.spawn().map_err(|source| SessionError::Spawn {
        program: invocation.program.clone(),
        source,
    })?;
    debug!(pid = child.id(), invocation = %invocation, "engine started");

    let stdout = child.stdout.take().map(|pipe| {
        thread::Builder::new()
            .name("gravity-stdout".to_owned())
            .spawn(move || read_all(pipe))
    });
    let stdin = match (child.stdin.take(), stdin_payload) {
        (Some(pipe), Some(payload)) => Some(
            thread::Builder::new()
                .name("gravity-stdin".to_owned())
                .spawn(move || feed(pipe, &payload)),
        ),
        _ => None,
    };
    let progress = match log_reader {
        Some(file) => Ok(ProgressSource::file(file)),
        None => match child.stderr.take() {
            Some(pipe) => ProgressSource::pipe(pipe),
            None => Err(io::Error::other("engine stderr was not captured")),
        },
    };

    // From here on the handle owns the child, so any failure kills it on drop.
    let mut process = EngineProcess {
        child,
        stdout: None,
        stdin: None,
        reaped: false,
    };
    process.stdout = stdout
        .transpose()
        .map_err(SessionError::io("start stdout reader"))?;
    process.stdin = stdin
        .transpose()
        .map_err(SessionError::io("start stdin writer"))?;
    let progress = progress.map_err(SessionError::io("start progress reader"))?;
    Ok((process, progress))
}

fn read_all(mut pipe: impl Read) -> io::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    pipe.read_to_end(&mut buffer)?;
    Ok(buffer)
}

// Dropping the pipe on return delivers EOF to the engine.
fn feed(mut pipe: ChildStdin, payload: &[u8]) -> io::Result<()> {
    match pipe.write_all(payload).and_then(|()| pipe.flush()) {
        // The engine may stop reading early; its exit status tells the story.
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        other => other,
    }
}

impl EngineProcess {
    /// Returns the operating system process id.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Checks whether the engine has exited, without blocking.
    ///
    /// # Errors
    /// Returns [`SessionError::Io`] when the status cannot be queried.
    pub fn poll(&mut self) -> Result<ProcessStatus> {
        let status = self
            .child
            .try_wait()
            .map_err(SessionError::io("poll engine status"))?;
        Ok(match status {
            Some(status) => {
                self.reaped = true;
                ProcessStatus::Exited(status.code())
            }
            None => ProcessStatus::Running,
        })
    }

    /// Forcefully kills the engine and reaps it.
    ///
    /// # Errors
    /// Returns [`SessionError::Io`] when the kill or the reap fails.
    #[instrument(name = "supervisor.terminate", err, skip(self), fields(pid = self.child.id()))]
    pub fn terminate(&mut self) -> Result<()> {
        if !self.reaped {
            self.child
                .kill()
                .map_err(SessionError::io("kill engine"))?;
        }
        self.child
            .wait()
            .map_err(SessionError::io("reap engine"))?;
        self.reaped = true;
        self.join_workers()?;
        debug!("engine terminated");
        Ok(())
    }

    /// Waits for the engine to exit and collects its stdout.
    ///
    /// Call this only once progress no longer needs draining; it blocks.
    ///
    /// # Errors
    /// Returns [`SessionError::Io`] when waiting or reading stdout fails.
    pub fn wait(mut self) -> Result<EngineOutput> {
        let status = self
            .child
            .wait()
            .map_err(SessionError::io("wait for engine"))?;
        self.reaped = true;
        let stdout = self.join_workers()?;
        Ok(EngineOutput {
            code: status.code(),
            stdout,
        })
    }

    fn join_workers(&mut self) -> Result<Vec<u8>> {
        if let Some(stdin) = self.stdin.take() {
            join(stdin, "join stdin writer")?.map_err(SessionError::io("write engine stdin"))?;
        }
        match self.stdout.take() {
            Some(stdout) => {
                join(stdout, "join stdout reader")?.map_err(SessionError::io("read engine stdout"))
            }
            None => Ok(Vec::new()),
        }
    }
}

fn join<T>(handle: JoinHandle<T>, operation: &'static str) -> Result<T> {
    handle.join().map_err(|_| SessionError::Io {
        operation,
        source: io::Error::other("worker thread panicked"),
    })
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        warn!(pid = self.child.id(), "engine handle dropped while running; killing");
        if let Err(err) = self.child.kill().and_then(|()| self.child.wait().map(drop)) {
            warn!(error = %err, "failed to reap abandoned engine");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    use rstest::rstest;
    use tempfile::TempDir;

    #[test]
    fn resolve_rejects_missing_explicit_path() {
        let dir = TempDir::new().expect("scratch dir");
        let missing = dir.path().join("no-such-engine");
        let err = resolve_engine(&missing, None).expect_err("missing engine must fail");
        assert!(matches!(err, SessionError::EngineNotFound { ref program } if *program == missing));
    }

    #[test]
    fn resolve_accepts_existing_explicit_path() {
        let dir = TempDir::new().expect("scratch dir");
        let engine = dir.path().join("engine");
        fs::write(&engine, b"").expect("write placeholder");
        assert_eq!(resolve_engine(&engine, None).expect("resolves"), engine);
    }

    #[test]
    fn resolve_searches_bare_names_in_order() {
        let first = TempDir::new().expect("scratch dir");
        let second = TempDir::new().expect("scratch dir");
        fs::write(second.path().join("gravity_clustering"), b"").expect("write placeholder");
        let search = env::join_paths([first.path(), second.path()]).expect("joinable paths");

        let resolved = resolve_engine(Path::new("gravity_clustering"), Some(search.as_os_str()))
            .expect("bare name must resolve");
        assert_eq!(resolved, second.path().join("gravity_clustering"));
    }

    #[rstest]
    #[case::empty("")]
    #[case::unknown("definitely-not-a-gravity-engine")]
    fn resolve_reports_unresolvable_names(#[case] name: &str) {
        let dir = TempDir::new().expect("scratch dir");
        let search = env::join_paths([dir.path()]).expect("joinable paths");
        let err = resolve_engine(Path::new(name), Some(search.as_os_str()))
            .expect_err("must not resolve");
        assert!(matches!(err, SessionError::EngineNotFound { .. }));
    }

    #[test]
    fn spawn_reports_unstartable_executable() {
        let dir = TempDir::new().expect("scratch dir");
        // A directory exists but can never be executed.
        let invocation = EngineInvocation::new(
            dir.path().to_path_buf(),
            EngineCommand::Fit,
            &InvocationConfig::new(),
            InputArgument::Stdin,
            ProgressMode::Pipe,
        );
        let err = spawn(&invocation, Some(Vec::new()), None).expect_err("spawn must fail");
        assert!(matches!(err, SessionError::Spawn { .. }));
        assert_eq!(err.code().as_str(), "GRAVITY_SPAWN_FAILED");
    }

    #[test]
    fn invocation_displays_as_argv() {
        let path = PathBuf::from("/data/in.tsv");
        let invocation = EngineInvocation::new(
            PathBuf::from("/opt/engine"),
            EngineCommand::FitPredict,
            &InvocationConfig::new().with_refining(true),
            InputArgument::File(&path),
            ProgressMode::File,
        );
        assert_eq!(
            invocation.to_string(),
            "/opt/engine fitpredict -stdout -c /data/in.tsv -refining"
        );
        assert_eq!(invocation.input_mode(), InputMode::File);
        assert_eq!(invocation.progress_mode(), ProgressMode::File);
        assert_eq!(invocation.command(), EngineCommand::FitPredict);
        assert_eq!(invocation.program(), Path::new("/opt/engine"));
    }
}
