//! Session orchestration: one engine run from marshaling to labels.
//!
//! A run moves through `Idle → Marshaling → Spawned → Polling → Draining`
//! and ends in `Completed` or `Failed`. Transient files are released on the
//! way into either terminal state, and the engine process is killed if the
//! run leaves the polling loop early.

use std::{
    env,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

use tempfile::NamedTempFile;
use tracing::{Span, debug, field, info, instrument, warn};

use crate::{
    Result,
    config::{EngineCommand, InputMode, InvocationConfig, ProgressMode},
    control::{RunControl, SessionState},
    dataset::Dataset,
    error::SessionError,
    marshal::{InputChannel, serialize},
    output::{ClusterAssignment, parse_output},
    progress::{DEFAULT_TAIL_CAPACITY, NullSink, ProgressMonitor, ProgressSink, ProgressSource},
    supervisor::{self, EngineInvocation, EngineProcess, ProcessStatus},
};

/// Default sleep between two polls of the engine.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Configures and constructs [`Session`] instances.
///
/// # Examples
/// ```
/// use std::time::Duration;
/// use gravity_core::{InputMode, ProgressMode, SessionBuilder};
///
/// let session = SessionBuilder::new("/opt/gravity/bin/gravity_clustering")
///     .with_input_mode(InputMode::File)
///     .with_progress_mode(ProgressMode::Pipe)
///     .with_poll_interval(Duration::from_millis(25))
///     .build()
///     .expect("configuration is valid");
/// assert_eq!(session.input_mode(), InputMode::File);
/// assert_eq!(session.poll_interval(), Duration::from_millis(25));
/// ```
#[derive(Debug, Clone)]
pub struct SessionBuilder {
    engine: PathBuf,
    input_mode: InputMode,
    progress_mode: ProgressMode,
    poll_interval: Duration,
    timeout: Option<Duration>,
    scratch_dir: Option<PathBuf>,
    tail_capacity: usize,
}

impl SessionBuilder {
    /// Creates a builder for the engine at `engine`, which may be a path or a
    /// bare name looked up on `PATH`.
    #[must_use]
    pub fn new(engine: impl Into<PathBuf>) -> Self {
        Self {
            engine: engine.into(),
            input_mode: InputMode::default(),
            progress_mode: ProgressMode::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
            scratch_dir: None,
            tail_capacity: DEFAULT_TAIL_CAPACITY,
        }
    }

    /// Selects how the dataset reaches the engine.
    #[must_use]
    pub fn with_input_mode(mut self, mode: InputMode) -> Self {
        self.input_mode = mode;
        self
    }

    /// Selects where engine diagnostics are collected.
    #[must_use]
    pub fn with_progress_mode(mut self, mode: ProgressMode) -> Self {
        self.progress_mode = mode;
        self
    }

    /// Overrides the sleep between polls.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Fails runs that take longer than `limit`.
    #[must_use]
    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    /// Creates transient files under `dir` instead of the system temp dir.
    #[must_use]
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    /// Sets how many trailing progress lines are kept for failure reports.
    #[must_use]
    pub fn with_tail_capacity(mut self, lines: usize) -> Self {
        self.tail_capacity = lines;
        self
    }

    /// Validates the configuration and constructs a [`Session`].
    ///
    /// # Errors
    /// Returns [`SessionError::InvalidPollInterval`] for a zero poll interval
    /// and [`SessionError::InvalidTimeout`] for a zero timeout.
    pub fn build(self) -> Result<Session> {
        if self.poll_interval.is_zero() {
            return Err(SessionError::InvalidPollInterval);
        }
        if self.timeout.is_some_and(|limit| limit.is_zero()) {
            return Err(SessionError::InvalidTimeout);
        }
        Ok(Session {
            engine: self.engine,
            input_mode: self.input_mode,
            progress_mode: self.progress_mode,
            poll_interval: self.poll_interval,
            timeout: self.timeout,
            scratch_dir: self.scratch_dir.unwrap_or_else(env::temp_dir),
            tail_capacity: self.tail_capacity,
        })
    }
}

/// Runs the engine against datasets.
///
/// A session holds no per-run state, so it can be shared; every run owns its
/// own uniquely named transient files and engine process.
#[derive(Debug, Clone)]
pub struct Session {
    engine: PathBuf,
    input_mode: InputMode,
    progress_mode: ProgressMode,
    poll_interval: Duration,
    timeout: Option<Duration>,
    scratch_dir: PathBuf,
    tail_capacity: usize,
}

/// Transient files owned by one run.
struct Transients {
    input: InputChannel,
    progress_log: Option<NamedTempFile>,
}

impl Transients {
    fn create(input: InputChannel, mode: ProgressMode, scratch_dir: &Path) -> Result<Self> {
        let progress_log = match mode {
            ProgressMode::Pipe => None,
            ProgressMode::File => Some(
                tempfile::Builder::new()
                    .prefix("gravity-progress-")
                    .suffix(".log")
                    .tempfile_in(scratch_dir)
                    .map_err(SessionError::io("create progress log"))?,
            ),
        };
        Ok(Self {
            input,
            progress_log,
        })
    }

    fn release(self) -> Result<()> {
        let input = self
            .input
            .release()
            .map_err(SessionError::io("remove input file"));
        let log = self
            .progress_log
            .map_or(Ok(()), NamedTempFile::close)
            .map_err(SessionError::io("remove progress log"));
        input.and(log)
    }
}

impl Session {
    /// Returns the configured engine path or name.
    #[must_use]
    pub fn engine(&self) -> &Path {
        &self.engine
    }

    /// Returns the input channel mode.
    #[must_use]
    pub const fn input_mode(&self) -> InputMode {
        self.input_mode
    }

    /// Returns the progress channel mode.
    #[must_use]
    pub const fn progress_mode(&self) -> ProgressMode {
        self.progress_mode
    }

    /// Returns the sleep between polls.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Returns the run time limit, if any.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Returns the directory transient files are created in.
    #[must_use]
    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Returns the number of trailing progress lines kept for failure
    /// reports, or `None` when none are kept.
    #[must_use]
    pub const fn tail_capacity(&self) -> Option<NonZeroUsize> {
        NonZeroUsize::new(self.tail_capacity)
    }

    /// Runs the engine on `dataset`, discarding progress.
    ///
    /// # Errors
    /// See [`Self::run_with`].
    pub fn run(
        &self,
        dataset: &Dataset,
        command: EngineCommand,
        config: &InvocationConfig,
    ) -> Result<ClusterAssignment> {
        self.run_with(dataset, command, config, &mut NullSink, &RunControl::new())
    }

    /// Runs the engine on `dataset`, forwarding progress to `sink` and
    /// honouring cancellation through `control`.
    ///
    /// Every progress update is delivered before this returns. The transient
    /// input and progress files are deleted on every path, and a cancelled or
    /// timed-out engine is killed before the error is returned.
    ///
    /// # Errors
    /// Returns [`SessionError::EngineNotFound`] or [`SessionError::Spawn`] when
    /// the engine cannot be started, [`SessionError::Io`] when a transient
    /// channel fails, [`SessionError::EngineExit`] on a non-zero exit,
    /// [`SessionError::Parse`] when the output is not a label list,
    /// [`SessionError::ResultLengthMismatch`] when the label count differs
    /// from the sample count, and [`SessionError::Cancelled`] or
    /// [`SessionError::Timeout`] when the run is cut short.
    #[instrument(
        name = "session.run",
        skip_all,
        fields(
            command = %command,
            samples = dataset.len(),
            input_mode = ?self.input_mode,
            progress_mode = ?self.progress_mode,
            clusters = field::Empty,
        ),
    )]
    pub fn run_with(
        &self,
        dataset: &Dataset,
        command: EngineCommand,
        config: &InvocationConfig,
        sink: &mut dyn ProgressSink,
        control: &RunControl,
    ) -> Result<ClusterAssignment> {
        control.reset();
        let outcome = self.execute(dataset, command, config, sink, control);
        match &outcome {
            Ok(assignment) => {
                Span::current().record("clusters", assignment.cluster_count());
                enter(control, SessionState::Completed);
                info!(
                    samples = assignment.len(),
                    clusters = assignment.cluster_count(),
                    "run completed"
                );
            }
            Err(err) => {
                enter(control, SessionState::Failed);
                warn!(code = %err.code(), error = %err, "run failed");
            }
        }
        outcome
    }

    fn execute(
        &self,
        dataset: &Dataset,
        command: EngineCommand,
        config: &InvocationConfig,
        sink: &mut dyn ProgressSink,
        control: &RunControl,
    ) -> Result<ClusterAssignment> {
        enter(control, SessionState::Marshaling);
        let program = supervisor::resolve_engine(&self.engine, env::var_os("PATH").as_deref())?;
        let input = InputChannel::write(serialize(dataset), self.input_mode, &self.scratch_dir)
            .map_err(SessionError::io("write input file"))?;
        let mut transients = Transients::create(input, self.progress_mode, &self.scratch_dir)?;

        let outcome = self.supervise(
            program,
            dataset,
            command,
            config,
            &mut transients,
            sink,
            control,
        );
        match (outcome, transients.release()) {
            (Ok(assignment), Ok(())) => Ok(assignment),
            (Ok(_), Err(cleanup)) => Err(cleanup),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(cleanup)) => {
                warn!(error = %cleanup, "failed to release transient files");
                Err(err)
            }
        }
    }

    #[expect(
        clippy::too_many_arguments,
        reason = "the run's owned resources are threaded through explicitly"
    )]
    fn supervise(
        &self,
        program: PathBuf,
        dataset: &Dataset,
        command: EngineCommand,
        config: &InvocationConfig,
        transients: &mut Transients,
        sink: &mut dyn ProgressSink,
        control: &RunControl,
    ) -> Result<ClusterAssignment> {
        let invocation = EngineInvocation::new(
            program,
            command,
            config,
            transients.input.argument(),
            self.progress_mode,
        );
        let stdin = transients.input.take_stdin_payload();
        let (mut process, mut source) =
            supervisor::spawn(&invocation, stdin, transients.progress_log.as_ref())?;
        control.set_engine_pid(process.id());
        enter(control, SessionState::Spawned);

        let mut monitor = ProgressMonitor::new(config.verbose, self.tail_capacity, sink, control);
        self.poll_until_exit(&mut process, &mut source, &mut monitor, control)?;

        enter(control, SessionState::Draining);
        monitor.drain(&mut source)?;
        source
            .close()
            .map_err(SessionError::io("read progress channel"))?;
        monitor.drain(&mut source)?;
        let output = process.wait()?;
        let (progress, progress_tail) = monitor.finish();
        debug!(
            code = ?output.code,
            descents = progress.descents,
            lines = progress.lines,
            "engine exited"
        );

        if output.code != Some(0) {
            return Err(SessionError::EngineExit {
                code: output.code,
                progress_tail,
            });
        }
        let labels = parse_output(&output.stdout)?;
        if labels.len() != dataset.len() {
            return Err(SessionError::ResultLengthMismatch {
                expected: dataset.len(),
                actual: labels.len(),
            });
        }
        Ok(ClusterAssignment::from_labels(labels))
    }

    fn poll_until_exit(
        &self,
        process: &mut EngineProcess,
        source: &mut ProgressSource,
        monitor: &mut ProgressMonitor<'_>,
        control: &RunControl,
    ) -> Result<()> {
        enter(control, SessionState::Polling);
        let started = Instant::now();
        loop {
            if control.is_cancelled() {
                process.terminate()?;
                return Err(SessionError::Cancelled);
            }
            if let Some(limit) = self.timeout.filter(|limit| started.elapsed() >= *limit) {
                process.terminate()?;
                return Err(SessionError::Timeout { limit });
            }
            if let ProcessStatus::Exited(_) = process.poll()? {
                return Ok(());
            }
            monitor.drain(source)?;
            thread::sleep(self.poll_interval);
        }
    }
}

fn enter(control: &RunControl, state: SessionState) {
    control.set_state(state);
    debug!(state = ?state, "session state changed");
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;
    use tempfile::TempDir;
    use tracing_subscriber::layer::SubscriberExt;

    use gravity_test_support::tracing::RecordingLayer;

    fn dataset() -> Dataset {
        match Dataset::try_from_rows(vec![vec![1.0, 2.0], vec![3.0, 4.0]]) {
            Ok(dataset) => dataset,
            Err(err) => panic!("invalid test dataset: {err}"),
        }
    }

    #[rstest]
    fn builder_defaults() {
        let session = SessionBuilder::new("engine").build().expect("defaults are valid");
        assert_eq!(session.input_mode(), InputMode::Pipe);
        assert_eq!(session.progress_mode(), ProgressMode::File);
        assert_eq!(session.poll_interval(), DEFAULT_POLL_INTERVAL);
        assert_eq!(session.timeout(), None);
        assert_eq!(session.scratch_dir(), env::temp_dir());
        assert_eq!(session.engine(), Path::new("engine"));
        assert_eq!(session.tail_capacity().map(NonZeroUsize::get), Some(DEFAULT_TAIL_CAPACITY));
    }

    #[rstest]
    #[case::zero_poll(
        SessionBuilder::new("engine").with_poll_interval(Duration::ZERO),
        "GRAVITY_INVALID_POLL_INTERVAL"
    )]
    #[case::zero_timeout(
        SessionBuilder::new("engine").with_timeout(Duration::ZERO),
        "GRAVITY_INVALID_TIMEOUT"
    )]
    fn builder_rejects_invalid_settings(#[case] builder: SessionBuilder, #[case] code: &str) {
        let err = builder.build().expect_err("configuration must be rejected");
        assert_eq!(err.code().as_str(), code);
    }

    #[rstest]
    #[case::pipe_input(InputMode::Pipe)]
    #[case::file_input(InputMode::File)]
    fn missing_engine_fails_and_leaves_no_files(#[case] input_mode: InputMode) {
        let scratch = TempDir::new().expect("scratch dir");
        let session = SessionBuilder::new(scratch.path().join("missing-engine"))
            .with_input_mode(input_mode)
            .with_scratch_dir(scratch.path())
            .build()
            .expect("configuration is valid");
        let control = RunControl::new();

        let err = session
            .run_with(
                &dataset(),
                EngineCommand::FitPredict,
                &InvocationConfig::new(),
                &mut NullSink,
                &control,
            )
            .expect_err("missing engine must fail");

        assert!(matches!(err, SessionError::EngineNotFound { .. }));
        assert_eq!(control.snapshot().state, SessionState::Failed);
        let leftovers = std::fs::read_dir(scratch.path())
            .expect("scratch dir is readable")
            .count();
        assert_eq!(leftovers, 0);
    }

    #[rstest]
    fn failed_run_records_session_span() {
        let scratch = TempDir::new().expect("scratch dir");
        let session = SessionBuilder::new(scratch.path().join("missing-engine"))
            .with_scratch_dir(scratch.path())
            .build()
            .expect("configuration is valid");
        let layer = RecordingLayer::default();
        let subscriber = tracing_subscriber::registry().with(layer.clone());

        let result = tracing::subscriber::with_default(subscriber, || {
            session.run(&dataset(), EngineCommand::Fit, &InvocationConfig::new())
        });
        assert!(result.is_err());

        let spans = layer.spans();
        let run_span = spans
            .iter()
            .find(|span| span.name == "session.run")
            .expect("session.run span must exist");
        assert_eq!(run_span.fields.get("command"), Some(&"fit".to_owned()));
        assert_eq!(run_span.fields.get("samples"), Some(&"2".to_owned()));
        assert!(layer.events().iter().any(|event| {
            event.fields.get("code").is_some_and(|code| code == "GRAVITY_ENGINE_NOT_FOUND")
        }));
    }
}
