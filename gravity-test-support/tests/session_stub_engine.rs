//! End-to-end session tests against the stub engine.
#![cfg(unix)]

use std::{
    fs, io,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

use gravity_core::{
    ClusterAssignment, Dataset, EngineCommand, InputMode, InvocationConfig, NullSink,
    ParseErrorCode, ProgressMode, ProgressSink, ProgressUpdate, RunControl, SessionBuilder,
    SessionError, SessionState,
};
use gravity_test_support::{
    stub::{FAIL_EXIT_CODE, FAIL_MESSAGE, StubEngine, StubMode, install_engine, label_for},
    tracing::RecordingLayer,
};
use rstest::{fixture, rstest};
use tempfile::TempDir;
use tracing_subscriber::layer::SubscriberExt;

const STUB: &str = env!("CARGO_BIN_EXE_stub_engine");

/// Holds the engine wrapper and a separate scratch dir for transient files.
struct Workspace {
    bin: TempDir,
    scratch: TempDir,
}

impl Workspace {
    fn engine(&self, mode: StubMode) -> PathBuf {
        install_engine(self.bin.path(), Path::new(STUB), mode).expect("install stub engine")
    }

    fn builder(&self, mode: StubMode) -> SessionBuilder {
        SessionBuilder::new(self.engine(mode)).with_scratch_dir(self.scratch.path())
    }

    fn scratch_entries(&self) -> Vec<PathBuf> {
        fs::read_dir(self.scratch.path())
            .expect("scratch dir is readable")
            .map(|entry| entry.expect("scratch entry").path())
            .collect()
    }
}

#[fixture]
fn workspace() -> Workspace {
    Workspace {
        bin: TempDir::new().expect("bin dir"),
        scratch: TempDir::new().expect("scratch dir"),
    }
}

fn dataset(samples: usize) -> Dataset {
    let rows = (0..samples)
        .map(|index| vec![index as f64, (index * 2) as f64 + 0.5])
        .collect();
    Dataset::try_from_rows(rows).expect("valid dataset")
}

fn expected_labels(samples: usize) -> Vec<i64> {
    (0..samples).map(label_for).collect()
}

fn pid_is_gone(pid: u32) -> bool {
    !Path::new(&format!("/proc/{pid}")).exists()
}

#[rstest]
#[case::pipe_in_file_progress(InputMode::Pipe, ProgressMode::File)]
#[case::pipe_in_pipe_progress(InputMode::Pipe, ProgressMode::Pipe)]
#[case::file_in_file_progress(InputMode::File, ProgressMode::File)]
#[case::file_in_pipe_progress(InputMode::File, ProgressMode::Pipe)]
fn successful_run_labels_every_sample_and_cleans_up(
    workspace: Workspace,
    #[case] input: InputMode,
    #[case] progress: ProgressMode,
) {
    let session = workspace
        .builder(StubMode::Echo)
        .with_input_mode(input)
        .with_progress_mode(progress)
        .build()
        .expect("valid session");
    let control = RunControl::new();

    let labels = session
        .run_with(
            &dataset(7),
            EngineCommand::FitPredict,
            &InvocationConfig::new(),
            &mut NullSink,
            &control,
        )
        .expect("stub run succeeds");

    assert_eq!(labels, ClusterAssignment::from_labels(expected_labels(7)));
    assert_eq!(labels.cluster_count(), 3);
    let snapshot = control.snapshot();
    assert_eq!(snapshot.state, SessionState::Completed);
    assert_eq!(snapshot.progress.descents, 7);
    assert_eq!(snapshot.progress.summary.as_deref(), Some("Clusters: 3"));
    assert!(workspace.scratch_entries().is_empty());
}

#[rstest]
#[case::quiet(false)]
#[case::verbose(true)]
fn progress_updates_arrive_in_order_before_return(workspace: Workspace, #[case] verbose: bool) {
    let session = workspace.builder(StubMode::Echo).build().expect("valid session");
    let mut seen = Vec::new();
    let mut sink = |update: &ProgressUpdate| seen.push(update.clone());

    session
        .run_with(
            &dataset(4),
            EngineCommand::Fit,
            &InvocationConfig::new().with_verbose(verbose),
            &mut sink,
            &RunControl::new(),
        )
        .expect("stub run succeeds");

    let expected: Vec<ProgressUpdate> = if verbose {
        (0..4)
            .map(|point| ProgressUpdate::Line(format!("s: {point} d: 0.5")))
            .chain([ProgressUpdate::Line("Clusters: 3".to_owned())])
            .collect()
    } else {
        (1..=4)
            .map(ProgressUpdate::Descents)
            .chain([ProgressUpdate::Summary("Clusters: 3".to_owned())])
            .collect()
    };
    assert_eq!(seen, expected);
}

#[rstest]
#[case::file_progress(ProgressMode::File)]
#[case::pipe_progress(ProgressMode::Pipe)]
fn engine_failure_reports_exit_code_and_progress_tail(
    workspace: Workspace,
    #[case] progress: ProgressMode,
) {
    let session = workspace
        .builder(StubMode::Fail)
        .with_progress_mode(progress)
        .with_tail_capacity(2)
        .build()
        .expect("valid session");
    let control = RunControl::new();

    let err = session
        .run_with(
            &dataset(3),
            EngineCommand::FitPredict,
            &InvocationConfig::new(),
            &mut NullSink,
            &control,
        )
        .expect_err("failing engine must fail the run");

    match err {
        SessionError::EngineExit {
            code,
            progress_tail,
        } => {
            assert_eq!(code, Some(FAIL_EXIT_CODE));
            assert_eq!(progress_tail, ["s: 2 d: 0.5", FAIL_MESSAGE]);
        }
        other => panic!("expected EngineExit, got {other:?}"),
    }
    assert_eq!(control.snapshot().state, SessionState::Failed);
    assert!(workspace.scratch_entries().is_empty());
}

#[rstest]
fn cancellation_kills_the_engine_and_cleans_up(workspace: Workspace) {
    let session = workspace
        .builder(StubMode::Hang)
        .with_input_mode(InputMode::File)
        .build()
        .expect("valid session");
    let control = RunControl::new();
    let canceller = control.clone();

    let watcher = thread::spawn(move || {
        let deadline = Instant::now() + Duration::from_secs(30);
        while canceller.snapshot().progress.descents == 0 {
            assert!(Instant::now() < deadline, "engine never reported progress");
            thread::sleep(Duration::from_millis(5));
        }
        canceller.cancel();
    });

    let err = session
        .run_with(
            &dataset(5),
            EngineCommand::Fit,
            &InvocationConfig::new(),
            &mut NullSink,
            &control,
        )
        .expect_err("cancelled run must fail");
    watcher.join().expect("watcher thread");

    assert!(matches!(err, SessionError::Cancelled));
    let snapshot = control.snapshot();
    assert_eq!(snapshot.state, SessionState::Failed);
    let pid = snapshot.engine_pid.expect("engine pid was published");
    assert!(pid_is_gone(pid), "engine {pid} survived cancellation");
    assert!(workspace.scratch_entries().is_empty());
}

#[rstest]
fn cancellation_requested_before_the_run_stops_it_at_the_first_poll(workspace: Workspace) {
    let session = workspace.builder(StubMode::Hang).build().expect("valid session");
    let control = RunControl::new();
    control.cancel();

    let err = session
        .run_with(
            &dataset(2),
            EngineCommand::Fit,
            &InvocationConfig::new(),
            &mut NullSink,
            &control,
        )
        .expect_err("cancelled run must fail");

    assert_eq!(err.code().as_str(), "GRAVITY_CANCELLED");
    let pid = control.snapshot().engine_pid.expect("engine pid was published");
    assert!(pid_is_gone(pid));
}

#[rstest]
fn timeout_kills_a_hung_engine(workspace: Workspace) {
    let limit = Duration::from_millis(200);
    let session = workspace
        .builder(StubMode::Hang)
        .with_progress_mode(ProgressMode::Pipe)
        .with_timeout(limit)
        .build()
        .expect("valid session");
    let control = RunControl::new();
    let started = Instant::now();

    let err = session
        .run_with(
            &dataset(2),
            EngineCommand::Predict,
            &InvocationConfig::new(),
            &mut NullSink,
            &control,
        )
        .expect_err("hung engine must time out");

    assert!(matches!(err, SessionError::Timeout { limit: reported } if reported == limit));
    assert!(started.elapsed() >= limit);
    let pid = control.snapshot().engine_pid.expect("engine pid was published");
    assert!(pid_is_gone(pid));
    assert!(workspace.scratch_entries().is_empty());
}

/// Sink whose terminal has gone away.
struct ClosedDisplay;

impl ProgressSink for ClosedDisplay {
    fn publish(&mut self, _update: &ProgressUpdate) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "display closed"))
    }
}

#[rstest]
#[case::file_progress(ProgressMode::File)]
#[case::pipe_progress(ProgressMode::Pipe)]
fn sink_failure_kills_the_engine_and_cleans_up(
    workspace: Workspace,
    #[case] progress: ProgressMode,
) {
    let session = workspace
        .builder(StubMode::Hang)
        .with_input_mode(InputMode::File)
        .with_progress_mode(progress)
        .build()
        .expect("valid session");
    let control = RunControl::new();

    let err = session
        .run_with(
            &dataset(2),
            EngineCommand::Fit,
            &InvocationConfig::new(),
            &mut ClosedDisplay,
            &control,
        )
        .expect_err("failing sink must fail the run");

    match &err {
        SessionError::Io { operation, source } => {
            assert_eq!(*operation, "publish progress");
            assert_eq!(source.kind(), io::ErrorKind::BrokenPipe);
        }
        other => panic!("expected Io, got {other:?}"),
    }
    assert_eq!(err.code().as_str(), "GRAVITY_IO");
    let snapshot = control.snapshot();
    assert_eq!(snapshot.state, SessionState::Failed);
    let pid = snapshot.engine_pid.expect("engine pid was published");
    assert!(pid_is_gone(pid), "engine {pid} survived the sink failure");
    assert!(workspace.scratch_entries().is_empty());
}

#[rstest]
#[case::input_file(InputMode::File, ProgressMode::Pipe, "write input file")]
#[case::progress_log(InputMode::Pipe, ProgressMode::File, "create progress log")]
fn missing_scratch_dir_fails_before_spawning(
    workspace: Workspace,
    #[case] input: InputMode,
    #[case] progress: ProgressMode,
    #[case] expected_operation: &str,
) {
    let session = SessionBuilder::new(workspace.engine(StubMode::Echo))
        .with_scratch_dir(workspace.scratch.path().join("missing"))
        .with_input_mode(input)
        .with_progress_mode(progress)
        .build()
        .expect("valid session");
    let control = RunControl::new();

    let err = session
        .run_with(
            &dataset(2),
            EngineCommand::FitPredict,
            &InvocationConfig::new(),
            &mut NullSink,
            &control,
        )
        .expect_err("unwritable scratch dir must fail the run");

    assert!(matches!(
        err,
        SessionError::Io { operation, .. } if operation == expected_operation
    ));
    assert_eq!(err.code().as_str(), "GRAVITY_IO");
    let snapshot = control.snapshot();
    assert_eq!(snapshot.state, SessionState::Failed);
    assert_eq!(snapshot.engine_pid, None);
    assert!(workspace.scratch_entries().is_empty());
}

#[rstest]
#[case::short(StubMode::Short, 5, 4)]
#[case::silent(StubMode::Silent, 3, 0)]
fn wrong_label_count_is_a_mismatch(
    workspace: Workspace,
    #[case] mode: StubMode,
    #[case] samples: usize,
    #[case] actual_labels: usize,
) {
    let session = workspace.builder(mode).build().expect("valid session");
    let err = session
        .run(&dataset(samples), EngineCommand::FitPredict, &InvocationConfig::new())
        .expect_err("label count mismatch must fail");
    assert!(matches!(
        err,
        SessionError::ResultLengthMismatch { expected, actual }
            if expected == samples && actual == actual_labels
    ));
}

#[rstest]
fn non_numeric_output_is_a_parse_error(workspace: Workspace) {
    let session = workspace.builder(StubMode::Garbage).build().expect("valid session");
    let err = session
        .run(&dataset(3), EngineCommand::FitPredict, &InvocationConfig::new())
        .expect_err("garbage output must fail");
    assert_eq!(err.parse_code(), Some(ParseErrorCode::InvalidToken));
    assert!(workspace.scratch_entries().is_empty());
}

#[rstest]
#[case::file_progress(ProgressMode::File)]
#[case::pipe_progress(ProgressMode::Pipe)]
fn heavy_diagnostic_output_does_not_stall_the_run(
    workspace: Workspace,
    #[case] progress: ProgressMode,
) {
    let session = workspace
        .builder(StubMode::Flood)
        .with_progress_mode(progress)
        .build()
        .expect("valid session");
    let labels = session
        .run(&dataset(6), EngineCommand::FitPredict, &InvocationConfig::new())
        .expect("flooding engine still succeeds");
    assert_eq!(labels.into_labels(), expected_labels(6));
}

#[rstest]
#[case::stdin(InputMode::Pipe)]
#[case::file(InputMode::File)]
fn engine_receives_the_structured_argument_vector(workspace: Workspace, #[case] input: InputMode) {
    let args_file = workspace.bin.path().join("args.txt");
    let engine = StubEngine::new(StubMode::Echo)
        .recording_args(&args_file)
        .install(workspace.bin.path(), Path::new(STUB))
        .expect("install stub engine");
    let session = SessionBuilder::new(engine)
        .with_input_mode(input)
        .with_scratch_dir(workspace.scratch.path())
        .build()
        .expect("valid session");
    let config = InvocationConfig::new()
        .with_steps(12)
        .with_distance_metric("cosine")
        .with_refining(true);

    session
        .run(&dataset(2), EngineCommand::Refine, &config)
        .expect("stub run succeeds");

    let recorded = fs::read_to_string(&args_file).expect("stub recorded its arguments");
    let arguments: Vec<&str> = recorded.lines().collect();
    match input {
        InputMode::Pipe => assert_eq!(
            arguments,
            ["refine", "-stdin", "-stdout", "-d", "cosine", "-steps", "12", "-refining"]
        ),
        InputMode::File => {
            assert_eq!(arguments[..3], ["refine", "-stdout", "-c"]);
            assert!(arguments[3].contains("gravity-input-"));
            assert_eq!(arguments[4..], ["-d", "cosine", "-steps", "12", "-refining"]);
        }
    }
}

#[rstest]
fn successful_run_is_instrumented(workspace: Workspace) {
    let session = workspace.builder(StubMode::Echo).build().expect("valid session");
    let layer = RecordingLayer::default();
    let subscriber = tracing_subscriber::registry().with(layer.clone());

    tracing::subscriber::with_default(subscriber, || {
        session
            .run(&dataset(3), EngineCommand::FitPredict, &InvocationConfig::new())
            .expect("stub run succeeds");
    });

    let run = layer.span("session.run").expect("session.run span");
    assert_eq!(run.field("command"), Some("fitpredict"));
    assert_eq!(run.field("clusters"), Some("3"));
    assert!(layer.span("supervisor.spawn").is_some());
    let states: Vec<String> = layer
        .events_with_message("session state changed")
        .into_iter()
        .filter_map(|event| event.field("state").map(str::to_owned))
        .collect();
    assert_eq!(
        states,
        ["Marshaling", "Spawned", "Polling", "Draining", "Completed"]
    );
    assert!(layer.has_event("run completed"));
}
