//! Command implementations and argument parsing for the gravity CLI.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use gravity_core::{
    ClusterAssignment, Dataset, DatasetError, EngineCommand, InputMode, InvocationConfig,
    ProgressMode, ProgressSink, RunControl, SessionBuilder, SessionError, TerminalDisplay,
};
use thiserror::Error;
use tracing::{Span, field, info, instrument, warn};

/// Engine looked up on `PATH` when neither `--engine` nor
/// `GRAVITY_ENGINE_PATH` is given.
pub const DEFAULT_ENGINE: &str = "gravity_clustering";

const DEFAULT_POLL_INTERVAL_MS: u64 = 10;

/// Top-level CLI options parsed by [`clap`].
#[derive(Debug, Parser, Clone)]
#[command(name = "gravity", about = "Cluster a dataset with the gravity engine.")]
pub struct Cli {
    /// Command to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// Supported CLI commands.
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the engine on a dataset and print one label per sample.
    Run(RunCommand),
}

/// Options accepted by the `run` command.
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Dataset file: one sample per line, whitespace-separated values.
    pub dataset: PathBuf,

    /// Engine executable, as a path or a name looked up on `PATH`.
    #[arg(long, env = "GRAVITY_ENGINE_PATH", default_value = DEFAULT_ENGINE)]
    pub engine: PathBuf,

    /// Engine verb.
    #[arg(long = "command", value_enum, default_value_t = CommandArg::FitPredict)]
    pub verb: CommandArg,

    /// How the dataset reaches the engine.
    #[arg(long, value_enum, default_value_t = ChannelArg::Pipe)]
    pub input_mode: ChannelArg,

    /// Where engine diagnostics are collected.
    #[arg(long, value_enum, default_value_t = ChannelArg::File)]
    pub progress_mode: ChannelArg,

    /// Milliseconds between polls of the engine.
    #[arg(
        long,
        default_value_t = DEFAULT_POLL_INTERVAL_MS,
        value_parser = clap::value_parser!(u64).range(1..),
    )]
    pub poll_interval_ms: u64,

    /// Abort the run after this many seconds.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout_secs: Option<u64>,

    /// Suppress the live progress display.
    #[arg(long, short)]
    pub quiet: bool,

    /// Engine tuning options.
    #[command(flatten)]
    pub tuning: TuningArgs,
}

/// Engine verbs accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CommandArg {
    /// Fit the gravity field.
    Fit,
    /// Predict labels against a fitted field.
    Predict,
    /// Fit and predict in one pass.
    #[value(name = "fitpredict", alias = "fit_predict")]
    FitPredict,
    /// Refine a fitted field.
    Refine,
}

impl From<CommandArg> for EngineCommand {
    fn from(value: CommandArg) -> Self {
        match value {
            CommandArg::Fit => Self::Fit,
            CommandArg::Predict => Self::Predict,
            CommandArg::FitPredict => Self::FitPredict,
            CommandArg::Refine => Self::Refine,
        }
    }
}

/// Channel choices for `--input-mode` and `--progress-mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ChannelArg {
    /// A transient file.
    File,
    /// A pipe to or from the engine.
    Pipe,
}

impl From<ChannelArg> for InputMode {
    fn from(value: ChannelArg) -> Self {
        match value {
            ChannelArg::File => Self::File,
            ChannelArg::Pipe => Self::Pipe,
        }
    }
}

impl From<ChannelArg> for ProgressMode {
    fn from(value: ChannelArg) -> Self {
        match value {
            ChannelArg::File => Self::File,
            ChannelArg::Pipe => Self::Pipe,
        }
    }
}

/// Engine tuning options; each one left unset is omitted from the engine's
/// arguments.
#[derive(Debug, Args, Clone, Default)]
pub struct TuningArgs {
    /// Scaling factor applied to the data.
    #[arg(long)]
    pub scaling: Option<f64>,
    /// Number of samples to subsample.
    #[arg(long)]
    pub sample_sub: Option<usize>,
    /// Number of features to subsample.
    #[arg(long)]
    pub feature_sub: Option<usize>,
    /// Distance below which clusters merge.
    #[arg(long)]
    pub merge_distance: Option<f64>,
    /// Convergence factor.
    #[arg(long)]
    pub convergence_factor: Option<f64>,
    /// Locality of the gravity field.
    #[arg(long)]
    pub locality: Option<f64>,
    /// Field smoothing.
    #[arg(long)]
    pub smoothing: Option<f64>,
    /// Distance metric name, passed through verbatim.
    #[arg(long)]
    pub distance_metric: Option<String>,
    /// Fuzz factor.
    #[arg(long)]
    pub fuzz: Option<f64>,
    /// Fraction of a step taken per iteration.
    #[arg(long)]
    pub step_fraction: Option<f64>,
    /// Number of descent steps.
    #[arg(long)]
    pub steps: Option<usize>,
    /// Borrow factor.
    #[arg(long)]
    pub borrow: Option<f64>,
    /// Enable the refining pass.
    #[arg(long)]
    pub refining: bool,
    /// Forward every engine diagnostic line.
    #[arg(long)]
    pub verbose: bool,
    /// File the engine dumps its error state to.
    #[arg(long)]
    pub error_dump: Option<PathBuf>,
}

impl TuningArgs {
    /// Converts the options into an [`InvocationConfig`].
    #[must_use]
    pub fn to_config(&self) -> InvocationConfig {
        InvocationConfig {
            scaling: self.scaling,
            sample_sub: self.sample_sub,
            feature_sub: self.feature_sub,
            merge_distance: self.merge_distance,
            convergence_factor: self.convergence_factor,
            locality: self.locality,
            smoothing: self.smoothing,
            distance_metric: self.distance_metric.clone(),
            fuzz: self.fuzz,
            step_fraction: self.step_fraction,
            steps: self.steps,
            borrow: self.borrow,
            refining: self.refining,
            verbose: self.verbose,
            error_dump_path: self.error_dump.clone(),
        }
    }
}

/// Errors surfaced while executing CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// The dataset file could not be read.
    #[error("failed to read `{path}`: {source}")]
    Io {
        /// Path that triggered the failure.
        path: PathBuf,
        /// Underlying operating system error.
        #[source]
        source: io::Error,
    },
    /// A dataset cell was not a number.
    #[error("`{path}` line {line}, column {column}: `{cell}` is not a number")]
    InvalidCell {
        /// Dataset path.
        path: PathBuf,
        /// One-based line number.
        line: usize,
        /// One-based column number.
        column: usize,
        /// The offending cell, verbatim.
        cell: String,
    },
    /// The parsed rows do not form a valid dataset.
    #[error("`{path}` is not a valid dataset: {source}")]
    Dataset {
        /// Dataset path.
        path: PathBuf,
        /// Validation failure.
        #[source]
        source: DatasetError,
    },
    /// The session failed.
    #[error(transparent)]
    Core(#[from] SessionError),
}

impl CliError {
    /// Returns the stable code of the underlying library error, if any.
    #[must_use]
    pub const fn code(&self) -> Option<&'static str> {
        match self {
            Self::Dataset { source, .. } => Some(source.code().as_str()),
            Self::Core(source) => Some(source.code().as_str()),
            Self::Io { .. } | Self::InvalidCell { .. } => None,
        }
    }
}

/// Summarises the outcome of executing a CLI command.
#[derive(Debug, Clone)]
pub struct ExecutionSummary {
    /// Dataset name derived from its file name.
    pub dataset: String,
    /// Engine verb that was run.
    pub command: EngineCommand,
    /// Labels produced by the engine.
    pub assignment: ClusterAssignment,
}

/// Executes the CLI command represented by `cli`, drawing progress on
/// stderr unless `--quiet` is given.
///
/// # Errors
/// Returns [`CliError`] when loading the dataset or running the engine fails.
#[instrument(name = "cli.run", err, skip(cli), fields(command = field::Empty))]
pub fn run_cli(cli: Cli) -> Result<ExecutionSummary, CliError> {
    match cli.command {
        Command::Run(run) => {
            Span::current().record("command", field::display("run"));
            if run.quiet {
                return run_command(run, &mut gravity_core::NullSink);
            }
            let mut display = TerminalDisplay::new(io::stderr());
            let outcome = run_command(run, &mut display);
            finish_display(&mut display);
            outcome
        }
    }
}

/// Terminates the progress line; a broken writer is logged rather than
/// masking the run's own outcome.
pub(super) fn finish_display<W: Write>(display: &mut TerminalDisplay<W>) {
    if let Err(err) = display.finish() {
        warn!(error = %err, "failed to finish progress display");
    }
}

#[instrument(
    name = "cli.execute",
    err,
    skip(command, sink),
    fields(engine = field::Empty, verb = field::Empty, samples = field::Empty),
)]
pub(super) fn run_command(
    command: RunCommand,
    sink: &mut dyn ProgressSink,
) -> Result<ExecutionSummary, CliError> {
    let span = Span::current();
    span.record("engine", field::display(command.engine.display()));
    let verb = EngineCommand::from(command.verb);
    span.record("verb", field::display(verb));

    let dataset = load_dataset(&command.dataset)?;
    span.record("samples", dataset.len());

    let mut builder = SessionBuilder::new(&command.engine)
        .with_input_mode(command.input_mode.into())
        .with_progress_mode(command.progress_mode.into())
        .with_poll_interval(Duration::from_millis(command.poll_interval_ms));
    if let Some(secs) = command.timeout_secs {
        builder = builder.with_timeout(Duration::from_secs(secs));
    }
    let session = builder.build()?;

    let assignment = session.run_with(
        &dataset,
        verb,
        &command.tuning.to_config(),
        sink,
        &RunControl::new(),
    )?;
    let summary = ExecutionSummary {
        dataset: derive_dataset_name(&command.dataset),
        command: verb,
        assignment,
    };
    info!(
        dataset = summary.dataset.as_str(),
        clusters = summary.assignment.cluster_count(),
        "command completed"
    );
    Ok(summary)
}

/// Reads a whitespace-separated dataset, one sample per line.
///
/// Blank lines are skipped and `nan` cells become NaN.
///
/// # Errors
/// Returns [`CliError::Io`] when the file cannot be read,
/// [`CliError::InvalidCell`] for the first cell that is not a number and
/// [`CliError::Dataset`] when the rows are empty or ragged.
///
/// # Examples
/// ```
/// # use std::error::Error;
/// # use gravity_cli::cli::load_dataset;
/// # use tempfile::NamedTempFile;
/// #
/// # fn main() -> Result<(), Box<dyn Error>> {
/// let file = NamedTempFile::new()?;
/// std::fs::write(file.path(), "0.5 1\n\n2\tnan\n")?;
/// let dataset = load_dataset(file.path())?;
/// assert_eq!(dataset.len(), 2);
/// assert_eq!(dataset.dimension(), 2);
/// # Ok(())
/// # }
/// ```
#[instrument(name = "cli.load_dataset", err, skip(path), fields(path = %path.display()))]
pub fn load_dataset(path: &Path) -> Result<Dataset, CliError> {
    let text = fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut rows = Vec::new();
    for (index, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let row = line
            .split_whitespace()
            .enumerate()
            .map(|(column, cell)| {
                cell.parse::<f64>().map_err(|_| CliError::InvalidCell {
                    path: path.to_path_buf(),
                    line: index + 1,
                    column: column + 1,
                    cell: cell.to_owned(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        rows.push(row);
    }
    Dataset::try_from_rows(rows).map_err(|source| CliError::Dataset {
        path: path.to_path_buf(),
        source,
    })
}

pub(super) fn derive_dataset_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|value| value.to_str())
        .map_or_else(|| "dataset".to_owned(), ToOwned::to_owned)
}

/// Renders `summary` to `writer`: a short header followed by one
/// `index<TAB>label` line per sample.
///
/// # Errors
/// Returns [`io::Error`] if writing to the supplied writer fails.
///
/// # Examples
/// ```
/// # use std::error::Error;
/// # use gravity_cli::cli::{ExecutionSummary, render_summary};
/// # use gravity_core::{ClusterAssignment, EngineCommand};
/// #
/// # fn main() -> Result<(), Box<dyn Error>> {
/// let summary = ExecutionSummary {
///     dataset: "demo".into(),
///     command: EngineCommand::FitPredict,
///     assignment: ClusterAssignment::from_labels(vec![0, 1, 1]),
/// };
/// let mut buffer = Vec::new();
/// render_summary(&summary, &mut buffer)?;
/// assert_eq!(
///     String::from_utf8(buffer)?,
///     "dataset: demo\ncommand: fitpredict\nclusters: 2\n0\t0\n1\t1\n2\t1\n"
/// );
/// # Ok(())
/// # }
/// ```
pub fn render_summary(summary: &ExecutionSummary, mut writer: impl Write) -> io::Result<()> {
    writeln!(writer, "dataset: {}", summary.dataset)?;
    writeln!(writer, "command: {}", summary.command)?;
    writeln!(writer, "clusters: {}", summary.assignment.cluster_count())?;
    for (index, label) in summary.assignment.iter().enumerate() {
        writeln!(writer, "{index}\t{label}")?;
    }
    Ok(())
}
