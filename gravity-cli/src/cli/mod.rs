//! Command-line interface orchestration for the gravity wrapper.
//!
//! The `run` command loads a whitespace-separated dataset, drives one engine
//! session with a live progress display on stderr, and reports the resulting
//! labels.

mod commands;

pub use commands::{
    ChannelArg, Cli, CliError, Command, CommandArg, DEFAULT_ENGINE, ExecutionSummary, RunCommand,
    TuningArgs, load_dataset, render_summary, run_cli,
};
