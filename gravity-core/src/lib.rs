//! Gravity core library.
//!
//! Drives the external gravity clustering engine as a child process: the
//! dataset is marshaled to a transient file or the engine's stdin, the engine
//! is spawned from a structured argument vector, its diagnostic stream is
//! folded into progress updates while it runs, and its stdout is parsed into
//! one cluster label per sample.
//!
//! ```no_run
//! use gravity_core::{Dataset, EngineCommand, InvocationConfig, SessionBuilder};
//!
//! let dataset = Dataset::try_from_rows(vec![vec![0.0, 0.0], vec![5.0, 5.0]])?;
//! let session = SessionBuilder::new("gravity_clustering").build()?;
//! let labels = session.run(
//!     &dataset,
//!     EngineCommand::FitPredict,
//!     &InvocationConfig::new().with_steps(10),
//! )?;
//! assert_eq!(labels.len(), dataset.len());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
#![cfg_attr(docsrs, feature(doc_cfg))]

mod config;
mod control;
mod dataset;
mod error;
mod marshal;
mod output;
mod params;
mod progress;
mod session;
mod supervisor;

pub use crate::{
    config::{EngineCommand, InputMode, InvocationConfig, ProgressMode},
    control::{RunControl, RunSnapshot, SessionState},
    dataset::Dataset,
    error::{
        DatasetError, DatasetErrorCode, ParseError, ParseErrorCode, Result, SessionError,
        SessionErrorCode,
    },
    marshal::{InputChannel, format_float, serialize},
    output::{ClusterAssignment, parse_labels, parse_output},
    params::{InputArgument, build_arguments},
    progress::{
        DEFAULT_TAIL_CAPACITY, DESCENT_MARKER, Drain, DrainError, LogTail, NullSink, PipeTail,
        ProgressMonitor, ProgressSink, ProgressSource, ProgressState, ProgressUpdate,
        SUMMARY_MARKER, TerminalDisplay,
    },
    session::{DEFAULT_POLL_INTERVAL, Session, SessionBuilder},
    supervisor::{
        EngineInvocation, EngineOutput, EngineProcess, ProcessStatus, resolve_engine, spawn,
    },
};
