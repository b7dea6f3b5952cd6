//! Error types for the gravity core library.
//!
//! Every failure a session can produce is surfaced as a typed variant with a
//! stable machine-readable code so callers and log pipelines can classify
//! failures across the process boundary without matching on messages.

use std::{fmt, io, path::PathBuf, time::Duration};

use thiserror::Error;

use crate::progress::DrainError;

macro_rules! define_error_codes {
    (
        $(#[$enum_meta:meta])*
        enum $CodeTy:ident for $ErrTy:ident {
            $(
                $(#[$variant_meta:meta])*
                $CodeVariant:ident => $ErrVariant:ident $( { $($pattern:tt)* } )? => $code:expr
            ),+ $(,)?
        }
    ) => {
        $(#[$enum_meta])*
        #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
        #[non_exhaustive]
        pub enum $CodeTy {
            $(
                $(#[$variant_meta])*
                $CodeVariant,
            )+
        }

        impl $CodeTy {
            /// Return the stable machine-readable representation of this error code.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$CodeVariant => $code,)+
                }
            }
        }

        impl fmt::Display for $CodeTy {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl $ErrTy {
            #[doc = concat!(
                "Retrieve the stable [`",
                stringify!($CodeTy),
                "`] for this error."
            )]
            #[must_use]
            pub const fn code(&self) -> $CodeTy {
                match self {
                    $(Self::$ErrVariant $( { $($pattern)* } )? => $CodeTy::$CodeVariant,)+
                }
            }
        }
    };
}

/// An error produced while constructing a [`crate::Dataset`].
#[non_exhaustive]
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum DatasetError {
    /// The dataset contained no samples.
    #[error("dataset contains no samples")]
    Empty,
    /// Samples must carry at least one feature.
    #[error("dataset samples must have at least one feature")]
    ZeroDimension,
    /// A sample's width differed from the first sample's width.
    #[error("sample {row} has {found} features but {expected} were expected")]
    Ragged {
        /// Zero-based index of the offending sample.
        row: usize,
        /// Width established by the first sample.
        expected: usize,
        /// Width of the offending sample.
        found: usize,
    },
    /// A feature value was infinite.
    #[error("sample {row} feature {column} is infinite")]
    NonFinite {
        /// Zero-based index of the offending sample.
        row: usize,
        /// Zero-based feature index within the sample.
        column: usize,
    },
}

define_error_codes! {
    /// Stable codes describing [`DatasetError`] variants.
    enum DatasetErrorCode for DatasetError {
        /// The dataset contained no samples.
        Empty => Empty => "DATASET_EMPTY",
        /// Samples must carry at least one feature.
        ZeroDimension => ZeroDimension => "DATASET_ZERO_DIMENSION",
        /// A sample's width differed from the first sample's width.
        Ragged => Ragged { .. } => "DATASET_RAGGED",
        /// A feature value was infinite.
        NonFinite => NonFinite { .. } => "DATASET_NON_FINITE",
    }
}

/// An error produced while parsing the engine's label output.
#[non_exhaustive]
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum ParseError {
    /// A whitespace-delimited token was not a signed integer.
    #[error("token {index} `{token}` at byte {offset} is not an integer label")]
    InvalidToken {
        /// The offending token, verbatim.
        token: String,
        /// Zero-based position of the token among all tokens.
        index: usize,
        /// Byte offset of the token within the payload.
        offset: usize,
    },
    /// The output stream was not valid UTF-8.
    #[error("engine output is not valid UTF-8 after byte {valid_up_to}")]
    InvalidUtf8 {
        /// Length of the longest valid UTF-8 prefix.
        valid_up_to: usize,
    },
}

define_error_codes! {
    /// Stable codes describing [`ParseError`] variants.
    enum ParseErrorCode for ParseError {
        /// A whitespace-delimited token was not a signed integer.
        InvalidToken => InvalidToken { .. } => "PARSE_INVALID_TOKEN",
        /// The output stream was not valid UTF-8.
        InvalidUtf8 => InvalidUtf8 { .. } => "PARSE_INVALID_UTF8",
    }
}

/// Error type produced when configuring or running a [`crate::Session`].
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum SessionError {
    /// The poll interval must be greater than zero.
    #[error("poll interval must be greater than zero")]
    InvalidPollInterval,
    /// A configured timeout must be greater than zero.
    #[error("timeout must be greater than zero")]
    InvalidTimeout,
    /// The engine executable could not be located.
    #[error("engine executable `{}` could not be found", program.display())]
    EngineNotFound {
        /// Path or bare name that failed to resolve.
        program: PathBuf,
    },
    /// The engine executable was located but could not be started.
    #[error("failed to start engine `{}`: {source}", program.display())]
    Spawn {
        /// Resolved executable path.
        program: PathBuf,
        /// Operating system error raised by the spawn.
        #[source]
        source: io::Error,
    },
    /// A transient channel could not be created, written, or read.
    #[error("failed to {operation}: {source}")]
    Io {
        /// Channel operation that failed.
        operation: &'static str,
        /// Underlying operating system error.
        #[source]
        source: io::Error,
    },
    /// The engine exited unsuccessfully; its output is not trusted.
    #[error("engine exited with {}", describe_exit(*code))]
    EngineExit {
        /// Exit code, or `None` when the engine was terminated by a signal.
        code: Option<i32>,
        /// Most recent progress lines captured before the engine exited.
        progress_tail: Vec<String>,
    },
    /// The engine's output could not be parsed into labels.
    #[error("failed to parse engine output: {source}")]
    Parse {
        /// Underlying parse failure.
        #[from]
        source: ParseError,
    },
    /// The engine produced a different number of labels than samples.
    #[error("engine produced {actual} labels for {expected} samples")]
    ResultLengthMismatch {
        /// Number of samples handed to the engine.
        expected: usize,
        /// Number of labels parsed from its output.
        actual: usize,
    },
    /// The run was cancelled by the caller.
    #[error("run was cancelled")]
    Cancelled,
    /// The run exceeded its configured time limit.
    #[error("run exceeded its time limit of {limit:?}")]
    Timeout {
        /// Limit that was exceeded.
        limit: Duration,
    },
}

define_error_codes! {
    /// Stable codes describing [`SessionError`] variants.
    enum SessionErrorCode for SessionError {
        /// The poll interval must be greater than zero.
        InvalidPollInterval => InvalidPollInterval => "GRAVITY_INVALID_POLL_INTERVAL",
        /// A configured timeout must be greater than zero.
        InvalidTimeout => InvalidTimeout => "GRAVITY_INVALID_TIMEOUT",
        /// The engine executable could not be located.
        EngineNotFound => EngineNotFound { .. } => "GRAVITY_ENGINE_NOT_FOUND",
        /// The engine executable was located but could not be started.
        SpawnFailed => Spawn { .. } => "GRAVITY_SPAWN_FAILED",
        /// A transient channel operation failed.
        Io => Io { .. } => "GRAVITY_IO",
        /// The engine exited unsuccessfully.
        EngineExit => EngineExit { .. } => "GRAVITY_ENGINE_EXIT",
        /// The engine's output could not be parsed.
        Parse => Parse { .. } => "GRAVITY_PARSE",
        /// The label count did not match the sample count.
        ResultLengthMismatch => ResultLengthMismatch { .. } => "GRAVITY_RESULT_LENGTH_MISMATCH",
        /// The run was cancelled by the caller.
        Cancelled => Cancelled => "GRAVITY_CANCELLED",
        /// The run exceeded its configured time limit.
        Timeout => Timeout { .. } => "GRAVITY_TIMEOUT",
    }
}

impl SessionError {
    /// Retrieve the inner [`ParseErrorCode`] when the engine output failed to parse.
    #[must_use]
    pub const fn parse_code(&self) -> Option<ParseErrorCode> {
        match self {
            Self::Parse { source } => Some(source.code()),
            _ => None,
        }
    }

    pub(crate) fn io(operation: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| Self::Io { operation, source }
    }
}

impl From<DrainError> for SessionError {
    fn from(error: DrainError) -> Self {
        match error {
            DrainError::Source(source) => Self::Io {
                operation: "read progress channel",
                source,
            },
            DrainError::Sink(source) => Self::Io {
                operation: "publish progress",
                source,
            },
        }
    }
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code (terminated by signal)".to_owned(),
    }
}

/// Convenient alias for results returned by the core API.
pub type Result<T> = core::result::Result<T, SessionError>;
