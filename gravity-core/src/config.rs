//! Invocation settings handed to the engine on each run.
//!
//! [`InvocationConfig`] is deliberately sparse: every option is optional and
//! an absent option is simply omitted from the engine's argument list. The
//! engine owns all defaulting.

use std::{fmt, path::PathBuf};

/// Top-level verb passed to the engine as its first argument.
///
/// # Examples
/// ```
/// use gravity_core::EngineCommand;
///
/// assert_eq!(EngineCommand::FitPredict.as_str(), "fitpredict");
/// assert_eq!(EngineCommand::FitPredict.to_string(), "fitpredict");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EngineCommand {
    /// Fit the gravity field without reporting labels.
    Fit,
    /// Predict labels against a previously fitted field.
    Predict,
    /// Fit, refine and predict in a single pass.
    #[default]
    FitPredict,
    /// Refine a previously fitted field.
    Refine,
}

impl EngineCommand {
    /// Returns the verb understood by the engine.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fit => "fit",
            Self::Predict => "predict",
            Self::FitPredict => "fitpredict",
            Self::Refine => "refine",
        }
    }
}

impl fmt::Display for EngineCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the dataset reaches the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    /// Write the dataset to a transient file passed with `-c`.
    File,
    /// Stream the dataset into the engine's standard input (`-stdin`).
    #[default]
    Pipe,
}

/// Where the engine's diagnostic stream is collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProgressMode {
    /// Redirect stderr into a transient log file that is tailed while the
    /// engine runs.
    #[default]
    File,
    /// Read stderr through a pipe.
    Pipe,
}

/// Sparse tuning options forwarded to the engine.
///
/// # Examples
/// ```
/// use gravity_core::InvocationConfig;
///
/// let config = InvocationConfig::new()
///     .with_scaling(0.1)
///     .with_sample_sub(10)
///     .with_verbose(true);
/// assert_eq!(config.scaling, Some(0.1));
/// assert!(config.feature_sub.is_none());
/// assert!(config.verbose);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvocationConfig {
    /// Step scaling factor (`-sf`).
    pub scaling: Option<f64>,
    /// Number of samples drawn per subsample (`-ss`).
    pub sample_sub: Option<usize>,
    /// Number of features drawn per subsample (`-fs`).
    pub feature_sub: Option<usize>,
    /// Distance under which converged points merge into one cluster (`-m`).
    pub merge_distance: Option<f64>,
    /// Convergence threshold for descent (`-convergence`).
    pub convergence_factor: Option<f64>,
    /// Neighbourhood locality (`-l`).
    pub locality: Option<f64>,
    /// Field smoothing (`-smoothing`).
    pub smoothing: Option<f64>,
    /// Distance metric name understood by the engine (`-d`).
    pub distance_metric: Option<String>,
    /// Random jitter applied to descents (`-fuzz`).
    pub fuzz: Option<f64>,
    /// Fraction of the field covered per step (`-step_fraction`).
    pub step_fraction: Option<f64>,
    /// Number of descent steps (`-steps`).
    pub steps: Option<usize>,
    /// Borrowing weight between neighbouring points (`-borrow`).
    pub borrow: Option<f64>,
    /// Run a refining pass after the initial fit (`-refining`).
    pub refining: bool,
    /// Ask the engine for verbose progress (`-verbose`).
    pub verbose: bool,
    /// Prefix for the engine's diagnostic dump files (`-error`).
    pub error_dump_path: Option<PathBuf>,
}

impl InvocationConfig {
    /// Creates a configuration that emits no tuning flags.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the step scaling factor.
    #[must_use]
    pub fn with_scaling(mut self, value: f64) -> Self {
        self.scaling = Some(value);
        self
    }

    /// Sets the sample subsample size.
    #[must_use]
    pub fn with_sample_sub(mut self, value: usize) -> Self {
        self.sample_sub = Some(value);
        self
    }

    /// Sets the feature subsample size.
    #[must_use]
    pub fn with_feature_sub(mut self, value: usize) -> Self {
        self.feature_sub = Some(value);
        self
    }

    /// Sets the merge distance.
    #[must_use]
    pub fn with_merge_distance(mut self, value: f64) -> Self {
        self.merge_distance = Some(value);
        self
    }

    /// Sets the convergence factor.
    #[must_use]
    pub fn with_convergence_factor(mut self, value: f64) -> Self {
        self.convergence_factor = Some(value);
        self
    }

    /// Sets the locality.
    #[must_use]
    pub fn with_locality(mut self, value: f64) -> Self {
        self.locality = Some(value);
        self
    }

    /// Sets the smoothing.
    #[must_use]
    pub fn with_smoothing(mut self, value: f64) -> Self {
        self.smoothing = Some(value);
        self
    }

    /// Sets the distance metric name.
    #[must_use]
    pub fn with_distance_metric(mut self, value: impl Into<String>) -> Self {
        self.distance_metric = Some(value.into());
        self
    }

    /// Sets the fuzz.
    #[must_use]
    pub fn with_fuzz(mut self, value: f64) -> Self {
        self.fuzz = Some(value);
        self
    }

    /// Sets the step fraction.
    #[must_use]
    pub fn with_step_fraction(mut self, value: f64) -> Self {
        self.step_fraction = Some(value);
        self
    }

    /// Sets the number of descent steps.
    #[must_use]
    pub fn with_steps(mut self, value: usize) -> Self {
        self.steps = Some(value);
        self
    }

    /// Sets the borrow weight.
    #[must_use]
    pub fn with_borrow(mut self, value: f64) -> Self {
        self.borrow = Some(value);
        self
    }

    /// Enables or disables the refining pass.
    #[must_use]
    pub fn with_refining(mut self, enabled: bool) -> Self {
        self.refining = enabled;
        self
    }

    /// Enables or disables verbose progress.
    ///
    /// Verbose mode also changes how progress reaches the caller: every raw
    /// line is forwarded instead of being folded into a rolling counter.
    #[must_use]
    pub fn with_verbose(mut self, enabled: bool) -> Self {
        self.verbose = enabled;
        self
    }

    /// Sets the prefix the engine uses for diagnostic dumps.
    #[must_use]
    pub fn with_error_dump_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.error_dump_path = Some(path.into());
        self
    }
}
