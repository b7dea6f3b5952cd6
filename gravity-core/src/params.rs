//! Deterministic construction of the engine's argument vector.
//!
//! The tuning flags are emitted from a single fixed table, so two identical
//! configurations always produce identical argument lists regardless of the
//! order in which the caller populated them. Nothing here touches the
//! filesystem or validates value ranges; that is the engine's business.

use std::{ffi::OsString, path::Path};

use crate::{
    config::{EngineCommand, InvocationConfig},
    marshal::format_float,
};

/// Describes how the engine should read its input, which selects the channel
/// flags placed directly after the command verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputArgument<'a> {
    /// The dataset is streamed through standard input (`-stdin`).
    Stdin,
    /// The dataset lives in a file passed with `-c`.
    File(&'a Path),
}

enum FlagValue {
    Value(OsString),
    Switch,
}

type Extract = fn(&InvocationConfig) -> Option<FlagValue>;

// Canonical order; the engine receives tuning flags exactly as listed.
const TUNING_FLAGS: &[(&str, Extract)] = &[
    ("-verbose", |config| switch(config.verbose)),
    ("-ss", |config| config.sample_sub.map(integer)),
    ("-fs", |config| config.feature_sub.map(integer)),
    ("-sf", |config| config.scaling.map(float)),
    ("-m", |config| config.merge_distance.map(float)),
    ("-error", |config| {
        config
            .error_dump_path
            .as_ref()
            .map(|path| FlagValue::Value(path.as_os_str().to_owned()))
    }),
    ("-convergence", |config| config.convergence_factor.map(float)),
    ("-l", |config| config.locality.map(float)),
    ("-smoothing", |config| config.smoothing.map(float)),
    ("-d", |config| {
        config
            .distance_metric
            .as_ref()
            .map(|metric| FlagValue::Value(OsString::from(metric)))
    }),
    ("-fuzz", |config| config.fuzz.map(float)),
    ("-step_fraction", |config| config.step_fraction.map(float)),
    ("-steps", |config| config.steps.map(integer)),
    ("-borrow", |config| config.borrow.map(float)),
    ("-refining", |config| switch(config.refining)),
];

fn switch(enabled: bool) -> Option<FlagValue> {
    enabled.then_some(FlagValue::Switch)
}

fn integer(value: usize) -> FlagValue {
    FlagValue::Value(OsString::from(value.to_string()))
}

fn float(value: f64) -> FlagValue {
    FlagValue::Value(OsString::from(format_float(value)))
}

/// Builds the ordered argument list passed to the engine after its
/// executable path.
///
/// The list starts with the command verb, followed by the channel flags
/// (`-stdin`, `-stdout`, `-c <file>`) and then every tuning flag present in
/// `config`, in canonical order. Standard output is always requested because
/// labels are read from it.
///
/// # Examples
/// ```
/// use gravity_core::{EngineCommand, InputArgument, InvocationConfig, build_arguments};
///
/// let config = InvocationConfig::new().with_sample_sub(10).with_scaling(0.1);
/// let args = build_arguments(EngineCommand::FitPredict, &config, InputArgument::Stdin);
/// assert_eq!(args, ["fitpredict", "-stdin", "-stdout", "-ss", "10", "-sf", "0.1"]);
/// ```
#[must_use]
pub fn build_arguments(
    command: EngineCommand,
    config: &InvocationConfig,
    input: InputArgument<'_>,
) -> Vec<OsString> {
    let mut args = vec![OsString::from(command.as_str())];
    match input {
        InputArgument::Stdin => {
            args.push(OsString::from("-stdin"));
            args.push(OsString::from("-stdout"));
        }
        InputArgument::File(path) => {
            args.push(OsString::from("-stdout"));
            args.push(OsString::from("-c"));
            args.push(path.as_os_str().to_owned());
        }
    }

    for (flag, extract) in TUNING_FLAGS {
        match extract(config) {
            Some(FlagValue::Value(value)) => {
                args.push(OsString::from(*flag));
                args.push(value);
            }
            Some(FlagValue::Switch) => args.push(OsString::from(*flag)),
            None => {}
        }
    }
    args
}
