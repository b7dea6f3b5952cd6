//! Support library for the gravity CLI binary.
//!
//! Exposes the CLI and logging modules so doctests and unit tests can
//! exercise the command pipeline without forking a subprocess.

pub mod cli;
pub mod logging;
