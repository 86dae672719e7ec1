//! Session orchestration.
//!
//! This module owns the running child process (start/stop/poll), its captured
//! output, and the command/event loop the shell talks to. UI and CLI layers
//! call into this module and never touch a `Child` directly.

mod controller;
mod output;
mod runner;
mod terminate;

pub(crate) use controller::{ProcessController, StopReport};
pub(crate) use output::{OutputBuffer, OutputLine, StreamSource};
pub(crate) use runner::{run_controller, shutdown_signal, LauncherEvent, UiCommand};
