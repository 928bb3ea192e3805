// src/exec/mod.rs

//! Process execution layer.
//!
//! [`command`] provides [`CommandTaskItem`], the task item the binary builds
//! for every `[task.<name>]` of the manifest. It runs the command through the
//! platform shell with `tokio::process::Command` and yields its stdout.

pub mod command;

pub use command::{CommandOutput, CommandTaskItem};
