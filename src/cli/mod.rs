//! Command line interface
//!
//! Argument parsing and the runner that turns a parsed command into an
//! upload, a resume, or session housekeeping.

pub mod args;
pub mod runner;

pub use args::Args;
pub use runner::Runner;
