//! The `kubebench` command line tool.
//!
//! This wraps [`kubebench_harness`] with configuration loading, logging and result reporting. The
//! binary entry point is [`cli::execute`].
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod cli;
pub mod config;
pub mod observability;
pub mod report;
