//! Test utilities for `kubebench`.
//!
//! This crate provides an in-process fake of the API server subset the harness talks to, along
//! with logging setup for tests. See the modules for all available utilities.

pub mod server;
pub mod tracing;
