//! The measurement core of `kubebench`.
//!
//! This crate drives controlled workloads against a Kubernetes-style API server and measures the
//! client-observed performance of create, list and watch operations:
//!
//! - [`scenario`] turns a scenario name into an explicit [`ScenarioConfig`].
//! - [`environment`] brings namespaces, validation rules and object counts into a known state.
//! - [`client`] hides typed and dynamically-typed resource access behind [`BenchmarkClient`].
//! - [`driver`] runs the timed loops and returns a [`Measurement`].
//!
//! Any remote failure during setup or inside a timed region aborts the run. Partial results are
//! never reported.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod bench;
pub mod client;
pub mod concurrency;
pub mod driver;
pub mod environment;
pub mod error;
pub mod payload;
pub mod remote;
pub mod resource;
pub mod scenario;
pub mod template;

pub use crate::client::{BenchmarkClient, SharedClient};
pub use crate::driver::{Measurement, Workloads};
pub use crate::error::{Error, Result};
pub use crate::scenario::{Resolver, ScenarioConfig};
