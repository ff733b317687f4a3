//! Errors of the benchmark harness.

use std::time::Duration;

/// Errors that can happen while preparing or running a benchmark.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Any error returned by the API server or the underlying [`kube`] client.
    #[error(transparent)]
    Kube(#[from] kube::Error),
    /// The client configuration could not be inferred from kubeconfig or the cluster environment.
    #[error("failed to infer client configuration: {0}")]
    InferConfig(#[from] kube::config::InferConfigError),
    /// The configured API server URL is not a valid URI.
    #[error("invalid server url: {0}")]
    InvalidUrl(#[from] http::uri::InvalidUri),
    /// A template or schema definition could not be parsed.
    #[error("failed to parse definition: {0}")]
    Yaml(#[from] serde_yaml::Error),
    /// A template could not be converted into the client-side object representation.
    #[error("failed to convert object: {0}")]
    Json(#[from] serde_json::Error),
    /// A field path does not resolve to a settable location within a template.
    #[error("field path `{path}` is not traversable at `{segment}`")]
    FieldPath {
        /// The full path that was requested.
        path: String,
        /// The first segment that is missing or not an object.
        segment: String,
    },
    /// The collection already holds more objects than requested.
    #[error("too many items already exist: want {want}, got {got}")]
    TooManyObjects {
        /// The requested object count.
        want: usize,
        /// The object count found on the server.
        got: usize,
    },
    /// An asynchronous change on the server was not observed in time.
    #[error("{what} did not settle within {timeout:?}")]
    SettleTimeout {
        /// Description of the state that was awaited.
        what: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },
    /// A watch stream ended before delivering all expected events.
    #[error("watch closed after {seen} of {expected} events")]
    WatchClosed {
        /// Number of events observed before the stream ended.
        seen: usize,
        /// Number of events the watcher was waiting for.
        expected: usize,
    },
    /// A scenario name does not contain a recognized operation tag.
    #[error("scenario `{0}` does not name an operation")]
    UnknownOperation(String),
    /// A concurrent task panicked.
    #[error("task panicked: {0}")]
    TaskPanicked(String),
}

/// A convenience alias that defaults our [`Error`] type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Returns `true` if the server responded with `404 Not Found`.
pub(crate) fn is_not_found(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(response) if response.code == 404)
}
