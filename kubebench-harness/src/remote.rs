//! Connection to the API server under benchmark.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// How to reach the API server.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the server.
    ///
    /// When unset, the configuration is inferred from the local kubeconfig or the in-cluster
    /// service account.
    pub url: Option<String>,
    /// Read and write timeout of individual requests.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout: Duration::from_secs(600),
        }
    }
}

/// Builds a client for the configured server.
///
/// No client-side request rate limit is applied.
pub async fn connect(config: &RemoteConfig) -> Result<kube::Client> {
    let mut kube_config = match &config.url {
        Some(url) => kube::Config::new(url.parse::<http::Uri>()?),
        None => kube::Config::infer().await?,
    };

    kube_config.read_timeout = Some(config.timeout);
    kube_config.write_timeout = Some(config.timeout);

    tracing::debug!(cluster = %kube_config.cluster_url, timeout = ?config.timeout, "connecting");
    Ok(kube::Client::try_from(kube_config)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timeout() {
        let config = RemoteConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(10 * 60));
        assert!(config.url.is_none());
    }

    #[tokio::test]
    async fn invalid_url_fails() {
        let config = RemoteConfig {
            url: Some("not a url".to_owned()),
            ..Default::default()
        };
        let Err(err) = connect(&config).await else {
            panic!("connecting to an invalid url succeeded");
        };
        assert!(matches!(err, crate::Error::InvalidUrl(_)));
    }
}
