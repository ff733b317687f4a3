//! Configuration for the benchmark runner.
//!
//! Configuration can be loaded from multiple sources with the following precedence (highest to
//! lowest):
//!
//! 1. Environment variables (prefixed with `KB__`)
//! 2. YAML configuration file (specified via `-c` or `--config` flag)
//! 3. Defaults
//!
//! See [`Config`] for a description of all configuration fields and their defaults.
//!
//! # Environment Variables
//!
//! Environment variables use `KB__` as a prefix and double underscores (`__`) to denote nested
//! configuration structures. For example:
//!
//! - `KB__REMOTE__URL=https://127.0.0.1:6443` sets the API server address
//! - `KB__WORKLOADS__WATCHERS=100` sets the number of concurrent watchers
//! - `KB__PAYLOAD__LARGE_DATA=20KiB` sets the size of enlarged payloads
//!
//! # YAML Configuration File
//!
//! The above configuration in YAML format would look like this:
//!
//! ```yaml
//! remote:
//!   url: https://127.0.0.1:6443
//!
//! workloads:
//!   watchers: 100
//!
//! payload:
//!   large_data: 20KiB
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bytesize::ByteSize;
use figment::providers::{Env, Format, Serialized, Yaml};
use kubebench_harness::Workloads;
use kubebench_harness::environment::Settle;
use kubebench_harness::remote::RemoteConfig;
use kubebench_harness::scenario::{SCENARIOS, Templates};
use kubebench_harness::template::Template;
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "KB__";

/// Sizes of generated payloads in enlarged scenarios.
///
/// Used in: [`Config::payload`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Payload {
    /// Target size of `spec.data` in `LargeData` scenarios.
    ///
    /// # Default
    ///
    /// `10000` bytes
    ///
    /// # Environment Variable
    ///
    /// `KB__PAYLOAD__LARGE_DATA`
    #[serde(with = "exact_bytes")]
    pub large_data: ByteSize,

    /// Target size of the filler annotation in `LargeMetadata` scenarios.
    ///
    /// # Default
    ///
    /// `10000` bytes
    #[serde(with = "exact_bytes")]
    pub large_metadata: ByteSize,

    /// Seed for the payload generator.
    ///
    /// Leave unset to generate different payloads on every run.
    pub seed: Option<u64>,
}

impl Default for Payload {
    fn default() -> Self {
        Self {
            large_data: ByteSize::b(10_000),
            large_metadata: ByteSize::b(10_000),
            seed: None,
        }
    }
}

/// Writes sizes as a plain byte count.
///
/// The display form of [`ByteSize`] is rounded, so `10000` would read back as `9.8 KiB`.
/// Reading accepts both byte counts and unit strings such as `20KiB`.
mod exact_bytes {
    use bytesize::ByteSize;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(size: &ByteSize, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(size.as_u64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ByteSize, D::Error> {
        ByteSize::deserialize(deserializer)
    }
}

/// Files overriding the built-in object templates.
///
/// Used in: [`Config::templates`]
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TemplateFiles {
    /// YAML file with the template for custom resource scenarios.
    pub custom_resource: Option<PathBuf>,
    /// YAML file with the template for all other scenarios.
    pub endpoints: Option<PathBuf>,
}

impl TemplateFiles {
    /// Loads the configured templates, falling back to the built-in ones.
    pub fn load(&self) -> Result<Templates> {
        let builtin = Templates::builtin()?;
        Ok(Templates {
            custom_resource: match &self.custom_resource {
                Some(path) => load_template(path)?,
                None => builtin.custom_resource,
            },
            endpoints: match &self.endpoints {
                Some(path) => load_template(path)?,
                None => builtin.endpoints,
            },
        })
    }
}

fn load_template(path: &Path) -> Result<Template> {
    let definition = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read template {}", path.display()))?;
    Template::from_yaml(&definition)
        .with_context(|| format!("failed to parse template {}", path.display()))
}

/// Runtime configuration for the Tokio async runtime.
///
/// Used in: [`Config::runtime`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Runtime {
    /// Number of worker threads driving requests and watch streams.
    ///
    /// # Default
    ///
    /// Defaults to the number of CPU cores on the host machine.
    ///
    /// # Environment Variable
    ///
    /// `KB__RUNTIME__WORKER_THREADS`
    pub worker_threads: usize,
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get(),
        }
    }
}

/// Format of the log lines written to stderr.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogFormat {
    /// `Pretty` when stderr is a terminal, `Simplified` otherwise.
    Auto,
    /// Compact output with colors.
    Pretty,
    /// Plain text without colors.
    Simplified,
    /// JSON lines.
    Json,
}

/// An unknown [`LogFormat`] name.
#[derive(Clone, Debug)]
pub struct FormatParseError(String);

impl fmt::Display for FormatParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            r#"unknown log format "{}", expected auto, pretty, simplified or json"#,
            self.0
        )
    }
}

impl std::error::Error for FormatParseError {}

impl std::str::FromStr for LogFormat {
    type Err = FormatParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(LogFormat::Auto),
            "pretty" => Ok(LogFormat::Pretty),
            "simplified" => Ok(LogFormat::Simplified),
            "json" => Ok(LogFormat::Json),
            _ => Err(FormatParseError(s.to_owned())),
        }
    }
}

/// Reads and writes a field through its `FromStr` and `Display` forms.
mod display_fromstr {
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: std::fmt::Display,
    {
        serializer.collect_str(&value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: std::fmt::Display,
    {
        use serde::Deserialize;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Logging configuration.
///
/// Logs are always written to stderr, so that results on stdout stay machine readable.
///
/// Used in: [`Config::logging`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    /// Minimum log level to output.
    ///
    /// The `RUST_LOG` environment variable provides more granular control per module if needed.
    ///
    /// # Default
    ///
    /// `INFO`
    ///
    /// # Environment Variable
    ///
    /// `KB__LOGGING__LEVEL`
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Log output format. See [`LogFormat`] for available options.
    ///
    /// # Environment Variable
    ///
    /// `KB__LOGGING__FORMAT`
    #[serde(with = "display_fromstr")]
    pub format: LogFormat,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogFormat::Auto => "auto",
            LogFormat::Pretty => "pretty",
            LogFormat::Simplified => "simplified",
            LogFormat::Json => "json",
        };
        f.write_str(name)
    }
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// Main configuration struct for the benchmark runner.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Connection to the API server.
    ///
    /// # Environment Variables
    ///
    /// - `KB__REMOTE__URL`: defaults to the inferred kubeconfig or in-cluster configuration
    /// - `KB__REMOTE__TIMEOUT`: defaults to `10m`
    pub remote: RemoteConfig,

    /// Bounds for waiting on namespace and validation changes to settle.
    ///
    /// # Environment Variables
    ///
    /// - `KB__SETTLE__TIMEOUT`: defaults to `60s`
    /// - `KB__SETTLE__INTERVAL`: defaults to `500ms`
    pub settle: Settle,

    /// Sizes of generated payloads.
    pub payload: Payload,

    /// Sizes of the measured workloads.
    pub workloads: Workloads,

    /// Template overrides.
    pub templates: TemplateFiles,

    /// Scenarios to run when none are given on the command line.
    ///
    /// # Default
    ///
    /// All built-in scenarios.
    pub scenarios: Vec<String>,

    /// Logging configuration.
    pub logging: Logging,

    /// Runtime configuration.
    pub runtime: Runtime,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            remote: RemoteConfig::default(),
            settle: Settle::default(),
            payload: Payload::default(),
            workloads: Workloads::default(),
            templates: TemplateFiles::default(),
            scenarios: SCENARIOS.iter().map(|name| (*name).to_owned()).collect(),
            logging: Logging::default(),
            runtime: Runtime::default(),
        }
    }
}

impl Config {
    /// Loads configuration from defaults, an optional YAML file and the environment.
    ///
    /// Later sources override earlier ones.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Duration;

    use super::*;

    #[test]
    fn defaults() {
        figment::Jail::expect_with(|_jail| {
            let config = Config::load(None).unwrap();

            assert_eq!(config.remote.url, None);
            assert_eq!(config.remote.timeout, Duration::from_secs(600));
            assert_eq!(config.payload.large_data, ByteSize::b(10_000));
            assert_eq!(config.workloads.list_size, 1000);
            assert_eq!(config.scenarios.len(), SCENARIOS.len());
            assert_eq!(config.logging.format, LogFormat::Auto);

            Ok(())
        });
    }

    #[test]
    fn default_payload_sizes_are_exact() {
        figment::Jail::expect_with(|_jail| {
            let config = Config::load(None).unwrap();
            assert_eq!(config.payload.large_data.as_u64(), 10_000);
            assert_eq!(config.payload.large_metadata.as_u64(), 10_000);

            let templates = config.templates.load().unwrap();
            let mut resolver = kubebench_harness::Resolver::builder(templates)
                .large_data_size(config.payload.large_data.as_u64() as usize)
                .seed(3)
                .build();
            let scenario = resolver.resolve("List_CR_LargeData").unwrap();
            let data = scenario.template.as_value()["spec"]["data"].as_str().unwrap();
            assert!((9_999..=10_000).contains(&data.len()), "{}", data.len());

            Ok(())
        });
    }

    #[test]
    fn payload_sizes_accept_byte_counts() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("KB__PAYLOAD__LARGE_METADATA", "12345");
            let config = Config::load(None).unwrap();
            assert_eq!(config.payload.large_metadata.as_u64(), 12_345);
            Ok(())
        });
    }

    #[test]
    fn parses_log_formats() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("".parse::<LogFormat>().unwrap(), LogFormat::Auto);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn configurable_via_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("KB__REMOTE__URL", "http://localhost:8001");
            jail.set_env("KB__SETTLE__TIMEOUT", "5s");
            jail.set_env("KB__PAYLOAD__LARGE_DATA", "20KiB");
            jail.set_env("KB__PAYLOAD__SEED", "42");
            jail.set_env("KB__WORKLOADS__WATCHERS", "10");
            jail.set_env("KB__SCENARIOS", "[Watch_CR, List_CR_Validation]");
            jail.set_env("KB__LOGGING__LEVEL", "debug");
            jail.set_env("KB__LOGGING__FORMAT", "json");

            let config = Config::load(None).unwrap();

            assert_eq!(
                dbg!(&config).remote.url.as_deref(),
                Some("http://localhost:8001")
            );
            assert_eq!(config.settle.timeout, Duration::from_secs(5));
            assert_eq!(config.payload.large_data, ByteSize::kib(20));
            assert_eq!(config.payload.seed, Some(42));
            assert_eq!(config.workloads.watchers, 10);
            assert_eq!(config.workloads.watch_events, 10);
            assert_eq!(config.scenarios, ["Watch_CR", "List_CR_Validation"]);
            assert_eq!(config.logging.level, LevelFilter::DEBUG);
            assert_eq!(config.logging.format, LogFormat::Json);

            Ok(())
        });
    }

    #[test]
    fn configurable_via_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            remote:
                url: https://127.0.0.1:6443
                timeout: 30s
            workloads:
                latency_iterations: 7
            scenarios:
                - CreateLatency_CR_Validation
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|_jail| {
            let config = Config::load(Some(tempfile.path())).unwrap();

            assert_eq!(
                dbg!(&config).remote.url.as_deref(),
                Some("https://127.0.0.1:6443")
            );
            assert_eq!(config.remote.timeout, Duration::from_secs(30));
            assert_eq!(config.workloads.latency_iterations, 7);
            assert_eq!(config.workloads.throughput_fanout, 100);
            assert_eq!(config.scenarios, ["CreateLatency_CR_Validation"]);

            Ok(())
        });
    }

    #[test]
    fn env_overrides_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            workloads:
                list_size: 50
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|jail| {
            jail.set_env("KB__WORKLOADS__LIST_SIZE", "75");

            let config = Config::load(Some(tempfile.path())).unwrap();
            assert_eq!(config.workloads.list_size, 75);

            Ok(())
        });
    }

    #[test]
    fn loads_template_files() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
apiVersion: stable.example.com/v1
kind: Foo
metadata:
  name: custom
spec:
  data: "x1,"
"#,
            )
            .unwrap();

        let files = TemplateFiles {
            custom_resource: Some(tempfile.path().to_owned()),
            endpoints: None,
        };
        let templates = files.load().unwrap();

        let name = &templates.custom_resource.as_value()["metadata"]["name"];
        assert_eq!(name, "custom");
        assert_eq!(templates.endpoints, Template::endpoints().unwrap());
    }

    #[test]
    fn missing_template_file_fails() {
        let files = TemplateFiles {
            custom_resource: Some("/does/not/exist.yaml".into()),
            endpoints: None,
        };
        let err = files.load().unwrap_err();
        assert!(err.to_string().contains("failed to read template"));
    }
}
