//! Command line parsing and the entry point of the `kubebench` binary.

use std::path::PathBuf;

use anyhow::{Context, Result};
use argh::FromArgs;
use kubebench_harness::bench::{cleanup_scenario, run_scenario};
use kubebench_harness::environment::Environment;
use kubebench_harness::scenario::{NAMESPACES, SCENARIOS, ScenarioConfig};
use kubebench_harness::{Resolver, remote};

use crate::config::Config;
use crate::{observability, report};

/// Benchmarks create, list and watch operations against a Kubernetes API server.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    #[argh(subcommand)]
    pub command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Run(RunCommand),
    Scenarios(ScenariosCommand),
    Cleanup(CleanupCommand),
    Version(VersionCommand),
}

/// run scenarios and print their measurements
///
/// Runs the given scenarios in order, or the configured ones if none are given. The first failing
/// scenario ends the run.
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "run")]
struct RunCommand {
    /// delete each scenario's objects before running it
    #[argh(switch)]
    clean: bool,

    /// scenario names, such as `List_CR_Validation`
    #[argh(positional)]
    scenarios: Vec<String>,
}

/// list the built-in scenarios
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "scenarios")]
struct ScenariosCommand {}

/// delete all objects a scenario operates on
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "cleanup")]
struct CleanupCommand {
    /// the scenario whose collection is deleted
    #[argh(positional)]
    scenario: String,
}

/// print the kubebench version
#[derive(Default, Debug, FromArgs)]
#[argh(subcommand, name = "version")]
struct VersionCommand {}

/// Bootstrap the runtime and execute the CLI command.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();

    match args.command {
        Command::Version(_) => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Command::Scenarios(_) => {
            for name in SCENARIOS {
                println!("{name}");
            }
            return Ok(());
        }
        Command::Run(_) | Command::Cleanup(_) => {}
    }

    let config = Config::load(args.config.as_deref()).context("failed to load configuration")?;

    // The TLS backend of the API client needs a process-wide crypto provider.
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("kubebench-rt")
        .enable_all()
        .worker_threads(config.runtime.worker_threads)
        .build()?;
    let _runtime_guard = runtime.enter();

    observability::init_tracing(&config);
    tracing::debug!(?config);

    runtime.block_on(async move {
        match args.command {
            Command::Run(RunCommand { clean, scenarios }) => run(config, scenarios, clean).await,
            Command::Cleanup(CleanupCommand { scenario }) => cleanup(config, &scenario).await,
            Command::Version(_) | Command::Scenarios(_) => unreachable!(),
        }
    })
}

fn resolver(config: &Config) -> Result<Resolver> {
    let templates = config.templates.load()?;
    let mut builder = Resolver::builder(templates)
        .large_data_size(config.payload.large_data.as_u64() as usize)
        .large_metadata_size(config.payload.large_metadata.as_u64() as usize);
    if let Some(seed) = config.payload.seed {
        builder = builder.seed(seed);
    }
    Ok(builder.build())
}

fn resolve(resolver: &mut Resolver, name: &str) -> Result<ScenarioConfig> {
    resolver
        .resolve(name)
        .with_context(|| format!("failed to resolve scenario `{name}`"))
}

async fn run(config: Config, names: Vec<String>, clean: bool) -> Result<()> {
    let names = if names.is_empty() {
        config.scenarios.clone()
    } else {
        names
    };

    // Resolve everything up front so a typo fails before any remote state changes.
    let mut resolver = resolver(&config)?;
    let scenarios = names
        .iter()
        .map(|name| resolve(&mut resolver, name))
        .collect::<Result<Vec<_>>>()?;

    let kube = remote::connect(&config.remote)
        .await
        .context("failed to connect to the API server")?;
    let environment = Environment::new(kube.clone(), config.settle);
    environment
        .ensure_namespaces(NAMESPACES)
        .await
        .context("failed to prepare namespaces")?;

    for scenario in &scenarios {
        if clean {
            cleanup_scenario(kube.clone(), scenario)
                .await
                .with_context(|| format!("failed to clean up before `{}`", scenario.name))?;
        }

        let bar = report::spinner(&scenario.name)?;
        let result = run_scenario(kube.clone(), &environment, scenario, &config.workloads).await;
        bar.finish_and_clear();

        let measurement = result.with_context(|| format!("scenario `{}` failed", scenario.name))?;
        report::print(scenario, &measurement);
    }

    Ok(())
}

async fn cleanup(config: Config, name: &str) -> Result<()> {
    let scenario = resolve(&mut resolver(&config)?, name)?;
    let kube = remote::connect(&config.remote)
        .await
        .context("failed to connect to the API server")?;

    cleanup_scenario(kube, &scenario)
        .await
        .with_context(|| format!("failed to clean up `{name}`"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::from_args(&["kubebench"], args).unwrap()
    }

    #[test]
    fn parses_run_with_scenarios() {
        let args = parse(&["-c", "bench.yaml", "run", "--clean", "Watch_CR", "List_CR"]);
        assert_eq!(args.config, Some(PathBuf::from("bench.yaml")));

        let Command::Run(run) = args.command else {
            panic!("expected run command");
        };
        assert!(run.clean);
        assert_eq!(run.scenarios, ["Watch_CR", "List_CR"]);
    }

    #[test]
    fn parses_run_without_scenarios() {
        let Command::Run(run) = parse(&["run"]).command else {
            panic!("expected run command");
        };
        assert!(!run.clean);
        assert!(run.scenarios.is_empty());
    }

    #[test]
    fn parses_cleanup() {
        let Command::Cleanup(cleanup) = parse(&["cleanup", "List_CR_Validation"]).command else {
            panic!("expected cleanup command");
        };
        assert_eq!(cleanup.scenario, "List_CR_Validation");
    }

    #[test]
    fn cleanup_requires_scenario() {
        assert!(Args::from_args(&["kubebench"], &["cleanup"]).is_err());
    }

    #[test]
    fn resolver_uses_payload_config() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("KB__PAYLOAD__LARGE_DATA", "300");
            jail.set_env("KB__PAYLOAD__SEED", "9");
            let config = Config::load(None).unwrap();

            let scenario = resolve(&mut resolver(&config).unwrap(), "List_CR_LargeData").unwrap();
            let data = scenario.template.as_value()["spec"]["data"].as_str().unwrap();
            assert!(data.len() >= 299 && data.len() <= 300);

            Ok(())
        });
    }
}
