//! Running resolved scenarios end to end.

use std::time::Instant;

use crate::client::{self, SharedClient};
use crate::driver::{self, Measurement, Workloads};
use crate::environment::Environment;
use crate::error::Result;
use crate::scenario::ScenarioConfig;

/// Prepares the environment for `scenario`, then runs and measures its operation.
///
/// The scenario's namespace is created if missing and the validation rule is brought into the
/// requested state before the driver starts.
pub async fn run_scenario(
    kube: kube::Client,
    environment: &Environment,
    scenario: &ScenarioConfig,
    workloads: &Workloads,
) -> Result<Measurement> {
    let start = Instant::now();
    environment.ensure_namespace(&scenario.namespace).await?;
    environment.ensure_validation(scenario.validation).await?;
    tracing::debug!(scenario = %scenario.name, elapsed = ?start.elapsed(), "prepared environment");

    let client = scenario_client(kube, scenario)?;
    let measurement = driver::run(scenario.operation, &client, workloads).await?;

    tracing::info!(
        scenario = %scenario.name,
        operation = %scenario.operation,
        elapsed = ?start.elapsed(),
        "finished scenario"
    );
    Ok(measurement)
}

/// Deletes every object in the collection `scenario` operates on.
pub async fn cleanup_scenario(kube: kube::Client, scenario: &ScenarioConfig) -> Result<()> {
    scenario_client(kube, scenario)?.delete_collection().await?;
    tracing::info!(
        scenario = %scenario.name,
        namespace = %scenario.namespace,
        resource = %scenario.descriptor,
        "deleted collection"
    );
    Ok(())
}

fn scenario_client(kube: kube::Client, scenario: &ScenarioConfig) -> Result<SharedClient> {
    client::connect(
        kube,
        &scenario.descriptor,
        &scenario.namespace,
        &scenario.template,
        scenario.list_options.clone(),
    )
}
