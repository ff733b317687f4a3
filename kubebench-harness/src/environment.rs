//! Idempotent preparation of the server before a measurement starts.
//!
//! Every function in this module first inspects the remote state and only mutates it when it
//! differs from what the scenario needs. Asynchronous server-side effects of a mutation are awaited
//! by polling until they are observed, bounded by [`Settle::timeout`].

use std::future::Future;
use std::time::Duration;

use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceDefinition, CustomResourceValidation,
};
use kube::Api;
use kube::api::{ObjectMeta, PostParams};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::client::SharedClient;
use crate::concurrency::TaskGroup;
use crate::error::{Error, Result, is_not_found};

/// Name of the custom resource definition whose validation is toggled.
pub const FOO_CRD: &str = "foos.stable.example.com";

/// Version of [`FOO_CRD`] that carries the validation schema.
pub const FOO_VERSION: &str = "v1";

/// Schema with a CEL rule that requires `spec.data` to match the filler grammar.
pub const VALIDATION_SCHEMA: &str = r#"openAPIV3Schema:
  type: object
  properties:
    spec:
      type: object
      x-kubernetes-preserve-unknown-fields: true
      x-kubernetes-validations:
        - rule: "self.data.matches(r'^([a-z]+[0-9]+,)+$')"
          message: "data must be in expected format."
      properties:
        data:
          type: string
"#;

/// Schema that accepts any object.
pub const PERMISSIVE_SCHEMA: &str = r#"openAPIV3Schema:
  type: object
  x-kubernetes-preserve-unknown-fields: true
"#;

/// Bounds for waiting on asynchronous server-side changes.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Settle {
    /// The longest time to wait for a change to become visible.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// The pause between two observations.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for Settle {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            interval: Duration::from_millis(500),
        }
    }
}

/// Prepares namespaces and validation rules on a server.
#[derive(Clone)]
pub struct Environment {
    client: kube::Client,
    settle: Settle,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("settle", &self.settle)
            .finish_non_exhaustive()
    }
}

impl Environment {
    /// Creates an environment operating through the given client.
    pub fn new(client: kube::Client, settle: Settle) -> Self {
        Self { client, settle }
    }

    /// Makes sure the namespace exists and is active.
    ///
    /// Existing namespaces are left untouched. Errors other than "not found" are returned as-is.
    pub async fn ensure_namespace(&self, name: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());

        match api.get(name).await {
            Ok(_) => {
                tracing::debug!(namespace = name, "namespace already exists");
                return Ok(());
            }
            Err(error) if is_not_found(&error) => {}
            Err(error) => return Err(error.into()),
        }

        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                ..Default::default()
            },
            ..Default::default()
        };
        api.create(&PostParams::default(), &namespace).await?;
        tracing::info!(namespace = name, "created namespace");

        let api = &api;
        poll_until(&self.settle, &format!("namespace `{name}`"), move || async move {
            let namespace = api.get_opt(name).await?;
            let phase = namespace
                .and_then(|namespace| namespace.status)
                .and_then(|status| status.phase);
            Ok(phase.as_deref() == Some("Active"))
        })
        .await
    }

    /// Makes sure all given namespaces exist.
    pub async fn ensure_namespaces(&self, names: &[&str]) -> Result<()> {
        for name in names {
            self.ensure_namespace(name).await?;
        }
        Ok(())
    }

    /// Installs or removes the validation rule on [`FOO_CRD`].
    ///
    /// The CRD is only updated if its current schema differs from the desired one.
    pub async fn ensure_validation(&self, enabled: bool) -> Result<()> {
        let desired = validation_schema(enabled)?;
        let api: Api<CustomResourceDefinition> = Api::all(self.client.clone());

        let mut crd = api.get(FOO_CRD).await?;
        let mut changed = false;
        for version in &mut crd.spec.versions {
            if version.name == FOO_VERSION && version.schema.as_ref() != Some(&desired) {
                version.schema = Some(desired.clone());
                changed = true;
            }
        }

        if !changed {
            tracing::debug!(enabled, "validation already in desired state");
            return Ok(());
        }

        api.replace(FOO_CRD, &PostParams::default(), &crd).await?;
        tracing::info!(enabled, "updated validation");

        let (api, desired) = (&api, &desired);
        poll_until(&self.settle, &format!("validation of `{FOO_CRD}`"), move || async move {
            let crd = api.get(FOO_CRD).await?;
            Ok(crd
                .spec
                .versions
                .iter()
                .filter(|version| version.name == FOO_VERSION)
                .all(|version| version.schema.as_ref() == Some(desired)))
        })
        .await
    }
}

/// Returns the schema that corresponds to validation being enabled or disabled.
pub fn validation_schema(enabled: bool) -> Result<CustomResourceValidation> {
    let definition = if enabled {
        VALIDATION_SCHEMA
    } else {
        PERMISSIVE_SCHEMA
    };
    Ok(serde_yaml::from_str(definition)?)
}

/// Brings the collection of `client` to exactly `target` objects.
///
/// Missing objects are created concurrently, one task each. If the collection already holds more
/// than `target` objects, this fails without creating or deleting anything.
pub async fn ensure_object_count(client: &SharedClient, target: usize) -> Result<()> {
    let current = client.count().await?;

    if current > target {
        return Err(Error::TooManyObjects {
            want: target,
            got: current,
        });
    }

    let missing = target - current;
    if missing == 0 {
        return Ok(());
    }

    let mut group = TaskGroup::new();
    for index in 0..missing {
        let client = SharedClient::clone(client);
        group.spawn(async move { client.create(index).await.map(drop) });
    }
    group.join_all().await?;

    tracing::info!(created = missing, total = target, "populated collection");
    Ok(())
}

/// Repeatedly evaluates `check` until it returns `true` or the settle timeout elapses.
async fn poll_until<F, Fut>(settle: &Settle, what: &str, mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let deadline = Instant::now() + settle.timeout;

    loop {
        if check().await? {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(Error::SettleTimeout {
                what: what.to_owned(),
                timeout: settle.timeout,
            });
        }
        tokio::time::sleep(settle.interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schemas_parse() {
        let enabled = validation_schema(true).unwrap();
        let disabled = validation_schema(false).unwrap();
        assert_ne!(enabled, disabled);

        let spec = &enabled
            .open_api_v3_schema
            .as_ref()
            .unwrap()
            .properties
            .as_ref()
            .unwrap()["spec"];
        let rules = spec.x_kubernetes_validations.as_ref().unwrap();
        assert_eq!(rules[0].rule, "self.data.matches(r'^([a-z]+[0-9]+,)+$')");

        let permissive = disabled.open_api_v3_schema.unwrap();
        assert_eq!(permissive.x_kubernetes_preserve_unknown_fields, Some(true));
    }

    #[tokio::test]
    async fn poll_until_times_out() {
        let settle = Settle {
            timeout: Duration::from_millis(20),
            interval: Duration::from_millis(5),
        };
        let err = poll_until(&settle, "nothing", || async { Ok(false) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SettleTimeout { what, .. } if what == "nothing"));
    }

    #[tokio::test]
    async fn poll_until_observes_change() {
        let settle = Settle::default();
        let mut attempts = 0;
        poll_until(&settle, "counter", || {
            attempts += 1;
            let done = attempts >= 3;
            async move { Ok(done) }
        })
        .await
        .unwrap();
        assert_eq!(attempts, 3);
    }
}
