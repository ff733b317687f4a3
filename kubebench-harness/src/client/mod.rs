//! Uniform access to the resources under benchmark.
//!
//! [`BenchmarkClient`] is the capability interface every driver works against. It has two
//! implementations which issue identical requests and differ only in their client-side object
//! representation:
//!
//! - [`DynamicClient`] treats objects as weakly-typed documents of any group/version/resource.
//! - [`EndpointsClient`] uses the compiled-in `Endpoints` type.
//!
//! [`connect`] is the only place that chooses between them.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use k8s_openapi::api::core::v1::Endpoints;
use kube::api::{DynamicObject, ListParams};
use serde_json::Value;

use crate::error::Result;
use crate::resource::ResourceDescriptor;
use crate::template::Template;

mod dynamic;
mod endpoints;
mod watch;

pub use dynamic::DynamicClient;
pub use endpoints::EndpointsClient;
pub use watch::{Event, EventStream};

/// A shareable handle to any [`BenchmarkClient`].
pub type SharedClient = Arc<dyn BenchmarkClient>;

/// Operations a benchmark can perform against one resource collection.
#[async_trait::async_trait]
pub trait BenchmarkClient: Debug + Send + Sync + 'static {
    /// Creates a copy of the template under a generated name.
    ///
    /// The `index` becomes part of the name, which keeps names unique when many callers create
    /// objects at the same instant.
    async fn create(&self, index: usize) -> Result<Object>;

    /// Lists the collection using the bound [`ListOptions`].
    async fn list(&self) -> Result<ObjectList>;

    /// Returns the number of objects from a strongly consistent, unfiltered list.
    async fn count(&self) -> Result<usize>;

    /// Subscribes to changes of the collection, starting at its current state.
    ///
    /// Returns once the server has accepted the subscription.
    async fn watch(&self) -> Result<EventStream>;

    /// Deletes all objects in the collection.
    async fn delete_collection(&self) -> Result<()>;
}

/// Consistency options applied to list requests.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ListOptions {
    /// The resource version to read at. `None` requests a strongly consistent read.
    pub resource_version: Option<String>,
}

impl ListOptions {
    /// Reads the most recent state from storage.
    pub fn consistent() -> Self {
        Self::default()
    }

    /// Allows the server to answer from its watch cache.
    pub fn any() -> Self {
        Self {
            resource_version: Some("0".to_owned()),
        }
    }

    /// Converts these options into request parameters.
    pub fn list_params(&self) -> ListParams {
        ListParams {
            resource_version: self.resource_version.clone(),
            ..Default::default()
        }
    }
}

/// An object returned by the server, in the representation of the client that produced it.
#[derive(Clone, Debug)]
pub enum Object {
    /// A weakly-typed document.
    Dynamic(DynamicObject),
    /// A typed `Endpoints` object.
    Endpoints(Endpoints),
}

impl Object {
    /// Returns the object's name.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Dynamic(object) => object.metadata.name.as_deref(),
            Self::Endpoints(object) => object.metadata.name.as_deref(),
        }
    }

    /// Serializes the object into a representation-independent document.
    pub fn to_value(&self) -> Result<Value> {
        let value = match self {
            Self::Dynamic(object) => serde_json::to_value(object)?,
            Self::Endpoints(object) => serde_json::to_value(object)?,
        };
        Ok(value)
    }
}

/// A list of objects returned by the server.
#[derive(Clone, Debug)]
pub enum ObjectList {
    /// A list of weakly-typed documents.
    Dynamic(kube::api::ObjectList<DynamicObject>),
    /// A list of typed `Endpoints` objects.
    Endpoints(kube::api::ObjectList<Endpoints>),
}

impl ObjectList {
    /// Returns the number of items in the list.
    pub fn len(&self) -> usize {
        match self {
            Self::Dynamic(list) => list.items.len(),
            Self::Endpoints(list) => list.items.len(),
        }
    }

    /// Returns `true` if the list holds no items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the resource version the list was served at.
    pub fn resource_version(&self) -> Option<&str> {
        match self {
            Self::Dynamic(list) => list.metadata.resource_version.as_deref(),
            Self::Endpoints(list) => list.metadata.resource_version.as_deref(),
        }
    }
}

/// Generates the name for a created object.
///
/// The name combines the sub-second part of the current time with the caller's index.
pub fn object_name(index: usize) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.subsec_nanos())
        .unwrap_or_default();
    format!("{nanos}-{index}")
}

/// Builds a client for the given resource, bound to a namespace, template and list options.
pub fn connect(
    client: kube::Client,
    descriptor: &ResourceDescriptor,
    namespace: &str,
    template: &Template,
    list_options: ListOptions,
) -> Result<SharedClient> {
    let client: SharedClient = match descriptor {
        ResourceDescriptor::Dynamic(gvr) => Arc::new(DynamicClient::new(
            client,
            gvr,
            namespace,
            template,
            list_options,
        )?),
        ResourceDescriptor::Endpoints => Arc::new(EndpointsClient::new(
            client,
            namespace,
            template,
            list_options,
        )?),
    };

    tracing::debug!(%descriptor, namespace, "connected benchmark client");
    Ok(client)
}
