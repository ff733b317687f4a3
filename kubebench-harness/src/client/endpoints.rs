use std::fmt;

use k8s_openapi::api::core::v1::Endpoints;
use kube::Api;
use kube::api::{DeleteParams, ListParams, PostParams};

use super::{BenchmarkClient, EventStream, ListOptions, Object, ObjectList, object_name, watch};
use crate::error::Result;
use crate::template::Template;

/// A [`BenchmarkClient`] for the built-in `Endpoints` kind, operating on its typed representation.
pub struct EndpointsClient {
    namespace: String,
    api: Api<Endpoints>,
    template: Endpoints,
    list_options: ListOptions,
}

impl EndpointsClient {
    /// Creates a client for `Endpoints` in the given namespace.
    pub fn new(
        client: kube::Client,
        namespace: &str,
        template: &Template,
        list_options: ListOptions,
    ) -> Result<Self> {
        let api = Api::namespaced(client, namespace);
        let template = serde_json::from_value(template.as_value().clone())?;

        Ok(Self {
            namespace: namespace.to_owned(),
            api,
            template,
            list_options,
        })
    }
}

impl fmt::Debug for EndpointsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointsClient")
            .field("namespace", &self.namespace)
            .field("list_options", &self.list_options)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl BenchmarkClient for EndpointsClient {
    async fn create(&self, index: usize) -> Result<Object> {
        let mut object = self.template.clone();
        object.metadata.name = Some(object_name(index));

        let created = self.api.create(&PostParams::default(), &object).await?;
        Ok(Object::Endpoints(created))
    }

    async fn list(&self) -> Result<ObjectList> {
        let list = self.api.list(&self.list_options.list_params()).await?;
        Ok(ObjectList::Endpoints(list))
    }

    async fn count(&self) -> Result<usize> {
        let list = self.api.list(&ListParams::default()).await?;
        Ok(list.items.len())
    }

    async fn watch(&self) -> Result<EventStream> {
        let version = watch::start_version(&self.api).await?;
        watch::open(self.api.clone(), version, Object::Endpoints).await
    }

    async fn delete_collection(&self) -> Result<()> {
        self.api
            .delete_collection(&DeleteParams::default(), &ListParams::default())
            .await?;
        Ok(())
    }
}
