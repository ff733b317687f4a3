use std::fmt;

use kube::Api;
use kube::api::{DeleteParams, DynamicObject, ListParams, PostParams};

use super::{BenchmarkClient, EventStream, ListOptions, Object, ObjectList, object_name, watch};
use crate::error::Result;
use crate::resource::GroupVersionResource;
use crate::template::Template;

/// A [`BenchmarkClient`] for any resource, operating on weakly-typed documents.
pub struct DynamicClient {
    gvr: GroupVersionResource,
    namespace: String,
    api: Api<DynamicObject>,
    template: DynamicObject,
    list_options: ListOptions,
}

impl DynamicClient {
    /// Creates a client for `gvr` in the given namespace.
    pub fn new(
        client: kube::Client,
        gvr: &GroupVersionResource,
        namespace: &str,
        template: &Template,
        list_options: ListOptions,
    ) -> Result<Self> {
        let api = Api::namespaced_with(client, namespace, &gvr.api_resource());
        let template = serde_json::from_value(template.as_value().clone())?;

        Ok(Self {
            gvr: gvr.clone(),
            namespace: namespace.to_owned(),
            api,
            template,
            list_options,
        })
    }
}

impl fmt::Debug for DynamicClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicClient")
            .field("gvr", &self.gvr)
            .field("namespace", &self.namespace)
            .field("list_options", &self.list_options)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl BenchmarkClient for DynamicClient {
    async fn create(&self, index: usize) -> Result<Object> {
        let mut object = self.template.clone();
        object.metadata.name = Some(object_name(index));

        let created = self.api.create(&PostParams::default(), &object).await?;
        Ok(Object::Dynamic(created))
    }

    async fn list(&self) -> Result<ObjectList> {
        let list = self.api.list(&self.list_options.list_params()).await?;
        Ok(ObjectList::Dynamic(list))
    }

    async fn count(&self) -> Result<usize> {
        let list = self.api.list(&ListParams::default()).await?;
        Ok(list.items.len())
    }

    async fn watch(&self) -> Result<EventStream> {
        let version = watch::start_version(&self.api).await?;
        watch::open(self.api.clone(), version, Object::Dynamic).await
    }

    async fn delete_collection(&self) -> Result<()> {
        self.api
            .delete_collection(&DeleteParams::default(), &ListParams::default())
            .await?;
        Ok(())
    }
}
