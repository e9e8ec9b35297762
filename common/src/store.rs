use crate::{config::OperatorConfig, Error, Result};
use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::{
    api::{Api, Patch, PatchParams, PostParams},
    Client, Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use std::{fmt::Debug, future::Future, marker::PhantomData, time::Duration};

/// Read and write access to namespaced objects of one kind
///
/// Writes use optimistic concurrency: a stale resourceVersion yields `Error::Conflict`
#[async_trait]
pub trait ObjectStore<K>: Send + Sync
where
    K: Send + Sync + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>>;
    async fn create(&self, obj: &K) -> Result<K>;
    /// Replace the object, ignoring its status
    async fn replace(&self, obj: &K) -> Result<K>;
    /// Replace only the status of the object
    async fn replace_status(&self, obj: &K) -> Result<K>;
}

/// Display a kind/namespace/name triple for messages
pub fn describe<K: Resource>(namespace: &str, name: &str) -> String
where
    K::DynamicType: Default,
{
    format!("{}/{namespace}/{name}", K::kind(&K::DynamicType::default()))
}

pub(crate) fn object_location<K: Resource>(obj: &K) -> Result<(String, String)>
where
    K::DynamicType: Default,
{
    match (obj.meta().namespace.clone(), obj.meta().name.clone()) {
        (Some(ns), Some(name)) => Ok((ns, name)),
        _ => Err(Error::Other(format!(
            "{} object without namespace or name",
            K::kind(&K::DynamicType::default())
        ))),
    }
}

/// Store backed by the kubernetes API
pub struct KubeStore<K> {
    client: Client,
    timeout: Duration,
    field_manager: String,
    kind: PhantomData<fn() -> K>,
}

impl<K> KubeStore<K> {
    #[must_use]
    pub fn new(client: Client, config: &OperatorConfig) -> Self {
        Self {
            client,
            timeout: config.api_timeout,
            field_manager: config.field_manager.clone(),
            kind: PhantomData,
        }
    }
}

fn from_kube(what: String, err: kube::Error) -> Error {
    match &err {
        kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => Error::AlreadyExists(what),
        kube::Error::Api(resp) if resp.code == 409 => Error::Conflict(what),
        kube::Error::Api(resp) if resp.code == 404 => Error::NotFound(what),
        _ => Error::KubeError(err),
    }
}

/// Run an API call under a deadline, expiry yields `Error::Elapsed`
pub async fn with_deadline<T, F>(timeout: Duration, what: String, fut: F) -> Result<T>
where
    F: Future<Output = Result<T, kube::Error>>,
{
    tokio::time::timeout(timeout, fut)
        .await?
        .map_err(|e| from_kube(what, e))
}

impl<K> KubeStore<K>
where
    K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
    K::DynamicType: Default,
{
    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn call<T, F>(&self, what: String, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T, kube::Error>>,
    {
        with_deadline(self.timeout, what, fut).await
    }
}

#[async_trait]
impl<K> ObjectStore<K> for KubeStore<K>
where
    K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Serialize + Debug + Send + Sync + 'static,
    K::DynamicType: Default,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        let api = self.api(namespace);
        self.call(describe::<K>(namespace, name), api.get_opt(name)).await
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let (namespace, name) = object_location(obj)?;
        let api = self.api(&namespace);
        let params = PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..PostParams::default()
        };
        self.call(describe::<K>(&namespace, &name), api.create(&params, obj))
            .await
    }

    async fn replace(&self, obj: &K) -> Result<K> {
        let (namespace, name) = object_location(obj)?;
        let api = self.api(&namespace);
        let params = PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..PostParams::default()
        };
        self.call(describe::<K>(&namespace, &name), api.replace(&name, &params, obj))
            .await
    }

    async fn replace_status(&self, obj: &K) -> Result<K> {
        let (namespace, name) = object_location(obj)?;
        let api = self.api(&namespace);
        let value = serde_json::to_value(obj)?;
        let patch = json!({
            "metadata": { "resourceVersion": obj.resource_version() },
            "status": value.get("status").cloned().unwrap_or_default(),
        });
        let params = PatchParams::apply(&self.field_manager);
        self.call(
            describe::<K>(&namespace, &name),
            api.patch_status(&name, &params, &Patch::Merge(&patch)),
        )
        .await
    }
}
