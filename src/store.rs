use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{api::Api, Client};
use thiserror::Error;

/// Error taxonomy for the Template Store capability: the builder
/// distinguishes *not-found* from any other transport failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("configmap {namespace}/{name} was not found")]
    NotFound { namespace: String, name: String },
    #[error("error fetching configmap {namespace}/{name}: {source}")]
    Other {
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },
}

/// Capability consumed by the Patch Builder: `GetConfigMap(namespace, name)`.
/// Abstracted behind a trait (grounded in acrlabs-simkube's `clockabilly`
/// trait-wrapped-capability pattern) so the builder can be tested against an
/// in-memory fixture instead of a live cluster.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn get_configmap(&self, namespace: &str, name: &str) -> Result<ConfigMap, StoreError>;
}

/// The production adapter, backed by a shared `kube::Client`.
pub struct KubeTemplateStore {
    client: Client,
}

impl KubeTemplateStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TemplateStore for KubeTemplateStore {
    async fn get_configmap(&self, namespace: &str, name: &str) -> Result<ConfigMap, StoreError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(cm) => Ok(cm),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Err(StoreError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
            Err(e) => Err(StoreError::Other {
                namespace: namespace.to_string(),
                name: name.to_string(),
                source: e,
            }),
        }
    }
}

/// In-memory fixture used by tests and by anything that wants
/// a `TemplateStore` without a live cluster.
#[derive(Default)]
pub struct FixtureTemplateStore {
    pub configmaps: BTreeMap<(String, String), BTreeMap<String, String>>,
}

impl FixtureTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_configmap(
        mut self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, String>,
    ) -> Self {
        self.configmaps
            .insert((namespace.to_string(), name.to_string()), data);
        self
    }
}

#[async_trait]
impl TemplateStore for FixtureTemplateStore {
    async fn get_configmap(&self, namespace: &str, name: &str) -> Result<ConfigMap, StoreError> {
        let key = (namespace.to_string(), name.to_string());
        match self.configmaps.get(&key) {
            Some(data) => Ok(ConfigMap {
                metadata: kube::core::ObjectMeta {
                    name: Some(name.to_string()),
                    namespace: Some(namespace.to_string()),
                    ..Default::default()
                },
                data: Some(data.clone()),
                ..Default::default()
            }),
            None => Err(StoreError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
        }
    }
}
