//! Tether kubehub: Kubernetes list+watch feeds and CRD registration.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceDefinition, CustomResourceDefinitionNames, CustomResourceDefinitionSpec,
    CustomResourceDefinitionVersion, CustomResourceValidation, JSONSchemaProps,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{
    api::{Api, PostParams},
    core::DynamicObject,
    runtime::{watcher, WatchStreamExt},
    Client,
};
use tether_core::{KindRegistrar, WatchEvent, WatchSource, WatchedKind};
use tracing::{debug, info};

/// Build a client from the ambient kubeconfig / in-cluster environment.
pub async fn client() -> Result<Client> {
    Client::try_default().await.context("building kubernetes client")
}

/// List+watch feed of one kind's objects, across all namespaces or within one.
pub struct KubeSource {
    api: Api<DynamicObject>,
    gvk_key: String,
}

impl KubeSource {
    pub fn new(client: Client, kind: &WatchedKind, namespace: Option<&str>) -> Self {
        let ar = kind.api_resource();
        let api = match namespace {
            Some(ns) if kind.namespaced => Api::namespaced_with(client, ns, &ar),
            _ => Api::all_with(client, &ar),
        };
        Self { api, gvk_key: kind.gvk_key() }
    }
}

impl WatchSource for KubeSource {
    fn watch(&self) -> BoxStream<'static, Result<WatchEvent>> {
        info!(gvk = %self.gvk_key, "watcher started");
        watcher::watcher(self.api.clone(), watcher::Config::default())
            .default_backoff()
            .map(|ev| -> Result<WatchEvent> {
                let ev = ev.context("watching objects")?;
                Ok(match ev {
                    watcher::Event::Applied(o) => WatchEvent::Applied(o),
                    watcher::Event::Deleted(o) => WatchEvent::Deleted(o),
                    watcher::Event::Restarted(list) => {
                        debug!(count = list.len(), "watch restart");
                        WatchEvent::Restarted(list)
                    }
                })
            })
            .boxed()
    }
}

/// Registers each kind as a `CustomResourceDefinition`.
pub struct CrdRegistrar {
    client: Client,
}

impl CrdRegistrar {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl KindRegistrar for CrdRegistrar {
    async fn ensure_exists(&self, kind: &WatchedKind) -> Result<()> {
        let api: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        let crd = crd_for(kind);
        match api.create(&PostParams::default(), &crd).await {
            Ok(_) => {
                info!(crd = %kind.crd_name(), "CustomResourceDefinition created");
                Ok(())
            }
            Err(e) if is_already_exists(&e) => {
                debug!(crd = %kind.crd_name(), "CustomResourceDefinition already exists");
                Ok(())
            }
            Err(e) => Err(e).with_context(|| format!("creating CustomResourceDefinition {}", kind.crd_name())),
        }
    }
}

/// A schemaless CRD for `kind`: one served+storage version that keeps unknown fields.
pub fn crd_for(kind: &WatchedKind) -> CustomResourceDefinition {
    let scope = if kind.namespaced { "Namespaced" } else { "Cluster" };
    CustomResourceDefinition {
        metadata: ObjectMeta { name: Some(kind.crd_name()), ..Default::default() },
        spec: CustomResourceDefinitionSpec {
            group: kind.group.clone(),
            names: CustomResourceDefinitionNames {
                kind: kind.kind.clone(),
                plural: kind.plural.clone(),
                ..Default::default()
            },
            scope: scope.to_string(),
            versions: vec![CustomResourceDefinitionVersion {
                name: kind.version.clone(),
                served: true,
                storage: true,
                schema: Some(CustomResourceValidation {
                    open_api_v3_schema: Some(JSONSchemaProps {
                        type_: Some("object".to_string()),
                        x_kubernetes_preserve_unknown_fields: Some(true),
                        ..Default::default()
                    }),
                }),
                ..Default::default()
            }],
            ..Default::default()
        },
        status: None,
    }
}

pub fn is_already_exists(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(ae) if ae.code == 409 || ae.reason == "AlreadyExists")
}
