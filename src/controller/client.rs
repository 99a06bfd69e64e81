//! # Registry Client
//!
//! Writes the operator performs against the API server, behind a trait so the
//! reconciler can be driven against an in-memory fake.
//!
//! Spec/metadata and status are separate writes: `update` replaces the object,
//! `update_status` replaces the status subresource. Both use the object's
//! `resourceVersion` for optimistic concurrency; a conflict surfaces as
//! [`ClientError::Conflict`] and is retried on the next event.

use crate::constants::PRIVATE_CONFIGURATION_SECRET;
use crate::crd::ImageRegistry;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{Api, ObjectMeta, Patch, PatchParams, PostParams};
use kube::Client;
use std::collections::BTreeMap;
use tracing::debug;

/// Field manager for server-side apply
const FIELD_MANAGER: &str = "registry-storage-operator";

/// Errors from API server writes
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The object changed since it was read (HTTP 409)
    #[error("conflict writing {0}: the object has been modified")]
    Conflict(String),
    /// The object already exists (HTTP 409 on create)
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("Kubernetes API error: {0}")]
    Kube(#[source] kube::Error),
}

impl ClientError {
    fn from_kube(object: &str, err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(api_err) if api_err.code == 409 && api_err.reason == "AlreadyExists" => {
                Self::AlreadyExists(object.to_string())
            }
            kube::Error::Api(api_err) if api_err.code == 409 => {
                debug!(object, "Write conflict: {}", api_err.message);
                Self::Conflict(object.to_string())
            }
            _ => Self::Kube(err),
        }
    }
}

/// Writes the reconciler performs
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Create the `ImageRegistry`
    async fn create(&self, registry: &ImageRegistry) -> Result<ImageRegistry, ClientError>;

    /// Replace spec and metadata; returns the stored object with its new `resourceVersion`
    async fn update(&self, registry: &ImageRegistry) -> Result<ImageRegistry, ClientError>;

    /// Replace the status subresource
    async fn update_status(&self, registry: &ImageRegistry) -> Result<ImageRegistry, ClientError>;

    /// Create or update the private configuration secret with `data`
    async fn apply_secret(&self, data: BTreeMap<String, String>) -> Result<(), ClientError>;
}

/// [`RegistryClient`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeRegistryClient {
    registries: Api<ImageRegistry>,
    secrets: Api<Secret>,
}

impl std::fmt::Debug for KubeRegistryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeRegistryClient").finish_non_exhaustive()
    }
}

impl KubeRegistryClient {
    /// `ImageRegistry` is cluster-scoped; secrets live in `namespace`
    #[must_use]
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            registries: Api::all(client.clone()),
            secrets: Api::namespaced(client, namespace),
        }
    }
}

fn object_name(registry: &ImageRegistry) -> &str {
    registry.metadata.name.as_deref().unwrap_or_default()
}

#[async_trait]
impl RegistryClient for KubeRegistryClient {
    async fn create(&self, registry: &ImageRegistry) -> Result<ImageRegistry, ClientError> {
        self.registries
            .create(&PostParams::default(), registry)
            .await
            .map_err(|e| ClientError::from_kube(object_name(registry), e))
    }

    async fn update(&self, registry: &ImageRegistry) -> Result<ImageRegistry, ClientError> {
        let name = object_name(registry);
        self.registries
            .replace(name, &PostParams::default(), registry)
            .await
            .map_err(|e| ClientError::from_kube(name, e))
    }

    async fn update_status(&self, registry: &ImageRegistry) -> Result<ImageRegistry, ClientError> {
        let name = object_name(registry);
        let body = serde_json::to_vec(registry).map_err(|e| ClientError::Kube(kube::Error::SerdeError(e)))?;
        self.registries
            .replace_status(name, &PostParams::default(), body)
            .await
            .map_err(|e| ClientError::from_kube(name, e))
    }

    async fn apply_secret(&self, data: BTreeMap<String, String>) -> Result<(), ClientError> {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(PRIVATE_CONFIGURATION_SECRET.to_string()),
                ..ObjectMeta::default()
            },
            data: Some(
                data.into_iter()
                    .map(|(key, value)| (key, ByteString(value.into_bytes())))
                    .collect(),
            ),
            type_: Some("Opaque".to_string()),
            ..Secret::default()
        };
        self.secrets
            .patch(
                PRIVATE_CONFIGURATION_SECRET,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&secret),
            )
            .await
            .map(|_| ())
            .map_err(|e| ClientError::from_kube(PRIVATE_CONFIGURATION_SECRET, e))
    }
}
