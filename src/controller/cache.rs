//! # Listers
//!
//! Read-only lookups over the reflector stores fed by the watch tasks.
//!
//! Every lookup is by well-known name and returns `Option`: a missing object is a
//! normal outcome the caller handles (bootstrap, defaults, "not configured"),
//! never an error. Values are shared `Arc`s; callers clone before mutating.

use crate::constants::{CLUSTER_RESOURCE_NAME, REGISTRY_DEPLOYMENT_NAME};
use crate::crd::{ImageRegistry, Infrastructure, Proxy};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Secret};
use kube_runtime::reflector::{
    self,
    store::{WriterDropped, Writer},
    ObjectRef, Store,
};
use std::sync::Arc;

/// Point lookups into the operator's caches
#[derive(Clone)]
pub struct Listers {
    namespace: String,
    registries: Store<ImageRegistry>,
    deployments: Store<Deployment>,
    secrets: Store<Secret>,
    claims: Store<PersistentVolumeClaim>,
    proxies: Store<Proxy>,
    infrastructures: Store<Infrastructure>,
}

impl std::fmt::Debug for Listers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listers")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

/// Writers feeding the stores behind [`Listers`]
///
/// Handed to the reflectors at start-up; tests use them to seed objects.
#[allow(
    missing_debug_implementations,
    reason = "reflector writers do not implement Debug"
)]
pub struct CacheWriters {
    pub registries: Writer<ImageRegistry>,
    pub deployments: Writer<Deployment>,
    pub secrets: Writer<Secret>,
    pub claims: Writer<PersistentVolumeClaim>,
    pub proxies: Writer<Proxy>,
    pub infrastructures: Writer<Infrastructure>,
}

/// Create empty stores for the operator namespace
#[must_use]
pub fn cache(namespace: &str) -> (Listers, CacheWriters) {
    let (registries, registries_w) = reflector::store();
    let (deployments, deployments_w) = reflector::store();
    let (secrets, secrets_w) = reflector::store();
    let (claims, claims_w) = reflector::store();
    let (proxies, proxies_w) = reflector::store();
    let (infrastructures, infrastructures_w) = reflector::store();

    (
        Listers {
            namespace: namespace.to_string(),
            registries,
            deployments,
            secrets,
            claims,
            proxies,
            infrastructures,
        },
        CacheWriters {
            registries: registries_w,
            deployments: deployments_w,
            secrets: secrets_w,
            claims: claims_w,
            proxies: proxies_w,
            infrastructures: infrastructures_w,
        },
    )
}

impl Listers {
    /// Namespace holding the registry workload and its secrets
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The singleton `ImageRegistry`
    #[must_use]
    pub fn registry(&self) -> Option<Arc<ImageRegistry>> {
        self.registries.get(&ObjectRef::new(CLUSTER_RESOURCE_NAME))
    }

    /// The registry deployment
    #[must_use]
    pub fn deployment(&self) -> Option<Arc<Deployment>> {
        self.deployments
            .get(&ObjectRef::new(REGISTRY_DEPLOYMENT_NAME).within(&self.namespace))
    }

    /// A secret in the operator namespace
    #[must_use]
    pub fn secret(&self, name: &str) -> Option<Arc<Secret>> {
        self.secrets
            .get(&ObjectRef::new(name).within(&self.namespace))
    }

    /// A persistent volume claim in the operator namespace
    #[must_use]
    pub fn claim(&self, name: &str) -> Option<Arc<PersistentVolumeClaim>> {
        self.claims.get(&ObjectRef::new(name).within(&self.namespace))
    }

    /// The cluster egress proxy configuration
    #[must_use]
    pub fn proxy(&self) -> Option<Arc<Proxy>> {
        self.proxies.get(&ObjectRef::new(CLUSTER_RESOURCE_NAME))
    }

    /// The cluster infrastructure metadata
    #[must_use]
    pub fn infrastructure(&self) -> Option<Arc<Infrastructure>> {
        self.infrastructures
            .get(&ObjectRef::new(CLUSTER_RESOURCE_NAME))
    }

    /// Wait until every store has received its initial list
    ///
    /// # Errors
    /// Returns an error when a writer was dropped before its store became ready
    pub async fn wait_until_ready(&self) -> Result<(), WriterDropped> {
        self.registries.wait_until_ready().await?;
        self.deployments.wait_until_ready().await?;
        self.secrets.wait_until_ready().await?;
        self.claims.wait_until_ready().await?;
        self.proxies.wait_until_ready().await?;
        self.infrastructures.wait_until_ready().await
    }
}
