//! # Egress Proxy Settings
//!
//! The cluster `Proxy` object, resolved once per sync and handed explicitly to
//! every HTTP client a storage driver builds. The process environment is never
//! touched.

use crate::crd::Proxy;
use k8s_openapi::api::core::v1::EnvVar;

/// Proxy settings threaded into provider HTTP clients
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxySettings {
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
    pub no_proxy: Option<String>,
}

impl ProxySettings {
    /// Resolve from the cluster proxy object. A missing object means no proxy.
    ///
    /// The effective values in `status` win; `spec` is used until the cluster
    /// has populated status.
    #[must_use]
    pub fn from_cluster(proxy: Option<&Proxy>) -> Self {
        let Some(proxy) = proxy else {
            return Self::default();
        };
        let status = proxy.status.clone().unwrap_or_default();
        let pick = |observed: String, desired: &str| {
            non_empty(observed).or_else(|| non_empty(desired.to_string()))
        };
        Self {
            http_proxy: pick(status.http_proxy, &proxy.spec.http_proxy),
            https_proxy: pick(status.https_proxy, &proxy.spec.https_proxy),
            no_proxy: pick(status.no_proxy, &proxy.spec.no_proxy),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.http_proxy.is_none() && self.https_proxy.is_none()
    }

    /// Configure a reqwest client builder with these settings
    ///
    /// # Errors
    /// Returns an error if a proxy URL cannot be parsed
    pub fn apply(
        &self,
        builder: reqwest::ClientBuilder,
    ) -> Result<reqwest::ClientBuilder, reqwest::Error> {
        if self.is_empty() {
            // Do not fall back to proxy variables from the operator's own environment
            return Ok(builder.no_proxy());
        }
        let no_proxy = self
            .no_proxy
            .as_deref()
            .and_then(reqwest::NoProxy::from_string);

        let mut builder = builder;
        if let Some(url) = &self.http_proxy {
            builder = builder.proxy(reqwest::Proxy::http(url)?.no_proxy(no_proxy.clone()));
        }
        if let Some(url) = &self.https_proxy {
            builder = builder.proxy(reqwest::Proxy::https(url)?.no_proxy(no_proxy));
        }
        Ok(builder)
    }

    /// Proxy variables for the registry workload
    #[must_use]
    pub fn env_vars(&self) -> Vec<EnvVar> {
        [
            ("HTTP_PROXY", &self.http_proxy),
            ("HTTPS_PROXY", &self.https_proxy),
            ("NO_PROXY", &self.no_proxy),
        ]
        .into_iter()
        .filter_map(|(name, value)| {
            value.as_ref().map(|v| EnvVar {
                name: name.to_string(),
                value: Some(v.clone()),
                value_from: None,
            })
        })
        .collect()
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
