//! # Cluster Configuration Kinds
//!
//! Minimal typed views of the cluster-scoped `config.openshift.io/v1` objects the
//! operator reads through its cache. Only the fields the operator consumes are
//! modelled; everything else is ignored on deserialization.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Cluster infrastructure metadata (`infrastructures.config.openshift.io/cluster`)
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "Infrastructure",
    group = "config.openshift.io",
    version = "v1",
    status = "InfrastructureStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_config: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureStatus {
    /// Unique, human-friendly cluster identifier used as a naming seed
    #[serde(default)]
    pub infrastructure_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_status: Option<PlatformStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStatus {
    #[serde(default)]
    pub r#type: PlatformType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws: Option<AwsPlatformStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure: Option<AzurePlatformStatus>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum PlatformType {
    #[serde(rename = "AWS")]
    Aws,
    Azure,
    #[default]
    #[serde(other)]
    None,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AwsPlatformStatus {
    #[serde(default)]
    pub region: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AzurePlatformStatus {
    #[serde(default)]
    pub resource_group_name: String,
}

impl Infrastructure {
    /// Infrastructure name, empty when the status has not been populated
    #[must_use]
    pub fn infrastructure_name(&self) -> &str {
        self.status
            .as_ref()
            .map_or("", |s| s.infrastructure_name.as_str())
    }

    /// Platform the cluster runs on
    #[must_use]
    pub fn platform(&self) -> PlatformType {
        self.status
            .as_ref()
            .and_then(|s| s.platform_status.as_ref())
            .map_or(PlatformType::None, |p| p.r#type)
    }

    /// AWS region, empty when not running on AWS
    #[must_use]
    pub fn aws_region(&self) -> &str {
        self.status
            .as_ref()
            .and_then(|s| s.platform_status.as_ref())
            .and_then(|p| p.aws.as_ref())
            .map_or("", |a| a.region.as_str())
    }

    /// Azure resource group of the cluster, empty when not running on Azure
    #[must_use]
    pub fn azure_resource_group(&self) -> &str {
        self.status
            .as_ref()
            .and_then(|s| s.platform_status.as_ref())
            .and_then(|p| p.azure.as_ref())
            .map_or("", |a| a.resource_group_name.as_str())
    }
}

/// Cluster-wide egress proxy configuration (`proxies.config.openshift.io/cluster`)
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "Proxy",
    group = "config.openshift.io",
    version = "v1",
    status = "ProxyStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ProxySpec {
    #[serde(default)]
    pub http_proxy: String,
    #[serde(default)]
    pub https_proxy: String,
    #[serde(default)]
    pub no_proxy: String,
}

/// Effective proxy settings computed by the cluster
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProxyStatus {
    #[serde(default)]
    pub http_proxy: String,
    #[serde(default)]
    pub https_proxy: String,
    #[serde(default)]
    pub no_proxy: String,
}
