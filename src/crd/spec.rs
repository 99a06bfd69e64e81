//! # ImageRegistry Spec
//!
//! The singleton custom resource describing where the registry keeps its blobs.

use crate::crd::{ImageRegistryStatus, StorageSpec};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// ImageRegistry Custom Resource Definition
///
/// Cluster-scoped; the operator only ever acts on the instance named `cluster`.
///
/// # Example
///
/// ```yaml
/// apiVersion: imageregistry.operator.openshift.io/v1
/// kind: ImageRegistry
/// metadata:
///   name: cluster
/// spec:
///   managementState: Managed
///   storage:
///     s3:
///       region: us-east-1
/// ```
#[derive(CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "ImageRegistry",
    group = "imageregistry.operator.openshift.io",
    version = "v1",
    status = "ImageRegistryStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".spec.managementState"}"#,
    printcolumn = r#"{"name":"StorageManaged", "type":"boolean", "jsonPath":".status.storageManaged"}"#,
    printcolumn = r#"{"name":"Storage", "type":"string", "jsonPath":".status.conditions[?(@.type==\"StorageExists\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ImageRegistrySpec {
    /// Whether the operator reconciles, ignores, or tears down the registry storage
    #[serde(default)]
    pub management_state: ManagementState,
    /// Storage backend. Absent means storage has not been configured yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageSpec>,
    /// Number of registry replicas, consumed by the workload renderer
    #[serde(default = "default_replicas")]
    pub replicas: i32,
    /// Registry log level, consumed by the workload renderer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

#[must_use]
pub fn default_replicas() -> i32 {
    1
}

impl Default for ImageRegistrySpec {
    fn default() -> Self {
        Self {
            management_state: ManagementState::default(),
            storage: None,
            replicas: default_replicas(),
            log_level: None,
        }
    }
}

/// Management state of the registry
///
/// Values the operator does not recognise deserialize to `Unknown` so a typo in
/// the resource never breaks the watch; the reconciler warns and leaves it alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum ManagementState {
    #[default]
    Managed,
    Unmanaged,
    Removed,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for ManagementState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Managed => "Managed",
            Self::Unmanaged => "Unmanaged",
            Self::Removed => "Removed",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unrecognised_management_state_is_unknown() {
        let spec: ImageRegistrySpec =
            serde_json::from_value(serde_json::json!({ "managementState": "Bogus" })).unwrap();
        assert_eq!(spec.management_state, ManagementState::Unknown);
        assert_eq!(spec.replicas, 1);
        assert!(spec.storage.is_none());
    }

    #[test]
    fn test_missing_management_state_defaults_to_managed() {
        let spec: ImageRegistrySpec = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(spec.management_state, ManagementState::Managed);
    }
}
