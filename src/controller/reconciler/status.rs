//! # Status
//!
//! Derived conditions computed at the end of every sync from the registry
//! deployment, the outcome of the management-state dispatch and whether the
//! registry was removed.

use crate::controller::conditions::{set_condition, AVAILABLE, DEGRADED, PROGRESSING, REMOVED};
use crate::controller::reconciler::types::ReconcilerError;
use crate::crd::{ConditionStatus, ImageRegistry, ManagementState};
use k8s_openapi::api::apps::v1::Deployment;

/// Update `Available`, `Progressing`, `Degraded` and `Removed`
pub fn sync_status(
    registry: &mut ImageRegistry,
    deployment: Option<&Deployment>,
    apply_error: Option<&ReconcilerError>,
    removed: bool,
) {
    let permanent = match apply_error {
        Some(ReconcilerError::Permanent(e)) => Some(e),
        _ => None,
    };

    let (status, reason, message) = match deployment {
        None => {
            if let Some(e) = permanent {
                (ConditionStatus::False, e.reason.to_string(), e.to_string())
            } else if registry.spec.management_state == ManagementState::Removed {
                (
                    ConditionStatus::True,
                    "Removed".to_string(),
                    "The registry is removed".to_string(),
                )
            } else {
                (
                    ConditionStatus::False,
                    "DeploymentNotFound".to_string(),
                    "The deployment does not exist".to_string(),
                )
            }
        }
        Some(d) if d.metadata.deletion_timestamp.is_some() => (
            ConditionStatus::False,
            "DeploymentDeleted".to_string(),
            "The deployment is being deleted".to_string(),
        ),
        Some(d) if !is_available(d) => (
            ConditionStatus::False,
            "NoReplicasAvailable".to_string(),
            "The deployment does not have available replicas".to_string(),
        ),
        Some(d) if !is_complete(d) => (
            ConditionStatus::True,
            "MinimumAvailability".to_string(),
            "The registry has minimum availability".to_string(),
        ),
        Some(_) => (
            ConditionStatus::True,
            "Ready".to_string(),
            "The registry is ready".to_string(),
        ),
    };
    set_condition(registry, AVAILABLE, status, &reason, &message);

    let (status, reason, message) = if let Some(e) = apply_error {
        (
            ConditionStatus::True,
            "Error",
            format!("Unable to apply resources: {e}"),
        )
    } else if removed {
        if deployment.is_some() {
            (
                ConditionStatus::True,
                "Removing",
                "The deployment is being removed".to_string(),
            )
        } else {
            (
                ConditionStatus::False,
                "Removed",
                "All registry resources are removed".to_string(),
            )
        }
    } else if deployment.is_some_and(|d| !is_complete(d)) {
        (
            ConditionStatus::True,
            "DeploymentNotCompleted",
            "The deployment has not completed".to_string(),
        )
    } else {
        (
            ConditionStatus::False,
            "Ready",
            "The registry is ready".to_string(),
        )
    };
    set_condition(registry, PROGRESSING, status, reason, &message);

    match apply_error {
        Some(ReconcilerError::Permanent(e)) => {
            set_condition(registry, DEGRADED, ConditionStatus::True, e.reason, &e.to_string());
        }
        Some(e) => {
            set_condition(registry, DEGRADED, ConditionStatus::True, "Error", &e.to_string());
        }
        None => {
            set_condition(registry, DEGRADED, ConditionStatus::False, "AsExpected", "");
        }
    }

    if removed {
        set_condition(
            registry,
            REMOVED,
            ConditionStatus::True,
            "Removed",
            "The image registry is removed",
        );
    } else {
        set_condition(registry, REMOVED, ConditionStatus::False, "", "");
    }
}

fn desired_replicas(deployment: &Deployment) -> i32 {
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1)
}

fn is_available(deployment: &Deployment) -> bool {
    deployment
        .status
        .as_ref()
        .and_then(|s| s.available_replicas)
        .unwrap_or(0)
        > 0
}

fn is_complete(deployment: &Deployment) -> bool {
    let Some(status) = deployment.status.as_ref() else {
        return false;
    };
    let desired = desired_replicas(deployment);
    let generation = deployment.metadata.generation.unwrap_or(0);
    status.updated_replicas.unwrap_or(0) == desired
        && status.replicas.unwrap_or(0) == desired
        && status.available_replicas.unwrap_or(0) == desired
        && status.observed_generation.unwrap_or(0) >= generation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::reconciler::types::{PermanentError, REASON_STORAGE_NOT_CONFIGURED};
    use crate::crd::ImageRegistrySpec;
    use k8s_openapi::api::apps::v1::{DeploymentSpec, DeploymentStatus};
    use kube::api::ObjectMeta;

    fn registry() -> ImageRegistry {
        ImageRegistry::new("cluster", ImageRegistrySpec::default())
    }

    fn deployment(available: i32, updated: i32) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                generation: Some(1),
                ..ObjectMeta::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(2),
                ..DeploymentSpec::default()
            }),
            status: Some(DeploymentStatus {
                replicas: Some(2),
                available_replicas: Some(available),
                updated_replicas: Some(updated),
                observed_generation: Some(1),
                ..DeploymentStatus::default()
            }),
        }
    }

    fn reason(registry: &ImageRegistry, condition_type: &str) -> (ConditionStatus, String) {
        let c = registry
            .status
            .as_ref()
            .and_then(|s| s.condition(condition_type))
            .unwrap();
        (c.status, c.reason.clone().unwrap_or_default())
    }

    #[test]
    fn test_missing_deployment_with_permanent_error() {
        let mut cr = registry();
        let err = ReconcilerError::from(PermanentError::new(
            REASON_STORAGE_NOT_CONFIGURED,
            "storage backend not configured",
        ));
        sync_status(&mut cr, None, Some(&err), false);

        assert_eq!(
            reason(&cr, AVAILABLE),
            (ConditionStatus::False, "StorageNotConfigured".into())
        );
        assert_eq!(
            reason(&cr, DEGRADED),
            (ConditionStatus::True, "StorageNotConfigured".into())
        );
        assert_eq!(reason(&cr, PROGRESSING), (ConditionStatus::True, "Error".into()));
    }

    #[test]
    fn test_ready_deployment() {
        let mut cr = registry();
        sync_status(&mut cr, Some(&deployment(2, 2)), None, false);

        assert_eq!(reason(&cr, AVAILABLE), (ConditionStatus::True, "Ready".into()));
        assert_eq!(reason(&cr, PROGRESSING), (ConditionStatus::False, "Ready".into()));
        assert_eq!(reason(&cr, DEGRADED).0, ConditionStatus::False);
        assert_eq!(reason(&cr, REMOVED).0, ConditionStatus::False);
    }

    #[test]
    fn test_rolling_deployment_has_minimum_availability() {
        let mut cr = registry();
        sync_status(&mut cr, Some(&deployment(1, 1)), None, false);

        assert_eq!(
            reason(&cr, AVAILABLE),
            (ConditionStatus::True, "MinimumAvailability".into())
        );
        assert_eq!(
            reason(&cr, PROGRESSING),
            (ConditionStatus::True, "DeploymentNotCompleted".into())
        );
    }

    #[test]
    fn test_removed_without_deployment() {
        let mut cr = registry();
        cr.spec.management_state = ManagementState::Removed;
        sync_status(&mut cr, None, None, true);

        assert_eq!(reason(&cr, AVAILABLE), (ConditionStatus::True, "Removed".into()));
        assert_eq!(reason(&cr, PROGRESSING), (ConditionStatus::False, "Removed".into()));
        assert_eq!(reason(&cr, REMOVED), (ConditionStatus::True, "Removed".into()));
    }

    #[test]
    fn test_repeated_sync_status_is_stable() {
        let mut cr = registry();
        sync_status(&mut cr, Some(&deployment(2, 2)), None, false);
        let before = cr.status.clone();
        sync_status(&mut cr, Some(&deployment(2, 2)), None, false);
        assert_eq!(cr.status, before);
    }
}
