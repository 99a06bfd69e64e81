//! # Conditions
//!
//! Sets and merges reason-coded conditions on the in-memory `ImageRegistry`.
//!
//! At most one condition per type is kept. Re-setting a condition with the same
//! status keeps its `lastTransitionTime`, so repeating an identical observation
//! leaves the status unchanged and no status write follows.

use crate::crd::{Condition, ConditionStatus, ImageRegistry, ImageRegistryStatus};

/// Storage object exists and is reachable
pub const STORAGE_EXISTS: &str = "StorageExists";
/// Public access to the bucket is blocked
pub const STORAGE_PUBLIC_ACCESS_BLOCKED: &str = "StoragePublicAccessBlocked";
/// Ownership tags were applied
pub const STORAGE_TAGGED: &str = "StorageTagged";
/// Default server-side encryption is enabled
pub const STORAGE_ENCRYPTED: &str = "StorageEncrypted";
/// Abandoned multipart uploads are cleaned up
pub const STORAGE_INCOMPLETE_UPLOAD_CLEANUP_ENABLED: &str =
    "StorageIncompleteUploadCleanupEnabled";
/// Registry deployment has available replicas
pub const AVAILABLE: &str = "Available";
/// Registry deployment is rolling out
pub const PROGRESSING: &str = "Progressing";
/// Reconciliation is failing
pub const DEGRADED: &str = "Degraded";
/// Registry has been removed on request
pub const REMOVED: &str = "Removed";

/// Set a condition on the registry status, creating the status block if needed
///
/// Returns `true` when the condition list changed.
pub fn set_condition(
    registry: &mut ImageRegistry,
    condition_type: &str,
    status: ConditionStatus,
    reason: &str,
    message: &str,
) -> bool {
    let registry_status = registry.status.get_or_insert_with(ImageRegistryStatus::default);
    set_status_condition(registry_status, condition_type, status, reason, message)
}

/// Set a condition directly on a status block
///
/// Replaces the existing condition of the same type or appends a new one.
/// `lastTransitionTime` only moves when `status` changes.
pub fn set_status_condition(
    registry_status: &mut ImageRegistryStatus,
    condition_type: &str,
    status: ConditionStatus,
    reason: &str,
    message: &str,
) -> bool {
    let reason = Some(reason.to_string());
    let message = Some(message.to_string());

    if let Some(existing) = registry_status
        .conditions
        .iter_mut()
        .find(|c| c.r#type == condition_type)
    {
        if existing.status == status && existing.reason == reason && existing.message == message {
            return false;
        }
        if existing.status != status {
            existing.status = status;
            existing.last_transition_time = Some(now());
        }
        existing.reason = reason;
        existing.message = message;
        return true;
    }

    registry_status.conditions.push(Condition {
        r#type: condition_type.to_string(),
        status,
        last_transition_time: Some(now()),
        reason,
        message,
    });
    true
}

/// Remove a condition by type. Returns `true` if one was removed.
pub fn remove_condition(registry_status: &mut ImageRegistryStatus, condition_type: &str) -> bool {
    let before = registry_status.conditions.len();
    registry_status
        .conditions
        .retain(|c| c.r#type != condition_type);
    before != registry_status.conditions.len()
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ImageRegistrySpec;

    fn registry() -> ImageRegistry {
        ImageRegistry::new("cluster", ImageRegistrySpec::default())
    }

    #[test]
    fn test_set_condition_appends_once_per_type() {
        let mut cr = registry();
        assert!(set_condition(&mut cr, STORAGE_EXISTS, ConditionStatus::False, "A", "a"));
        assert!(set_condition(&mut cr, STORAGE_TAGGED, ConditionStatus::True, "B", "b"));
        assert!(set_condition(&mut cr, STORAGE_EXISTS, ConditionStatus::True, "C", "c"));

        let status = cr.status.unwrap();
        assert_eq!(status.conditions.len(), 2);
        let exists = status.condition(STORAGE_EXISTS).unwrap();
        assert_eq!(exists.status, ConditionStatus::True);
        assert_eq!(exists.reason.as_deref(), Some("C"));
    }

    #[test]
    fn test_identical_condition_is_a_no_op() {
        let mut cr = registry();
        set_condition(&mut cr, STORAGE_EXISTS, ConditionStatus::True, "Exists", "ok");
        let before = cr.status.clone();

        assert!(!set_condition(&mut cr, STORAGE_EXISTS, ConditionStatus::True, "Exists", "ok"));
        assert_eq!(cr.status, before);
    }

    #[test]
    fn test_transition_time_kept_when_status_unchanged() {
        let mut status = ImageRegistryStatus::default();
        set_status_condition(&mut status, STORAGE_EXISTS, ConditionStatus::False, "A", "a");
        status.conditions[0].last_transition_time = Some("2020-01-01T00:00:00+00:00".into());

        assert!(set_status_condition(
            &mut status,
            STORAGE_EXISTS,
            ConditionStatus::False,
            "B",
            "b"
        ));
        assert_eq!(
            status.conditions[0].last_transition_time.as_deref(),
            Some("2020-01-01T00:00:00+00:00")
        );

        set_status_condition(&mut status, STORAGE_EXISTS, ConditionStatus::True, "B", "b");
        assert_ne!(
            status.conditions[0].last_transition_time.as_deref(),
            Some("2020-01-01T00:00:00+00:00")
        );
    }

    #[test]
    fn test_remove_condition() {
        let mut status = ImageRegistryStatus::default();
        set_status_condition(&mut status, REMOVED, ConditionStatus::True, "Removed", "");
        assert!(remove_condition(&mut status, REMOVED));
        assert!(!remove_condition(&mut status, REMOVED));
        assert!(status.conditions.is_empty());
    }
}
