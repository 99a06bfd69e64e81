//! S3 driver behaviour against an in-memory bucket service

mod common;

use common::*;
use registry_storage_operator::controller::conditions::{
    STORAGE_ENCRYPTED, STORAGE_EXISTS, STORAGE_INCOMPLETE_UPLOAD_CLEANUP_ENABLED,
    STORAGE_PUBLIC_ACCESS_BLOCKED, STORAGE_TAGGED,
};
use registry_storage_operator::crd::{
    ConditionStatus, ImageRegistry, PlatformType, S3CloudFrontConfig, S3StorageConfig,
    SecretKeyRef, StorageSpec,
};
use registry_storage_operator::storage::s3::BucketEncryption;
use registry_storage_operator::storage::{S3Driver, StorageError};
use std::sync::Arc;

fn s3_spec(bucket: &str) -> S3StorageConfig {
    S3StorageConfig {
        bucket: bucket.to_string(),
        region: AWS_REGION.to_string(),
        ..S3StorageConfig::default()
    }
}

fn spec_bucket(registry: &ImageRegistry) -> String {
    match &registry.spec.storage {
        Some(StorageSpec::S3(s3)) => s3.bucket.clone(),
        other => panic!("expected S3 spec storage, got {other:?}"),
    }
}

fn status_bucket(registry: &ImageRegistry) -> String {
    match registry.status.as_ref().and_then(|s| s.storage.as_ref()) {
        Some(StorageSpec::S3(s3)) => s3.bucket.clone(),
        other => panic!("expected S3 status storage, got {other:?}"),
    }
}

fn aws_cache() -> (
    registry_storage_operator::controller::cache::Listers,
    registry_storage_operator::controller::cache::CacheWriters,
) {
    let (listers, mut writers) = empty_cache();
    seed_aws_credentials(&mut writers);
    seed_infrastructure(&mut writers, PlatformType::Aws);
    (listers, writers)
}

#[tokio::test]
async fn test_generated_name_retries_past_collisions() {
    let (listers, _writers) = aws_cache();
    let backends = FakeBackends::s3(FakeS3::with_taken(2));
    let mut driver = S3Driver::new(&s3_spec(""), storage_context(&listers, Arc::clone(&backends)));
    let mut registry = registry(Some(StorageSpec::S3(s3_spec(""))));

    driver
        .create_storage(&mut registry)
        .await
        .expect("create should succeed on the third name");

    let creates = backends.s3.creates();
    assert_eq!(creates.len(), 3, "two collisions then a success: {creates:?}");
    let chosen = creates[2].clone();
    assert!(
        chosen.contains(&INFRA_NAME.replace('-', "")),
        "bucket name {chosen} should carry the infrastructure name"
    );
    assert_ne!(creates[0], creates[1]);
    assert_eq!(spec_bucket(&registry), chosen);
    assert_eq!(status_bucket(&registry), chosen);
    assert!(registry.status.as_ref().unwrap().storage_managed);
    assert_eq!(
        condition(&registry, STORAGE_EXISTS),
        Some((ConditionStatus::True, "Creation Successful".to_string()))
    );
}

#[tokio::test]
async fn test_create_is_idempotent() {
    let (listers, _writers) = aws_cache();
    let backends = FakeBackends::s3(FakeS3::default());
    let mut driver = S3Driver::new(&s3_spec(""), storage_context(&listers, Arc::clone(&backends)));
    let mut registry = registry(Some(StorageSpec::S3(s3_spec(""))));

    driver.create_storage(&mut registry).await.unwrap();
    let bucket = spec_bucket(&registry);

    // A later sync builds a fresh driver from the recorded spec
    let spec = match &registry.spec.storage {
        Some(StorageSpec::S3(s3)) => s3.clone(),
        _ => unreachable!(),
    };
    let mut driver = S3Driver::new(&spec, storage_context(&listers, Arc::clone(&backends)));
    assert!(driver.storage_exists(&mut registry).await.unwrap());
    driver.create_storage(&mut registry).await.unwrap();

    assert_eq!(backends.s3.creates(), vec![bucket.clone()]);
    assert_eq!(spec_bucket(&registry), bucket);
    assert_eq!(
        condition(&registry, STORAGE_EXISTS).map(|(status, _)| status),
        Some(ConditionStatus::True)
    );
}

#[tokio::test]
async fn test_hardening_failures_are_independent() {
    let (listers, _writers) = aws_cache();
    let s3 = FakeS3::default();
    s3.state.lock().unwrap().fail_tagging = true;
    let backends = FakeBackends::s3(s3);
    let mut driver = S3Driver::new(&s3_spec(""), storage_context(&listers, Arc::clone(&backends)));
    let mut registry = registry(Some(StorageSpec::S3(s3_spec(""))));

    driver
        .create_storage(&mut registry)
        .await
        .expect("a failed hardening step does not fail creation");

    assert_eq!(
        condition(&registry, STORAGE_TAGGED),
        Some((ConditionStatus::False, "AccessDenied".to_string()))
    );
    assert_eq!(
        condition(&registry, STORAGE_PUBLIC_ACCESS_BLOCKED),
        Some((ConditionStatus::True, "Public Access Block Successful".to_string()))
    );
    assert_eq!(
        condition(&registry, STORAGE_ENCRYPTED),
        Some((ConditionStatus::True, "Encryption Successful".to_string()))
    );
    assert_eq!(
        condition(&registry, STORAGE_INCOMPLETE_UPLOAD_CLEANUP_ENABLED),
        Some((ConditionStatus::True, "Enable Cleanup Successful".to_string()))
    );

    let state = backends.s3.state.lock().unwrap();
    assert_eq!(state.encryption, Some(BucketEncryption::Aes256));
    match &registry.spec.storage {
        Some(StorageSpec::S3(s3)) => assert!(s3.encrypt),
        other => panic!("unexpected storage {other:?}"),
    }
}

#[tokio::test]
async fn test_kms_key_selects_kms_encryption() {
    let (listers, _writers) = aws_cache();
    let backends = FakeBackends::s3(FakeS3::default());
    let config = S3StorageConfig {
        key_id: "arn:aws:kms:us-east-1:123456789012:key/abc".to_string(),
        ..s3_spec("")
    };
    let mut driver = S3Driver::new(&config, storage_context(&listers, Arc::clone(&backends)));
    let mut registry = registry(Some(StorageSpec::S3(config.clone())));

    driver.create_storage(&mut registry).await.unwrap();

    assert_eq!(
        backends.s3.state.lock().unwrap().encryption,
        Some(BucketEncryption::Kms(config.key_id))
    );
}

#[tokio::test]
async fn test_user_bucket_is_not_hardened_or_managed() {
    let (listers, _writers) = aws_cache();
    let backends = FakeBackends::s3(FakeS3::with_bucket("customer-bucket"));
    let mut driver = S3Driver::new(
        &s3_spec("customer-bucket"),
        storage_context(&listers, Arc::clone(&backends)),
    );
    let mut registry = registry(Some(StorageSpec::S3(s3_spec("customer-bucket"))));

    driver.create_storage(&mut registry).await.unwrap();

    assert!(backends.s3.creates().is_empty());
    assert!(!registry.status.as_ref().unwrap().storage_managed);
    assert_eq!(status_bucket(&registry), "customer-bucket");
    assert_eq!(condition(&registry, STORAGE_TAGGED), None);
    assert_eq!(
        condition(&registry, STORAGE_EXISTS),
        Some((ConditionStatus::True, "S3 Bucket Exists".to_string()))
    );
}

#[tokio::test]
async fn test_taken_user_bucket_is_unusable() {
    let (listers, _writers) = aws_cache();
    let backends = FakeBackends::s3(FakeS3::with_taken(1));
    let mut driver = S3Driver::new(
        &s3_spec("someone-elses"),
        storage_context(&listers, Arc::clone(&backends)),
    );
    let mut registry = registry(Some(StorageSpec::S3(s3_spec("someone-elses"))));

    let err = driver.create_storage(&mut registry).await.unwrap_err();

    assert!(matches!(err, StorageError::Unusable(_)), "got {err:?}");
    assert_eq!(backends.s3.creates().len(), 1);
    assert_eq!(
        condition(&registry, STORAGE_EXISTS).map(|(status, _)| status),
        Some(ConditionStatus::False)
    );
}

#[tokio::test]
async fn test_missing_bucket_is_reported_not_failed() {
    let (listers, _writers) = aws_cache();
    let backends = FakeBackends::s3(FakeS3::default());
    let driver = S3Driver::new(&s3_spec("gone"), storage_context(&listers, Arc::clone(&backends)));
    let mut registry = registry(Some(StorageSpec::S3(s3_spec("gone"))));

    let exists = driver.storage_exists(&mut registry).await.unwrap();

    assert!(!exists);
    assert_eq!(
        condition(&registry, STORAGE_EXISTS),
        Some((ConditionStatus::False, "NotFound".to_string()))
    );
}

#[tokio::test]
async fn test_unmanaged_removal_touches_nothing() {
    let (listers, _writers) = aws_cache();
    let backends = FakeBackends::s3(FakeS3::with_bucket("customer-bucket"));
    let mut driver = S3Driver::new(
        &s3_spec("customer-bucket"),
        storage_context(&listers, Arc::clone(&backends)),
    );
    let mut registry = registry(Some(StorageSpec::S3(s3_spec("customer-bucket"))));

    let retry = driver.remove_storage(&mut registry).await.unwrap();

    assert!(!retry);
    assert!(backends.s3.calls().is_empty());
    assert_eq!(backends.builds(), 0);
    assert_eq!(spec_bucket(&registry), "customer-bucket");
}

#[tokio::test]
async fn test_removal_clears_recorded_bucket() {
    let (listers, _writers) = aws_cache();
    let backends = FakeBackends::s3(FakeS3::default());
    let mut driver = S3Driver::new(&s3_spec(""), storage_context(&listers, Arc::clone(&backends)));
    let mut registry = registry(Some(StorageSpec::S3(s3_spec(""))));
    driver.create_storage(&mut registry).await.unwrap();
    let bucket = spec_bucket(&registry);

    let retry = driver.remove_storage(&mut registry).await.unwrap();

    assert!(!retry);
    assert!(backends.s3.calls().contains(&format!("delete:{bucket}")));
    assert!(backends.s3.state.lock().unwrap().buckets.is_empty());
    assert_eq!(spec_bucket(&registry), "");
    assert_eq!(status_bucket(&registry), "");
    assert!(!registry.status.as_ref().unwrap().storage_managed);
    assert_eq!(
        condition(&registry, STORAGE_EXISTS),
        Some((ConditionStatus::False, "S3 Bucket Deleted".to_string()))
    );
}

#[tokio::test]
async fn test_user_keys_win_over_cloud_credentials() {
    let (listers, mut writers) = aws_cache();
    seed_secret(
        &mut writers,
        secret(
            registry_storage_operator::constants::USER_CONFIGURATION_SECRET,
            &[
                ("REGISTRY_STORAGE_S3_ACCESSKEY", "user-access"),
                ("REGISTRY_STORAGE_S3_SECRETKEY", "user-secret"),
            ],
        ),
    );
    let backends = FakeBackends::s3(FakeS3::default());
    let driver = S3Driver::new(&s3_spec(""), storage_context(&listers, Arc::clone(&backends)));

    let secrets = driver.fetch_secrets().unwrap();

    assert_eq!(secrets["REGISTRY_STORAGE_S3_ACCESSKEY"], "user-access");
    assert_eq!(secrets["REGISTRY_STORAGE_S3_SECRETKEY"], "user-secret");
}

#[test]
fn test_cloudfront_projects_env_and_key_mount() {
    let (listers, _writers) = aws_cache();
    let config = S3StorageConfig {
        cloud_front: Some(S3CloudFrontConfig {
            base_url: "https://d111111abcdef8.cloudfront.net".to_string(),
            private_key: SecretKeyRef {
                name: "cloudfront-key".to_string(),
                key: "private.pem".to_string(),
            },
            keypair_id: "K2JCJMDEHXQW5F".to_string(),
            duration: "300s".to_string(),
        }),
        ..s3_spec("bucket")
    };
    let driver = S3Driver::new(&config, storage_context(&listers, Arc::new(FakeBackends::default())));

    let env = driver.config_environment();
    let value = |name: &str| {
        env.iter()
            .find(|e| e.name == name)
            .and_then(|e| e.value.clone())
    };
    assert_eq!(value("REGISTRY_STORAGE").as_deref(), Some("s3"));
    assert_eq!(value("REGISTRY_STORAGE_S3_BUCKET").as_deref(), Some("bucket"));
    assert_eq!(
        value("REGISTRY_MIDDLEWARE_STORAGE_CLOUDFRONT_KEYPAIRID").as_deref(),
        Some("K2JCJMDEHXQW5F")
    );
    let access_key = env
        .iter()
        .find(|e| e.name == "REGISTRY_STORAGE_S3_ACCESSKEY")
        .expect("access key env");
    assert!(access_key.value.is_none());
    assert!(access_key.value_from.is_some());

    let (volumes, mounts) = driver.extra_mounts();
    assert_eq!(volumes.len(), 1);
    assert_eq!(
        volumes[0].secret.as_ref().and_then(|s| s.secret_name.as_deref()),
        Some("cloudfront-key")
    );
    assert_eq!(mounts[0].read_only, Some(true));
}
