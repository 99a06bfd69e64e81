//! # S3 Client
//!
//! The bucket operations the S3 driver needs, behind a trait so the driver can be
//! exercised without AWS. [`AwsS3Client`] implements it with the official SDK,
//! using static credentials from the cluster secrets and an HTTP client that
//! honours the cluster egress proxy.

use crate::storage::ProxySettings;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::types::{
    AbortIncompleteMultipartUpload, BucketLifecycleConfiguration, BucketLocationConstraint,
    CreateBucketConfiguration, ExpirationStatus, LifecycleRule, LifecycleRuleFilter,
    PublicAccessBlockConfiguration, ServerSideEncryption, ServerSideEncryptionByDefault,
    ServerSideEncryptionConfiguration, ServerSideEncryptionRule, Tag, Tagging,
};
use aws_sdk_s3::Client as S3Client;
use aws_smithy_http_client::{proxy::ProxyConfig, tls, Builder as HttpClientBuilder};
use tracing::debug;
use zeroize::Zeroizing;

/// Error code S3 returns for a missing bucket
pub const NO_SUCH_BUCKET: &str = "NoSuchBucket";
/// Code for a bare 404 (HEAD requests carry no error body)
pub const NOT_FOUND: &str = "NotFound";
/// Code for a bare 403
pub const FORBIDDEN: &str = "Forbidden";
/// Bucket name is taken by another account
pub const BUCKET_ALREADY_EXISTS: &str = "BucketAlreadyExists";

/// Errors from S3 calls
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum S3Error {
    /// The service answered with an error code
    #[error("{code}: {message}")]
    Service { code: String, message: String },
    /// The request never produced a service answer
    #[error("S3 request failed: {0}")]
    Transport(String),
}

impl S3Error {
    /// Shorthand for a service error
    pub fn service(code: &str, message: impl Into<String>) -> Self {
        Self::Service {
            code: code.to_string(),
            message: message.into(),
        }
    }

    /// Service error code, if the service answered
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Service { code, .. } => Some(code),
            Self::Transport(_) => None,
        }
    }

    /// Bucket does not exist or is not visible to us
    #[must_use]
    pub fn is_missing_bucket(&self) -> bool {
        matches!(self.code(), Some(NO_SUCH_BUCKET | NOT_FOUND | FORBIDDEN))
    }

    /// Condition reason: the service code, or a generic reason for transport failures
    #[must_use]
    pub fn reason(&self) -> &str {
        self.code().unwrap_or("Unknown Error Occurred")
    }
}

/// Server-side encryption applied by default to new objects
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketEncryption {
    /// S3-managed keys
    Aes256,
    /// KMS with the given key id
    Kms(String),
}

impl BucketEncryption {
    #[must_use]
    pub fn algorithm(&self) -> &'static str {
        match self {
            Self::Aes256 => "AES256",
            Self::Kms(_) => "aws:kms",
        }
    }
}

/// Bucket operations used by the S3 driver
#[async_trait]
pub trait S3Api: Send + Sync {
    async fn head_bucket(&self, bucket: &str) -> Result<(), S3Error>;
    async fn create_bucket(&self, bucket: &str) -> Result<(), S3Error>;
    async fn delete_bucket(&self, bucket: &str) -> Result<(), S3Error>;
    async fn block_public_access(&self, bucket: &str) -> Result<(), S3Error>;
    async fn tag_bucket(&self, bucket: &str, tags: &[(String, String)]) -> Result<(), S3Error>;
    async fn enable_encryption(
        &self,
        bucket: &str,
        encryption: &BucketEncryption,
    ) -> Result<(), S3Error>;
    /// Abort multipart uploads left incomplete for `days`
    async fn enable_incomplete_upload_cleanup(
        &self,
        bucket: &str,
        rule_id: &str,
        days: i32,
    ) -> Result<(), S3Error>;
}

/// Static access keys read from the credential secrets
#[derive(Clone)]
pub struct S3Credentials {
    pub access_key: Zeroizing<String>,
    pub secret_key: Zeroizing<String>,
}

impl std::fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Credentials").finish_non_exhaustive()
    }
}

/// Everything needed to build an S3 client
#[derive(Debug, Clone)]
pub struct S3ClientConfig {
    pub region: String,
    pub region_endpoint: Option<String>,
    pub credentials: S3Credentials,
    pub proxy: ProxySettings,
}

/// [`S3Api`] backed by the AWS SDK
pub struct AwsS3Client {
    client: S3Client,
    region: String,
}

impl std::fmt::Debug for AwsS3Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsS3Client")
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl AwsS3Client {
    /// Build an SDK client for the given region, credentials and proxy
    ///
    /// # Errors
    /// Returns an error if the proxy configuration cannot be parsed
    pub async fn new(config: S3ClientConfig) -> Result<Self, S3Error> {
        let credentials = Credentials::new(
            config.credentials.access_key.as_str(),
            config.credentials.secret_key.as_str(),
            None,
            None,
            "registry-storage-operator",
        );

        let http_client = HttpClientBuilder::new()
            .proxy_config(proxy_config(&config.proxy)?)
            .tls_provider(tls::Provider::Rustls(
                tls::rustls_provider::CryptoMode::Ring,
            ))
            .build_https();

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .http_client(http_client)
            .load()
            .await;

        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        // Use custom endpoint for S3-compatible services
        if let Some(endpoint) = &config.region_endpoint {
            s3_config_builder = s3_config_builder
                .endpoint_url(endpoint)
                .force_path_style(true);
        }

        debug!(region = %config.region, "Created S3 client");
        Ok(Self {
            client: S3Client::from_conf(s3_config_builder.build()),
            region: config.region,
        })
    }
}

fn proxy_config(proxy: &ProxySettings) -> Result<ProxyConfig, S3Error> {
    // Bucket traffic is HTTPS; the plain HTTP proxy is only a fallback.
    let Some(url) = proxy.https_proxy.as_ref().or(proxy.http_proxy.as_ref()) else {
        return Ok(ProxyConfig::disabled());
    };
    let mut config = ProxyConfig::all(url)
        .map_err(|e| S3Error::Transport(format!("invalid proxy URL {url}: {e}")))?;
    if let Some(no_proxy) = &proxy.no_proxy {
        config = config.no_proxy(no_proxy);
    }
    Ok(config)
}

fn classify<E>(err: &SdkError<E>) -> S3Error
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    match err {
        SdkError::ServiceError(service) => {
            let status = service.raw().status().as_u16();
            let code = service.err().code().map_or_else(
                || match status {
                    403 => FORBIDDEN.to_string(),
                    404 => NOT_FOUND.to_string(),
                    other => format!("HTTP{other}"),
                },
                str::to_string,
            );
            let message = service
                .err()
                .message()
                .map_or_else(|| DisplayErrorContext(err).to_string(), str::to_string);
            S3Error::Service { code, message }
        }
        _ => S3Error::Transport(DisplayErrorContext(err).to_string()),
    }
}

fn build_error(err: &aws_sdk_s3::error::BuildError) -> S3Error {
    S3Error::Transport(format!("invalid request: {err}"))
}

#[async_trait]
impl S3Api for AwsS3Client {
    async fn head_bucket(&self, bucket: &str) -> Result<(), S3Error> {
        self.client
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| classify(&e))
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), S3Error> {
        let mut request = self.client.create_bucket().bucket(bucket);
        // us-east-1 rejects an explicit location constraint
        if self.region != "us-east-1" {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }
        request.send().await.map(|_| ()).map_err(|e| classify(&e))
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), S3Error> {
        self.client
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| classify(&e))
    }

    async fn block_public_access(&self, bucket: &str) -> Result<(), S3Error> {
        self.client
            .put_public_access_block()
            .bucket(bucket)
            .public_access_block_configuration(
                PublicAccessBlockConfiguration::builder()
                    .block_public_acls(true)
                    .block_public_policy(true)
                    .ignore_public_acls(true)
                    .restrict_public_buckets(true)
                    .build(),
            )
            .send()
            .await
            .map(|_| ())
            .map_err(|e| classify(&e))
    }

    async fn tag_bucket(&self, bucket: &str, tags: &[(String, String)]) -> Result<(), S3Error> {
        let tag_set = tags
            .iter()
            .map(|(key, value)| Tag::builder().key(key).value(value).build())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| build_error(&e))?;
        let tagging = Tagging::builder()
            .set_tag_set(Some(tag_set))
            .build()
            .map_err(|e| build_error(&e))?;

        self.client
            .put_bucket_tagging()
            .bucket(bucket)
            .tagging(tagging)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| classify(&e))
    }

    async fn enable_encryption(
        &self,
        bucket: &str,
        encryption: &BucketEncryption,
    ) -> Result<(), S3Error> {
        let default = match encryption {
            BucketEncryption::Aes256 => ServerSideEncryptionByDefault::builder()
                .sse_algorithm(ServerSideEncryption::Aes256),
            BucketEncryption::Kms(key_id) => ServerSideEncryptionByDefault::builder()
                .sse_algorithm(ServerSideEncryption::AwsKms)
                .kms_master_key_id(key_id),
        }
        .build()
        .map_err(|e| build_error(&e))?;

        let configuration = ServerSideEncryptionConfiguration::builder()
            .rules(
                ServerSideEncryptionRule::builder()
                    .apply_server_side_encryption_by_default(default)
                    .build(),
            )
            .build()
            .map_err(|e| build_error(&e))?;

        self.client
            .put_bucket_encryption()
            .bucket(bucket)
            .server_side_encryption_configuration(configuration)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| classify(&e))
    }

    async fn enable_incomplete_upload_cleanup(
        &self,
        bucket: &str,
        rule_id: &str,
        days: i32,
    ) -> Result<(), S3Error> {
        let rule = LifecycleRule::builder()
            .id(rule_id)
            .status(ExpirationStatus::Enabled)
            .filter(LifecycleRuleFilter::builder().prefix("").build())
            .abort_incomplete_multipart_upload(
                AbortIncompleteMultipartUpload::builder()
                    .days_after_initiation(days)
                    .build(),
            )
            .build()
            .map_err(|e| build_error(&e))?;
        let lifecycle = BucketLifecycleConfiguration::builder()
            .rules(rule)
            .build()
            .map_err(|e| build_error(&e))?;

        self.client
            .put_bucket_lifecycle_configuration()
            .bucket(bucket)
            .lifecycle_configuration(lifecycle)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| classify(&e))
    }
}
