//! # Azure REST Client
//!
//! Native REST implementation of the storage account and Blob container calls
//! the Azure driver needs. Uses reqwest with rustls.
//!
//! - Storage accounts go through Azure Resource Manager, authenticated with an
//!   OAuth2 client-credentials token for the cluster's service principal.
//! - Containers go through the Blob service, authenticated with the account key
//!   (see [`super::shared_key`]).
//!
//! References:
//! - [Storage Accounts REST API](https://learn.microsoft.com/rest/api/storagerp/storage-accounts)
//! - [Blob service REST API](https://learn.microsoft.com/rest/api/storageservices/blob-service-rest-api)

use super::shared_key::CanonicalRequest;
use crate::storage::ProxySettings;
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};
use zeroize::Zeroizing;

const MANAGEMENT_ENDPOINT: &str = "https://management.azure.com";
const LOGIN_ENDPOINT: &str = "https://login.microsoftonline.com";
const MANAGEMENT_SCOPE: &str = "https://management.azure.com/.default";
const STORAGE_API_VERSION: &str = "2019-04-01";
const BLOB_API_VERSION: &str = "2019-12-12";
const USER_AGENT: &str = concat!("registry-storage-operator/", env!("CARGO_PKG_VERSION"));
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Errors from Azure calls
#[derive(Debug, thiserror::Error)]
pub enum AzureError {
    /// Storage account name is taken or invalid
    #[error("storage account name {account} is not available: {message}")]
    NameNotAvailable { account: String, message: String },
    /// The storage account does not exist
    #[error("storage account {0} does not exist")]
    AccountNotFound(String),
    /// The blob container does not exist
    #[error("storage container {0} does not exist")]
    ContainerNotFound(String),
    /// Missing or malformed credentials
    #[error("{0}")]
    Config(String),
    /// Token acquisition failed
    #[error("authentication failed: {0}")]
    Auth(String),
    /// The service answered with an error
    #[error("{code} (HTTP {status}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },
    /// Long-running operation did not finish in time
    #[error("timed out after {0:?} waiting for {1}")]
    Timeout(Duration, String),
    /// The request never produced a service answer
    #[error("Azure request failed: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for AzureError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Service principal credentials minted for the cluster
#[derive(Clone)]
pub struct ServicePrincipal {
    pub subscription_id: String,
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: Zeroizing<String>,
}

impl std::fmt::Debug for ServicePrincipal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServicePrincipal")
            .field("subscription_id", &self.subscription_id)
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

/// Everything needed to build an Azure client
#[derive(Debug, Clone)]
pub struct AzureClientConfig {
    /// Required for storage account calls; Blob calls only need the account key
    pub service_principal: Option<ServicePrincipal>,
    pub proxy: ProxySettings,
    /// Upper bound for storage account provisioning
    pub provision_timeout: Duration,
}

/// Storage account and container operations used by the Azure driver
#[async_trait]
pub trait AzureApi: Send + Sync {
    /// Create a storage account, failing with [`AzureError::NameNotAvailable`]
    /// when the name is taken. Returns once provisioning has finished.
    async fn create_storage_account(
        &self,
        resource_group: &str,
        account: &str,
        location: &str,
    ) -> Result<(), AzureError>;

    /// First access key of the account
    async fn primary_key(
        &self,
        resource_group: &str,
        account: &str,
    ) -> Result<Zeroizing<String>, AzureError>;

    async fn delete_storage_account(
        &self,
        resource_group: &str,
        account: &str,
    ) -> Result<(), AzureError>;

    async fn container_exists(
        &self,
        account: &str,
        key: &str,
        container: &str,
    ) -> Result<bool, AzureError>;

    /// Create a private container
    async fn create_container(
        &self,
        account: &str,
        key: &str,
        container: &str,
    ) -> Result<(), AzureError>;

    async fn delete_container(
        &self,
        account: &str,
        key: &str,
        container: &str,
    ) -> Result<(), AzureError>;
}

struct CachedToken {
    value: Zeroizing<String>,
    expires_at: Instant,
}

/// [`AzureApi`] over the ARM and Blob REST endpoints
pub struct RestAzureClient {
    http_client: Client,
    principal: Option<ServicePrincipal>,
    management_url: String,
    login_url: String,
    provision_timeout: Duration,
    token: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for RestAzureClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestAzureClient")
            .field("principal", &self.principal)
            .field("management_url", &self.management_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NameAvailability {
    name_available: bool,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccountKeys {
    #[serde(default)]
    keys: Vec<AccountKey>,
}

#[derive(Debug, Deserialize)]
struct AccountKey {
    value: String,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl RestAzureClient {
    /// Build a client with the cluster proxy applied
    ///
    /// # Errors
    /// Returns an error if the proxy settings are invalid or the HTTP client cannot be built
    pub fn new(config: AzureClientConfig) -> Result<Self, AzureError> {
        let builder = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(60));
        let http_client = config
            .proxy
            .apply(builder)
            .map_err(|e| AzureError::Config(format!("invalid proxy configuration: {e}")))?
            .build()
            .map_err(|e| AzureError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            principal: config.service_principal,
            management_url: MANAGEMENT_ENDPOINT.to_string(),
            login_url: LOGIN_ENDPOINT.to_string(),
            provision_timeout: config.provision_timeout,
            token: Mutex::new(None),
        })
    }

    fn principal(&self) -> Result<&ServicePrincipal, AzureError> {
        self.principal.as_ref().ok_or_else(|| {
            AzureError::Config("storage account calls need service principal credentials".to_string())
        })
    }

    /// Bearer token for ARM, refreshed a minute before it expires
    async fn access_token(&self) -> Result<Zeroizing<String>, AzureError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.value.clone());
            }
        }

        let principal = self.principal()?;
        let url = format!("{}/{}/oauth2/v2.0/token", self.login_url, principal.tenant_id);
        let response = self
            .http_client
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", principal.client_id.as_str()),
                ("client_secret", principal.client_secret.as_str()),
                ("scope", MANAGEMENT_SCOPE),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AzureError::Auth(format!("token endpoint returned {status}: {body}")));
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AzureError::Auth(format!("failed to parse token response: {e}")))?;

        debug!(tenant = %principal.tenant_id, "Acquired Azure management token");
        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(3600).saturating_sub(60));
        let value = Zeroizing::new(token.access_token);
        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(value)
    }

    fn account_url(&self, subscription: &str, resource_group: &str, account: &str) -> String {
        format!(
            "{}/subscriptions/{subscription}/resourceGroups/{resource_group}/providers/Microsoft.Storage/storageAccounts/{account}",
            self.management_url
        )
    }

    async fn management(&self, method: Method, url: &str) -> Result<RequestBuilder, AzureError> {
        let token = self.access_token().await?;
        Ok(self
            .http_client
            .request(method, url)
            .query(&[("api-version", STORAGE_API_VERSION)])
            .bearer_auth(token.as_str()))
    }

    fn blob(
        &self,
        method: Method,
        account: &str,
        key: &str,
        container: &str,
    ) -> Result<RequestBuilder, AzureError> {
        let date = chrono::Utc::now()
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string();
        let ms_headers = [
            ("x-ms-date", date),
            ("x-ms-version", BLOB_API_VERSION.to_string()),
        ];
        let query = [("restype", "container")];
        let authorization = CanonicalRequest {
            method: method.as_str(),
            content_length: 0,
            ms_headers: &ms_headers,
            account,
            path: container,
            query: &query,
        }
        .authorization(key)?;

        let url = format!("https://{account}.blob.core.windows.net/{container}");
        let mut request = self
            .http_client
            .request(method, url)
            .query(&query)
            .header("Authorization", authorization);
        for (name, value) in ms_headers {
            request = request.header(name, value);
        }
        Ok(request)
    }

    /// Poll an ARM async operation until it stops answering 202
    async fn wait_for_operation(
        &self,
        location: &str,
        mut retry_after: Duration,
        what: &str,
    ) -> Result<(), AzureError> {
        let deadline = Instant::now() + self.provision_timeout;
        loop {
            if Instant::now() + retry_after > deadline {
                return Err(AzureError::Timeout(self.provision_timeout, what.to_string()));
            }
            tokio::time::sleep(retry_after).await;

            let token = self.access_token().await?;
            let response = self
                .http_client
                .get(location)
                .bearer_auth(token.as_str())
                .send()
                .await?;
            match response.status() {
                StatusCode::ACCEPTED => {
                    retry_after = retry_after_header(&response).unwrap_or(DEFAULT_POLL_INTERVAL);
                    debug!(operation = what, "Azure operation still running");
                }
                status if status.is_success() => return Ok(()),
                _ => return Err(api_error(response).await),
            }
        }
    }
}

fn retry_after_header(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse()
        .ok()
        .map(Duration::from_secs)
}

/// Decode an ARM or Blob error answer
async fn api_error(response: Response) -> AzureError {
    let status = response.status().as_u16();
    // Blob HEAD answers carry the code only in a header
    let header_code = response
        .headers()
        .get("x-ms-error-code")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.text().await.unwrap_or_default();
    let envelope: ErrorEnvelope = serde_json::from_str(&body).unwrap_or_default();
    let (code, message) = match envelope.error {
        Some(error) => (error.code, error.message),
        None => (header_code.unwrap_or_default(), body),
    };
    AzureError::Api {
        status,
        code: if code.is_empty() {
            format!("HTTP{status}")
        } else {
            code
        },
        message,
    }
}

#[async_trait]
impl AzureApi for RestAzureClient {
    async fn create_storage_account(
        &self,
        resource_group: &str,
        account: &str,
        location: &str,
    ) -> Result<(), AzureError> {
        info!(account, resource_group, location, "Attempting to create Azure storage account");
        let principal = self.principal()?;

        let url = format!(
            "{}/subscriptions/{}/providers/Microsoft.Storage/checkNameAvailability",
            self.management_url, principal.subscription_id
        );
        let response = self
            .management(Method::POST, &url)
            .await?
            .json(&serde_json::json!({
                "name": account,
                "type": "Microsoft.Storage/storageAccounts",
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        let availability: NameAvailability = response.json().await?;
        if !availability.name_available {
            return Err(AzureError::NameNotAvailable {
                account: account.to_string(),
                message: availability.message.unwrap_or_default(),
            });
        }

        let url = self.account_url(&principal.subscription_id, resource_group, account);
        let response = self
            .management(Method::PUT, &url)
            .await?
            .json(&serde_json::json!({
                "kind": "StorageV2",
                "location": location,
                "sku": { "name": "Standard_LRS" },
                "properties": {
                    "supportsHttpsTrafficOnly": true,
                    "minimumTlsVersion": "TLS1_2",
                },
            }))
            .send()
            .await?;

        match response.status() {
            StatusCode::ACCEPTED => {
                let retry_after = retry_after_header(&response).unwrap_or(DEFAULT_POLL_INTERVAL);
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
                    .ok_or_else(|| {
                        AzureError::Transport(
                            "storage account creation was accepted without an operation location"
                                .to_string(),
                        )
                    })?;
                self.wait_for_operation(&location, retry_after, "storage account creation")
                    .await?;
            }
            status if status.is_success() => {}
            _ => return Err(api_error(response).await),
        }

        info!(account, "✅ Azure storage account has been created");
        Ok(())
    }

    async fn primary_key(
        &self,
        resource_group: &str,
        account: &str,
    ) -> Result<Zeroizing<String>, AzureError> {
        let principal = self.principal()?;
        let url = format!(
            "{}/listKeys",
            self.account_url(&principal.subscription_id, resource_group, account)
        );
        let response = self.management(Method::POST, &url).await?.send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(AzureError::AccountNotFound(account.to_string())),
            status if status.is_success() => {
                let keys: AccountKeys = response.json().await?;
                keys.keys
                    .into_iter()
                    .next()
                    .map(|k| Zeroizing::new(k.value))
                    .ok_or_else(|| {
                        AzureError::Config(format!("storage account {account} has no access keys"))
                    })
            }
            _ => Err(api_error(response).await),
        }
    }

    async fn delete_storage_account(
        &self,
        resource_group: &str,
        account: &str,
    ) -> Result<(), AzureError> {
        let principal = self.principal()?;
        let url = self.account_url(&principal.subscription_id, resource_group, account);
        let response = self.management(Method::DELETE, &url).await?.send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(AzureError::AccountNotFound(account.to_string())),
            status if status.is_success() => {
                info!(account, "🗑️ Azure storage account has been deleted");
                Ok(())
            }
            _ => Err(api_error(response).await),
        }
    }

    async fn container_exists(
        &self,
        account: &str,
        key: &str,
        container: &str,
    ) -> Result<bool, AzureError> {
        let response = self
            .blob(Method::HEAD, account, key, container)?
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            _ => Err(api_error(response).await),
        }
    }

    async fn create_container(
        &self,
        account: &str,
        key: &str,
        container: &str,
    ) -> Result<(), AzureError> {
        // No x-ms-blob-public-access header: the container is private
        let response = self
            .blob(Method::PUT, account, key, container)?
            .header(reqwest::header::CONTENT_LENGTH, 0)
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(api_error(response).await)
        }
    }

    async fn delete_container(
        &self,
        account: &str,
        key: &str,
        container: &str,
    ) -> Result<(), AzureError> {
        let response = self
            .blob(Method::DELETE, account, key, container)?
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(AzureError::ContainerNotFound(container.to_string())),
            status if status.is_success() => Ok(()),
            _ => Err(api_error(response).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(principal: bool) -> AzureClientConfig {
        AzureClientConfig {
            service_principal: principal.then(|| ServicePrincipal {
                subscription_id: "sub".into(),
                tenant_id: "tenant".into(),
                client_id: "client".into(),
                client_secret: Zeroizing::new("s3cr3t".into()),
            }),
            proxy: ProxySettings::default(),
            provision_timeout: Duration::from_secs(600),
        }
    }

    #[test]
    fn test_debug_hides_client_secret() {
        let client = RestAzureClient::new(config(true)).unwrap();
        let rendered = format!("{client:?}");
        assert!(rendered.contains("client"));
        assert!(!rendered.contains("s3cr3t"));
    }

    #[test]
    fn test_account_url_shape() {
        let client = RestAzureClient::new(config(true)).unwrap();
        assert_eq!(
            client.account_url("sub", "rg", "acct"),
            "https://management.azure.com/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Storage/storageAccounts/acct"
        );
    }

    #[tokio::test]
    async fn test_account_calls_require_service_principal() {
        let client = RestAzureClient::new(config(false)).unwrap();
        let err = client.primary_key("rg", "acct").await.unwrap_err();
        assert!(matches!(err, AzureError::Config(_)));
    }

    #[test]
    fn test_invalid_proxy_is_rejected() {
        let mut cfg = config(false);
        cfg.proxy.https_proxy = Some("::not a url::".into());
        assert!(matches!(
            RestAzureClient::new(cfg),
            Err(AzureError::Config(_))
        ));
    }
}
