//! # Shared Key Signing
//!
//! `Authorization: SharedKey <account>:<signature>` for Blob service requests,
//! where the signature is the base64 HMAC-SHA256 of the canonical request under
//! the decoded account key.

use super::AzureError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Parts of a Blob request that take part in the signature
#[derive(Debug, Clone)]
pub struct CanonicalRequest<'a> {
    pub method: &'a str,
    pub content_length: usize,
    /// `x-ms-*` headers sent with the request
    pub ms_headers: &'a [(&'a str, String)],
    pub account: &'a str,
    /// Path below the account, without leading slash
    pub path: &'a str,
    pub query: &'a [(&'a str, &'a str)],
}

impl CanonicalRequest<'_> {
    /// The string the signature is computed over
    #[must_use]
    pub fn string_to_sign(&self) -> String {
        // Content-Length is left empty for bodiless requests
        let content_length = if self.content_length == 0 {
            String::new()
        } else {
            self.content_length.to_string()
        };
        // VERB, Content-Encoding, Content-Language, Content-Length, Content-MD5,
        // Content-Type, Date, If-Modified-Since, If-Match, If-None-Match,
        // If-Unmodified-Since, Range
        let mut out = format!("{}\n\n\n{content_length}\n\n\n\n\n\n\n\n\n", self.method);

        let mut headers: Vec<(String, &str)> = self
            .ms_headers
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.trim()))
            .filter(|(name, _)| name.starts_with("x-ms-"))
            .collect();
        headers.sort();
        for (name, value) in headers {
            out.push_str(&name);
            out.push(':');
            out.push_str(value);
            out.push('\n');
        }

        out.push('/');
        out.push_str(self.account);
        out.push('/');
        out.push_str(self.path);

        let mut query: Vec<(String, &str)> = self
            .query
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), *value))
            .collect();
        query.sort();
        for (name, value) in query {
            out.push('\n');
            out.push_str(&name);
            out.push(':');
            out.push_str(value);
        }
        out
    }

    /// Value for the `Authorization` header
    ///
    /// # Errors
    /// Returns an error when the account key is not valid base64
    pub fn authorization(&self, account_key: &str) -> Result<String, AzureError> {
        let key = STANDARD
            .decode(account_key.trim())
            .map_err(|e| AzureError::Config(format!("storage account key is not valid base64: {e}")))?;
        let mut mac = HmacSha256::new_from_slice(&key)
            .map_err(|e| AzureError::Config(format!("invalid storage account key: {e}")))?;
        mac.update(self.string_to_sign().as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());
        Ok(format!("SharedKey {}:{signature}", self.account))
    }
}
