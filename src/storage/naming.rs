//! # Storage Naming
//!
//! Name generation for storage objects the operator creates on the user's behalf.
//! Names are derived from the cluster's infrastructure name so they can be traced
//! back to a cluster, with a random tail to dodge collisions in global namespaces.

use regex::Regex;
use std::sync::LazyLock;

/// Azure storage account names: 3-24 characters, digits and lowercase letters
pub const ACCOUNT_NAME_MAX_LEN: usize = 24;
/// Random characters appended to generated account names
pub const ACCOUNT_NAME_SUFFIX_LEN: usize = 5;
/// Prefix used when the infrastructure name has no usable characters
pub const ACCOUNT_NAME_FALLBACK: &str = "imageregistry";
/// Generated bucket names are cut at this length (S3 allows 63)
pub const BUCKET_NAME_MAX_LEN: usize = 62;
/// Prefix of generated bucket names
pub const BUCKET_NAME_PREFIX: &str = "image-registry";

// Alphabet without vowels and easily confused characters, so random suffixes
// never spell words.
const SUFFIX_ALPHABET: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";

static INVALID_ACCOUNT_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("[^0-9A-Za-z]")
        .expect("Failed to compile account name regex - this should never happen")
});

/// Generate a storage account name from the infrastructure name
#[must_use]
pub fn generate_account_name(infrastructure_name: &str) -> String {
    account_name_with_suffix(infrastructure_name, &random_suffix(ACCOUNT_NAME_SUFFIX_LEN))
}

/// Deterministic part of [`generate_account_name`]
///
/// Strips invalid characters, truncates so the suffix still fits and lowercases.
#[must_use]
pub fn account_name_with_suffix(infrastructure_name: &str, suffix: &str) -> String {
    let mut prefix = INVALID_ACCOUNT_CHARS
        .replace_all(infrastructure_name, "")
        .into_owned();
    if prefix.is_empty() {
        prefix = ACCOUNT_NAME_FALLBACK.to_string();
    }
    let keep = ACCOUNT_NAME_MAX_LEN.saturating_sub(suffix.len());
    // Only ASCII alphanumerics survive the regex, so byte truncation is safe
    prefix.truncate(keep.min(prefix.len()));
    prefix.push_str(suffix);
    prefix.to_lowercase()
}

/// Generate an S3 bucket name for the given region and infrastructure name
#[must_use]
pub fn generate_bucket_name(region: &str, infrastructure_name: &str) -> String {
    let unique = uuid::Uuid::new_v4().simple().to_string();
    bucket_name_with_suffix(region, infrastructure_name, &unique)
}

/// Deterministic part of [`generate_bucket_name`]
#[must_use]
pub fn bucket_name_with_suffix(region: &str, infrastructure_name: &str, suffix: &str) -> String {
    let name = format!(
        "{BUCKET_NAME_PREFIX}-{region}-{}-{}",
        infrastructure_name.replace('-', ""),
        suffix.replace('-', "")
    );
    name.to_lowercase()
        .chars()
        .take(BUCKET_NAME_MAX_LEN)
        .collect()
}

/// Random lowercase suffix drawn from a vowel-free alphabet
#[must_use]
pub fn random_suffix(len: usize) -> String {
    let mut out = String::with_capacity(len);
    while out.len() < len {
        for byte in uuid::Uuid::new_v4().into_bytes() {
            if out.len() == len {
                break;
            }
            out.push(char::from(
                SUFFIX_ALPHABET[usize::from(byte) % SUFFIX_ALPHABET.len()],
            ));
        }
    }
    out
}
