//! # Error Policy
//!
//! Classification and logging of watch stream errors. The watchers back off and
//! retry on their own; this only decides how loudly to report.

use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, error, warn};

/// Broad class of a watch stream error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorClass {
    /// 401/403: RBAC revoked or token expired
    Unauthorized,
    /// 410: resource version too old, the watcher relists
    Expired,
    /// 429 or the API server is still starting
    Throttled,
    /// 404: the kind is not served (CRD missing)
    NotFound,
    Other,
}

static STATUS_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bcode: (\d{3})\b")
        .expect("Failed to compile status code regex - this should never happen")
});

/// Classify an error from its debug rendering
///
/// The API status code decides when the rendering carries one. Only errors
/// without a code (decode failures, transport errors) fall back to matching
/// reasons and messages, with "not found" checked last since RBAC and expiry
/// messages can mention missing objects.
#[must_use]
pub fn classify_watch_error(error: &str) -> WatchErrorClass {
    let code = STATUS_CODE
        .captures(error)
        .and_then(|c| c[1].parse::<u16>().ok());
    match code {
        Some(401 | 403) => return WatchErrorClass::Unauthorized,
        Some(404) => return WatchErrorClass::NotFound,
        Some(410) => return WatchErrorClass::Expired,
        Some(429) => return WatchErrorClass::Throttled,
        _ => {}
    }

    if error.contains("Unauthorized") || error.contains("Forbidden") {
        return WatchErrorClass::Unauthorized;
    }
    if error.contains("too old resource version")
        || error.contains("Expired")
        || error.contains("Gone")
    {
        return WatchErrorClass::Expired;
    }
    if error.contains("TooManyRequests") || error.contains("storage is (re)initializing") {
        return WatchErrorClass::Throttled;
    }
    if error.contains("ObjectNotFound") || error.contains("not found") {
        return WatchErrorClass::NotFound;
    }
    WatchErrorClass::Other
}

/// Log a watch stream error for `kind`
pub fn handle_watch_stream_error(kind: &str, error: &str) -> WatchErrorClass {
    let class = classify_watch_error(error);
    match class {
        WatchErrorClass::Unauthorized => error!(
            kind,
            "❌ Watch not authorized, check the operator's ClusterRole and ServiceAccount: {}",
            error
        ),
        WatchErrorClass::Expired => {
            debug!(kind, "Resource version expired, relisting");
        }
        WatchErrorClass::Throttled => {
            warn!(kind, "⏳ API server throttling watch, backing off: {}", error);
        }
        WatchErrorClass::NotFound => error!(
            kind,
            "❌ Watched kind is not served by the API server, is its CRD installed? {}", error
        ),
        WatchErrorClass::Other => warn!(kind, "Watch error, backing off: {}", error),
    }
    class
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_watch_error() {
        assert_eq!(
            classify_watch_error("WatchFailed(Api(Status { code: 410, reason: \"Expired\" }))"),
            WatchErrorClass::Expired
        );
        assert_eq!(
            classify_watch_error("InitialListFailed(Api(Status { code: 403, reason: \"Forbidden\" }))"),
            WatchErrorClass::Unauthorized
        );
        assert_eq!(
            classify_watch_error("WatchFailed(SerdeError(\"404 page not found\"))"),
            WatchErrorClass::NotFound
        );
        assert_eq!(
            classify_watch_error("Api(Status { code: 429, reason: \"TooManyRequests\" })"),
            WatchErrorClass::Throttled
        );
        assert_eq!(
            classify_watch_error("connection reset by peer"),
            WatchErrorClass::Other
        );
    }

    #[test]
    fn test_status_code_wins_over_message() {
        assert_eq!(
            classify_watch_error(
                "InitialListFailed(Api(Status { message: \"secrets \\\"image-registry-private-configuration\\\" not found in cache, access denied\", reason: \"Forbidden\", code: 403 }))"
            ),
            WatchErrorClass::Unauthorized
        );
        assert_eq!(
            classify_watch_error("WatchFailed(Api(Status { message: \"Forbidden: user not found\", code: 401 }))"),
            WatchErrorClass::Unauthorized
        );
        assert_eq!(
            classify_watch_error("WatchFailed(Api(Status { message: \"the server could not find the requested resource\", reason: \"NotFound\", code: 404 }))"),
            WatchErrorClass::NotFound
        );
    }

    #[test]
    fn test_uncoded_errors_match_reasons_before_not_found() {
        assert_eq!(
            classify_watch_error("WatchFailed(SerdeError(\"Forbidden: service account not found\"))"),
            WatchErrorClass::Unauthorized
        );
        assert_eq!(
            classify_watch_error("WatchFailed(Service(\"resourceVersion 4103 is too old resource version\"))"),
            WatchErrorClass::Expired
        );
    }
}
