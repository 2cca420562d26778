//! Custom error types for rup.

use thiserror::Error;

/// Errors that can occur during RDS upgrade orchestration.
#[derive(Error, Debug)]
pub enum RupError {
    /// Credential failure on an AWS call. Credentials are rotated by an
    /// external helper, so these are retried on the next poll cycle and never
    /// recorded against the resource.
    #[error("[{scope}] auth token expired or invalid: {message}")]
    AuthExpired { scope: String, message: String },

    #[error("[{scope}] {message}")]
    Api { scope: String, message: String },

    #[error("could not get upgrade targets for {engine} {version}: {message}")]
    DirectoryQuery {
        engine: String,
        version: String,
        message: String,
    },

    #[error("failed to trigger upgrade to {target}: {message}")]
    Actuation { target: String, message: String },

    #[error("resource reported unrecoverable status: {0}")]
    UnexpectedStatus(String),

    #[error("no upgrade path found: {current} -> {target}")]
    NoPathFound { current: String, target: String },

    /// The state file could not be written. Progress tracking is unreliable
    /// past this point, so callers must abort instead of continuing.
    #[error("state persistence failed: {0}")]
    Persistence(String),
}

/// Substrings that identify credential failures in AWS SDK errors, matched
/// case-insensitively against both Display and Debug renderings.
const AUTH_ERROR_MARKERS: &[&str] = &[
    "expiredtoken",
    "authfailure",
    "invalidclienttokenid",
    "accessdenied",
    "access denied",
    "not authorized",
    "unrecognized client",
    "no credentials",
    "security token included in the request is invalid",
    "security token included in the request is expired",
];

impl RupError {
    /// Create an API error from any SDK error type, classifying credential
    /// failures as [`RupError::AuthExpired`].
    pub fn api<E: std::fmt::Debug + std::fmt::Display>(scope: &str, err: E) -> Self {
        let debug = format!("{err:?}");
        let display = err.to_string();
        let combined = format!("{display} {debug}").to_lowercase();
        let message = extract_error_details(&debug, &display);
        let scope = scope.to_string();

        if AUTH_ERROR_MARKERS.iter().any(|m| combined.contains(m)) {
            return Self::AuthExpired { scope, message };
        }

        Self::Api { scope, message }
    }

    /// True for credential errors that resolve themselves once the external
    /// refresh process rewrites the profile.
    pub const fn is_transient_auth(&self) -> bool {
        matches!(self, Self::AuthExpired { .. })
    }

    /// True for errors that must abort the whole monitoring loop.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }
}

/// Pull a single-line message out of an AWS SDK error.
///
/// SDK service errors bury the useful text in the Debug rendering as
/// `message: Some("...")`; the Display rendering is often just
/// "service error".
fn extract_error_details(debug_str: &str, display_str: &str) -> String {
    if let Some(pos) = debug_str.find("message: Some(\"") {
        let rest = &debug_str[pos + "message: Some(\"".len()..];
        if let Some(end) = rest.find('"') {
            return rest[..end].to_string();
        }
    }

    if !display_str.to_lowercase().contains("service error") {
        return display_str.to_string();
    }

    "AWS API request failed".to_string()
}
