use thiserror::Error;

/// Typed remote-store errors enabling retry classification.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// 404 on a path that was expected to exist. Reads map this to `None`
    /// instead of surfacing it.
    #[error("{path} not found on remote")]
    NotFound { path: String },

    /// The revision token did not match the remote's current one.
    #[error("Revision conflict writing {path}: {message}")]
    Conflict { path: String, message: String },

    /// The payload exceeds what the contents endpoint accepts.
    #[error("Remote rejected {path} as too large: {message}")]
    TooLarge { path: String, message: String },

    /// Malformed request, bad credentials, forbidden.
    #[error("Remote rejected request for {path} (status {status}): {message}")]
    Rejected {
        status: u16,
        path: String,
        message: String,
    },

    #[error("HTTP error {status} for {path}")]
    HttpStatus { status: u16, path: String },

    #[error("HTTP transport error for {path}: {source}")]
    Http {
        source: reqwest::Error,
        path: String,
    },

    /// The response body was not what the endpoint documents. Usually a
    /// truncated transfer.
    #[error("Unexpected response for {path}: {reason}")]
    Decode { path: String, reason: String },
}

impl RemoteError {
    /// Whether this error is transient and worth retrying.
    ///
    /// Conflicts are retryable because every retry starts with a fresh read
    /// of the revision token.
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            RemoteError::Http { .. } => true,
            RemoteError::Decode { .. } => true,
            RemoteError::Conflict { .. } => true,
            RemoteError::NotFound { .. } => false,
            RemoteError::TooLarge { .. } => false,
            RemoteError::Rejected { .. } => false,
        }
    }

    /// Map a non-success HTTP status and its body text onto the taxonomy.
    pub fn from_status(status: u16, path: &str, body: &str) -> Self {
        let path = path.to_string();
        let message = api_message(body);
        let lower = message.to_ascii_lowercase();
        match status {
            404 => RemoteError::NotFound { path },
            409 => RemoteError::Conflict { path, message },
            413 => RemoteError::TooLarge { path, message },
            422 if lower.contains("too large") || lower.contains("too big") => {
                RemoteError::TooLarge { path, message }
            }
            422 if lower.contains("sha") => RemoteError::Conflict { path, message },
            // Secondary rate limits come back as 403.
            403 if lower.contains("rate limit") => RemoteError::HttpStatus { status: 429, path },
            429 => RemoteError::HttpStatus { status, path },
            s if s >= 500 => RemoteError::HttpStatus { status, path },
            _ => RemoteError::Rejected {
                status,
                path,
                message,
            },
        }
    }
}

/// Pull `message` out of a GitHub error document, or fall back to the raw body.
fn api_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.chars().take(200).collect())
}
