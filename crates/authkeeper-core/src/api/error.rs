use std::fmt;

use thiserror::Error;

/// What went wrong at the transport boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// No HTTP response was received (connect failure, timeout)
    Unreachable,
    /// The authority answered with a non-success status
    Rejected,
    /// A success response whose body could not be parsed
    Malformed,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TransportErrorKind::Unreachable => "Authority unreachable",
            TransportErrorKind::Rejected => "Authority rejected request",
            TransportErrorKind::Malformed => "Malformed authority response",
        };
        f.write_str(label)
    }
}

/// The only error surfaced by the auth transport client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl TransportError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        let message = if truncated.is_empty() {
            format!("Status {}", status)
        } else {
            format!("Status {}: {}", status, truncated)
        };
        Self {
            kind: TransportErrorKind::Rejected,
            status: Some(status.as_u16()),
            message,
        }
    }

    pub fn unreachable(err: &reqwest::Error) -> Self {
        Self {
            kind: TransportErrorKind::Unreachable,
            status: None,
            message: err.to_string(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Malformed,
            status: None,
            message: message.into(),
        }
    }

    /// Whether a caller-side retry could plausibly succeed.
    /// The session store does not retry; this is for callers that do.
    pub fn is_transient(&self) -> bool {
        match self.kind {
            TransportErrorKind::Unreachable => true,
            TransportErrorKind::Rejected => {
                matches!(self.status, Some(429) | Some(500..=599))
            }
            TransportErrorKind::Malformed => false,
        }
    }

    /// The authority reported the credential as invalid or missing
    pub fn is_unauthorized(&self) -> bool {
        self.kind == TransportErrorKind::Rejected && matches!(self.status, Some(401) | Some(403))
    }
}
