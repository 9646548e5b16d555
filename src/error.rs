use thiserror::Error;

/// Fixed fallback used when neither the backend nor the transport layer
/// provided a usable error message.
pub const GENERIC_REQUEST_FAILED: &str = "request failed";

/// Normalized error for everything that can go wrong while talking to the
/// analytics backend.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        message: String,
        /// Raw response body, kept for diagnostics when the backend sent one
        body: Option<String>,
    },
    #[error("Decode error: {0}")]
    Decode(String),
}

impl ApiError {
    /// Human-readable message, regardless of variant.
    pub fn message(&self) -> &str {
        match self {
            ApiError::Network(msg) => msg,
            ApiError::Http { message, .. } => message,
            ApiError::Decode(msg) => msg,
        }
    }

    /// HTTP status code, when the backend answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Raw response body, when the backend sent one.
    pub fn body(&self) -> Option<&str> {
        match self {
            ApiError::Http { body, .. } => body.as_deref(),
            _ => None,
        }
    }
}

/// Builds the user-facing message for a failed request: the server-provided
/// `message`/`detail` wins, then the transport error text, then a fixed
/// generic string.
pub fn normalized_message(server: Option<&str>, transport: Option<&str>) -> String {
    let usable = |s: Option<&str>| {
        s.map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    usable(server)
        .or_else(|| usable(transport))
        .unwrap_or_else(|| GENERIC_REQUEST_FAILED.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats_variants() {
        let err = ApiError::Network("connection refused".to_string());
        assert_eq!(err.to_string(), "Network error: connection refused");

        let err = ApiError::Http {
            status: 503,
            message: "service unavailable".to_string(),
            body: None,
        };
        assert_eq!(err.to_string(), "HTTP 503: service unavailable");

        let err = ApiError::Decode("missing field `data`".to_string());
        assert_eq!(err.to_string(), "Decode error: missing field `data`");
    }

    #[test]
    fn accessors_expose_status_and_body() {
        let err = ApiError::Http {
            status: 404,
            message: "not found".to_string(),
            body: Some("{\"detail\":\"not found\"}".to_string()),
        };
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.body(), Some("{\"detail\":\"not found\"}"));
        assert_eq!(err.message(), "not found");

        let err = ApiError::Network("timeout".to_string());
        assert_eq!(err.status(), None);
        assert_eq!(err.body(), None);
    }

    #[test]
    fn message_prefers_server_detail() {
        assert_eq!(
            normalized_message(Some("invalid date range"), Some("HTTP 400")),
            "invalid date range"
        );
    }

    #[test]
    fn message_falls_back_to_transport_text() {
        assert_eq!(
            normalized_message(None, Some("connection timed out")),
            "connection timed out"
        );
    }

    #[test]
    fn message_falls_back_to_generic_string() {
        assert_eq!(normalized_message(None, None), GENERIC_REQUEST_FAILED);
        assert_eq!(normalized_message(Some("  "), Some("")), GENERIC_REQUEST_FAILED);
    }

    #[test]
    fn blank_server_message_still_reaches_transport_text() {
        assert_eq!(normalized_message(Some("  "), Some("HTTP 502")), "HTTP 502");
    }
}
