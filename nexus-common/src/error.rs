use thiserror::Error;

pub type Result<T> = std::result::Result<T, NexusError>;

/// Service-wide error type. Every variant carries a stable machine code
/// that ends up in the response envelope untouched.
#[derive(Debug, Error)]
pub enum NexusError {
    #[error("{message}")]
    Validation {
        code: &'static str,
        message: String,
        field: Option<String>,
        suggestions: Vec<String>,
    },

    #[error("{message}")]
    Auth { code: &'static str, message: String },

    #[error("{message}")]
    Forbidden { code: &'static str, message: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("{message}")]
    Conflict { code: &'static str, message: String },

    #[error("rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },

    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl NexusError {
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        Self::Validation { code, message: message.into(), field: None, suggestions: Vec::new() }
    }

    pub fn validation_field(
        code: &'static str,
        message: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self::Validation {
            code,
            message: message.into(),
            field: Some(field.into()),
            suggestions: Vec::new(),
        }
    }

    pub fn with_suggestions(mut self, hints: &[&str]) -> Self {
        if let Self::Validation { suggestions, .. } = &mut self {
            *suggestions = hints.iter().map(|s| s.to_string()).collect();
        }
        self
    }

    pub fn auth(code: &'static str, message: impl Into<String>) -> Self {
        Self::Auth { code, message: message.into() }
    }

    pub fn forbidden(code: &'static str, message: impl Into<String>) -> Self {
        Self::Forbidden { code, message: message.into() }
    }

    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self::Conflict { code, message: message.into() }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Stable machine code surfaced in the error envelope.
    pub fn code(&self) -> &str {
        match self {
            Self::Validation { code, .. } => code,
            Self::Auth { code, .. } => code,
            Self::Forbidden { code, .. } => code,
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict { code, .. } => code,
            Self::RateLimited { .. } => "RATE_LIMIT_EXCEEDED",
            Self::Upstream(_) => "UPSTREAM_UNAVAILABLE",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Crypto(_) => "INTERNAL_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation { .. } => 400,
            Self::Auth { .. } => 401,
            Self::Forbidden { .. } => 403,
            Self::NotFound(_) => 404,
            Self::Conflict { .. } => 409,
            Self::RateLimited { .. } => 429,
            Self::Upstream(_) => 502,
            Self::Storage(_) | Self::Crypto(_) | Self::Internal(_) => 500,
        }
    }

    /// Validation field name, when one applies.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Validation { field, .. } => field.as_deref(),
            _ => None,
        }
    }

    pub fn suggestions(&self) -> &[String] {
        match self {
            Self::Validation { suggestions, .. } => suggestions,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_and_statuses_line_up() {
        let e = NexusError::auth("INVALID_API_KEY", "no such key");
        assert_eq!(e.code(), "INVALID_API_KEY");
        assert_eq!(e.http_status(), 401);

        let e = NexusError::RateLimited { retry_after_secs: 30 };
        assert_eq!(e.code(), "RATE_LIMIT_EXCEEDED");
        assert_eq!(e.http_status(), 429);
    }

    #[test]
    fn validation_carries_field_and_suggestions() {
        let e = NexusError::validation_field("INVALID_EMAIL", "bad email", "email")
            .with_suggestions(&["check the address for typos"]);
        assert_eq!(e.field(), Some("email"));
        assert_eq!(e.suggestions().len(), 1);
        assert_eq!(e.http_status(), 400);
    }
}
