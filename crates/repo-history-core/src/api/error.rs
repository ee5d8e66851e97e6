use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not authenticated - no token available")]
    MissingToken,

    /// The backend rejected the token; sign in again.
    #[error("Unauthorized - token may be expired")]
    Unauthorized,

    /// Deleting a record the backend no longer has.
    #[error("History record not found: {0}")]
    NotFound(String),

    #[error("Rate limited - gave up after retrying")]
    RateLimited,

    /// Any other non-success status.
    #[error("History request failed with {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let cut = (0..=MAX_ERROR_BODY_LENGTH)
                .rev()
                .find(|&i| body.is_char_boundary(i))
                .unwrap_or(0);
            format!("{}... (truncated, {} total bytes)", &body[..cut], body.len())
        }
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            404 => ApiError::NotFound(Self::truncate_body(body)),
            429 => ApiError::RateLimited,
            status => ApiError::Rejected {
                status,
                body: Self::truncate_body(body),
            },
        }
    }
}
