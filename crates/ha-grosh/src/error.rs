use thiserror::Error;

pub type GroshResult<T> = Result<T, GroshError>;

/// Failure talking to the Grosh web service
#[derive(Debug, Error)]
pub enum GroshError {
    /// 401, carrying the server's explanation when it sent one
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// 404 for the requested resource
    #[error("not found: {0}")]
    NotFound(String),

    /// Any other non-success status
    #[error("Grosh API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Connection, timeout or body decoding failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl GroshError {
    /// True when the credentials were rejected, as opposed to a transport or
    /// server problem
    pub fn is_auth(&self) -> bool {
        matches!(self, GroshError::AuthenticationFailed(_))
    }
}
