use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DesiduaError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("server returned status {status}")]
    Http { status: u16 },
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("call token unavailable")]
    TokenUnavailable,
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("device error: {0}")]
    Device(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("storage error: {0}")]
    Storage(String),
    #[error("booking rule violated: {0}")]
    Booking(String),
}

impl DesiduaError {
    /// Short message suitable for an inline alert in the native shell.
    pub fn user_message(&self) -> String {
        match self {
            Self::Network(_) => "Cannot reach the server. Check your connection.".into(),
            Self::Timeout(_) => "The server took too long to respond.".into(),
            Self::Unauthorized(_) => "Your session has expired. Please log in again.".into(),
            Self::NotFound(_) => "The requested booking was not found.".into(),
            Self::Http { status } => format!("The server rejected the request ({status})."),
            Self::MalformedResponse(_) => "The server sent an unexpected response.".into(),
            Self::InvalidInput(msg) => msg.clone(),
            Self::TokenUnavailable => "Call token is not available.".into(),
            Self::Connection(_) => "Could not join the call. Try again.".into(),
            Self::Device(_) => "Camera or microphone is unavailable.".into(),
            Self::Cancelled => "The call was closed.".into(),
            Self::Storage(_) => "Could not access local storage.".into(),
            Self::Booking(msg) => msg.clone(),
        }
    }

    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if e.is_decode() {
            Self::MalformedResponse(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}
