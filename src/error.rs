// Error types at the domain seams. Repository and app plumbing use anyhow.

use thiserror::Error;

/// Why a node was skipped in a poll cycle. Never fatal for the cycle.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("timeout")]
    Timeout,
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("status {0}")]
    Status(u16),
    #[error("bad response: {0}")]
    BadResponse(String),
    #[error("empty")]
    Empty,
}

impl FetchError {
    /// Short reason shown next to the node name in reports.
    pub fn short_reason(&self) -> &'static str {
        match self {
            FetchError::Timeout => "timeout",
            FetchError::Transport(_) => "transport",
            FetchError::Status(_) => "http_status",
            FetchError::BadResponse(_) => "bad_resp",
            FetchError::Empty => "empty",
        }
    }
}

/// Messaging transport failure (send or poll).
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("telegram rejected request ({status}): {description}")]
    Rejected { status: u16, description: String },
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: Box<DeliveryError> },
}

impl DeliveryError {
    /// Connection errors, timeouts, 429 and 5xx are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            DeliveryError::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            DeliveryError::Rejected { status, .. } => *status == 429 || *status >= 500,
            DeliveryError::Exhausted { .. } => false,
        }
    }
}

/// Malformed chat command; rendered back to the user.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("unknown window: {0}")]
    BadWindow(String),
    #[error("hours must be greater than zero")]
    ZeroHours,
    #[error("hours must be at most {max}")]
    TooManyHours { max: u32 },
}
