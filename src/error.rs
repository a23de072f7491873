use thiserror::Error;

/// Failure of a submit or fetch operation against the processing service.
///
/// Errors are stored in task state and handed out as snapshots, so they have to be
/// cheap to clone and comparable.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("service responded with {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected response body: {0}")]
    Decode(String),
    #[error("could not read image: {0}")]
    Io(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            return ApiError::Decode(error.to_string());
        }
        if let Some(status) = error.status() {
            return ApiError::Status {
                status: status.as_u16(),
                body: error.to_string(),
            };
        }
        ApiError::Transport(error.to_string())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(error: serde_json::Error) -> Self {
        ApiError::Decode(error.to_string())
    }
}

impl From<std::io::Error> for ApiError {
    fn from(error: std::io::Error) -> Self {
        ApiError::Io(error.to_string())
    }
}
