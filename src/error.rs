use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidArgument,
    InvalidMask,
    ConnectTimeout,
    ConnectFailed,
    IoError,
    RemoteClosed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub error_code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(error_code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error_code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error_code, self.message)?;
        if let Some(details) = &self.details {
            write!(f, " ({details})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

#[derive(Debug, Error)]
pub enum TapError {
    #[error("{0}")]
    Api(ApiError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
    #[error("Timeout")]
    Timeout,
}

impl From<ApiError> for TapError {
    fn from(value: ApiError) -> Self {
        Self::Api(value)
    }
}

impl TapError {
    /// Error code for API-level failures, `None` for transport errors.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            TapError::Api(api) => Some(api.error_code),
            _ => None,
        }
    }
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ErrorCode::InvalidMask => "INVALID_MASK",
            ErrorCode::ConnectTimeout => "CONNECT_TIMEOUT",
            ErrorCode::ConnectFailed => "CONNECT_FAILED",
            ErrorCode::IoError => "IO_ERROR",
            ErrorCode::RemoteClosed => "REMOTE_CLOSED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type TapResult<T> = Result<T, TapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_details() {
        let err = ApiError::new(ErrorCode::InvalidMask, "Stream mask is empty").with_details("mask=0");
        assert_eq!(err.to_string(), "INVALID_MASK: Stream mask is empty (mask=0)");
    }

    #[test]
    fn tap_error_exposes_code() {
        let err: TapError = ApiError::new(ErrorCode::ConnectFailed, "refused").into();
        assert_eq!(err.code(), Some(ErrorCode::ConnectFailed));
        assert_eq!(TapError::Timeout.code(), None);
    }
}
