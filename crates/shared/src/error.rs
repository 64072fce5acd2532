use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Validation,
    NotFound,
    Transmit,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Failures surfaced to whoever issued a control intent.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("invalid target: {0}")]
    InvalidTarget(String),
    #[error("invalid {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error("index {index} out of range 0..{limit}")]
    IndexOutOfRange { index: i64, limit: usize },
    #[error("payload of {len} bytes exceeds the 8 byte frame payload")]
    PayloadTooLong { len: usize },
    #[error("failed to transmit frame: {0}")]
    TransmitFailure(#[source] std::io::Error),
}

impl ControlError {
    pub fn invalid_value(field: &'static str, reason: impl Into<String>) -> Self {
        ControlError::InvalidValue {
            field,
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            ControlError::InvalidTarget(_)
            | ControlError::InvalidValue { .. }
            | ControlError::IndexOutOfRange { .. } => ErrorCode::Validation,
            ControlError::TransmitFailure(_) => ErrorCode::Transmit,
            ControlError::PayloadTooLong { .. } => ErrorCode::Internal,
        }
    }
}

impl From<ControlError> for ApiError {
    fn from(value: ControlError) -> Self {
        Self::new(value.code(), value.to_string())
    }
}
