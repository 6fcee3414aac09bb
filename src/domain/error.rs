//! Error kinds surfaced by the runtime.

use thiserror::Error;

/// Every failure the runtime reports to its callers.
///
/// Validation violations are collected into [`RuntimeError::Validation`] and never
/// short-circuit; lookup and parse failures abort the operation that hit them.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("{kind} {key} failed validation: {}", errors.join("; "))]
    Validation {
        kind: String,
        key: String,
        errors: Vec<String>,
    },

    #[error("{kind} {key} not found")]
    NotFound { kind: String, key: String },

    #[error("unable to parse {value:?} for {field}: {reason}")]
    Parse {
        field: String,
        value: String,
        reason: String,
    },

    #[error("{kind} {key} is not available")]
    Consistency { kind: String, key: String },

    #[error("{kind} {key} already exists")]
    Conflict { kind: String, key: String },

    #[error("{kind} {key} is read only")]
    ReadOnly { kind: String, key: String },

    #[error("lock on {kind} is not held by this request")]
    LockNotHeld { kind: String },

    #[error("unknown resource kind {0}")]
    UnknownKind(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl RuntimeError {
    pub fn not_found(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            key: key.into(),
        }
    }

    pub fn parse(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Parse {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// HTTP-equivalent class of the error, for whichever transport sits on top.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation { .. } => 422,
            Self::NotFound { .. } | Self::UnknownKind(_) => 404,
            Self::Parse { .. } => 400,
            Self::Consistency { .. } | Self::Conflict { .. } => 409,
            Self::ReadOnly { .. } => 403,
            Self::Unauthorized(_) => 401,
            Self::LockNotHeld { .. } | Self::Config(_) | Self::Codec(_) | Self::Storage(_) => 500,
        }
    }

    /// The aggregated violation list, if this is a validation failure.
    pub fn violations(&self) -> &[String] {
        match self {
            Self::Validation { errors, .. } => errors,
            _ => &[],
        }
    }
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
