use thiserror::Error;

pub type AudienceResult<T> = Result<T, AudienceError>;

#[derive(Error, Debug)]
pub enum AudienceError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Type mismatch on column '{column}': {detail}")]
    TypeMismatch { column: String, detail: String },

    #[error("Expression syntax error at offset {offset}: {message}")]
    ExpressionSyntax { offset: usize, message: String },

    #[error("Expression evaluation error: {0}")]
    ExpressionEval(String),

    #[error("Delivery to destination '{destination}' failed: {reason}")]
    DestinationDelivery { destination: String, reason: String },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Encoding error: {0}")]
    Encode(String),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Coarse error categories surfaced to callers of the service layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    Expression,
    DestinationDelivery,
    Persistence,
    Internal,
}

impl AudienceError {
    pub fn segment_not_found(name: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "segment",
            key: name.into(),
        }
    }

    pub fn schedule_not_found(index: usize) -> Self {
        Self::NotFound {
            entity: "schedule",
            key: index.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Config(_)
            | Self::Validation(_)
            | Self::UnknownColumn(_)
            | Self::TypeMismatch { .. } => ErrorKind::Validation,
            Self::ExpressionSyntax { .. } | Self::ExpressionEval(_) => ErrorKind::Expression,
            Self::DestinationDelivery { .. } => ErrorKind::DestinationDelivery,
            Self::Persistence(_) | Self::Io(_) | Self::Serialization(_) => ErrorKind::Persistence,
            Self::Encode(_) | Self::Arrow(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether re-running the same operation later can succeed without the
    /// caller changing its input.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Persistence | ErrorKind::DestinationDelivery
        )
    }
}
