use thiserror::Error;

#[derive(Error, Debug)]
pub enum GateError {
    #[error("Malformed policy: {reason}")]
    MalformedPolicy { reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Surfaced to requesters only; never carries policy detail
    #[error("Access Denied")]
    AccessDenied,

    #[error("Audit sink unavailable: {0}")]
    AuditSinkUnavailable(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Object does not exist: {0}")]
    NoSuchKey(String),

    #[error("Identity assertion rejected: {0}")]
    IdentityRejected(String),
}

impl GateError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        GateError::MalformedPolicy {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GateError>;
