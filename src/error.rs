use thiserror::Error;

use crate::alarm::AlarmId;

#[derive(Error, Debug)]
pub enum AlarmError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown alarm type: {0}")]
    UnknownType(String),

    /// only the next occurrence can be computed, anything further is a caller bug
    #[error("cannot compute ring time of order {0}, only the next ring is supported")]
    UnsupportedOrder(u32),

    #[error("invalid property {key}: {reason}")]
    InvalidProperty { key: String, reason: String },

    #[error("corrupt alarm record: {0}")]
    Corrupt(String),

    #[error("no alarm ids left")]
    IdsExhausted,

    #[error("alarm not found: {0}")]
    NotFound(AlarmId),

    #[error("config error: {0}")]
    Config(String),

    #[error("couldn't parse config: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("couldn't serialize config: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

impl AlarmError {
    pub(crate) fn invalid_property(key: &str, reason: impl Into<String>) -> Self {
        Self::InvalidProperty {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AlarmError>;
