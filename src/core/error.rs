use thiserror::Error;

#[derive(Error, Debug)]
pub enum FreespaceError {
    #[error("Block position {pos} out of range (device has {total} blocks)")]
    OutOfRange { pos: usize, total: usize },

    #[error("Invalid occupancy pattern: {0}")]
    Format(String),

    #[error("Invalid fill fraction: {0} (must be within 0.0..=1.0)")]
    InvalidFraction(f64),

    #[error("Free-extent chain corrupted: {0}")]
    ChainCorrupted(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown strategy '{0}'. Valid options: bitmap, singly-linked, doubly-linked")]
    UnknownStrategy(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Configuration encode error: {0}")]
    ConfigEncode(#[from] toml::ser::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FreespaceError>;
