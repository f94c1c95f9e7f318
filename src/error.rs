use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Failed to spawn worker for sink '{key}': {source}")]
    Spawn {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to open destination '{}': {source}", path.display())]
    Destination {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid duration '{value}': {reason}")]
    InvalidDuration { value: String, reason: String },

    #[error("Invalid filter for key '{key}': {reason}")]
    InvalidFilter { key: String, reason: String },

    #[error(transparent)]
    Sink(#[from] SinkError),
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("line {line_number}: {message}")]
    Malformed { line_number: usize, message: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
