pub mod condition;
pub mod engine;
pub mod getters;
pub mod loader;
pub mod resolver;
pub mod segment;

use thiserror::Error;

/// Problems found while loading protection settings. A file that fails to
/// load never replaces segments already active.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("failed to read protection file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed protection file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("condition '{condition}': {message}")]
    Syntax { condition: String, message: String },
    #[error("condition '{condition}' uses unknown getter '{getter}'")]
    UnknownGetter { condition: String, getter: String },
    #[error("condition '{condition}': {message}")]
    TypeMismatch { condition: String, message: String },
    #[error("getter '{getter}': {message}")]
    Getter { getter: String, message: String },
    #[error("segment '{segment}': {message}")]
    Segment { segment: String, message: String },
}
