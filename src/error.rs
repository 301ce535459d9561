use std::{io, path::StripPrefixError};

use regex::Error as RegexError;
use serde::{Deserialize, Serialize};
use serde_json::Error as JsonError;
use thiserror::Error;

/// Crate-wide error type for the theme factory pipeline.
///
/// Recoverable conditions (missing source assets, absent baselines, malformed
/// JSON during enrich) never surface here — they are collected as warnings on
/// the stage reports. Only hard failures propagate: containment violations,
/// I/O errors on the output root, template cycles, and lock contention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum ForgeError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Write to {path:?} escapes the output root {root:?}")]
    Containment { path: String, root: String },
    #[error("File System error: {0}")]
    Io(String),
    #[error("Item Not Found: {0}")]
    NotFound(String),
    #[error("Output directory {0} is locked by another pipeline run")]
    OutputLocked(String),
    #[error("You do not have permission to access this resource")]
    PermissionDenied,
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
    #[error("Template dependency cycle: {}", .0.join(" -> "))]
    TemplateCycle(Vec<String>),
}

impl From<StripPrefixError> for ForgeError {
    fn from(src: StripPrefixError) -> ForgeError {
        ForgeError::NotFound(format!("Strip prefix failed for path. Error: {src}"))
    }
}

impl From<toml::de::Error> for ForgeError {
    fn from(src: toml::de::Error) -> ForgeError {
        ForgeError::Serialization(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for ForgeError {
    fn from(src: toml::ser::Error) -> ForgeError {
        ForgeError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<JsonError> for ForgeError {
    fn from(src: JsonError) -> ForgeError {
        ForgeError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<io::Error> for ForgeError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => ForgeError::NotFound(format!("{x}")),
            io::ErrorKind::PermissionDenied => ForgeError::PermissionDenied,
            _ => ForgeError::Io(format!("IOError: {}", x.kind())),
        }
    }
}

impl From<RegexError> for ForgeError {
    fn from(x: RegexError) -> Self {
        ForgeError::Serialization(format!("Regex parse failed: {x}"))
    }
}
