//! Error Types
//!
//! Per-task failures are collected as [`TaskError`] values and never abort a
//! batch. Whole-call failures use the `thiserror` enums below.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Capability confirmed absent.
    CapabilityMissing,
    /// Capability probe itself faulted.
    CapabilityUnknown,
    PreconditionFailed,
    PathCollision,
    FieldResolution,
    ExportFailed,
    CopyFailed,
    RegistrationFailed,
    UnrecognizedOutput,
    UnrecognizedExtension,
}

/// A single task-scoped failure, rendered to users through `Display`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String,
}

impl TaskError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn capability_missing(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CapabilityMissing, message)
    }

    pub fn capability_unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CapabilityUnknown, message)
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PreconditionFailed, message)
    }

    pub fn collision(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PathCollision, message)
    }

    pub fn fields(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FieldResolution, message)
    }

    pub fn export(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExportFailed, message)
    }

    pub fn copy(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CopyFailed, message)
    }

    pub fn registration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RegistrationFailed, message)
    }

    pub fn unrecognized_output(item_name: &str, output_name: &str) -> Self {
        Self::new(
            ErrorKind::UnrecognizedOutput,
            format!("Don't know how to publish this item! {} as {}", item_name, output_name),
        )
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for TaskError {}

/// Fault raised by a host application call.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("No object matches '{0}'")]
    NoSuchObject(String),

    #[error("Host command failed: {0}")]
    Command(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Template not found: {0}")]
    NotFound(String),

    #[error("Invalid template pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Missing field '{0}' required by template")]
    MissingField(String),

    #[error("Field '{key}' expects an integer, got '{value}'")]
    NotAnInteger { key: String, value: String },

    #[error("Path '{path}' does not match template '{pattern}'")]
    NoMatch { path: PathBuf, pattern: String },

    #[error("Failed to scan for template paths: {0}")]
    Walk(#[from] walkdir::Error),
}

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("Tracking request failed: {0}")]
    Request(String),

    #[error("Tracking record not found: {entity_type} {id}")]
    NotFound { entity_type: String, id: i64 },

    #[error("Malformed tracking record: {0}")]
    Malformed(String),

    #[error("Ledger I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ledger serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures that abort a whole scene-load request.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Don't know how to load file into unknown engine {0}")]
    UnknownHost(String),

    #[error("Don't know how to load a '{tank_type}' publish into {host}")]
    UnhandledCombination { host: String, tank_type: String },

    #[error(transparent)]
    Tracking(#[from] TrackingError),
}
