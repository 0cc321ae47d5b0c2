//! Matchmove Publish - Scene Publishing Pipeline
//!
//! # Phases
//! 1. Scan finds what can be published
//! 2. Validate checks each task before anything is written
//! 3. Publish exports, copies and registers, one task at a time
//! 4. Load brings a published file back into a host scene
//!
//! Host applications and the tracking backend are reached only through the
//! traits in [`host`]. [`offline`] provides file-backed implementations.

pub mod config;
pub mod context;
pub mod error;
pub mod hashing;
pub mod host;
pub mod load;
pub mod model;
pub mod offline;
pub mod pipeline;
pub mod scan;
pub mod templates;
pub mod validation;

pub use config::{CollisionPolicy, ConfigError, OutputConfig, PipelineConfig};
pub use context::PublishContext;
pub use error::{ErrorKind, HostError, LoadError, TaskError, TemplateError, TrackingError};
pub use host::{
    Capability, ErrorSink, ExportEngine, ObjectSet, ProgressSink, SceneInspector, TrackingClient,
};
pub use load::{fetch_published_file, load_artifact, HostKind, LoadAction, PublishedFile, SceneLoader};
pub use model::{ArtifactKind, Item, ItemType, Output, OutputKind, PublishRecord, Task, TaskResult};
pub use pipeline::{PublishPipeline, PublishReport, PublishRequest, Tracking};
pub use templates::{KeyTemplate, PathTemplate, TemplateRegistry};
pub use validation::{HostSession, ValidationRule, Validator};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const MIN_ENGINE_VERSION: &str = "1.0.0";
