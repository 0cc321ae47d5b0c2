//! Host Collaborators
//!
//! Everything that touches a live application or the tracking backend sits
//! behind these traits. Operations take explicit object sets instead of
//! relying on whatever happens to be selected in the host.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{HostError, TrackingError};
use crate::model::{PublishRecord, Task};

/// Animation channels that must be driven for a camera to count as baked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Tx,
    Ty,
    Tz,
    Rx,
    Ry,
    Rz,
    Sx,
    Sy,
    Sz,
}

impl Channel {
    /// Test order for baked-camera detection.
    pub const BAKED: [Channel; 9] = [
        Channel::Tx,
        Channel::Ty,
        Channel::Tz,
        Channel::Rx,
        Channel::Ry,
        Channel::Rz,
        Channel::Sx,
        Channel::Sy,
        Channel::Sz,
    ];

    pub fn short_name(&self) -> &'static str {
        match self {
            Channel::Tx => "tx",
            Channel::Ty => "ty",
            Channel::Tz => "tz",
            Channel::Rx => "rx",
            Channel::Ry => "ry",
            Channel::Rz => "rz",
            Channel::Sx => "sx",
            Channel::Sy => "sy",
            Channel::Sz => "sz",
        }
    }
}

/// Ordered, de-duplicated set of scene object paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSet(BTreeSet<String>);

impl ObjectSet {
    pub fn single(path: impl Into<String>) -> Self {
        Self(BTreeSet::from([path.into()]))
    }

    pub fn insert(&mut self, path: impl Into<String>) {
        self.0.insert(path.into());
    }

    pub fn contains(&self, path: &str) -> bool {
        self.0.contains(path)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl FromIterator<String> for ObjectSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Export/import plugins a host may or may not have loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Fbx,
    Obj,
}

impl Capability {
    pub fn plugin_name(&self) -> &'static str {
        match self {
            Capability::Fbx => "fbxmaya",
            Capability::Obj => "objExport",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FbxExportOptions {
    pub ascii: bool,
    pub unit: String,
    pub input_connections: bool,
    pub cameras: bool,
    pub file_version: String,
    pub selection_only: bool,
}

impl FbxExportOptions {
    /// Settings used for published matchmove cameras.
    pub fn matchmove_camera() -> Self {
        Self {
            ascii: true,
            unit: "cm".to_string(),
            input_connections: false,
            cameras: true,
            file_version: "FBX200611".to_string(),
            selection_only: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjExportOptions {
    pub groups: bool,
    pub point_groups: bool,
    pub materials: bool,
    pub smoothing: bool,
    pub normals: bool,
}

impl ObjExportOptions {
    /// Geometry-only archive shared by cones and models.
    pub fn geometry_only() -> Self {
        Self {
            groups: true,
            point_groups: false,
            materials: false,
            smoothing: false,
            normals: false,
        }
    }

    /// Host option string, e.g. `groups=1; ptgroups=0; ...`.
    pub fn to_option_string(&self) -> String {
        let flag = |b: bool| if b { 1 } else { 0 };
        format!(
            "groups={}; ptgroups={}; materials={}; smoothing={}; normals={}",
            flag(self.groups),
            flag(self.point_groups),
            flag(self.materials),
            flag(self.smoothing),
            flag(self.normals)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FbxImportOptions {
    pub cameras: bool,
    pub merge: bool,
}

/// Read-only view of the open scene.
pub trait SceneInspector {
    /// Path of the open scene file, `None` when unsaved.
    fn scene_path(&self) -> Option<String>;

    fn perspective_cameras(&self) -> Result<Vec<String>, HostError>;

    /// Whether `object.channel` is the destination of a connection.
    fn is_connected(&self, object: &str, channel: Channel) -> Result<bool, HostError>;

    /// Long paths of transforms matching a host name pattern.
    fn list_transforms(&self, pattern: &str) -> Result<Vec<String>, HostError>;

    /// The given objects plus all their descendants.
    fn with_hierarchy(&self, objects: &ObjectSet) -> Result<ObjectSet, HostError>;

    /// The subset of `objects` that is visible.
    fn visible(&self, objects: &ObjectSet) -> Result<ObjectSet, HostError>;
}

/// Writes published files out of the host.
pub trait ExportEngine {
    /// Activate a capability. `Ok(false)` means confirmed absent, `Err` means
    /// the host could not say. Repeated calls are harmless.
    fn probe(&mut self, capability: Capability) -> Result<bool, HostError>;

    fn export_fbx(
        &mut self,
        objects: &ObjectSet,
        path: &Path,
        options: &FbxExportOptions,
    ) -> Result<(), HostError>;

    fn export_obj(
        &mut self,
        objects: &ObjectSet,
        path: &Path,
        options: &ObjExportOptions,
    ) -> Result<(), HostError>;
}

/// A tracking-backend record, field name to JSON value.
pub type Record = Map<String, Value>;

/// `field is value` filter, the only relation the pipeline needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

impl Filter {
    pub fn is(field: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            value,
        }
    }
}

pub trait TrackingClient {
    fn find(
        &self,
        entity_type: &str,
        filters: &[Filter],
        fields: &[&str],
    ) -> Result<Vec<Record>, TrackingError>;

    fn find_one(
        &self,
        entity_type: &str,
        filters: &[Filter],
        fields: &[&str],
    ) -> Result<Option<Record>, TrackingError> {
        Ok(self.find(entity_type, filters, fields)?.into_iter().next())
    }

    /// Create a record; the response should carry the generated `id`.
    fn create(&mut self, entity_type: &str, data: Record) -> Result<Record, TrackingError>;

    fn register_publish(&mut self, publish: &PublishRecord) -> Result<Record, TrackingError>;
}

/// Advisory progress reporting. Never gates control flow.
pub trait ProgressSink {
    fn report(&mut self, percent: f32, message: Option<&str>, task: Option<&Task>);
}

impl<F> ProgressSink for F
where
    F: FnMut(f32, Option<&str>, Option<&Task>),
{
    fn report(&mut self, percent: f32, message: Option<&str>, task: Option<&Task>) {
        self(percent, message, task)
    }
}

/// Discards progress.
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn report(&mut self, _percent: f32, _message: Option<&str>, _task: Option<&Task>) {}
}

/// Forwards progress to the log.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn report(&mut self, percent: f32, message: Option<&str>, task: Option<&Task>) {
        tracing::debug!(
            percent,
            message = message.unwrap_or(""),
            item = task.map(|t| t.item.name.as_str()).unwrap_or(""),
            "progress"
        );
    }
}

/// Receives non-fatal errors raised while loading artifacts.
pub trait ErrorSink {
    fn report_error(&mut self, message: &str);
}

impl ErrorSink for Vec<String> {
    fn report_error(&mut self, message: &str) {
        tracing::error!("{}", message);
        self.push(message.to_string());
    }
}
