//! Publish Data Model
//!
//! Items describe what may be published, outputs describe where it goes,
//! tasks pair the two. None of these are mutated once built.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TaskError;

/// Kind of publishable thing found in a scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    WorkFile,
    Camera,
    ConesGeo,
    ModelGeo,
    LensNode,
    ShotgunNote,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::WorkFile => "work_file",
            ItemType::Camera => "camera",
            ItemType::ConesGeo => "cones_geo",
            ItemType::ModelGeo => "model_geo",
            ItemType::LensNode => "lens_node",
            ItemType::ShotgunNote => "shotgun_note",
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    #[serde(rename = "type")]
    pub item_type: ItemType,
    /// Scene object path (`|Scene|geo|propA`) or a filesystem path.
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub selected: bool,
}

impl Item {
    pub fn new(item_type: ItemType, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            item_type,
            name: name.into(),
            description: description.into(),
            selected: true,
        }
    }

    /// Last component of a `|`-separated object path.
    pub fn leaf_name(&self) -> &str {
        self.name.rsplit('|').next().unwrap_or(&self.name)
    }
}

/// Outputs the executor knows how to publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    CameraExport,
    ConeGeoExport,
    ModelGeoExport,
    LensDistortExport,
    ShotgunNoteCreate,
}

impl OutputKind {
    pub const ALL: [OutputKind; 5] = [
        OutputKind::CameraExport,
        OutputKind::ConeGeoExport,
        OutputKind::ModelGeoExport,
        OutputKind::LensDistortExport,
        OutputKind::ShotgunNoteCreate,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputKind::CameraExport => "camera_export",
            OutputKind::ConeGeoExport => "cone_geo_export",
            OutputKind::ModelGeoExport => "model_geo_export",
            OutputKind::LensDistortExport => "lens_distort_export",
            OutputKind::ShotgunNoteCreate => "shotgun_note_create",
        }
    }
}

/// Kinds of published files, keyed by their tracked type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Camera,
    Cones,
    Model,
    LensNode,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 4] = [
        ArtifactKind::Camera,
        ArtifactKind::Cones,
        ArtifactKind::Model,
        ArtifactKind::LensNode,
    ];

    pub fn tank_type(&self) -> &'static str {
        match self {
            ArtifactKind::Camera => "Matchmove Camera",
            ArtifactKind::Cones => "Matchmove Cones",
            ArtifactKind::Model => "Matchmove Model",
            ArtifactKind::LensNode => "Matchmove Lens Distortion Node",
        }
    }

    pub fn from_tank_type(tank_type: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tank_type() == tank_type)
    }

    /// Suffix used when naming imported geometry, e.g. `geo` in `sh010_pCube1_geo_v003`.
    pub fn short_code(&self) -> Option<&'static str> {
        match self {
            ArtifactKind::Camera => Some("cam"),
            ArtifactKind::Cones => Some("cones"),
            ArtifactKind::Model => Some("geo"),
            ArtifactKind::LensNode => None,
        }
    }
}

/// A configured publish target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    /// Output key, e.g. `camera_export`. Unknown keys are kept so they can be
    /// reported per task.
    pub name: String,
    /// Name of the publish template in the [`TemplateRegistry`](crate::templates::TemplateRegistry).
    pub publish_template: String,
    pub tank_type: String,
}

impl Output {
    pub fn kind(&self) -> Option<OutputKind> {
        OutputKind::from_name(&self.name)
    }
}

/// Unit of work for validation and publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub item: Item,
    pub output: Output,
}

impl Task {
    pub fn new(item: Item, output: Output) -> Self {
        Self { item, output }
    }
}

/// Errors collected for one task. Only failing tasks are ever reported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task: Task,
    pub errors: Vec<TaskError>,
}

impl TaskResult {
    pub fn messages(&self) -> Vec<String> {
        self.errors.iter().map(|e| e.to_string()).collect()
    }
}

/// Pushes a result only when there is something to report.
pub(crate) fn push_failures(results: &mut Vec<TaskResult>, task: &Task, errors: Vec<TaskError>) {
    if !errors.is_empty() {
        results.push(TaskResult {
            task: task.clone(),
            errors,
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Str(String),
}

impl FieldValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            FieldValue::Str(s) => s.parse().ok(),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Int(v) => write!(f, "{}", v),
            FieldValue::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Str(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Str(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

/// Template fields extracted from, or applied to, a path.
pub type FieldMapping = BTreeMap<String, FieldValue>;

/// Reference to an entity in the tracking backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl EntityRef {
    pub fn new(entity_type: impl Into<String>, id: i64) -> Self {
        Self {
            entity_type: entity_type.into(),
            id,
            name: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Registration payload sent once per successfully exported task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishRecord {
    pub path: String,
    pub name: String,
    pub tank_type: String,
    pub version_number: i64,
    pub task: Option<EntityRef>,
    pub entity: Option<EntityRef>,
    pub comment: String,
    pub thumbnail_path: Option<String>,
    pub dependency_paths: Vec<String>,
    pub created_at: DateTime<Utc>,
}
