//! Scene-Load Dispatcher
//!
//! Loads a published file back into a host scene. Dispatch goes through an
//! explicit (host, artifact) route table; the route then picks an action by
//! file extension. Unknown hosts and unrouted combinations are errors,
//! unsupported extensions are reported and leave the scene untouched.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::{HostError, LoadError, TrackingError};
use crate::host::{Capability, ErrorSink, FbxImportOptions, Filter, Record, TrackingClient};
use crate::model::{ArtifactKind, EntityRef};

const TEXTURE_EXTENSIONS: [&str; 9] = [
    "png", "jpg", "jpeg", "exr", "cin", "dpx", "psd", "tiff", "tga",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKind {
    Maya,
    Nuke,
    MotionBuilder,
    Max,
    Photoshop,
}

impl HostKind {
    pub const ALL: [HostKind; 5] = [
        HostKind::Maya,
        HostKind::Nuke,
        HostKind::MotionBuilder,
        HostKind::Max,
        HostKind::Photoshop,
    ];

    pub fn engine_name(&self) -> &'static str {
        match self {
            HostKind::Maya => "tk-maya",
            HostKind::Nuke => "tk-nuke",
            HostKind::MotionBuilder => "tk-motionbuilder",
            HostKind::Max => "tk-3dsmax",
            HostKind::Photoshop => "tk-photoshop",
        }
    }
}

impl fmt::Display for HostKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.engine_name())
    }
}

impl FromStr for HostKind {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|host| host.engine_name() == s)
            .ok_or_else(|| LoadError::UnknownHost(s.to_string()))
    }
}

/// Tracking description of a published file, as needed to name loaded nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedFile {
    pub id: i64,
    pub entity: EntityRef,
    pub name: String,
    pub version_number: i64,
    pub tank_type: String,
}

impl PublishedFile {
    pub fn artifact(&self) -> Option<ArtifactKind> {
        ArtifactKind::from_tank_type(&self.tank_type)
    }

    fn entity_name(&self) -> &str {
        self.entity.name.as_deref().unwrap_or("UNSET")
    }

    /// `<entity>_<name>_v<version>`
    pub fn node_name(&self) -> String {
        format!("{}_{}_v{:03}", self.entity_name(), self.name, self.version_number)
    }

    /// `<entity>_<name>_<code>_v<version>`
    pub fn import_name(&self, code: &str) -> String {
        format!(
            "{}_{}_{}_v{:03}",
            self.entity_name(),
            self.name,
            code,
            self.version_number
        )
    }

    /// Build from a tracking record. `tank_type` may be a plain string or a
    /// linked entity with a `name`.
    pub fn from_record(record: &Record) -> Result<Self, TrackingError> {
        let malformed = |field: &str| TrackingError::Malformed(format!("missing '{}'", field));

        let id = record
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| malformed("id"))?;
        let entity: EntityRef = record
            .get("entity")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .ok_or_else(|| malformed("entity"))?;
        let name = record
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("name"))?
            .to_string();
        let version_number = record
            .get("version_number")
            .and_then(Value::as_i64)
            .ok_or_else(|| malformed("version_number"))?;
        let tank_type = match record.get("tank_type") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Object(linked)) => linked
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| malformed("tank_type.name"))?
                .to_string(),
            _ => return Err(malformed("tank_type")),
        };

        Ok(Self {
            id,
            entity,
            name,
            version_number,
            tank_type,
        })
    }
}

/// Look up the published-file record a load request refers to.
pub fn fetch_published_file(
    client: &dyn TrackingClient,
    id: i64,
) -> Result<PublishedFile, TrackingError> {
    let record = client
        .find_one(
            "TankPublishedFile",
            &[Filter::is("id", json!(id))],
            &["entity", "name", "version_number", "tank_type"],
        )?
        .ok_or_else(|| TrackingError::NotFound {
            entity_type: "TankPublishedFile".to_string(),
            id,
        })?;
    PublishedFile::from_record(&record)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TakeSelection {
    /// Last node and take listed in the file.
    Last,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoDisplay {
    SolidLines,
}

/// One scene mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum LoadAction {
    /// Non-destructive sub-scene reference.
    Reference { path: String },
    TextureRead { path: String },
    ImportCamera { path: String, options: FbxImportOptions },
    ImportGeometry { path: String, name: String },
    CameraNode { name: String, path: String, take: TakeSelection },
    GeoReadNode { name: String, path: String, display: GeoDisplay },
    PasteNodes { path: String },
    MergeScene { path: String },
    ImportFile { path: String },
    OpenDocument { path: String },
}

/// Host side of a scene load.
pub trait SceneLoader {
    fn probe(&mut self, capability: Capability) -> Result<bool, HostError>;
    fn apply(&mut self, action: &LoadAction) -> Result<(), HostError>;
}

/// What a load request resolved to before touching the scene.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadPlan {
    Apply {
        action: LoadAction,
        requires: Option<Capability>,
    },
    /// Nothing will be loaded; the message goes to the error sink.
    Reject(String),
}

impl LoadPlan {
    fn apply(action: LoadAction) -> Self {
        LoadPlan::Apply {
            action,
            requires: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    ByExtension,
    NukeCamera,
    NukeGeometry,
    NukeLensScript,
    FbxMerge,
    GenericImport,
    OpenDocument,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArtifactMatch {
    Any,
    Kind(ArtifactKind),
}

const ROUTES: [(HostKind, ArtifactMatch, Route); 8] = [
    (HostKind::Maya, ArtifactMatch::Any, Route::ByExtension),
    (HostKind::Nuke, ArtifactMatch::Kind(ArtifactKind::Camera), Route::NukeCamera),
    (HostKind::Nuke, ArtifactMatch::Kind(ArtifactKind::Cones), Route::NukeGeometry),
    (HostKind::Nuke, ArtifactMatch::Kind(ArtifactKind::Model), Route::NukeGeometry),
    (HostKind::Nuke, ArtifactMatch::Kind(ArtifactKind::LensNode), Route::NukeLensScript),
    (HostKind::MotionBuilder, ArtifactMatch::Any, Route::FbxMerge),
    (HostKind::Max, ArtifactMatch::Any, Route::GenericImport),
    (HostKind::Photoshop, ArtifactMatch::Any, Route::OpenDocument),
];

fn route(host: HostKind, artifact: Option<ArtifactKind>) -> Option<Route> {
    ROUTES
        .iter()
        .find(|(h, matcher, _)| {
            *h == host
                && match matcher {
                    ArtifactMatch::Any => true,
                    ArtifactMatch::Kind(kind) => artifact == Some(*kind),
                }
        })
        .map(|(_, _, route)| *route)
}

fn extension(path: &str) -> String {
    Path::new(path)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Decide what loading `file_path` into `host` would do.
pub fn plan_load(
    host: HostKind,
    file_path: &str,
    record: &PublishedFile,
) -> Result<LoadPlan, LoadError> {
    let path = file_path.replace('\\', "/");
    let ext = extension(&path);
    let artifact = record.artifact();

    let route = route(host, artifact).ok_or_else(|| LoadError::UnhandledCombination {
        host: host.to_string(),
        tank_type: record.tank_type.clone(),
    })?;
    debug!(%host, ?route, %path, "routing load");

    let plan = match route {
        Route::ByExtension => match ext.as_str() {
            "ma" | "mb" => LoadPlan::apply(LoadAction::Reference { path }),
            e if TEXTURE_EXTENSIONS.contains(&e) => LoadPlan::apply(LoadAction::TextureRead { path }),
            "fbx" => LoadPlan::Apply {
                action: LoadAction::ImportCamera {
                    path,
                    options: FbxImportOptions {
                        cameras: true,
                        merge: true,
                    },
                },
                requires: Some(Capability::Fbx),
            },
            "obj" => match artifact.and_then(|a| a.short_code()) {
                Some(code) => LoadPlan::apply(LoadAction::ImportGeometry {
                    name: record.import_name(code),
                    path,
                }),
                None => LoadPlan::Reject(format!(
                    "No import name is defined for '{}' publishes; {} will not be loaded.",
                    record.tank_type, path
                )),
            },
            _ => LoadPlan::Reject(format!(
                "Unsupported file extension for {}! Nothing will be loaded.",
                path
            )),
        },
        Route::NukeCamera if ext == "fbx" => LoadPlan::apply(LoadAction::CameraNode {
            name: record.node_name(),
            path,
            take: TakeSelection::Last,
        }),
        Route::NukeCamera => LoadPlan::Reject(format!(
            "Unsupported file extension for {} - no read node will be created.",
            path
        )),
        Route::NukeGeometry if ext == "obj" => LoadPlan::apply(LoadAction::GeoReadNode {
            name: record.node_name(),
            path,
            display: GeoDisplay::SolidLines,
        }),
        Route::NukeGeometry => LoadPlan::Reject(format!(
            "Unsupported file extension for {} - no ReadGeo node will be created.",
            path
        )),
        Route::NukeLensScript if ext == "nk" => LoadPlan::apply(LoadAction::PasteNodes { path }),
        Route::NukeLensScript => LoadPlan::Reject(format!(
            "Lens is not a nuke script! I don't know how to import {}",
            path
        )),
        Route::FbxMerge if !Path::new(&path).exists() => {
            LoadPlan::Reject(format!("The file {} does not exist.", path))
        }
        Route::FbxMerge if ext != "fbx" => LoadPlan::Reject(format!(
            "Unsupported file extension for {}. Only FBX files are supported.",
            path
        )),
        Route::FbxMerge => LoadPlan::apply(LoadAction::MergeScene { path }),
        Route::GenericImport if !Path::new(&path).exists() => {
            LoadPlan::Reject(format!("The file {} does not exist.", path))
        }
        Route::GenericImport => LoadPlan::apply(LoadAction::ImportFile { path }),
        Route::OpenDocument => LoadPlan::apply(LoadAction::OpenDocument { path }),
    };
    Ok(plan)
}

/// Load `file_path` into the live scene of `host` (an engine name such as `tk-maya`).
///
/// Returns the applied action, or `None` when nothing was loaded and the
/// reason was sent to `errors`. Fails only for unknown hosts and unrouted
/// host/artifact combinations.
pub fn load_artifact(
    host: &str,
    file_path: &str,
    record: &PublishedFile,
    loader: &mut dyn SceneLoader,
    errors: &mut dyn ErrorSink,
) -> Result<Option<LoadAction>, LoadError> {
    let host: HostKind = host.parse()?;

    let (action, requires) = match plan_load(host, file_path, record)? {
        LoadPlan::Apply { action, requires } => (action, requires),
        LoadPlan::Reject(message) => {
            errors.report_error(&message);
            return Ok(None);
        }
    };

    if let Some(capability) = requires {
        let available = match loader.probe(capability) {
            Ok(available) => available,
            Err(e) => {
                debug!("capability probe failed: {}", e);
                false
            }
        };
        if !available {
            errors.report_error(&format!(
                "Unable to load {} plugin. We will be unable to load published cameras",
                capability.plugin_name()
            ));
            return Ok(None);
        }
    }

    if let Err(e) = loader.apply(&action) {
        errors.report_error(&format!("Unable to load {}: {}", file_path, e));
        return Ok(None);
    }

    info!(%host, ?action, "loaded artifact");
    Ok(Some(action))
}
