//! Offline Host and Ledger
//!
//! File-backed stand-ins for a live host application and the tracking
//! backend. A [`SceneSnapshot`] is a JSON description of a scene; exports
//! write JSON manifests instead of real FBX/OBJ data. A [`JsonLedger`]
//! keeps tracking records in a JSON file.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{HostError, TrackingError};
use crate::host::{
    Capability, Channel, ExportEngine, FbxExportOptions, Filter, ObjExportOptions, ObjectSet,
    Record, SceneInspector, TrackingClient,
};
use crate::load::{LoadAction, SceneLoader};
use crate::model::PublishRecord;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    #[default]
    Transform,
    PerspectiveCamera,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneObject {
    /// Long `|`-separated path.
    pub path: String,
    #[serde(default)]
    pub kind: ObjectKind,
    #[serde(default = "default_visible")]
    pub visible: bool,
    /// Channels with an incoming connection.
    #[serde(default)]
    pub connected: Vec<Channel>,
}

fn default_visible() -> bool {
    true
}

impl SceneObject {
    pub fn transform(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: ObjectKind::Transform,
            visible: true,
            connected: vec![],
        }
    }

    pub fn camera(path: impl Into<String>, connected: &[Channel]) -> Self {
        Self {
            path: path.into(),
            kind: ObjectKind::PerspectiveCamera,
            visible: true,
            connected: connected.to_vec(),
        }
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityState {
    #[default]
    Available,
    Missing,
    /// The probe itself fails.
    Unknown,
}

/// Written in place of real export data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportManifest {
    pub format: String,
    pub objects: Vec<String>,
    pub options: Value,
    pub exported_at: DateTime<Utc>,
}

/// Serializable scene state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SceneSnapshot {
    #[serde(default)]
    pub scene_path: Option<String>,
    #[serde(default)]
    pub objects: Vec<SceneObject>,
    /// Capabilities not listed are available.
    #[serde(default)]
    pub capabilities: HashMap<Capability, CapabilityState>,
    /// Actions applied by scene loads, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub loaded: Vec<LoadAction>,
}

impl SceneSnapshot {
    pub fn load(path: &Path) -> Result<Self, HostError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), HostError> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn with_capability(mut self, capability: Capability, state: CapabilityState) -> Self {
        self.capabilities.insert(capability, state);
        self
    }

    fn object(&self, path: &str) -> Result<&SceneObject, HostError> {
        self.objects
            .iter()
            .find(|o| o.path == path)
            .ok_or_else(|| HostError::NoSuchObject(path.to_string()))
    }

    /// Visible when the object and every ancestor present in the snapshot are.
    fn is_visible(&self, path: &str) -> bool {
        let mut current = path;
        loop {
            if let Some(object) = self.objects.iter().find(|o| o.path == current) {
                if !object.visible {
                    return false;
                }
            }
            match current.rfind('|') {
                Some(idx) if idx > 0 => current = &current[..idx],
                _ => return true,
            }
        }
    }

    /// Export side of the scene, sharing its capability states.
    pub fn exporter(&self) -> OfflineExporter {
        OfflineExporter {
            capabilities: self.capabilities.clone(),
            exported: vec![],
        }
    }
}

fn probe_state(
    capabilities: &HashMap<Capability, CapabilityState>,
    capability: Capability,
) -> Result<bool, HostError> {
    match capabilities.get(&capability).copied().unwrap_or_default() {
        CapabilityState::Available => Ok(true),
        CapabilityState::Missing => Ok(false),
        CapabilityState::Unknown => Err(HostError::Command(format!(
            "loadPlugin {} did not respond",
            capability.plugin_name()
        ))),
    }
}

/// Writes an [`ExportManifest`] wherever a real host would write FBX/OBJ data.
#[derive(Debug, Clone, Default)]
pub struct OfflineExporter {
    capabilities: HashMap<Capability, CapabilityState>,
    /// Files written so far, in order.
    pub exported: Vec<PathBuf>,
}

impl OfflineExporter {
    fn require(&self, capability: Capability) -> Result<(), HostError> {
        if probe_state(&self.capabilities, capability)? {
            Ok(())
        } else {
            Err(HostError::Command(format!(
                "{} plugin is not loaded",
                capability.plugin_name()
            )))
        }
    }

    fn write_manifest(
        &mut self,
        format: &str,
        objects: &ObjectSet,
        path: &Path,
        options: Value,
    ) -> Result<(), HostError> {
        let manifest = ExportManifest {
            format: format.to_string(),
            objects: objects.iter().map(str::to_string).collect(),
            options,
            exported_at: Utc::now(),
        };
        debug!(path = %path.display(), format, "writing export manifest");
        fs::write(path, serde_json::to_string_pretty(&manifest)?)?;
        self.exported.push(path.to_path_buf());
        Ok(())
    }
}

/// `*` matches any run of characters within one path segment.
fn wildcard(pattern: &str, text: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == text,
        Some((head, tail)) => {
            let Some(rest) = text.strip_prefix(head) else {
                return false;
            };
            (0..=rest.len())
                .filter(|&i| rest.is_char_boundary(i))
                .any(|i| wildcard(tail, &rest[i..]))
        }
    }
}

fn path_matches(pattern: &str, path: &str) -> bool {
    let pattern: Vec<_> = pattern.split('|').collect();
    let path: Vec<_> = path.split('|').collect();
    pattern.len() == path.len()
        && pattern
            .iter()
            .zip(&path)
            .all(|(p, segment)| wildcard(p, segment))
}

impl SceneInspector for SceneSnapshot {
    fn scene_path(&self) -> Option<String> {
        self.scene_path.clone()
    }

    fn perspective_cameras(&self) -> Result<Vec<String>, HostError> {
        Ok(self
            .objects
            .iter()
            .filter(|o| o.kind == ObjectKind::PerspectiveCamera)
            .map(|o| o.path.clone())
            .collect())
    }

    fn is_connected(&self, object: &str, channel: Channel) -> Result<bool, HostError> {
        Ok(self.object(object)?.connected.contains(&channel))
    }

    fn list_transforms(&self, pattern: &str) -> Result<Vec<String>, HostError> {
        Ok(self
            .objects
            .iter()
            .filter(|o| o.kind == ObjectKind::Transform && path_matches(pattern, &o.path))
            .map(|o| o.path.clone())
            .collect())
    }

    fn with_hierarchy(&self, objects: &ObjectSet) -> Result<ObjectSet, HostError> {
        let mut all = ObjectSet::default();
        for root in objects.iter() {
            self.object(root)?;
            let prefix = format!("{}|", root);
            all.insert(root);
            for child in self.objects.iter().filter(|o| o.path.starts_with(&prefix)) {
                all.insert(child.path.clone());
            }
        }
        Ok(all)
    }

    fn visible(&self, objects: &ObjectSet) -> Result<ObjectSet, HostError> {
        Ok(objects
            .iter()
            .filter(|o| self.is_visible(o))
            .map(str::to_string)
            .collect())
    }
}

impl ExportEngine for OfflineExporter {
    fn probe(&mut self, capability: Capability) -> Result<bool, HostError> {
        probe_state(&self.capabilities, capability)
    }

    fn export_fbx(
        &mut self,
        objects: &ObjectSet,
        path: &Path,
        options: &FbxExportOptions,
    ) -> Result<(), HostError> {
        self.require(Capability::Fbx)?;
        self.write_manifest("fbx", objects, path, serde_json::to_value(options)?)
    }

    fn export_obj(
        &mut self,
        objects: &ObjectSet,
        path: &Path,
        options: &ObjExportOptions,
    ) -> Result<(), HostError> {
        self.require(Capability::Obj)?;
        self.write_manifest(
            "obj",
            objects,
            path,
            Value::String(options.to_option_string()),
        )
    }
}

impl SceneLoader for SceneSnapshot {
    fn probe(&mut self, capability: Capability) -> Result<bool, HostError> {
        probe_state(&self.capabilities, capability)
    }

    fn apply(&mut self, action: &LoadAction) -> Result<(), HostError> {
        self.loaded.push(action.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LedgerData {
    #[serde(default)]
    last_id: i64,
    #[serde(default)]
    entities: BTreeMap<String, Vec<Record>>,
}

/// Tracking backend kept in memory, optionally persisted to a JSON file
/// after every write.
#[derive(Debug, Default)]
pub struct JsonLedger {
    data: LedgerData,
    path: Option<PathBuf>,
}

impl JsonLedger {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open a ledger file; a missing file starts an empty ledger there.
    pub fn open(path: &Path) -> Result<Self, TrackingError> {
        let data = if path.exists() {
            serde_json::from_str(&fs::read_to_string(path)?)?
        } else {
            LedgerData::default()
        };
        Ok(Self {
            data,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn records(&self, entity_type: &str) -> &[Record] {
        self.data
            .entities
            .get(entity_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn persist(&self) -> Result<(), TrackingError> {
        if let Some(path) = &self.path {
            fs::write(path, serde_json::to_string_pretty(&self.data)?)?;
        }
        Ok(())
    }
}

/// Entity links compare by type and id; anything else compares by value.
fn field_matches(actual: Option<&Value>, expected: &Value) -> bool {
    let Some(actual) = actual else {
        return expected.is_null();
    };
    match (actual, expected) {
        (Value::Object(a), Value::Object(b)) if b.contains_key("id") => {
            a.get("id") == b.get("id") && a.get("type") == b.get("type")
        }
        _ => actual == expected,
    }
}

impl TrackingClient for JsonLedger {
    fn find(
        &self,
        entity_type: &str,
        filters: &[Filter],
        fields: &[&str],
    ) -> Result<Vec<Record>, TrackingError> {
        Ok(self
            .records(entity_type)
            .iter()
            .filter(|record| {
                filters
                    .iter()
                    .all(|f| field_matches(record.get(&f.field), &f.value))
            })
            .map(|record| {
                record
                    .iter()
                    .filter(|(k, _)| k.as_str() == "type" || k.as_str() == "id" || fields.contains(&k.as_str()))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .collect())
    }

    fn create(&mut self, entity_type: &str, mut data: Record) -> Result<Record, TrackingError> {
        self.data.last_id += 1;
        data.insert("type".into(), Value::from(entity_type));
        data.insert("id".into(), Value::from(self.data.last_id));
        self.data
            .entities
            .entry(entity_type.to_string())
            .or_default()
            .push(data.clone());
        self.persist()?;
        debug!(entity_type, id = self.data.last_id, "created record");
        Ok(data)
    }

    fn register_publish(&mut self, publish: &PublishRecord) -> Result<Record, TrackingError> {
        match serde_json::to_value(publish)? {
            Value::Object(data) => self.create("TankPublishedFile", data),
            other => Err(TrackingError::Malformed(other.to_string())),
        }
    }
}
