//! Publish Pipeline - Single Entry Point
//!
//! Scan, validate and publish all go through [`PublishPipeline`]. Each task
//! is isolated: its failures are collected into a [`TaskResult`] and the
//! batch moves on. The one exception is a generic path collision under
//! [`CollisionPolicy::AbortBatch`].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::config::{CollisionPolicy, OutputConfig, PipelineConfig};
use crate::context::PublishContext;
use crate::error::TaskError;
use crate::hashing::file_sha256;
use crate::host::{
    FbxExportOptions, Filter, ObjExportOptions, ObjectSet, ProgressSink, Record, SceneInspector,
    TrackingClient,
};
use crate::model::{
    push_failures, ArtifactKind, EntityRef, FieldMapping, FieldValue, Item, OutputKind,
    PublishRecord, Task, TaskResult,
};
use crate::scan::SceneScanner;
use crate::templates::{PathTemplate, TemplateRegistry};
use crate::validation::{HostSession, Validator};

/// Caller-supplied publish parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRequest {
    pub comment: String,
    /// Used when no per-class thumbnail is configured.
    #[serde(default)]
    pub thumbnail_path: Option<PathBuf>,
    /// Tracking task the publishes are filed under.
    #[serde(default)]
    pub tracking_task: Option<EntityRef>,
    pub primary_publish_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishReport {
    pub batch_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Failing tasks only; a task missing here succeeded.
    pub failures: Vec<TaskResult>,
    pub published: Vec<PublishRecord>,
    /// Set when a collision stopped the batch early.
    pub aborted: bool,
}

impl PublishReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && !self.aborted
    }
}

/// Why a task stopped.
enum Halt {
    Task(TaskError),
    Batch(TaskError),
}

impl From<TaskError> for Halt {
    fn from(err: TaskError) -> Self {
        Halt::Task(err)
    }
}

/// Resolved destination shared by all file outputs of one task.
struct Target<'t> {
    template: &'t dyn PathTemplate,
    fields: FieldMapping,
    path: PathBuf,
    version: i64,
}

impl Target<'_> {
    /// Re-derive the destination with a per-item `name` field.
    fn named(&self, name: &str) -> Result<PathBuf, TaskError> {
        let mut fields = self.fields.clone();
        fields.insert("name".to_string(), FieldValue::from(name));
        self.template.apply_fields(&fields).map_err(|e| {
            TaskError::fields(format!("Unable to build publish path for '{}': {}", name, e))
        })
    }
}

/// Tracking-side collaborators for a publish call.
pub struct Tracking<'a> {
    pub client: &'a mut dyn TrackingClient,
    pub progress: &'a mut dyn ProgressSink,
}

/// Pair each item with every configured output offered for its type.
pub fn build_tasks(items: &[Item], outputs: &[OutputConfig]) -> Vec<Task> {
    items
        .iter()
        .flat_map(|item| {
            outputs
                .iter()
                .filter(move |o| o.item_type == item.item_type)
                .map(move |o| Task::new(item.clone(), o.to_output()))
        })
        .collect()
}

/// Create the parent directory of `path` if needed. Existing directories are fine.
pub fn ensure_parent_dir(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.is_dir() => {
            info!("Creating folder {}", parent.display());
            fs::create_dir_all(parent)
        }
        _ => Ok(()),
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// The publish pipeline - single entry point for scan, validate and publish
pub struct PublishPipeline<'a> {
    config: &'a PipelineConfig,
    templates: &'a TemplateRegistry,
    context: &'a PublishContext,
    validator: Validator,
}

impl<'a> PublishPipeline<'a> {
    pub fn new(
        config: &'a PipelineConfig,
        templates: &'a TemplateRegistry,
        context: &'a PublishContext,
    ) -> Self {
        Self {
            config,
            templates,
            context,
            validator: Validator::new(),
        }
    }

    /// The configured work-file template.
    pub fn work_template(&self) -> Option<&'a dyn PathTemplate> {
        self.templates.get(&self.config.work_template)
    }

    pub fn scan(&self, scene: &dyn SceneInspector) -> Vec<Item> {
        SceneScanner::new(scene, self.templates, &self.config.scan).scan(self.context)
    }

    pub fn build_tasks(&self, items: &[Item]) -> Vec<Task> {
        build_tasks(items, &self.config.outputs)
    }

    /// Pre-publish checks. Only failing tasks are returned.
    pub fn validate(
        &self,
        tasks: &[Task],
        host: &mut HostSession<'_>,
        progress: &mut dyn ProgressSink,
    ) -> Vec<TaskResult> {
        self.validator.validate(tasks, host, progress)
    }

    /// Export and register every task, in order.
    pub fn publish(
        &self,
        tasks: &[Task],
        work_template: &dyn PathTemplate,
        request: &PublishRequest,
        host: &mut HostSession<'_>,
        tracking: &mut Tracking<'_>,
    ) -> PublishReport {
        let mut report = PublishReport {
            batch_id: Uuid::new_v4(),
            started_at: Utc::now(),
            failures: vec![],
            published: vec![],
            aborted: false,
        };
        let span = info_span!("publish", batch = %report.batch_id);
        let _guard = span.enter();

        for task in tasks {
            debug!(item = %task.item.name, output = %task.output.name, "starting");
            tracking.progress.report(0.0, Some("Starting..."), Some(task));

            match self.publish_task(task, work_template, request, host, tracking) {
                Ok(Some(record)) => report.published.push(record),
                Ok(None) => {}
                Err(Halt::Task(err)) => {
                    warn!(item = %task.item.name, "{}", err);
                    push_failures(&mut report.failures, task, vec![err]);
                }
                Err(Halt::Batch(err)) => {
                    warn!(item = %task.item.name, "{}; abandoning remaining tasks", err);
                    push_failures(&mut report.failures, task, vec![err]);
                    report.aborted = true;
                    break;
                }
            }

            tracking.progress.report(100.0, None, Some(task));
        }

        info!(
            published = report.published.len(),
            failed = report.failures.len(),
            aborted = report.aborted,
            "publish complete"
        );
        report
    }

    fn publish_task(
        &self,
        task: &Task,
        work_template: &dyn PathTemplate,
        request: &PublishRequest,
        host: &mut HostSession<'_>,
        tracking: &mut Tracking<'_>,
    ) -> Result<Option<PublishRecord>, Halt> {
        let kind = task.output.kind().ok_or_else(|| {
            TaskError::unrecognized_output(&task.item.name, &task.output.name)
        })?;

        // Notes are not files: no path, no collision check.
        if kind == OutputKind::ShotgunNoteCreate {
            self.create_note(request, tracking.client)?;
            return Ok(None);
        }

        let target = self.resolve_target(task, work_template, host.scene)?;

        match kind {
            OutputKind::CameraExport => {
                Ok(Some(self.publish_camera(task, &target, request, host, tracking)?))
            }
            OutputKind::ConeGeoExport => {
                Ok(Some(self.publish_cones(task, &target, request, host, tracking)?))
            }
            OutputKind::ModelGeoExport => {
                Ok(Some(self.publish_geometry(task, &target, request, host, tracking)?))
            }
            OutputKind::LensDistortExport => {
                Ok(Some(self.publish_lens_node(task, &target, request, tracking)?))
            }
            OutputKind::ShotgunNoteCreate => Ok(None),
        }
    }

    /// Work-file fields, generic publish path, collision check and folder creation.
    fn resolve_target(
        &self,
        task: &Task,
        work_template: &dyn PathTemplate,
        scene: &dyn SceneInspector,
    ) -> Result<Target<'a>, Halt> {
        let working_path = scene
            .scene_path()
            .ok_or_else(|| TaskError::fields("The current scene has not been saved"))?;

        let fields = work_template
            .get_fields(Path::new(&working_path))
            .map_err(|e| {
                TaskError::fields(format!(
                    "Unable to read work file fields from '{}': {}",
                    working_path, e
                ))
            })?;

        let version = fields
            .get("version")
            .and_then(FieldValue::as_int)
            .ok_or_else(|| {
                TaskError::fields(format!("Work file '{}' has no version field", working_path))
            })?;

        let template = self
            .templates
            .require(&task.output.publish_template)
            .map_err(|e| TaskError::fields(e.to_string()))?;

        let path = template.apply_fields(&fields).map_err(|e| {
            TaskError::fields(format!(
                "Unable to build publish path for output '{}': {}",
                task.output.name, e
            ))
        })?;

        if path.exists() {
            let err = TaskError::collision(format!(
                "The secondary output '{}' file named '{}' already exists!",
                task.item.item_type,
                path.display()
            ));
            return Err(match self.config.collision_policy {
                CollisionPolicy::SkipTask => Halt::Task(err),
                CollisionPolicy::AbortBatch => Halt::Batch(err),
            });
        }

        ensure_parent_dir(&path).map_err(|e| {
            TaskError::export(format!("Unable to create folder for {}: {}", path.display(), e))
        })?;

        Ok(Target {
            template,
            fields,
            path,
            version,
        })
    }

    fn publish_camera(
        &self,
        task: &Task,
        target: &Target<'_>,
        request: &PublishRequest,
        host: &mut HostSession<'_>,
        tracking: &mut Tracking<'_>,
    ) -> Result<PublishRecord, TaskError> {
        let camera = task.item.leaf_name();
        let path = target.named(camera)?;
        let mut publish_name = camera.to_uppercase();
        if publish_name.is_empty() {
            publish_name = file_name(&path);
        }
        debug!("using name for publish: {}", publish_name);

        if path.exists() {
            return Err(TaskError::collision(format!(
                "The published camera named '{}' already exists!",
                path.display()
            )));
        }
        ensure_parent_dir(&path).map_err(|e| {
            TaskError::export(format!("Unable to create folder for {}: {}", path.display(), e))
        })?;

        let objects = select(host.scene, &task.item.name)
            .ok_or_else(|| TaskError::export(format!("Unable to select camera [{}]", task.item.name)))?;

        tracking.progress.report(20.0, None, Some(task));
        host.exporter
            .export_fbx(&objects, &path, &FbxExportOptions::matchmove_camera())
            .map_err(|e| {
                TaskError::export(format!("Unable to publish camera [{}]: {}", task.item.name, e))
            })?;
        tracking.progress.report(80.0, None, Some(task));

        self.register(
            tracking.client,
            ArtifactKind::Camera,
            OutputKind::CameraExport,
            &path,
            publish_name,
            target.version,
            request,
        )
    }

    fn publish_cones(
        &self,
        task: &Task,
        target: &Target<'_>,
        request: &PublishRequest,
        host: &mut HostSession<'_>,
        tracking: &mut Tracking<'_>,
    ) -> Result<PublishRecord, TaskError> {
        let objects = select(host.scene, &task.item.name)
            .ok_or_else(|| TaskError::export(format!("Unable to select cones [{}]", task.item.name)))?;

        tracking.progress.report(40.0, None, Some(task));
        host.exporter
            .export_obj(&objects, &target.path, &ObjExportOptions::geometry_only())
            .map_err(|e| {
                TaskError::export(format!("Unable to publish cones [{}]: {}", task.item.name, e))
            })?;
        tracking.progress.report(80.0, None, Some(task));

        self.register(
            tracking.client,
            ArtifactKind::Cones,
            OutputKind::ConeGeoExport,
            &target.path,
            "Cones".to_string(),
            target.version,
            request,
        )
    }

    fn publish_geometry(
        &self,
        task: &Task,
        target: &Target<'_>,
        request: &PublishRequest,
        host: &mut HostSession<'_>,
        tracking: &mut Tracking<'_>,
    ) -> Result<PublishRecord, TaskError> {
        // Only the exact object is named, not its parents.
        let leaf = task.item.leaf_name();
        let path = target.named(leaf)?;
        let publish_name = if leaf.is_empty() {
            file_name(&path)
        } else {
            leaf.to_string()
        };

        if path.exists() {
            return Err(TaskError::collision(format!(
                "The geoPublish named '{}' already exists!",
                path.display()
            )));
        }
        ensure_parent_dir(&path).map_err(|e| {
            TaskError::export(format!("Unable to create folder for {}: {}", path.display(), e))
        })?;

        let objects = select(host.scene, &task.item.name).ok_or_else(|| {
            TaskError::export(format!("Unable to select transform [{}]", task.item.name))
        })?;

        tracking.progress.report(60.0, None, Some(task));
        host.exporter
            .export_obj(&objects, &path, &ObjExportOptions::geometry_only())
            .map_err(|e| {
                TaskError::export(format!("Unable to publish model [{}]: {}", task.item.name, e))
            })?;
        tracking.progress.report(80.0, None, Some(task));

        self.register(
            tracking.client,
            ArtifactKind::Model,
            OutputKind::ModelGeoExport,
            &path,
            publish_name,
            target.version,
            request,
        )
    }

    /// Copy the lens script byte-for-byte; the item name is its path.
    fn publish_lens_node(
        &self,
        task: &Task,
        target: &Target<'_>,
        request: &PublishRequest,
        tracking: &mut Tracking<'_>,
    ) -> Result<PublishRecord, TaskError> {
        let source = Path::new(&task.item.name);
        let destination = &target.path;
        let unwritable = || {
            TaskError::copy(format!(
                "Unable to copy to {}, is this path writable?",
                destination.display()
            ))
        };

        debug!("copying {} => {}", source.display(), destination.display());
        fs::copy(source, destination).map_err(|e| {
            warn!("copy failed: {}", e);
            unwritable()
        })?;

        let source_digest = file_sha256(source).map_err(|_| unwritable())?;
        let copied_digest = file_sha256(destination).map_err(|_| unwritable())?;
        if source_digest != copied_digest {
            return Err(TaskError::copy(format!(
                "Copied lens file {} does not match {}",
                destination.display(),
                source.display()
            )));
        }

        self.register(
            tracking.client,
            ArtifactKind::LensNode,
            OutputKind::LensDistortExport,
            destination,
            "lensDistort".to_string(),
            target.version,
            request,
        )
    }

    fn create_note(
        &self,
        request: &PublishRequest,
        client: &mut dyn TrackingClient,
    ) -> Result<(), TaskError> {
        let filters = [Filter::is("entity", self.context.entity_value())];
        let tasks = client.find("Task", &filters, &["id", "content"]).map_err(|e| {
            TaskError::registration(format!(
                "Unable to find tasks for {}: {}",
                self.context.entity_name(),
                e
            ))
        })?;
        debug!(count = tasks.len(), "found tasks");

        let mut data = Record::new();
        data.insert("project".into(), json!(self.context.project));
        data.insert("note_links".into(), json!([self.context.entity]));
        data.insert("user".into(), json!(self.context.user));
        data.insert(
            "subject".into(),
            json!(format!(
                "{} {}",
                self.config.note.subject_prefix,
                self.context.entity_name()
            )),
        );
        data.insert("content".into(), json!(request.comment));
        data.insert("sg_note_type".into(), json!(self.config.note.note_type));
        data.insert(
            "tasks".into(),
            Value::Array(tasks.into_iter().map(Value::Object).collect()),
        );

        let response = client
            .create("Note", data)
            .map_err(|e| TaskError::registration(format!("Unable to create Note! {}", e)))?;
        if !has_id(&response) {
            return Err(TaskError::registration(format!(
                "Unable to create Note! {}",
                Value::Object(response)
            )));
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn register(
        &self,
        client: &mut dyn TrackingClient,
        artifact: ArtifactKind,
        output: OutputKind,
        path: &Path,
        name: String,
        version_number: i64,
        request: &PublishRequest,
    ) -> Result<PublishRecord, TaskError> {
        let thumbnail_path = self
            .config
            .thumbnail_for(output)
            .or_else(|| request.thumbnail_path.clone())
            .map(|p| path_string(&p));

        let record = PublishRecord {
            path: path_string(path),
            name,
            tank_type: artifact.tank_type().to_string(),
            version_number,
            task: request.tracking_task.clone(),
            entity: Some(self.context.entity.clone()),
            comment: request.comment.clone(),
            thumbnail_path,
            dependency_paths: vec![request.primary_publish_path.clone()],
            created_at: Utc::now(),
        };

        debug!(path = %record.path, tank_type = %record.tank_type, "registering publish");
        let response = client.register_publish(&record).map_err(|e| {
            TaskError::registration(format!("Unable to register publish {}: {}", record.path, e))
        })?;
        if !has_id(&response) {
            return Err(TaskError::registration(format!(
                "Unable to register publish {}! {}",
                record.path,
                Value::Object(response)
            )));
        }
        Ok(record)
    }
}

/// Visible objects under `root`, hierarchy included. `None` when nothing selectable.
fn select(scene: &dyn SceneInspector, root: &str) -> Option<ObjectSet> {
    let objects = scene
        .with_hierarchy(&ObjectSet::single(root))
        .and_then(|all| scene.visible(&all));
    match objects {
        Ok(objects) if !objects.is_empty() => Some(objects),
        Ok(_) => None,
        Err(e) => {
            warn!("Unable to select {}: {}", root, e);
            None
        }
    }
}

fn has_id(record: &Record) -> bool {
    record.get("id").map_or(false, |id| !id.is_null())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ItemType;

    #[test]
    fn test_ensure_parent_dir_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("publish/geo/sh010_geo_v001.obj");
        ensure_parent_dir(&path).unwrap();
        ensure_parent_dir(&path).unwrap();
        assert!(dir.path().join("publish/geo").is_dir());
    }

    #[test]
    fn test_build_tasks_pairs_by_item_type() {
        let outputs = vec![
            OutputConfig {
                name: "model_geo_export".into(),
                publish_template: "geo".into(),
                tank_type: "Matchmove Model".into(),
                item_type: ItemType::ModelGeo,
            },
            OutputConfig {
                name: "shotgun_note_create".into(),
                publish_template: String::new(),
                tank_type: "Note".into(),
                item_type: ItemType::ShotgunNote,
            },
        ];
        let items = vec![
            Item::new(ItemType::WorkFile, "sh010.ma", ""),
            Item::new(ItemType::ModelGeo, "|Scene|geo|propA", "model"),
            Item::new(ItemType::ModelGeo, "|Scene|geo|propB", "model"),
            Item::new(ItemType::ShotgunNote, "comments", ""),
        ];

        let tasks = build_tasks(&items, &outputs);
        let names: Vec<_> = tasks
            .iter()
            .map(|t| (t.item.name.as_str(), t.output.name.as_str()))
            .collect();
        assert_eq!(
            names,
            vec![
                ("|Scene|geo|propA", "model_geo_export"),
                ("|Scene|geo|propB", "model_geo_export"),
                ("comments", "shotgun_note_create"),
            ]
        );
    }

    #[test]
    fn test_has_id() {
        let mut record = Record::new();
        assert!(!has_id(&record));
        record.insert("id".into(), Value::Null);
        assert!(!has_id(&record));
        record.insert("id".into(), json!(42));
        assert!(has_id(&record));
    }
}
