//! Pre-Publish Validation - Rule/Output Separation
//!
//! Rules produce task errors.
//! The rule table maps each output kind to the rules it needs.

use tracing::{debug, info};

use crate::error::TaskError;
use crate::host::{Capability, ExportEngine, ObjectSet, ProgressSink, SceneInspector};
use crate::model::{push_failures, OutputKind, Task, TaskResult};

/// Host access handed to rules.
pub struct HostSession<'a> {
    pub scene: &'a dyn SceneInspector,
    pub exporter: &'a mut dyn ExportEngine,
}

/// Validation rule trait - produces errors, never touches files
pub trait ValidationRule {
    fn name(&self) -> &'static str;
    fn check(&self, task: &Task, host: &mut HostSession<'_>) -> Vec<TaskError>;
}

// --- Concrete Rules ---

/// The export plugin for an output class can be activated.
pub struct CapabilityRule {
    pub capability: Capability,
    /// What gets exported, for the error message.
    pub subject: &'static str,
}

impl ValidationRule for CapabilityRule {
    fn name(&self) -> &'static str {
        "capability"
    }

    fn check(&self, _task: &Task, host: &mut HostSession<'_>) -> Vec<TaskError> {
        let plugin = self.capability.plugin_name();
        match host.exporter.probe(self.capability) {
            Ok(true) => vec![],
            Ok(false) => vec![TaskError::capability_missing(format!(
                "Unable to load {} plugin. We will be unable to export {} for publish!",
                plugin, self.subject
            ))],
            Err(e) => vec![TaskError::capability_unknown(format!(
                "Unable to determine whether the {} plugin is available: {}",
                plugin, e
            ))],
        }
    }
}

/// Geometry must be visible to be exported.
pub struct VisibleGeometryRule;

impl ValidationRule for VisibleGeometryRule {
    fn name(&self) -> &'static str {
        "visible_geometry"
    }

    fn check(&self, task: &Task, host: &mut HostSession<'_>) -> Vec<TaskError> {
        let hidden = host
            .scene
            .visible(&ObjectSet::single(task.item.name.clone()))
            .map_or(true, |visible| visible.is_empty());

        if hidden {
            vec![TaskError::precondition(
                "Geometry is hidden. Unhide or deselect to continue.",
            )]
        } else {
            vec![]
        }
    }
}

/// Validator orchestrates rules per output kind
pub struct Validator {
    camera: Vec<Box<dyn ValidationRule>>,
    cones: Vec<Box<dyn ValidationRule>>,
    model: Vec<Box<dyn ValidationRule>>,
}

impl Validator {
    pub fn new() -> Self {
        Self {
            camera: vec![Box::new(CapabilityRule {
                capability: Capability::Fbx,
                subject: "cameras",
            })],
            cones: vec![Box::new(CapabilityRule {
                capability: Capability::Obj,
                subject: "cones",
            })],
            model: vec![
                Box::new(CapabilityRule {
                    capability: Capability::Obj,
                    subject: "geo",
                }),
                Box::new(VisibleGeometryRule),
            ],
        }
    }

    /// Rules for an output, `None` for outputs nobody knows how to publish.
    pub fn rules_for(&self, kind: Option<OutputKind>) -> Option<&[Box<dyn ValidationRule>]> {
        match kind? {
            OutputKind::CameraExport => Some(self.camera.as_slice()),
            OutputKind::ConeGeoExport => Some(self.cones.as_slice()),
            OutputKind::ModelGeoExport => Some(self.model.as_slice()),
            OutputKind::LensDistortExport | OutputKind::ShotgunNoteCreate => Some(&[][..]),
        }
    }

    /// Check every task; only tasks with errors are returned.
    pub fn validate(
        &self,
        tasks: &[Task],
        host: &mut HostSession<'_>,
        progress: &mut dyn ProgressSink,
    ) -> Vec<TaskResult> {
        let mut results = vec![];

        for task in tasks {
            debug!(item = %task.item.name, output = %task.output.name, "validating");
            progress.report(0.0, Some("Validating"), Some(task));

            let errors = match self.rules_for(task.output.kind()) {
                Some(rules) => rules
                    .iter()
                    .flat_map(|rule| {
                        let errors = rule.check(task, host);
                        if !errors.is_empty() {
                            debug!(rule = rule.name(), item = %task.item.name, "rule failed");
                        }
                        errors
                    })
                    .collect(),
                None => vec![TaskError::unrecognized_output(
                    &task.item.name,
                    &task.output.name,
                )],
            };

            push_failures(&mut results, task, errors);
            progress.report(100.0, None, Some(task));
        }

        info!(tasks = tasks.len(), failed = results.len(), "pre-publish complete");
        results
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}
