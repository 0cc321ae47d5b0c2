//! Pipeline Configuration
//!
//! Loaded from TOML. Every section has defaults so a config only needs the
//! templates and outputs it actually uses.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::TemplateError;
use crate::model::{ItemType, Output, OutputKind};
use crate::templates::TemplateRegistry;
use crate::ENGINE_VERSION;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid version requirement '{0}'")]
    InvalidVersion(String),

    #[error("Config requires engine >= {required}, current is {current}")]
    EngineVersionMismatch { required: String, current: String },

    #[error("Output '{output}' references unknown template '{template}'")]
    UnknownTemplate { output: String, template: String },

    #[error(transparent)]
    Template(#[from] TemplateError),
}

/// What to do when a generic publish path already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Report the task and move on to the next one.
    #[default]
    SkipTask,
    /// Report the task and stop the whole publish call.
    AbortBatch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub name: String,
    pub publish_template: String,
    pub tank_type: String,
    /// Scanned item type this output is offered for.
    pub item_type: ItemType,
}

impl OutputConfig {
    pub fn to_output(&self) -> Output {
        Output {
            name: self.name.clone(),
            publish_template: self.publish_template.clone(),
            tank_type: self.tank_type.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSettings {
    #[serde(default = "default_cones_pattern")]
    pub cones_pattern: String,
    #[serde(default = "default_geometry_pattern")]
    pub geometry_pattern: String,
    #[serde(default = "default_lens_work_template")]
    pub lens_work_template: String,
    #[serde(default = "default_work_file_fallback")]
    pub work_file_fallback: String,
}

fn default_cones_pattern() -> String {
    "|Scene|cones*".to_string()
}

fn default_geometry_pattern() -> String {
    "|Scene|geo|*".to_string()
}

fn default_lens_work_template() -> String {
    "3de_shot_lens_work".to_string()
}

fn default_work_file_fallback() -> String {
    "matchmove".to_string()
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            cones_pattern: default_cones_pattern(),
            geometry_pattern: default_geometry_pattern(),
            lens_work_template: default_lens_work_template(),
            work_file_fallback: default_work_file_fallback(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteSettings {
    #[serde(default = "default_note_type")]
    pub note_type: String,
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
}

fn default_note_type() -> String {
    "Matchmove".to_string()
}

fn default_subject_prefix() -> String {
    "Matchmove Publish on".to_string()
}

impl Default for NoteSettings {
    fn default() -> Self {
        Self {
            note_type: default_note_type(),
            subject_prefix: default_subject_prefix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_engine_min_version")]
    pub engine_min_version: String,
    /// Directory templates resolve against.
    #[serde(default)]
    pub root: PathBuf,
    #[serde(default = "default_work_template")]
    pub work_template: String,
    #[serde(default)]
    pub templates: BTreeMap<String, String>,
    #[serde(default)]
    pub outputs: Vec<OutputConfig>,
    #[serde(default)]
    pub scan: ScanSettings,
    #[serde(default)]
    pub collision_policy: CollisionPolicy,
    /// Holds the per-class default thumbnails.
    #[serde(default)]
    pub icons_dir: Option<PathBuf>,
    #[serde(default)]
    pub note: NoteSettings,
}

fn default_engine_min_version() -> String {
    crate::MIN_ENGINE_VERSION.to_string()
}

fn default_work_template() -> String {
    "maya_shot_work".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            engine_min_version: default_engine_min_version(),
            root: PathBuf::new(),
            work_template: default_work_template(),
            templates: BTreeMap::new(),
            outputs: vec![],
            scan: ScanSettings::default(),
            collision_policy: CollisionPolicy::default(),
            icons_dir: None,
            note: NoteSettings::default(),
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&content)?;

        // Relative roots are relative to the config file.
        if config.root.is_relative() {
            if let Some(parent) = path.parent() {
                config.root = parent.join(&config.root);
            }
        }
        if let Some(icons) = config.icons_dir.as_mut() {
            if icons.is_relative() {
                if let Some(parent) = path.parent() {
                    *icons = parent.join(&*icons);
                }
            }
        }
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.check_engine_version()?;
        config.check_outputs()?;
        Ok(config)
    }

    pub fn template_registry(&self) -> Result<TemplateRegistry, ConfigError> {
        Ok(TemplateRegistry::from_patterns(&self.root, &self.templates)?)
    }

    pub fn outputs(&self) -> Vec<Output> {
        self.outputs.iter().map(OutputConfig::to_output).collect()
    }

    /// Default thumbnail for an output class, if an icons directory is set.
    pub fn thumbnail_for(&self, kind: OutputKind) -> Option<PathBuf> {
        let file = match kind {
            OutputKind::CameraExport => "camera_track_thumb.png",
            OutputKind::ConeGeoExport => "matchmove_cones_thumb.png",
            OutputKind::ModelGeoExport => "marker_geo_thumb.png",
            OutputKind::LensDistortExport => "lens_distortion_thumb.png",
            OutputKind::ShotgunNoteCreate => return None,
        };
        self.icons_dir.as_ref().map(|dir| dir.join(file))
    }

    fn check_engine_version(&self) -> Result<(), ConfigError> {
        let engine_ver = semver::Version::parse(ENGINE_VERSION)
            .map_err(|_| ConfigError::InvalidVersion(ENGINE_VERSION.to_string()))?;
        let min_ver = semver::Version::parse(&self.engine_min_version)
            .map_err(|_| ConfigError::InvalidVersion(self.engine_min_version.clone()))?;

        if engine_ver < min_ver {
            return Err(ConfigError::EngineVersionMismatch {
                required: self.engine_min_version.clone(),
                current: ENGINE_VERSION.to_string(),
            });
        }
        Ok(())
    }

    fn check_outputs(&self) -> Result<(), ConfigError> {
        for output in &self.outputs {
            // Notes are not files and need no template.
            if output.name == OutputKind::ShotgunNoteCreate.as_str() {
                continue;
            }
            if !self.templates.contains_key(&output.publish_template) {
                return Err(ConfigError::UnknownTemplate {
                    output: output.name.clone(),
                    template: output.publish_template.clone(),
                });
            }
        }
        Ok(())
    }
}
