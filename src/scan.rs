//! Scene Scanner
//!
//! Builds the ordered list of publishable items for the open scene. A step
//! that cannot resolve contributes no items; scanning itself never fails.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::config::ScanSettings;
use crate::context::PublishContext;
use crate::host::{Channel, SceneInspector};
use crate::model::{Item, ItemType};
use crate::templates::TemplateRegistry;

pub struct SceneScanner<'a> {
    scene: &'a dyn SceneInspector,
    templates: &'a TemplateRegistry,
    settings: &'a ScanSettings,
}

impl<'a> SceneScanner<'a> {
    pub fn new(
        scene: &'a dyn SceneInspector,
        templates: &'a TemplateRegistry,
        settings: &'a ScanSettings,
    ) -> Self {
        Self {
            scene,
            templates,
            settings,
        }
    }

    pub fn scan(&self, context: &PublishContext) -> Vec<Item> {
        let mut items = vec![self.work_file()];
        items.extend(self.baked_cameras());
        items.extend(self.cone_groups());
        items.extend(self.geometry());
        items.extend(self.lens_nodes(context));
        items.push(Item::new(
            ItemType::ShotgunNote,
            "comments",
            "upload comments as a new Shot Note",
        ));

        info!(count = items.len(), "scan complete");
        items
    }

    fn work_file(&self) -> Item {
        let name = self
            .scene
            .scene_path()
            .and_then(|p| {
                Path::new(&p)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
            })
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| self.settings.work_file_fallback.clone());
        Item::new(ItemType::WorkFile, name, "")
    }

    fn baked_cameras(&self) -> Vec<Item> {
        let cameras = match self.scene.perspective_cameras() {
            Ok(cameras) => cameras,
            Err(e) => {
                warn!("Unable to list cameras: {}", e);
                return vec![];
            }
        };

        cameras
            .into_iter()
            .filter(|camera| self.is_baked(camera))
            .map(|camera| {
                debug!(%camera, "found camera");
                Item::new(ItemType::Camera, camera, "scene renderable camera")
            })
            .collect()
    }

    /// Every channel in [`Channel::BAKED`] is driven; stops at the first that isn't.
    fn is_baked(&self, camera: &str) -> bool {
        for channel in Channel::BAKED {
            match self.scene.is_connected(camera, channel) {
                Ok(true) => {}
                Ok(false) => return false,
                Err(e) => {
                    warn!("Unable to query {}.{}: {}", camera, channel.short_name(), e);
                    return false;
                }
            }
        }
        true
    }

    fn cone_groups(&self) -> Vec<Item> {
        self.transforms(&self.settings.cones_pattern)
            .into_iter()
            .map(|group| {
                debug!(%group, "found cones group");
                Item::new(ItemType::ConesGeo, group, "cones")
            })
            .collect()
    }

    fn geometry(&self) -> Vec<Item> {
        self.transforms(&self.settings.geometry_pattern)
            .into_iter()
            .map(|geo| {
                debug!(%geo, "found geo");
                Item::new(ItemType::ModelGeo, geo, "model")
            })
            .collect()
    }

    fn transforms(&self, pattern: &str) -> Vec<String> {
        self.scene.list_transforms(pattern).unwrap_or_else(|e| {
            warn!("Unable to list '{}': {}", pattern, e);
            vec![]
        })
    }

    fn lens_nodes(&self, context: &PublishContext) -> Vec<Item> {
        let Some(template) = self.templates.get(&self.settings.lens_work_template) else {
            warn!(
                "Lens template '{}' is not configured",
                self.settings.lens_work_template
            );
            return vec![];
        };

        match template.paths_matching(&context.fields, &["version"]) {
            Ok(paths) => paths
                .into_iter()
                .map(|path| {
                    let lens = path.to_string_lossy().into_owned();
                    debug!(%lens, "found lens");
                    Item::new(
                        ItemType::LensNode,
                        lens,
                        "Lens distortion nuke node exported from 3DEqualizer",
                    )
                })
                .collect(),
            Err(e) => {
                warn!("Unable to search for lens files: {}", e);
                vec![]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HostError;
    use crate::host::ObjectSet;
    use crate::model::EntityRef;
    use std::cell::RefCell;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeScene {
        path: Option<String>,
        cameras: Vec<String>,
        connected: HashMap<String, Vec<Channel>>,
        transforms: HashMap<String, Vec<String>>,
        queried: RefCell<Vec<(String, Channel)>>,
    }

    impl SceneInspector for FakeScene {
        fn scene_path(&self) -> Option<String> {
            self.path.clone()
        }

        fn perspective_cameras(&self) -> Result<Vec<String>, HostError> {
            Ok(self.cameras.clone())
        }

        fn is_connected(&self, object: &str, channel: Channel) -> Result<bool, HostError> {
            self.queried.borrow_mut().push((object.to_string(), channel));
            Ok(self
                .connected
                .get(object)
                .map_or(false, |c| c.contains(&channel)))
        }

        fn list_transforms(&self, pattern: &str) -> Result<Vec<String>, HostError> {
            self.transforms
                .get(pattern)
                .cloned()
                .ok_or_else(|| HostError::NoSuchObject(pattern.to_string()))
        }

        fn with_hierarchy(&self, objects: &ObjectSet) -> Result<ObjectSet, HostError> {
            Ok(objects.clone())
        }

        fn visible(&self, objects: &ObjectSet) -> Result<ObjectSet, HostError> {
            Ok(objects.clone())
        }
    }

    fn context() -> PublishContext {
        PublishContext::new(EntityRef::new("Project", 1), EntityRef::new("Shot", 2))
    }

    #[test]
    fn test_unsaved_scene_falls_back() {
        let scene = FakeScene::default();
        let registry = TemplateRegistry::new();
        let settings = ScanSettings::default();
        let items = SceneScanner::new(&scene, &registry, &settings).scan(&context());

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].item_type, ItemType::WorkFile);
        assert_eq!(items[0].name, "matchmove");
        assert_eq!(items[1].item_type, ItemType::ShotgunNote);
    }

    #[test]
    fn test_camera_channel_short_circuit() {
        let mut scene = FakeScene {
            path: Some("/shows/demo/sh010_matchmove_v001.ma".into()),
            cameras: vec!["persp".into(), "LEFT".into(), "RIGHT".into()],
            ..Default::default()
        };
        scene
            .connected
            .insert("LEFT".into(), Channel::BAKED.to_vec());
        // RIGHT is missing ry only.
        scene.connected.insert(
            "RIGHT".into(),
            Channel::BAKED
                .into_iter()
                .filter(|c| *c != Channel::Ry)
                .collect(),
        );

        let registry = TemplateRegistry::new();
        let settings = ScanSettings::default();
        let items = SceneScanner::new(&scene, &registry, &settings).scan(&context());

        assert_eq!(items[0].name, "sh010_matchmove_v001.ma");
        let cameras: Vec<_> = items
            .iter()
            .filter(|i| i.item_type == ItemType::Camera)
            .map(|i| i.name.as_str())
            .collect();
        assert_eq!(cameras, vec!["LEFT"]);

        let queried = scene.queried.borrow();
        let persp: Vec<_> = queried.iter().filter(|(o, _)| o == "persp").collect();
        assert_eq!(persp.len(), 1);
        let right: Vec<_> = queried
            .iter()
            .filter(|(o, _)| o == "RIGHT")
            .map(|(_, c)| *c)
            .collect();
        assert_eq!(right.last(), Some(&Channel::Ry));
        assert_eq!(right.len(), 5);
    }

    #[test]
    fn test_groups_and_geometry_one_item_each() {
        let mut scene = FakeScene::default();
        scene
            .transforms
            .insert("|Scene|cones*".into(), vec!["|Scene|cones".into()]);
        scene.transforms.insert(
            "|Scene|geo|*".into(),
            vec!["|Scene|geo|propA".into(), "|Scene|geo|propB".into()],
        );

        let registry = TemplateRegistry::new();
        let settings = ScanSettings::default();
        let items = SceneScanner::new(&scene, &registry, &settings).scan(&context());

        let kinds: Vec<_> = items.iter().map(|i| i.item_type).collect();
        assert_eq!(
            kinds,
            vec![
                ItemType::WorkFile,
                ItemType::ConesGeo,
                ItemType::ModelGeo,
                ItemType::ModelGeo,
                ItemType::ShotgunNote
            ]
        );
    }
}
