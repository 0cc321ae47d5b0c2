//! Scene-Load Dispatch Tests

use std::fs;

use matchmove_publish::load::{GeoDisplay, TakeSelection};
use matchmove_publish::model::{EntityRef, PublishRecord};
use matchmove_publish::offline::{CapabilityState, JsonLedger, SceneSnapshot};
use matchmove_publish::{
    fetch_published_file, load_artifact, ArtifactKind, Capability, LoadAction, LoadError,
    PublishedFile, TrackingClient, TrackingError,
};

fn publish(ledger: &mut JsonLedger, kind: ArtifactKind, name: &str, version: i64) -> i64 {
    let record = PublishRecord {
        path: format!("/shows/demo/sh010/publish/{}_v{:03}", name, version),
        name: name.into(),
        tank_type: kind.tank_type().into(),
        version_number: version,
        task: None,
        entity: Some(EntityRef::new("Shot", 2).named("sh010")),
        comment: String::new(),
        thumbnail_path: None,
        dependency_paths: vec![],
        created_at: chrono::Utc::now(),
    };
    let response = ledger.register_publish(&record).unwrap();
    response["id"].as_i64().unwrap()
}

fn fetch(ledger: &JsonLedger, id: i64) -> PublishedFile {
    fetch_published_file(ledger, id).unwrap()
}

#[test]
fn invariant_maya_model_import_uses_versioned_name() {
    let mut ledger = JsonLedger::in_memory();
    let id = publish(&mut ledger, ArtifactKind::Model, "pCube1", 3);
    let record = fetch(&ledger, id);
    assert_eq!(record.tank_type, "Matchmove Model");

    let mut scene = SceneSnapshot::default();
    let mut errors: Vec<String> = vec![];
    let action = load_artifact(
        "tk-maya",
        "/shows/demo/sh010/publish/geo/sh010_pCube1_geo_v003.obj",
        &record,
        &mut scene,
        &mut errors,
    )
    .unwrap();

    assert!(errors.is_empty());
    match action {
        Some(LoadAction::ImportGeometry { name, .. }) => {
            assert!(name.ends_with("_geo_v003"));
            assert_eq!(name, "sh010_pCube1_geo_v003");
        }
        other => panic!("unexpected action {:?}", other),
    }
    assert_eq!(scene.loaded.len(), 1);
}

#[test]
fn invariant_unsupported_extension_reports_once_and_loads_nothing() {
    let mut ledger = JsonLedger::in_memory();
    let id = publish(&mut ledger, ArtifactKind::Model, "pCube1", 3);
    let record = fetch(&ledger, id);

    let mut scene = SceneSnapshot::default();
    let mut errors: Vec<String> = vec![];
    let action = load_artifact("tk-maya", "/shows/demo/notes.txt", &record, &mut scene, &mut errors)
        .unwrap();

    assert!(action.is_none());
    assert_eq!(
        errors,
        vec!["Unsupported file extension for /shows/demo/notes.txt! Nothing will be loaded."]
    );
    assert!(scene.loaded.is_empty());
}

#[test]
fn invariant_maya_fbx_load_needs_plugin() {
    let mut ledger = JsonLedger::in_memory();
    let id = publish(&mut ledger, ArtifactKind::Camera, "LEFT", 1);
    let record = fetch(&ledger, id);

    let mut scene = SceneSnapshot::default().with_capability(Capability::Fbx, CapabilityState::Missing);
    let mut errors: Vec<String> = vec![];
    let action = load_artifact("tk-maya", "/a/cam.fbx", &record, &mut scene, &mut errors).unwrap();
    assert!(action.is_none());
    assert_eq!(
        errors,
        vec!["Unable to load fbxmaya plugin. We will be unable to load published cameras"]
    );
    assert!(scene.loaded.is_empty());

    let mut scene = SceneSnapshot::default();
    let mut errors: Vec<String> = vec![];
    let action = load_artifact("tk-maya", "/a/cam.fbx", &record, &mut scene, &mut errors).unwrap();
    assert!(matches!(
        action,
        Some(LoadAction::ImportCamera { options, .. }) if options.cameras && options.merge
    ));
}

#[test]
fn invariant_nuke_builds_nodes_by_tank_type() {
    let mut ledger = JsonLedger::in_memory();
    let camera = publish(&mut ledger, ArtifactKind::Camera, "LEFT", 12);
    let cones = publish(&mut ledger, ArtifactKind::Cones, "Cones", 4);
    let lens = publish(&mut ledger, ArtifactKind::LensNode, "lensDistort", 4);

    let mut scene = SceneSnapshot::default();
    let mut errors: Vec<String> = vec![];

    let action = load_artifact("tk-nuke", "/a/cam.fbx", &fetch(&ledger, camera), &mut scene, &mut errors)
        .unwrap();
    assert_eq!(
        action,
        Some(LoadAction::CameraNode {
            name: "sh010_LEFT_v012".into(),
            path: "/a/cam.fbx".into(),
            take: TakeSelection::Last,
        })
    );

    let action = load_artifact("tk-nuke", "/a/cones.obj", &fetch(&ledger, cones), &mut scene, &mut errors)
        .unwrap();
    assert!(matches!(
        action,
        Some(LoadAction::GeoReadNode { name, display: GeoDisplay::SolidLines, .. }) if name == "sh010_Cones_v004"
    ));

    let action = load_artifact("tk-nuke", "/a/lens.txt", &fetch(&ledger, lens), &mut scene, &mut errors)
        .unwrap();
    assert!(action.is_none());
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("Lens is not a nuke script!"));
    assert_eq!(scene.loaded.len(), 2);
}

#[test]
fn invariant_windows_paths_are_normalized() {
    let mut ledger = JsonLedger::in_memory();
    let id = publish(&mut ledger, ArtifactKind::LensNode, "lensDistort", 1);
    let mut scene = SceneSnapshot::default();
    let mut errors: Vec<String> = vec![];

    let action = load_artifact(
        "tk-nuke",
        "P:\\shows\\demo\\sh010_lens_v001.nk",
        &fetch(&ledger, id),
        &mut scene,
        &mut errors,
    )
    .unwrap();
    assert_eq!(
        action,
        Some(LoadAction::PasteNodes {
            path: "P:/shows/demo/sh010_lens_v001.nk".into()
        })
    );
}

#[test]
fn invariant_unknown_host_and_unrouted_combinations_fail() {
    let mut ledger = JsonLedger::in_memory();
    let id = publish(&mut ledger, ArtifactKind::Model, "pCube1", 3);
    let mut record = fetch(&ledger, id);
    let mut scene = SceneSnapshot::default();
    let mut errors: Vec<String> = vec![];

    let err = load_artifact("tk-houdini", "/a/geo.obj", &record, &mut scene, &mut errors).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Don't know how to load file into unknown engine tk-houdini"
    );

    record.tank_type = "Rendered Image".into();
    assert!(matches!(
        load_artifact("tk-nuke", "/a/beauty.exr", &record, &mut scene, &mut errors),
        Err(LoadError::UnhandledCombination { .. })
    ));
    assert!(errors.is_empty());
    assert!(scene.loaded.is_empty());
}

#[test]
fn invariant_merge_hosts_check_the_file_exists() {
    let dir = tempfile::tempdir().unwrap();
    let fbx = dir.path().join("sh010_LEFT_cam_v001.fbx");
    fs::write(&fbx, "fbx").unwrap();
    let fbx = fbx.to_string_lossy().into_owned();

    let mut ledger = JsonLedger::in_memory();
    let id = publish(&mut ledger, ArtifactKind::Camera, "LEFT", 1);
    let record = fetch(&ledger, id);
    let mut scene = SceneSnapshot::default();
    let mut errors: Vec<String> = vec![];

    let action = load_artifact("tk-motionbuilder", &fbx, &record, &mut scene, &mut errors).unwrap();
    assert!(matches!(action, Some(LoadAction::MergeScene { .. })));

    let action = load_artifact("tk-3dsmax", &fbx, &record, &mut scene, &mut errors).unwrap();
    assert!(matches!(action, Some(LoadAction::ImportFile { .. })));

    let missing = dir.path().join("gone.fbx").to_string_lossy().into_owned();
    let action = load_artifact("tk-motionbuilder", &missing, &record, &mut scene, &mut errors).unwrap();
    assert!(action.is_none());
    assert_eq!(errors, vec![format!("The file {} does not exist.", missing)]);

    let action = load_artifact("tk-photoshop", "/a/plate.psd", &record, &mut scene, &mut errors).unwrap();
    assert!(matches!(action, Some(LoadAction::OpenDocument { .. })));
    assert_eq!(scene.loaded.len(), 3);
}

#[test]
fn invariant_missing_publish_record_is_an_error() {
    let ledger = JsonLedger::in_memory();
    assert!(matches!(
        fetch_published_file(&ledger, 42),
        Err(TrackingError::NotFound { id: 42, .. })
    ));
}
