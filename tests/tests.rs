//! Integration tests exercising the crate's public surface against a
//! synthetic project directory, mirroring the on-disk layout the
//! Projector expects (`odm_dem/`, `odm_report/shots.geojson`,
//! `cameras.json`) without depending on a live dataset.

use std::io::Write;

use odm_projector::{
    cam2geojson_value, Projector, ProjectorError, ProjectorOptions, WorldHit,
};

fn write_minimal_project(root: &std::path::Path) {
    std::fs::create_dir_all(root.join("odm_dem")).unwrap();
    std::fs::create_dir_all(root.join("odm_report")).unwrap();

    let mut shots = std::fs::File::create(root.join("odm_report/shots.geojson")).unwrap();
    write!(
        shots,
        r#"{{
            "type": "FeatureCollection",
            "features": [
                {{"properties": {{"camera": "v2 cam0", "filename": "DJI_0001.JPG",
                    "focal": 0.85, "translation": [500000.0, 5000000.0, 150.0],
                    "rotation": [0.0, 0.0, 0.0], "width": 4000, "height": 3000}}}},
                {{"properties": {{"filename": "DJI_0002.JPG"}}}}
            ]
        }}"#
    )
    .unwrap();

    let mut cameras = std::fs::File::create(root.join("cameras.json")).unwrap();
    write!(
        cameras,
        r#"{{
            "cam0": {{"projection_type": "brown", "width": 4000, "height": 3000,
                "focal": 0.85, "c_x": 0.0, "c_y": 0.0,
                "k1": -0.05, "k2": 0.01, "p1": 0.0, "p2": 0.0, "k3": 0.0}},
            "cam1": {{"projection_type": "fisheye", "width": 100, "height": 100}}
        }}"#
    )
    .unwrap();
}

#[test]
fn loads_shots_skipping_incomplete_features() {
    let dir = tempfile::tempdir().unwrap();
    write_minimal_project(dir.path());

    // No DEM on disk yet; construction itself does not touch the DEM.
    let proj = Projector::new(dir.path(), ProjectorOptions::default()).unwrap();

    // DJI_0002.JPG lacks focal/dimensions and must have been skipped at
    // load time, so looking it up through cam2world fails as unknown.
    let err = proj.cam2world("DJI_0002.JPG", &[(0.0, 0.0)], false);
    assert!(matches!(err, Err(ProjectorError::InvalidArg(_))));
}

#[test]
fn unknown_image_name_is_invalid_arg() {
    let dir = tempfile::tempdir().unwrap();
    write_minimal_project(dir.path());
    let proj = Projector::new(dir.path(), ProjectorOptions::default()).unwrap();

    let err = proj.cam2world("does-not-exist.JPG", &[(10.0, 10.0)], false);
    assert!(matches!(err, Err(ProjectorError::InvalidArg(_))));
}

#[test]
fn even_z_sample_window_is_rejected_at_construction() {
    let dir = tempfile::tempdir().unwrap();
    write_minimal_project(dir.path());

    let mut options = ProjectorOptions::default();
    options.z_sample_window = 4;
    let err = Projector::new(dir.path(), options);
    assert!(matches!(err, Err(ProjectorError::InvalidArg(_))));
}

#[test]
fn missing_project_directory_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("does-not-exist");
    let err = Projector::new(&missing, ProjectorOptions::default());
    assert!(matches!(err, Err(ProjectorError::Io { .. })));
}

#[test]
fn touching_a_missing_dem_surfaces_as_io_error() {
    let dir = tempfile::tempdir().unwrap();
    write_minimal_project(dir.path());
    let proj = Projector::new(dir.path(), ProjectorOptions::default()).unwrap();

    // DJI_0001.JPG loaded fine, but odm_dem/dsm.tif was never written,
    // so the lazy DEM open on first cam2world call must fail with Io.
    let err = proj.cam2world("DJI_0001.JPG", &[(2000.0, 1500.0)], false);
    assert!(matches!(err, Err(ProjectorError::Io { .. })));
}

#[test]
fn geojson_point_linestring_polygon_shapes() {
    let one = [Some(WorldHit {
        lat: 46.8423725961765,
        lon: -91.99395518749954,
        z: 165.27,
    })];
    let point = cam2geojson_value("DJI_0028.JPG", &one, Default::default()).unwrap();
    assert_eq!(point["features"][0]["geometry"]["type"], "Point");
    assert_eq!(point["features"][0]["properties"]["image"], "DJI_0028.JPG");

    let two = [
        Some(WorldHit { lat: 46.80, lon: -91.90, z: 160.0 }),
        Some(WorldHit { lat: 46.81, lon: -91.91, z: 161.0 }),
    ];
    let line = cam2geojson_value("DJI_0028.JPG", &two, Default::default()).unwrap();
    assert_eq!(line["features"][0]["geometry"]["type"], "LineString");

    let three = [
        Some(WorldHit { lat: 46.80, lon: -91.90, z: 160.0 }),
        Some(WorldHit { lat: 46.81, lon: -91.91, z: 161.0 }),
        Some(WorldHit { lat: 46.82, lon: -91.92, z: 162.0 }),
    ];
    let polygon = cam2geojson_value("DJI_0028.JPG", &three, Default::default()).unwrap();
    assert_eq!(polygon["features"][0]["geometry"]["type"], "Polygon");
    let ring = polygon["features"][0]["geometry"]["coordinates"][0]
        .as_array()
        .unwrap();
    assert_eq!(ring.first(), ring.last());
}

#[test]
fn geojson_rejects_a_batch_with_no_hits() {
    let none: [Option<WorldHit>; 2] = [None, None];
    let err = cam2geojson_value("DJI_0028.JPG", &none, Default::default());
    assert!(matches!(err, Err(ProjectorError::InvalidArg(_))));
}
