//! Loading the reconstruction's per-shot poses (`shots.geojson`) and
//! per-camera intrinsics (`cameras.json`) from an ODM-style project
//! directory.

use std::collections::HashMap;
use std::path::Path;

use nalgebra::{Matrix3, Vector3};
use serde_json::Value;

use crate::camera::{rodrigues_to_matrix, Camera};
use crate::{ProjectorError, Result};

/// One exposure. Immutable after load.
#[derive(Debug, Clone)]
pub struct Shot {
    pub filename: String,
    /// Camera id as it appears in `cameras.json`, after stripping the
    /// optional `"v2 "` prefix some reconstructions store.
    pub cam_id: String,
    /// Normalized focal length; multiply by `max(width, height)` for the
    /// pixel-unit focal length.
    pub focal: f64,
    pub translation: Vector3<f64>,
    pub rotation: Matrix3<f64>,
    pub width: usize,
    pub height: usize,
}

fn strip_cam_id_prefix(raw: &str) -> String {
    raw.strip_prefix("v2 ").unwrap_or(raw).to_string()
}

fn malformed(msg: impl Into<String>) -> ProjectorError {
    ProjectorError::Io {
        error: std::io::Error::new(std::io::ErrorKind::InvalidData, msg.into()),
    }
}

/// Load `shots.geojson`: a GeoJSON `FeatureCollection` whose features'
/// `properties` carry `camera`, `filename`, `focal` (or `focal_x`),
/// `translation`, `rotation` (Rodrigues vector), `width`, `height`.
/// Features missing focal or image dimensions are skipped.
pub fn load_shots<P: AsRef<Path>>(path: P) -> Result<(Vec<Shot>, HashMap<String, usize>)> {
    let file = std::fs::File::open(path.as_ref())?;
    let root: Value = serde_json::from_reader(file)?;

    let features = root
        .get("features")
        .and_then(Value::as_array)
        .ok_or_else(|| malformed(format!("{} is not a valid shots.geojson file", path.as_ref().display())))?;

    let mut shots = Vec::with_capacity(features.len());
    let mut shots_map = HashMap::with_capacity(features.len());

    for feature in features {
        let Some(props) = feature.get("properties") else {
            continue;
        };

        let focal = props
            .get("focal")
            .or_else(|| props.get("focal_x"))
            .and_then(Value::as_f64);
        let Some(focal) = focal else { continue };

        let width = props.get("width").and_then(Value::as_u64);
        let height = props.get("height").and_then(Value::as_u64);
        let (Some(width), Some(height)) = (width, height) else {
            continue;
        };

        let cam_id = props
            .get("camera")
            .and_then(Value::as_str)
            .map(strip_cam_id_prefix)
            .unwrap_or_default();
        let filename = props
            .get("filename")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("shot feature missing 'filename'"))?
            .to_string();

        let translation = parse_vec3(props.get("translation"), "translation")?;
        let rotation_vec = parse_vec3(props.get("rotation"), "rotation")?;
        let rotation = rodrigues_to_matrix(rotation_vec);

        shots_map.insert(filename.clone(), shots.len());
        shots.push(Shot {
            filename,
            cam_id,
            focal,
            translation,
            rotation,
            width: width as usize,
            height: height as usize,
        });
    }

    Ok((shots, shots_map))
}

fn parse_vec3(value: Option<&Value>, field: &str) -> Result<Vector3<f64>> {
    let arr = value
        .and_then(Value::as_array)
        .ok_or_else(|| malformed(format!("shot feature missing '{field}'")))?;
    if arr.len() != 3 {
        return Err(malformed(format!("'{field}' must have 3 components")));
    }
    let mut v = [0.0; 3];
    for (i, slot) in v.iter_mut().enumerate() {
        *slot = arr[i]
            .as_f64()
            .ok_or_else(|| malformed(format!("'{field}[{i}]' is not a number")))?;
    }
    Ok(Vector3::new(v[0], v[1], v[2]))
}

/// Load `cameras.json`: an object keyed by camera id, each entry carrying
/// `projection_type` (`perspective` or `brown`), dimensions, focal and
/// distortion coefficients. Entries with an unsupported
/// `projection_type` are skipped with a warning.
pub fn load_cameras<P: AsRef<Path>>(path: P) -> Result<HashMap<String, Camera>> {
    let file = std::fs::File::open(path.as_ref())?;
    let root: Value = serde_json::from_reader(file)?;
    let object = root
        .as_object()
        .ok_or_else(|| malformed("cameras.json must be a JSON object"))?;

    let mut cameras = HashMap::with_capacity(object.len());
    for (cam_id, cam) in object {
        let projection_type = cam.get("projection_type").and_then(Value::as_str);
        let width = cam.get("width").and_then(Value::as_u64).unwrap_or(0) as usize;
        let height = cam.get("height").and_then(Value::as_u64).unwrap_or(0) as usize;
        let focal = cam
            .get("focal")
            .or_else(|| cam.get("focal_x"))
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let f = |key: &str| cam.get(key).and_then(Value::as_f64).unwrap_or(0.0);

        let camera = match projection_type {
            Some("perspective") => Some(Camera::Perspective {
                width,
                height,
                focal,
                k1: f("k1"),
                k2: f("k2"),
            }),
            Some("brown") => Some(Camera::Brown {
                width,
                height,
                focal,
                cx: f("c_x"),
                cy: f("c_y"),
                k1: f("k1"),
                k2: f("k2"),
                p1: f("p1"),
                p2: f("p2"),
                k3: f("k3"),
            }),
            other => {
                tracing::warn!(
                    cam_id = %cam_id,
                    projection_type = other.unwrap_or("<missing>"),
                    "camera type is not supported, skipping"
                );
                None
            }
        };

        if let Some(camera) = camera {
            cameras.insert(cam_id.clone(), camera);
        }
    }

    Ok(cameras)
}
