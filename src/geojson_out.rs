//! Wraps [`crate::Projector::cam2world`] results as a GeoJSON
//! `FeatureCollection`, without pulling in a dedicated GeoJSON crate:
//! the shapes involved (`Point`, `LineString`, `Polygon`) are small
//! enough to build directly over `serde_json::Value`.

use serde_json::{json, Map, Value};

use crate::projector::WorldHit;
use crate::{ProjectorError, Result};

/// Builds a single-feature `FeatureCollection` from `cam2world`'s
/// output: a `Point` for one *input* coordinate, a `LineString` for two,
/// and a closed-ring `Polygon` for three or more — the geometry type is
/// decided by how many pixels were asked for, not by how many of them
/// happened to hit the terrain. A miss anywhere in the batch (an
/// interior `None`) cannot be represented as a point in the output
/// geometry without silently shifting every coordinate after it, so it
/// is surfaced as an error instead. `properties["image"]` defaults to
/// `image` if the caller didn't set it.
pub fn cam2geojson_value(
    image: &str,
    results: &[Option<WorldHit>],
    mut properties: Map<String, Value>,
) -> Result<Value> {
    if results.is_empty() {
        return Err(ProjectorError::InvalidArg(
            "cam2geojson: no coordinates given".to_string(),
        ));
    }
    if let Some(idx) = results.iter().position(|r| r.is_none()) {
        return Err(ProjectorError::InvalidArg(format!(
            "cam2geojson: ray {idx} in the batch did not hit the terrain"
        )));
    }

    let mut coords: Vec<Value> = results
        .iter()
        .map(|r| {
            let hit = r.as_ref().expect("checked above: no None in results");
            json!([hit.lon, hit.lat, hit.z])
        })
        .collect();

    let geometry = match coords.len() {
        1 => json!({
            "type": "Point",
            "coordinates": coords.remove(0),
        }),
        2 => json!({
            "type": "LineString",
            "coordinates": coords,
        }),
        _ => {
            if coords.first() != coords.last() {
                coords.push(coords[0].clone());
            }
            json!({
                "type": "Polygon",
                "coordinates": [coords],
            })
        }
    };

    properties
        .entry("image".to_string())
        .or_insert_with(|| Value::String(image.to_string()));

    Ok(json!({
        "type": "FeatureCollection",
        "features": [{
            "type": "Feature",
            "geometry": geometry,
            "properties": Value::Object(properties),
        }],
    }))
}
