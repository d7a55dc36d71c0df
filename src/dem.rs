//! Digital Elevation Model raster access: loading a single-band GeoTIFF,
//! pixel-grid <-> projected-CRS conversions, and windowed elevation
//! sampling with a disc-shaped kernel.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;

use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;

use crate::{ProjectorError, Result};

const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
const TAG_MODEL_TIEPOINT: u16 = 33922;
const TAG_GEO_KEY_DIRECTORY: u16 = 34735;
const TAG_GDAL_NODATA: u16 = 42113;

const GEOKEY_GEOGRAPHIC_TYPE: u16 = 2048;
const GEOKEY_PROJECTED_CS_TYPE: u16 = 3072;

/// How to round fractional pixel coordinates to an integer cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    Floor,
    Round,
}

/// Affine transform between the raster's pixel grid and the projected
/// CRS, as stored in a GeoTIFF's tiepoint/pixel-scale tags.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// Pixel center world coordinates for a `(row, col)` cell.
    pub fn xy(&self, row: i64, col: i64) -> (f64, f64) {
        let x = self.origin_x + (col as f64 + 0.5) * self.pixel_width;
        let y = self.origin_y + (row as f64 + 0.5) * self.pixel_height;
        (x, y)
    }

    /// World `(x, y)` -> `(row, col)`.
    pub fn index(&self, x: f64, y: f64, rounding: Rounding) -> (i64, i64) {
        let col_f = (x - self.origin_x) / self.pixel_width - 0.5;
        let row_f = (y - self.origin_y) / self.pixel_height - 0.5;
        match rounding {
            Rounding::Floor => (row_f.floor() as i64, col_f.floor() as i64),
            Rounding::Round => (row_f.round() as i64, col_f.round() as i64),
        }
    }
}

/// How a window of DEM cells is reduced to a single elevation value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceStrategy {
    Min,
    Max,
    Mean,
    Median,
}

impl std::str::FromStr for ReduceStrategy {
    type Err = ProjectorError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "minimum" | "min" => Ok(ReduceStrategy::Min),
            "maximum" | "max" => Ok(ReduceStrategy::Max),
            "average" | "mean" => Ok(ReduceStrategy::Mean),
            "median" => Ok(ReduceStrategy::Median),
            other => Err(ProjectorError::InvalidArg(format!(
                "invalid z_sample_strategy: {other}"
            ))),
        }
    }
}

/// Integer offsets `(drow, dcol)` from a center pixel whose Euclidean
/// distance from the center is `<= (d-1)/2`. `d` must be odd.
pub fn circle_kernel(d: usize) -> Vec<(i64, i64)> {
    let mid = ((d - 1) / 2) as i64;
    let mid_f = mid as f64;
    let mut offsets = Vec::new();
    for dr in -mid..=mid {
        for dc in -mid..=mid {
            let dist = ((dr * dr + dc * dc) as f64).sqrt();
            if dist - mid_f <= 1e-9 {
                offsets.push((dr, dc));
            }
        }
    }
    offsets
}

/// A single-band georeferenced elevation raster, fully materialized in
/// memory on load.
pub struct Dem {
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
    pub nodata: f64,
    /// EPSG code of the raster's CRS, when the GeoTIFF carries one.
    pub epsg: Option<u32>,
    data: Vec<f64>,
    min_z: f64,
    kernel_cache: RefCell<HashMap<usize, std::rc::Rc<Vec<(i64, i64)>>>>,
}

impl Dem {
    /// Open and fully decode a GeoTIFF DEM.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        let mut decoder = Decoder::new(file)?;

        let (width, height) = decoder.dimensions()?;
        let width = width as usize;
        let height = height as usize;

        let decoded = decoder.read_image()?;
        let data = decoding_result_to_f64(decoded);

        let transform = read_geotransform(&mut decoder).ok_or_else(|| {
            ProjectorError::Geo(format!(
                "{} has no GeoTIFF pixel-scale/tiepoint tags",
                path.as_ref().display()
            ))
        })?;
        let epsg = read_epsg(&mut decoder);
        let nodata = read_nodata(&mut decoder).unwrap_or(f64::NAN);

        Self::from_raw(width, height, transform, nodata, epsg, data)
    }

    /// Build a [`Dem`] directly from decoded data, bypassing GeoTIFF
    /// parsing. Used by tests and by [`Dem::open`] once tags are parsed.
    pub fn from_raw(
        width: usize,
        height: usize,
        transform: GeoTransform,
        nodata: f64,
        epsg: Option<u32>,
        data: Vec<f64>,
    ) -> Result<Self> {
        if data.len() != width * height {
            return Err(ProjectorError::InvalidArg(format!(
                "DEM data length {} does not match {}x{}",
                data.len(),
                width,
                height
            )));
        }
        let min_z = data
            .iter()
            .copied()
            .filter(|v| !is_nodata(*v, nodata))
            .fold(f64::INFINITY, f64::min);

        Ok(Dem {
            width,
            height,
            transform,
            nodata,
            epsg,
            data,
            min_z,
            kernel_cache: RefCell::new(HashMap::new()),
        })
    }

    /// Minimum elevation over all non-nodata pixels.
    pub fn min_z(&self) -> f64 {
        self.min_z
    }

    /// Whether `v` is this DEM's nodata sentinel (NaN-aware: a `NaN`
    /// nodata value, the fallback when a GeoTIFF carries no
    /// `GDAL_NODATA` tag, compares equal to itself here).
    pub fn is_nodata(&self, v: f64) -> bool {
        is_nodata(v, self.nodata)
    }

    fn get(&self, row: i64, col: i64) -> Option<f64> {
        if row < 0 || col < 0 || row as usize >= self.height || col as usize >= self.width {
            return None;
        }
        Some(self.data[row as usize * self.width + col as usize])
    }

    fn cached_kernel(&self, window: usize) -> std::rc::Rc<Vec<(i64, i64)>> {
        let mut cache = self.kernel_cache.borrow_mut();
        cache
            .entry(window)
            .or_insert_with(|| std::rc::Rc::new(circle_kernel(window)))
            .clone()
    }

    /// Core windowed sample at an integer cell. Returns `nodata` (never an
    /// error) when no valid samples are found in the window — callers
    /// that can treat this as "keep going" (the raycaster) do so; callers
    /// that cannot (explicit public samplers) turn it into
    /// [`ProjectorError::OutOfBounds`].
    pub fn sample_cell(&self, row: i64, col: i64, window: usize, strategy: ReduceStrategy) -> Result<f64> {
        if window == 0 || window % 2 == 0 {
            return Err(ProjectorError::InvalidArg(
                "z_sample_window must be an odd number > 0".to_string(),
            ));
        }
        if window == 1 {
            return Ok(self.get(row, col).unwrap_or(self.nodata));
        }

        let kernel = self.cached_kernel(window);
        let mut values = Vec::with_capacity(kernel.len());
        for (dr, dc) in kernel.iter() {
            if let Some(v) = self.get(row + dr, col + dc) {
                if !is_nodata(v, self.nodata) {
                    values.push(v);
                }
            }
        }

        if values.is_empty() {
            return Ok(self.nodata);
        }

        Ok(match strategy {
            ReduceStrategy::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            ReduceStrategy::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            ReduceStrategy::Mean => values.iter().sum::<f64>() / values.len() as f64,
            ReduceStrategy::Median => {
                let mut sorted = values.clone();
                sorted.sort_by(|a, b| a.partial_cmp(b).expect("DEM values are never NaN"));
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 1 {
                    sorted[mid]
                } else {
                    (sorted[mid - 1] + sorted[mid]) / 2.0
                }
            }
        })
    }

    /// Public, caller-facing elevation sampler: resolves `(row, col)` from
    /// world `(x, y)` then samples. Raises [`ProjectorError::OutOfBounds`]
    /// when the sampled window is entirely nodata (unlike
    /// [`Dem::sample_cell`], which has no context to keep stepping).
    pub fn sample_z(&self, x: f64, y: f64, window: usize, strategy: ReduceStrategy) -> Result<f64> {
        let (row, col) = self.transform.index(x, y, Rounding::Round);
        let z = self.sample_cell(row, col, window, strategy)?;
        if is_nodata(z, self.nodata) {
            return Err(ProjectorError::OutOfBounds(format!(
                "no valid elevation sample at ({x}, {y})"
            )));
        }
        Ok(z)
    }
}

fn is_nodata(v: f64, nodata: f64) -> bool {
    v == nodata || (nodata.is_nan() && v.is_nan())
}

fn decoding_result_to_f64(result: DecodingResult) -> Vec<f64> {
    match result {
        DecodingResult::U8(v) => v.into_iter().map(|x| x as f64).collect(),
        DecodingResult::U16(v) => v.into_iter().map(|x| x as f64).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|x| x as f64).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|x| x as f64).collect(),
        DecodingResult::I8(v) => v.into_iter().map(|x| x as f64).collect(),
        DecodingResult::I16(v) => v.into_iter().map(|x| x as f64).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|x| x as f64).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|x| x as f64).collect(),
        DecodingResult::F32(v) => v.into_iter().map(|x| x as f64).collect(),
        DecodingResult::F64(v) => v,
    }
}

fn read_geotransform<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
) -> Option<GeoTransform> {
    let scale = decoder
        .get_tag_f64_vec(Tag::Unknown(TAG_MODEL_PIXEL_SCALE))
        .ok()?;
    let tiepoint = decoder
        .get_tag_f64_vec(Tag::Unknown(TAG_MODEL_TIEPOINT))
        .ok()?;
    if scale.len() < 2 || tiepoint.len() < 6 {
        return None;
    }
    // Tiepoint is (i, j, k, x, y, z): raster position (i, j) maps to
    // world position (x, y). ODM/GDAL DEMs always tie the (0, 0) corner.
    let (_i, _j, _k, x, y, _z) = (
        tiepoint[0],
        tiepoint[1],
        tiepoint[2],
        tiepoint[3],
        tiepoint[4],
        tiepoint[5],
    );
    Some(GeoTransform {
        origin_x: x,
        origin_y: y,
        pixel_width: scale[0],
        pixel_height: -scale[1],
    })
}

/// Reads the raster's EPSG code from its `GeoKeyDirectoryTag`, preferring
/// the projected CRS key over the geographic one: an ODM DEM carries both
/// (its UTM zone as `ProjectedCSTypeGeoKey`, and that zone's underlying
/// datum as `GeographicTypeGeoKey`), and it is the projected code that
/// `xy`/`index` and `get_utm_xyz` actually operate in. The geographic key
/// is only used as a fallback for rasters with no projected CRS.
fn read_epsg<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>) -> Option<u32> {
    let geokeys = decoder
        .get_tag_u16_vec(Tag::Unknown(TAG_GEO_KEY_DIRECTORY))
        .ok()?;
    if geokeys.len() < 4 {
        return None;
    }
    let num_keys = geokeys[3] as usize;

    let mut projected = None;
    let mut geographic = None;
    for i in 0..num_keys {
        let base = 4 + i * 4;
        if base + 3 >= geokeys.len() {
            break;
        }
        let key_id = geokeys[base];
        let location = geokeys[base + 1];
        let value = geokeys[base + 3];
        if location != 0 || value == 0 || value == 32767 {
            continue;
        }
        if key_id == GEOKEY_PROJECTED_CS_TYPE {
            projected = Some(value as u32);
        } else if key_id == GEOKEY_GEOGRAPHIC_TYPE {
            geographic = Some(value as u32);
        }
    }
    projected.or(geographic)
}

fn read_nodata<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>) -> Option<f64> {
    let s = decoder
        .get_tag_ascii_string(Tag::Unknown(TAG_GDAL_NODATA))
        .ok()?;
    s.trim().trim_matches('\0').parse::<f64>().ok()
}
