//! CRS plumbing between WGS84 lat/lon and a DEM raster's projected CRS.
//!
//! Coordinate transforms go through `proj4rs`, a pure-Rust PROJ
//! reimplementation: it keeps this crate free of a system GDAL/PROJ
//! dependency, the same trade-off other pure-Rust GeoTIFF readers make.

use proj4rs::Proj;

use crate::dem::{Dem, ReduceStrategy};
use crate::{ProjectorError, Result};

fn wgs84() -> Result<Proj> {
    Proj::from_proj_string("+proj=longlat +datum=WGS84 +no_defs")
        .map_err(|e| ProjectorError::Geo(format!("failed to build WGS84 projection: {e}")))
}

fn raster_crs(dem: &Dem) -> Result<Proj> {
    let epsg = dem
        .epsg
        .ok_or_else(|| ProjectorError::Geo("DEM raster has no CRS".to_string()))?;
    Proj::from_epsg_code(epsg as u16)
        .map_err(|e| ProjectorError::Geo(format!("unsupported raster CRS EPSG:{epsg}: {e}")))
}

/// Transform `(lon, lat)` from WGS84 into the DEM's projected CRS, then
/// sample elevation there.
pub fn get_utm_xyz(
    dem: &Dem,
    lon: f64,
    lat: f64,
    window: usize,
    strategy: ReduceStrategy,
) -> Result<(f64, f64, f64)> {
    let src = wgs84()?;
    let dst = raster_crs(dem)?;

    let mut point = (lon.to_radians(), lat.to_radians(), 0.0);
    proj4rs::transform::transform(&src, &dst, &mut point)
        .map_err(|e| ProjectorError::Geo(format!("WGS84 -> raster CRS transform failed: {e}")))?;
    let (x, y, _) = point;

    let z = dem.sample_z(x, y, window, strategy)?;
    Ok((x, y, z))
}

/// Transform a raster-CRS `(easting, northing)` back to WGS84 `(lat, lon)`.
pub fn get_latlon(dem: &Dem, easting: f64, northing: f64) -> Result<(f64, f64)> {
    let src = raster_crs(dem)?;
    let dst = wgs84()?;

    let mut point = (easting, northing, 0.0);
    proj4rs::transform::transform(&src, &dst, &mut point)
        .map_err(|e| ProjectorError::Geo(format!("raster CRS -> WGS84 transform failed: {e}")))?;
    let (lon, lat, _) = point;
    Ok((lat.to_degrees(), lon.to_degrees()))
}
