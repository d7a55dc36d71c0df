//! Bidirectional projection between pixel coordinates of aerial photographs
//! and geographic coordinates on the terrain, using the outputs of a
//! photogrammetric reconstruction (camera poses, lens intrinsics) and a
//! Digital Elevation Model.
//!
//! The two public entry points live on [`Projector`]: [`Projector::world2cams`]
//! (geographic point -> pixel in every camera that sees it) and
//! [`Projector::cam2world`] (pixel in a named photograph -> geographic point,
//! via DEM raycasting).

#![deny(rust_2018_idioms)]

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProjectorError {
    #[error("invalid argument: {0}")]
    InvalidArg(String),

    #[error("georeferencing error: {0}")]
    Geo(String),

    #[error("out of bounds: {0}")]
    OutOfBounds(String),

    #[error("IO error: {error}")]
    Io {
        #[from]
        error: std::io::Error,
    },

    #[error("JSON error: {error}")]
    Json {
        #[from]
        error: serde_json::Error,
    },

    #[error("TIFF error: {error}")]
    Tiff {
        #[from]
        error: tiff::TiffError,
    },
}

pub type Result<T> = std::result::Result<T, ProjectorError>;

mod camera;
pub use crate::camera::{rodrigues_to_matrix, Camera, Distortion};

mod dem;
pub use crate::dem::{Dem, ReduceStrategy};

mod geo;
pub use crate::geo::{get_latlon, get_utm_xyz};

mod shots;
pub use crate::shots::{load_cameras, load_shots, Shot};

mod projector;
pub use crate::projector::{CamHit, Projector, ProjectorOptions, WorldHit, ZSampleTarget};

mod geojson_out;
pub use crate::geojson_out::cam2geojson_value;
