//! Camera intrinsics and lens-distortion models.
//!
//! Two projection families are supported, matching the reconstruction
//! software this crate reads projects from: a bare perspective (pinhole +
//! radial k1/k2) camera, and a full Brown-Conrady (radial + tangential)
//! camera. Both share the same normalized-coordinate convention described
//! in the crate's top-level documentation: all intrinsic quantities
//! (focal length, principal point) are expressed relative to
//! `max(width, height)`, not in pixels.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/// Number of fixed-point iterations used to invert the Brown-Conrady
/// distortion model. This matches the iteration count OpenCV's
/// `undistortPoints` uses internally; beyond this the correction no
/// longer measurably improves for the distortion magnitudes found in
/// real lenses.
const UNDISTORT_ITERATIONS: usize = 10;

/// Radial + tangential distortion coefficients `(k1, k2, p1, p2, k3)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

impl Distortion {
    pub fn zero() -> Self {
        Distortion {
            k1: 0.0,
            k2: 0.0,
            p1: 0.0,
            p2: 0.0,
            k3: 0.0,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.k1 == 0.0 && self.k2 == 0.0 && self.p1 == 0.0 && self.p2 == 0.0 && self.k3 == 0.0
    }
}

/// One camera's intrinsics, indexed by `cam_id` in a reconstruction's
/// camera table.
///
/// `focal` (and `cx`/`cy` for [`Camera::Brown`]) are normalized: multiply
/// by `max(width, height)` to get pixel-unit quantities.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Camera {
    Perspective {
        width: usize,
        height: usize,
        focal: f64,
        k1: f64,
        k2: f64,
    },
    Brown {
        width: usize,
        height: usize,
        focal: f64,
        cx: f64,
        cy: f64,
        k1: f64,
        k2: f64,
        p1: f64,
        p2: f64,
        k3: f64,
    },
}

impl Camera {
    pub fn width(&self) -> usize {
        match self {
            Camera::Perspective { width, .. } => *width,
            Camera::Brown { width, .. } => *width,
        }
    }

    pub fn height(&self) -> usize {
        match self {
            Camera::Perspective { height, .. } => *height,
            Camera::Brown { height, .. } => *height,
        }
    }

    pub fn focal(&self) -> f64 {
        match self {
            Camera::Perspective { focal, .. } => *focal,
            Camera::Brown { focal, .. } => *focal,
        }
    }

    /// Principal point, normalized by `max(width, height)`. Zero for
    /// [`Camera::Perspective`].
    pub fn principal_point(&self) -> (f64, f64) {
        match self {
            Camera::Perspective { .. } => (0.0, 0.0),
            Camera::Brown { cx, cy, .. } => (*cx, *cy),
        }
    }

    pub fn distortion(&self) -> Distortion {
        match self {
            Camera::Perspective { k1, k2, .. } => Distortion {
                k1: *k1,
                k2: *k2,
                p1: 0.0,
                p2: 0.0,
                k3: 0.0,
            },
            Camera::Brown {
                k1,
                k2,
                p1,
                p2,
                k3,
                ..
            } => Distortion {
                k1: *k1,
                k2: *k2,
                p1: *p1,
                p2: *p2,
                k3: *k3,
            },
        }
    }

    /// Normalizer used throughout: `max(width, height)`.
    fn normalizer(&self) -> f64 {
        self.width().max(self.height()) as f64
    }

    /// The 3x3 intrinsic matrix in normalized coordinates:
    /// `K = [[f,0,cx],[0,f,cy],[0,0,1]]`.
    pub fn k_matrix(&self) -> Matrix3<f64> {
        let f = self.focal();
        let (cx, cy) = self.principal_point();
        Matrix3::new(f, 0.0, cx, 0.0, f, cy, 0.0, 0.0, 1.0)
    }

    /// A perspective camera with the same `width`, `height`, `focal` and
    /// zero distortion. Used to linearize sub-pixel geometry: mapping a
    /// pixel through `undistorted -> original` (see [`map_pixels`])
    /// yields the distorted pixel corresponding to a given undistorted
    /// one.
    pub fn undistorted(&self) -> Camera {
        Camera::Perspective {
            width: self.width(),
            height: self.height(),
            focal: self.focal(),
            k1: 0.0,
            k2: 0.0,
        }
    }

    /// Pixel (`px`, `py`) -> normalized image coordinates, with the
    /// half-pixel shift convention: `u = (px + 0.5 - w/2)/N`.
    fn normalized_image_coordinates(&self, px: f64, py: f64) -> (f64, f64) {
        let n = self.normalizer();
        let w = self.width() as f64;
        let h = self.height() as f64;
        ((px + 0.5 - w / 2.0) / n, (py + 0.5 - h / 2.0) / n)
    }

    /// Inverse of [`Camera::normalized_image_coordinates`].
    fn denormalized_image_coordinates(&self, u: f64, v: f64) -> (f64, f64) {
        let n = self.normalizer();
        let w = self.width() as f64;
        let h = self.height() as f64;
        (u * n - 0.5 + w / 2.0, v * n - 0.5 + h / 2.0)
    }

    /// Undistort each pixel and return a unit-norm bearing vector in the
    /// camera frame pointing from the optical center through that pixel.
    ///
    /// Distortion inversion is a bounded fixed-point iteration (the same
    /// algorithm OpenCV's `undistortPoints` uses): starting from the
    /// distorted normalized coordinates as an initial guess, repeatedly
    /// re-apply the inverse radial/tangential correction.
    pub fn pixel_bearing_many(&self, pixels: &[(f64, f64)]) -> Vec<Vector3<f64>> {
        let d = self.distortion();
        let (cx, cy) = self.principal_point();
        let f = self.focal();
        pixels
            .iter()
            .map(|&(px, py)| {
                let (u, v) = self.normalized_image_coordinates(px, py);
                // Remove the (normalized) intrinsic matrix: this is the
                // distorted normalized coordinate and serves as the
                // initial guess for the undistorted one.
                let x0 = (u - cx) / f;
                let y0 = (v - cy) / f;

                let (mut x, mut y) = (x0, y0);
                if !d.is_zero() {
                    for _ in 0..UNDISTORT_ITERATIONS {
                        let r2 = x * x + y * y;
                        let icdist = 1.0 / (1.0 + d.k1 * r2 + d.k2 * r2 * r2 + d.k3 * r2 * r2 * r2);
                        let delta_x = 2.0 * d.p1 * x * y + d.p2 * (r2 + 2.0 * x * x);
                        let delta_y = d.p1 * (r2 + 2.0 * y * y) + 2.0 * d.p2 * x * y;
                        x = (x0 - delta_x) * icdist;
                        y = (y0 - delta_y) * icdist;
                    }
                }

                let l = (x * x + y * y + 1.0).sqrt();
                Vector3::new(x / l, y / l, 1.0 / l)
            })
            .collect()
    }

    /// Forward-project camera-frame points through `K` and the full
    /// distortion model, returning pixel-space coordinates.
    pub fn project_many(&self, points: &[Vector3<f64>]) -> Vec<(f64, f64)> {
        let d = self.distortion();
        let (cx, cy) = self.principal_point();
        let f = self.focal();
        points
            .iter()
            .map(|p| {
                let x = p.x / p.z;
                let y = p.y / p.z;

                let r2 = x * x + y * y;
                let radial = 1.0 + d.k1 * r2 + d.k2 * r2 * r2 + d.k3 * r2 * r2 * r2;
                let x_dist = x * radial + 2.0 * d.p1 * x * y + d.p2 * (r2 + 2.0 * x * x);
                let y_dist = y * radial + d.p1 * (r2 + 2.0 * y * y) + 2.0 * d.p2 * x * y;

                let u = f * x_dist + cx;
                let v = f * y_dist + cy;
                self.denormalized_image_coordinates(u, v)
            })
            .collect()
    }
}

/// `to.project_many(from.pixel_bearing_many(pixels))` — reproject pixels
/// from one camera model onto another sharing the same optical center.
pub fn map_pixels(from: &Camera, to: &Camera, pixels: &[(f64, f64)]) -> Vec<(f64, f64)> {
    let rays = from.pixel_bearing_many(pixels);
    to.project_many(&rays)
}

/// Rodrigues axis-angle vector -> rotation matrix.
///
/// Given `v` with `theta = ||v||`: returns the identity when `theta` is
/// smaller than machine epsilon, else
/// `R = cos(theta)*I + (1 - cos(theta))*r*r^T + sin(theta)*[r]x`
/// where `r = v / theta` and `[r]x` is the cross-product matrix.
pub fn rodrigues_to_matrix(v: Vector3<f64>) -> Matrix3<f64> {
    let theta = v.norm();
    if theta < f64::EPSILON {
        return Matrix3::identity();
    }
    let r = v / theta;
    let r_rt = r * r.transpose();
    let r_cross = Matrix3::new(0.0, -r.z, r.y, r.z, 0.0, -r.x, -r.y, r.x, 0.0);
    Matrix3::identity() * theta.cos() + r_rt * (1.0 - theta.cos()) + r_cross * theta.sin()
}
