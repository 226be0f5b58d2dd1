use crate::camera::Bounds;
use crate::enums::InterpolationType;
use crate::interpolator::Interpolator;

use nalgebra::{Point3, Vector3};
use ndarray::Array3;
use rayon::prelude::*;

/// Scalar volume in patient space.
///
/// Voxel `(i, j, k)` (column, row, slice) sits at `(i * sx, j * sy, k * sz)`
/// in world coordinates.
#[derive(Debug, Clone)]
pub struct Volume {
    data: Array3<f32>,
    spacing: Vector3<f32>,
    scalar_range: (f32, f32),
}

impl Default for Volume {
    fn default() -> Self {
        Self::new(Array3::zeros((1, 1, 1)), Vector3::repeat(1.0))
    }
}

impl Volume {
    /// `data` is indexed `(depth, height, width)`, `spacing` is `(x, y, z)` in mm.
    pub fn new(data: Array3<f32>, spacing: Vector3<f32>) -> Self {
        let scalar_range = Self::compute_range(&data);
        Self {
            data,
            spacing,
            scalar_range,
        }
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn spacing(&self) -> Vector3<f32> {
        self.spacing
    }

    /// Minimum and maximum scalar value
    pub fn scalar_range(&self) -> (f32, f32) {
        self.scalar_range
    }

    pub fn bounds(&self) -> Bounds {
        let (depth, height, width) = self.dim();
        let extent = Vector3::new(
            (width.max(1) - 1) as f32 * self.spacing.x,
            (height.max(1) - 1) as f32 * self.spacing.y,
            (depth.max(1) - 1) as f32 * self.spacing.z,
        );
        Bounds::new(Point3::origin(), Point3::from(extent))
    }

    /// Continuous voxel coordinates `(z, y, x)` of a world point, `None` outside.
    fn to_voxel(&self, point: &Point3<f32>) -> Option<(f32, f32, f32)> {
        let (depth, height, width) = self.dim();
        let x = point.x / self.spacing.x;
        let y = point.y / self.spacing.y;
        let z = point.z / self.spacing.z;

        let inside = |v: f32, len: usize| v >= -1e-4 && v <= (len - 1) as f32 + 1e-4;
        if !(inside(x, width) && inside(y, height) && inside(z, depth)) {
            return None;
        }

        Some((
            z.clamp(0.0, (depth - 1) as f32),
            y.clamp(0.0, (height - 1) as f32),
            x.clamp(0.0, (width - 1) as f32),
        ))
    }

    /// Sample the volume at a world point, `None` outside the bounds.
    pub fn sample(&self, point: &Point3<f32>, interpolation: InterpolationType) -> Option<f32> {
        let (z, y, x) = self.to_voxel(point)?;
        let view = self.data.view();
        Some(match interpolation {
            InterpolationType::Linear => Interpolator::trilinear_interpolate(&view, z, y, x),
            InterpolationType::Nearest => Interpolator::nearest(&view, z, y, x),
        })
    }

    /// Gradient at a world point in scalar units per mm, ordered `(x, y, z)`.
    ///
    /// Central differences one voxel apart along each axis.
    pub fn gradient(&self, point: &Point3<f32>) -> Vector3<f32> {
        let (depth, height, width) = self.dim();
        let Some((z, y, x)) = self.to_voxel(point) else {
            return Vector3::zeros();
        };
        let view = self.data.view();

        let axis = |len: usize, c: f32, at: &dyn Fn(f32) -> f32, step: f32| -> f32 {
            if len < 2 {
                return 0.0;
            }
            let lo = (c - 1.0).max(0.0);
            let hi = (c + 1.0).min((len - 1) as f32);
            if hi <= lo {
                return 0.0;
            }
            (at(hi) - at(lo)) / ((hi - lo) * step)
        };

        Vector3::new(
            axis(
                width,
                x,
                &|v| Interpolator::trilinear_interpolate(&view, z, y, v),
                self.spacing.x,
            ),
            axis(
                height,
                y,
                &|v| Interpolator::trilinear_interpolate(&view, z, v, x),
                self.spacing.y,
            ),
            axis(
                depth,
                z,
                &|v| Interpolator::trilinear_interpolate(&view, v, y, x),
                self.spacing.z,
            ),
        )
    }

    /// Gradient at grid point `(k, j, i)` (slice, row, column).
    pub fn grid_gradient(&self, k: usize, j: usize, i: usize) -> Vector3<f32> {
        Interpolator::grid_gradient(&self.data.view(), k, j, i, &self.spacing)
    }

    /// World position of grid point `(k, j, i)`.
    pub fn grid_point(&self, k: usize, j: usize, i: usize) -> Point3<f32> {
        Point3::new(
            i as f32 * self.spacing.x,
            j as f32 * self.spacing.y,
            k as f32 * self.spacing.z,
        )
    }

    fn compute_range(data: &Array3<f32>) -> (f32, f32) {
        let (min, max) = data
            .as_slice()
            .map(|values| {
                values
                    .par_iter()
                    .fold(
                        || (f32::INFINITY, f32::NEG_INFINITY),
                        |(lo, hi), &v| (lo.min(v), hi.max(v)),
                    )
                    .reduce(
                        || (f32::INFINITY, f32::NEG_INFINITY),
                        |a, b| (a.0.min(b.0), a.1.max(b.1)),
                    )
            })
            .unwrap_or_else(|| {
                data.iter().fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                    (lo.min(v), hi.max(v))
                })
            });

        if min > max { (0.0, 0.0) } else { (min, max) }
    }
}
