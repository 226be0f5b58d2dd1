use nalgebra::Vector3;
use ndarray::ArrayView3;

pub(crate) struct Interpolator;

impl Interpolator {
    /// Trilinear interpolation at continuous voxel coordinates.
    ///
    /// Coordinates must already be clamped to `[0, dim - 1]` on every axis.
    #[inline]
    pub(crate) fn trilinear_interpolate(volume: &ArrayView3<f32>, z: f32, y: f32, x: f32) -> f32 {
        let (depth, height, width) = volume.dim();

        let z0 = z.floor() as usize;
        let y0 = y.floor() as usize;
        let x0 = x.floor() as usize;
        let z1 = (z0 + 1).min(depth - 1);
        let y1 = (y0 + 1).min(height - 1);
        let x1 = (x0 + 1).min(width - 1);

        let dz = z - z0 as f32;
        let dy = y - y0 as f32;
        let dx = x - x0 as f32;
        let one_minus_dx = 1.0 - dx;
        let one_minus_dy = 1.0 - dy;

        let c00 = volume[[z0, y0, x0]].mul_add(one_minus_dx, volume[[z0, y0, x1]] * dx);
        let c01 = volume[[z0, y1, x0]].mul_add(one_minus_dx, volume[[z0, y1, x1]] * dx);
        let c10 = volume[[z1, y0, x0]].mul_add(one_minus_dx, volume[[z1, y0, x1]] * dx);
        let c11 = volume[[z1, y1, x0]].mul_add(one_minus_dx, volume[[z1, y1, x1]] * dx);

        let c0 = c00.mul_add(one_minus_dy, c01 * dy);
        let c1 = c10.mul_add(one_minus_dy, c11 * dy);

        c0.mul_add(1.0 - dz, c1 * dz)
    }

    #[inline]
    pub(crate) fn nearest(volume: &ArrayView3<f32>, z: f32, y: f32, x: f32) -> f32 {
        volume[[z.round() as usize, y.round() as usize, x.round() as usize]]
    }

    /// Central-difference gradient at a grid point, one-sided on the borders.
    ///
    /// `spacing` is `(x, y, z)` in mm; the result is in scalar units per mm
    /// and ordered `(x, y, z)`.
    pub(crate) fn grid_gradient(
        volume: &ArrayView3<f32>,
        k: usize,
        j: usize,
        i: usize,
        spacing: &Vector3<f32>,
    ) -> Vector3<f32> {
        let (depth, height, width) = volume.dim();

        let diff = |len: usize, idx: usize, at: &dyn Fn(usize) -> f32, step: f32| -> f32 {
            if len < 2 {
                return 0.0;
            }
            let lo = idx.saturating_sub(1);
            let hi = (idx + 1).min(len - 1);
            (at(hi) - at(lo)) / ((hi - lo) as f32 * step)
        };

        Vector3::new(
            diff(width, i, &|n| volume[[k, j, n]], spacing.x),
            diff(height, j, &|n| volume[[k, n, i]], spacing.y),
            diff(depth, k, &|n| volume[[n, j, i]], spacing.z),
        )
    }
}
