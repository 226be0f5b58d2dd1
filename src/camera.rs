use nalgebra::{Point3, Rotation3, Unit, Vector3};

/// Axis-aligned box in world coordinates (mm).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: Point3<f32>,
    pub max: Point3<f32>,
}

impl Bounds {
    pub fn new(min: Point3<f32>, max: Point3<f32>) -> Self {
        Self { min, max }
    }

    /// Smallest box containing all `points`, `None` when there are none.
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Point3<f32>>) -> Option<Self> {
        points.into_iter().fold(None, |acc, p| {
            Some(match acc {
                None => Bounds::new(*p, *p),
                Some(b) => Bounds::new(b.min.inf(p), b.max.sup(p)),
            })
        })
    }

    pub fn center(&self) -> Point3<f32> {
        nalgebra::center(&self.min, &self.max)
    }

    pub fn diagonal(&self) -> f32 {
        (self.max - self.min).norm()
    }

    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds::new(self.min.inf(&other.min), self.max.sup(&other.max))
    }

    /// Slab test. Returns the entry and exit ray parameters, entry clamped to 0.
    pub fn intersect_ray(&self, origin: &Point3<f32>, dir: &Vector3<f32>) -> Option<(f32, f32)> {
        let mut t_near = 0.0_f32;
        let mut t_far = f32::INFINITY;

        for axis in 0..3 {
            let o = origin[axis];
            let d = dir[axis];
            let (lo, hi) = (self.min[axis], self.max[axis]);

            if d.abs() < f32::EPSILON {
                if o < lo || o > hi {
                    return None;
                }
                continue;
            }

            let inv = 1.0 / d;
            let (t0, t1) = {
                let a = (lo - o) * inv;
                let b = (hi - o) * inv;
                if a <= b { (a, b) } else { (b, a) }
            };
            t_near = t_near.max(t0);
            t_far = t_far.min(t1);
            if t_near > t_far {
                return None;
            }
        }

        Some((t_near, t_far))
    }
}

/// Perspective camera orbiting a focal point.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    position: Point3<f32>,
    focal_point: Point3<f32>,
    view_up: Vector3<f32>,
    /// Vertical view angle in degrees
    view_angle: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Point3::new(0.0, 0.0, 1.0),
            focal_point: Point3::origin(),
            view_up: Vector3::y(),
            view_angle: 30.0,
        }
    }
}

impl Camera {
    pub fn position(&self) -> Point3<f32> {
        self.position
    }

    pub fn focal_point(&self) -> Point3<f32> {
        self.focal_point
    }

    pub fn view_up(&self) -> Vector3<f32> {
        self.view_up
    }

    pub fn view_angle(&self) -> f32 {
        self.view_angle
    }

    pub fn set_position(&mut self, position: Point3<f32>) {
        self.position = position;
        self.orthogonalize_view_up();
    }

    pub fn set_focal_point(&mut self, focal_point: Point3<f32>) {
        self.focal_point = focal_point;
        self.orthogonalize_view_up();
    }

    pub fn set_view_up(&mut self, view_up: Vector3<f32>) {
        self.view_up = view_up;
        self.orthogonalize_view_up();
    }

    pub fn distance(&self) -> f32 {
        (self.focal_point - self.position).norm()
    }

    pub fn direction_of_projection(&self) -> Vector3<f32> {
        (self.focal_point - self.position)
            .try_normalize(f32::EPSILON)
            .unwrap_or(-Vector3::z())
    }

    /// Orthonormal `(right, up, forward)` basis of the view.
    pub fn basis(&self) -> (Vector3<f32>, Vector3<f32>, Vector3<f32>) {
        let forward = self.direction_of_projection();
        let right = forward
            .cross(&self.view_up)
            .try_normalize(f32::EPSILON)
            .unwrap_or_else(|| forward.cross(&Vector3::x()).normalize());
        let up = right.cross(&forward);
        (right, up, forward)
    }

    /// Places the focal point at the center of `bounds` and backs off along
    /// the current view direction until the bounding sphere fills the view.
    pub fn reset(&mut self, bounds: &Bounds) {
        let center = bounds.center();
        let mut radius = bounds.diagonal() * 0.5;
        if radius <= f32::EPSILON {
            radius = 0.5;
        }
        let half_angle = (self.view_angle * 0.5).to_radians();
        let distance = radius / half_angle.sin();

        let normal = -self.direction_of_projection();
        self.focal_point = center;
        self.position = center + normal * distance;
        self.orthogonalize_view_up();
    }

    /// Rotates the position about the view-up vector centered at the focal point.
    pub fn azimuth(&mut self, degrees: f32) {
        if !degrees.is_finite() {
            return;
        }
        let axis = Unit::new_normalize(self.view_up);
        let rotation = Rotation3::from_axis_angle(&axis, degrees.to_radians());
        self.position = self.focal_point + rotation * (self.position - self.focal_point);
    }

    /// Rotates the position about the horizontal view axis centered at the focal point.
    pub fn elevation(&mut self, degrees: f32) {
        if !degrees.is_finite() {
            return;
        }
        let (right, _, _) = self.basis();
        let rotation = Rotation3::from_axis_angle(&Unit::new_normalize(right), -degrees.to_radians());
        self.position = self.focal_point + rotation * (self.position - self.focal_point);
        self.orthogonalize_view_up();
    }

    pub fn roll(&mut self, degrees: f32) {
        if !degrees.is_finite() {
            return;
        }
        let axis = Unit::new_normalize(self.direction_of_projection());
        let rotation = Rotation3::from_axis_angle(&axis, degrees.to_radians());
        self.view_up = rotation * self.view_up;
    }

    /// Factors above 1 magnify by narrowing the view angle.
    pub fn zoom(&mut self, factor: f32) {
        if factor <= 0.0 || !factor.is_finite() {
            return;
        }
        self.view_angle = (self.view_angle / factor).clamp(0.01, 179.0);
    }

    /// Factors above 1 move the camera toward the focal point.
    pub fn dolly(&mut self, factor: f32) {
        if factor <= 0.0 || !factor.is_finite() {
            return;
        }
        let distance = self.distance() / factor;
        self.position = self.focal_point - self.direction_of_projection() * distance;
    }

    /// Half-height of the image plane at unit distance.
    pub fn tan_half_angle(&self) -> f32 {
        (self.view_angle * 0.5).to_radians().tan()
    }

    /// World-space ray through the center of pixel `(px, py)`, row 0 at the top.
    pub fn ray(&self, px: u32, py: u32, width: u32, height: u32) -> (Point3<f32>, Vector3<f32>) {
        let (right, up, forward) = self.basis();
        let tan_half = self.tan_half_angle();
        let aspect = width as f32 / height.max(1) as f32;

        let ndc_x = (2.0 * (px as f32 + 0.5) / width as f32 - 1.0) * aspect * tan_half;
        let ndc_y = (1.0 - 2.0 * (py as f32 + 0.5) / height as f32) * tan_half;

        let dir = (forward + right * ndc_x + up * ndc_y).normalize();
        (self.position, dir)
    }

    fn orthogonalize_view_up(&mut self) {
        let (_, up, _) = self.basis();
        self.view_up = up;
    }
}
