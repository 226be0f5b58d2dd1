//! Scalar-to-opacity and scalar-to-color mappings used by the volume property.

use crate::property::Color;

/// Piecewise-linear function through sorted control points.
///
/// Outside the first and last point the end values are held.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PiecewiseFunction {
    points: Vec<(f32, f32)>,
}

impl PiecewiseFunction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a control point, replacing the value of an existing point at `x`.
    pub fn add_point(&mut self, x: f32, y: f32) -> &mut Self {
        match self.points.binary_search_by(|p| p.0.total_cmp(&x)) {
            Ok(idx) => self.points[idx].1 = y,
            Err(idx) => self.points.insert(idx, (x, y)),
        }
        self
    }

    pub fn points(&self) -> &[(f32, f32)] {
        &self.points
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// `(first x, last x)`, `None` when empty.
    pub fn range(&self) -> Option<(f32, f32)> {
        Some((self.points.first()?.0, self.points.last()?.0))
    }

    /// NaN evaluates to the first point's value.
    pub fn value(&self, x: f32) -> f32 {
        let Some(&(first_x, first_y)) = self.points.first() else {
            return 0.0;
        };
        if x.is_nan() || x <= first_x {
            return first_y;
        }

        let idx = self.points.partition_point(|p| p.0 <= x);
        if idx == 0 {
            return first_y;
        }
        if idx >= self.points.len() {
            return self.points[self.points.len() - 1].1;
        }

        let (x0, y0) = self.points[idx - 1];
        let (x1, y1) = self.points[idx];
        let t = (x - x0) / (x1 - x0);
        y0 + (y1 - y0) * t
    }

    /// Sample `len` evenly spaced values over `[min, max]`.
    pub fn to_lut(&self, min: f32, max: f32, len: usize) -> Vec<f32> {
        sample_positions(min, max, len)
            .map(|x| self.value(x))
            .collect()
    }
}

/// Piecewise-linear RGB function through sorted control points.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColorTransferFunction {
    points: Vec<(f32, Color)>,
}

impl ColorTransferFunction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rgb_point(&mut self, x: f32, color: Color) -> &mut Self {
        match self.points.binary_search_by(|p| p.0.total_cmp(&x)) {
            Ok(idx) => self.points[idx].1 = color,
            Err(idx) => self.points.insert(idx, (x, color)),
        }
        self
    }

    pub fn points(&self) -> &[(f32, Color)] {
        &self.points
    }

    pub fn color(&self, x: f32) -> Color {
        let Some(&(first_x, first_color)) = self.points.first() else {
            return Color::BLACK;
        };
        if x.is_nan() || x <= first_x {
            return first_color;
        }

        let idx = self.points.partition_point(|p| p.0 <= x);
        if idx == 0 {
            return first_color;
        }
        if idx >= self.points.len() {
            return self.points[self.points.len() - 1].1;
        }

        let (x0, c0) = self.points[idx - 1];
        let (x1, c1) = self.points[idx];
        c0.lerp(&c1, (x - x0) / (x1 - x0))
    }

    pub fn to_lut(&self, min: f32, max: f32, len: usize) -> Vec<Color> {
        sample_positions(min, max, len)
            .map(|x| self.color(x))
            .collect()
    }
}

fn sample_positions(min: f32, max: f32, len: usize) -> impl Iterator<Item = f32> {
    let step = if len > 1 {
        (max - min) / (len - 1) as f32
    } else {
        0.0
    };
    (0..len).map(move |i| min + step * i as f32)
}

/// Opacity ramps that separate soft tissue, contrast and bone in CT data.
pub fn default_scalar_opacity() -> PiecewiseFunction {
    let mut function = PiecewiseFunction::new();
    function
        .add_point(-800.0, 0.0)
        .add_point(-750.0, 1.0)
        .add_point(-350.0, 1.0)
        .add_point(-300.0, 0.0)
        .add_point(-200.0, 0.0)
        .add_point(-100.0, 1.0)
        .add_point(1000.0, 0.0)
        .add_point(2750.0, 0.0)
        .add_point(2976.0, 1.0)
        .add_point(3000.0, 0.0);
    function
}

/// Suppresses homogeneous regions, keeps boundaries.
pub fn default_gradient_opacity() -> PiecewiseFunction {
    let mut function = PiecewiseFunction::new();
    function.add_point(0.0, 0.0).add_point(2000.0, 1.0);
    function
}

/// Single-hue color function anchored at the opacity ramp breakpoints.
pub fn uniform_color(color: Color) -> ColorTransferFunction {
    let mut function = ColorTransferFunction::new();
    for x in [-750.0, -350.0, -200.0, 2750.0, 3000.0] {
        function.add_rgb_point(x, color);
    }
    function
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_function_evaluates_to_zero() {
        let function = PiecewiseFunction::new();
        assert_eq!(function.value(12.0), 0.0);
        assert_eq!(function.range(), None);
    }

    #[test]
    fn points_are_kept_sorted_and_replaced() {
        let mut function = PiecewiseFunction::new();
        function.add_point(10.0, 1.0).add_point(-5.0, 0.5).add_point(10.0, 0.25);
        assert_eq!(function.points(), &[(-5.0, 0.5), (10.0, 0.25)]);
    }

    #[test]
    fn value_interpolates_and_clamps() {
        let function = default_gradient_opacity();
        assert_eq!(function.value(-10.0), 0.0);
        assert_eq!(function.value(500.0), 0.25);
        assert_eq!(function.value(1e6), 1.0);
    }

    #[test]
    fn default_scalar_opacity_ramps() {
        let function = default_scalar_opacity();
        assert_eq!(function.value(-1000.0), 0.0);
        assert_eq!(function.value(-775.0), 0.5);
        assert_eq!(function.value(-500.0), 1.0);
        assert_eq!(function.value(-250.0), 0.0);
        assert_eq!(function.value(-100.0), 1.0);
        assert_eq!(function.value(2976.0), 1.0);
        assert_eq!(function.value(5000.0), 0.0);
    }

    #[test]
    fn uniform_color_is_constant() {
        let red = Color::new(1.0, 0.0, 0.0);
        let function = uniform_color(red);
        assert_eq!(function.points().len(), 5);
        assert_eq!(function.color(-2000.0), red);
        assert_eq!(function.color(0.0), red);
        assert_eq!(function.color(4000.0), red);
    }

    #[test]
    fn color_interpolates_between_points() {
        let mut function = ColorTransferFunction::new();
        function
            .add_rgb_point(0.0, Color::BLACK)
            .add_rgb_point(100.0, Color::new(1.0, 0.5, 0.0));
        let mid = function.color(50.0);
        assert!((mid.r - 0.5).abs() < 1e-6);
        assert!((mid.g - 0.25).abs() < 1e-6);
        assert_eq!(mid.b, 0.0);
    }

    #[test]
    fn nan_evaluates_to_the_first_point() {
        let opacity = default_scalar_opacity();
        assert_eq!(opacity.value(f32::NAN), 0.0);

        let mut ramp = PiecewiseFunction::new();
        ramp.add_point(0.0, 0.75).add_point(10.0, 0.0);
        assert_eq!(ramp.value(f32::NAN), 0.75);

        let red = Color::new(1.0, 0.0, 0.0);
        let mut colors = ColorTransferFunction::new();
        colors.add_rgb_point(0.0, red).add_rgb_point(10.0, Color::WHITE);
        assert_eq!(colors.color(f32::NAN), red);
    }

    #[test]
    fn lut_includes_both_ends() {
        let lut = default_gradient_opacity().to_lut(0.0, 2000.0, 5);
        assert_eq!(lut, vec![0.0, 0.25, 0.5, 0.75, 1.0]);
    }
}
