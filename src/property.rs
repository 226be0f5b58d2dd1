use crate::enums::InterpolationType;
use crate::transfer_function::{
    ColorTransferFunction, PiecewiseFunction, default_gradient_opacity, default_scalar_opacity,
    uniform_color,
};

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
#[error("invalid color '{0}': expected #rrggbb, r,g,b in [0, 1] or a color name")]
pub struct ColorParseError(pub String);

/// RGB color with components in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Default for Color {
    fn default() -> Self {
        Self::BLUE
    }
}

impl Color {
    pub const BLACK: Color = Color::new(0.0, 0.0, 0.0);
    pub const WHITE: Color = Color::new(1.0, 1.0, 1.0);
    pub const BLUE: Color = Color::new(0.0, 0.0, 1.0);
    /// Dark slate blue behind the rendered scene.
    pub const BACKGROUND: Color = Color::new(0.1, 0.2, 0.3);

    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    pub fn from_rgb8(rgb: [u8; 3]) -> Self {
        Self::new(
            rgb[0] as f32 / 255.0,
            rgb[1] as f32 / 255.0,
            rgb[2] as f32 / 255.0,
        )
    }

    pub fn to_rgb8(&self) -> [u8; 3] {
        let quantize = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        [quantize(self.r), quantize(self.g), quantize(self.b)]
    }

    pub fn lerp(&self, other: &Color, t: f32) -> Color {
        Color::new(
            self.r + (other.r - self.r) * t,
            self.g + (other.g - self.g) * t,
            self.b + (other.b - self.b) * t,
        )
    }

    pub fn as_array(&self) -> [f32; 3] {
        [self.r, self.g, self.b]
    }

    fn named(name: &str) -> Option<Color> {
        let rgb = match name {
            "black" => [0, 0, 0],
            "white" => [255, 255, 255],
            "red" => [255, 0, 0],
            "green" => [0, 128, 0],
            "lime" => [0, 255, 0],
            "blue" => [0, 0, 255],
            "yellow" => [255, 255, 0],
            "cyan" => [0, 255, 255],
            "magenta" => [255, 0, 255],
            "orange" => [255, 165, 0],
            "gray" | "grey" => [128, 128, 128],
            "ivory" => [255, 255, 240],
            _ => return None,
        };
        Some(Color::from_rgb8(rgb))
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b] = self.to_rgb8();
        write!(f, "#{r:02x}{g:02x}{b:02x}")
    }
}

impl FromStr for Color {
    type Err = ColorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim().to_ascii_lowercase();
        let err = || ColorParseError(s.to_string());

        if let Some(hex) = value.strip_prefix('#') {
            if hex.len() != 6 || !hex.is_ascii() {
                return Err(err());
            }
            let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| err());
            return Ok(Color::from_rgb8([channel(0)?, channel(2)?, channel(4)?]));
        }

        if value.contains(',') {
            let parts: Vec<f32> = value
                .split(',')
                .map(|part| part.trim().parse::<f32>().map_err(|_| err()))
                .collect::<Result<_, _>>()?;
            return match parts.as_slice() {
                [r, g, b] if [r, g, b].iter().all(|v| (0.0..=1.0).contains(*v)) => {
                    Ok(Color::new(*r, *g, *b))
                }
                _ => Err(err()),
            };
        }

        Color::named(&value).ok_or_else(err)
    }
}

impl TryFrom<String> for Color {
    type Error = ColorParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_string()
    }
}

/// Optical properties applied while compositing a volume.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeProperty {
    pub shade: bool,
    pub interpolation: InterpolationType,
    pub ambient: f32,
    pub diffuse: f32,
    pub specular: f32,
    pub specular_power: f32,
    pub scalar_opacity: PiecewiseFunction,
    pub gradient_opacity: Option<PiecewiseFunction>,
    pub color: ColorTransferFunction,
    /// Path length (mm) over which `scalar_opacity` values apply unchanged.
    pub scalar_opacity_unit_distance: f32,
}

impl Default for VolumeProperty {
    fn default() -> Self {
        Self {
            shade: false,
            interpolation: InterpolationType::Nearest,
            ambient: 0.1,
            diffuse: 0.9,
            specular: 0.2,
            specular_power: 10.0,
            scalar_opacity: PiecewiseFunction::new(),
            gradient_opacity: None,
            color: ColorTransferFunction::new(),
            scalar_opacity_unit_distance: 1.0,
        }
    }
}

impl VolumeProperty {
    /// Shaded, linearly interpolated property with the CT transfer functions
    /// tinted by `color`.
    pub fn ct_preset(color: Color) -> Self {
        Self {
            shade: true,
            interpolation: InterpolationType::Linear,
            scalar_opacity: default_scalar_opacity(),
            gradient_opacity: Some(default_gradient_opacity()),
            color: uniform_color(color),
            ..Self::default()
        }
    }

    /// Opacity of a sample before step-length correction.
    #[inline]
    pub fn opacity(&self, scalar: f32, gradient_magnitude: f32) -> f32 {
        let base = self.scalar_opacity.value(scalar);
        match &self.gradient_opacity {
            Some(function) if base > 0.0 => base * function.value(gradient_magnitude),
            _ => base,
        }
    }
}

/// Surface material of a mesh actor.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceProperty {
    pub color: Color,
    pub ambient: f32,
    pub diffuse: f32,
    pub specular: f32,
    pub specular_power: f32,
}

impl Default for SurfaceProperty {
    fn default() -> Self {
        Self {
            color: Color::WHITE,
            ambient: 0.0,
            diffuse: 1.0,
            specular: 0.0,
            specular_power: 1.0,
        }
    }
}

impl SurfaceProperty {
    pub fn with_color(color: Color) -> Self {
        Self {
            color,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_names_and_triples() {
        assert_eq!("#ff0000".parse::<Color>(), Ok(Color::new(1.0, 0.0, 0.0)));
        assert_eq!("Blue".parse::<Color>(), Ok(Color::BLUE));
        assert_eq!("0.1, 0.2, 0.3".parse::<Color>(), Ok(Color::BACKGROUND));
    }

    #[test]
    fn rejects_malformed_colors() {
        assert!("#ff00".parse::<Color>().is_err());
        assert!("#gg0000".parse::<Color>().is_err());
        assert!("1.5,0,0".parse::<Color>().is_err());
        assert!("0,0".parse::<Color>().is_err());
        assert!("chartreuse-ish".parse::<Color>().is_err());
    }

    #[test]
    fn displays_as_hex_and_round_trips_through_serde() {
        let color = Color::from_rgb8([18, 52, 86]);
        assert_eq!(color.to_string(), "#123456");

        let json = serde_json::to_string(&color).unwrap();
        assert_eq!(json, "\"#123456\"");
        let back: Color = serde_json::from_str(&json).unwrap();
        assert_eq!(back.to_rgb8(), [18, 52, 86]);
    }

    #[test]
    fn ct_preset_forwards_color_and_enables_shading() {
        let property = VolumeProperty::ct_preset(Color::WHITE);
        assert!(property.shade);
        assert_eq!(property.interpolation, InterpolationType::Linear);
        assert_eq!(property.color.color(0.0), Color::WHITE);
        assert!(property.gradient_opacity.is_some());
    }

    #[test]
    fn gradient_opacity_scales_scalar_opacity() {
        let property = VolumeProperty::ct_preset(Color::WHITE);
        assert_eq!(property.opacity(-500.0, 2000.0), 1.0);
        assert_eq!(property.opacity(-500.0, 1000.0), 0.5);
        assert_eq!(property.opacity(-500.0, 0.0), 0.0);
        assert_eq!(property.opacity(-250.0, 2000.0), 0.0);
    }
}
