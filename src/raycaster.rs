use crate::camera::Camera;
use crate::property::VolumeProperty;
use crate::volume::Volume;

use image::RgbImage;
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;

/// Accumulated opacity at which a ray stops marching.
pub const EARLY_TERMINATION: f32 = 0.99;

/// Front-to-back compositing of a volume on the CPU.
pub struct VolumeRaycaster<'a> {
    volume: &'a Volume,
    property: &'a VolumeProperty,
    sample_distance: f32,
}

/// Premultiplied color and opacity gathered along one ray.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RaySample {
    pub color: [f32; 3],
    pub alpha: f32,
}

impl RaySample {
    /// Blend over an opaque background color.
    #[inline]
    pub fn over(&self, background: [f32; 3]) -> [f32; 3] {
        let rest = 1.0 - self.alpha;
        [
            self.color[0] + rest * background[0],
            self.color[1] + rest * background[1],
            self.color[2] + rest * background[2],
        ]
    }
}

impl<'a> VolumeRaycaster<'a> {
    pub fn new(volume: &'a Volume, property: &'a VolumeProperty, sample_distance: f32) -> Self {
        Self {
            volume,
            property,
            sample_distance,
        }
    }

    /// Composite the volume over the current contents of `frame`.
    pub fn composite(&self, camera: &Camera, frame: &mut RgbImage) {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return;
        }
        let light = -camera.direction_of_projection();
        let row_len = width as usize * 3;
        let buffer: &mut [u8] = frame;

        buffer
            .par_chunks_mut(row_len)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, pixel) in row.chunks_exact_mut(3).enumerate() {
                    let (origin, dir) = camera.ray(x as u32, y as u32, width, height);
                    let sample = self.cast(&origin, &dir, &light);
                    if sample.alpha <= 0.0 {
                        continue;
                    }
                    let background = [
                        pixel[0] as f32 / 255.0,
                        pixel[1] as f32 / 255.0,
                        pixel[2] as f32 / 255.0,
                    ];
                    let blended = sample.over(background);
                    for (channel, value) in pixel.iter_mut().zip(blended) {
                        *channel = (value.clamp(0.0, 1.0) * 255.0).round() as u8;
                    }
                }
            });
    }

    /// March one ray through the volume bounds.
    pub fn cast(&self, origin: &Point3<f32>, dir: &Vector3<f32>, light: &Vector3<f32>) -> RaySample {
        let mut result = RaySample::default();
        let Some((t_enter, t_exit)) = self.volume.bounds().intersect_ray(origin, dir) else {
            return result;
        };

        let step = self.sample_distance.max(1e-3);
        let exponent = step / self.property.scalar_opacity_unit_distance.max(1e-6);
        let half_vector = (light - dir).try_normalize(f32::EPSILON).unwrap_or(*light);

        let mut t = t_enter;
        while t <= t_exit && result.alpha < EARLY_TERMINATION {
            let point = origin + dir * t;
            t += step;

            let Some(scalar) = self.volume.sample(&point, self.property.interpolation) else {
                continue;
            };
            if self.property.scalar_opacity.value(scalar) <= 0.0 {
                continue;
            }

            let needs_gradient = self.property.shade || self.property.gradient_opacity.is_some();
            let gradient = if needs_gradient {
                self.volume.gradient(&point)
            } else {
                Vector3::zeros()
            };

            let opacity = self.property.opacity(scalar, gradient.norm());
            if opacity <= 0.0 {
                continue;
            }
            let alpha = 1.0 - (1.0 - opacity.min(1.0)).powf(exponent);

            let base = self.property.color.color(scalar).as_array();
            let color = if self.property.shade {
                self.shade(base, &gradient, light, &half_vector)
            } else {
                base
            };

            let weight = (1.0 - result.alpha) * alpha;
            for (acc, c) in result.color.iter_mut().zip(color) {
                *acc += weight * c;
            }
            result.alpha += weight;
        }

        result
    }

    /// Headlight Phong shading with two-sided lighting.
    #[inline]
    fn shade(
        &self,
        base: [f32; 3],
        gradient: &Vector3<f32>,
        light: &Vector3<f32>,
        half_vector: &Vector3<f32>,
    ) -> [f32; 3] {
        let property = self.property;
        let Some(normal) = (-gradient).try_normalize(f32::EPSILON) else {
            return base.map(|c| c * (property.ambient + property.diffuse));
        };

        let diffuse = normal.dot(light).abs();
        let specular = normal.dot(half_vector).abs().powf(property.specular_power);
        let lit = property.ambient + property.diffuse * diffuse;
        base.map(|c| (c * lit + property.specular * specular).min(1.0))
    }
}
