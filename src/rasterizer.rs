use crate::camera::Camera;
use crate::isosurface::TriangleMesh;
use crate::property::SurfaceProperty;

use image::RgbImage;
use nalgebra::Vector3;
use rayon::prelude::*;

/// Rows rasterized by one task.
const BAND_HEIGHT: usize = 16;

/// Triangles with a vertex closer than this fraction of the camera distance are culled.
const NEAR_FRACTION: f32 = 1e-3;

/// Triangle in screen space, ready for scan conversion.
struct ScreenTriangle {
    xy: [[f32; 2]; 3],
    inv_depth: [f32; 3],
    normals: [Vector3<f32>; 3],
    min: [f32; 2],
    max: [f32; 2],
}

/// Depth-buffered scan conversion of a shaded mesh.
pub struct SurfaceRasterizer<'a> {
    mesh: &'a TriangleMesh,
    property: &'a SurfaceProperty,
}

impl<'a> SurfaceRasterizer<'a> {
    pub fn new(mesh: &'a TriangleMesh, property: &'a SurfaceProperty) -> Self {
        Self { mesh, property }
    }

    /// Draw into `frame`, testing and updating `depth` (view distance per pixel).
    pub fn draw(&self, camera: &Camera, frame: &mut RgbImage, depth: &mut [f32]) {
        let (width, height) = frame.dimensions();
        let (width, height) = (width as usize, height as usize);
        if width == 0 || height == 0 || depth.len() != width * height {
            return;
        }

        let triangles = self.project(camera, width, height);
        if triangles.is_empty() {
            return;
        }
        let light = -camera.direction_of_projection();

        let buffer: &mut [u8] = frame;
        buffer
            .par_chunks_mut(width * 3 * BAND_HEIGHT)
            .zip(depth.par_chunks_mut(width * BAND_HEIGHT))
            .enumerate()
            .for_each(|(band, (pixels, depths))| {
                let y_start = band * BAND_HEIGHT;
                let rows = depths.len() / width;
                for triangle in &triangles {
                    if triangle.max[1] < y_start as f32 || triangle.min[1] > (y_start + rows) as f32 {
                        continue;
                    }
                    self.scan(triangle, &light, y_start, rows, width, pixels, depths);
                }
            });
    }

    fn project(&self, camera: &Camera, width: usize, height: usize) -> Vec<ScreenTriangle> {
        let (right, up, forward) = camera.basis();
        let eye = camera.position();
        let near = camera.distance().max(f32::EPSILON) * NEAR_FRACTION;
        let tan_half = camera.tan_half_angle();
        let aspect = width as f32 / height as f32;
        let mesh = self.mesh;

        mesh.triangles
            .par_iter()
            .filter_map(|&[a, b, c]| {
                let ids = [a as usize, b as usize, c as usize];
                let mut xy = [[0.0; 2]; 3];
                let mut inv_depth = [0.0; 3];
                for (n, &id) in ids.iter().enumerate() {
                    let rel = mesh.vertices[id] - eye;
                    let z = rel.dot(&forward);
                    if z <= near {
                        return None;
                    }
                    let x = rel.dot(&right) / (z * tan_half * aspect);
                    let y = rel.dot(&up) / (z * tan_half);
                    xy[n] = [
                        (x + 1.0) * 0.5 * width as f32,
                        (1.0 - y) * 0.5 * height as f32,
                    ];
                    inv_depth[n] = 1.0 / z;
                }

                let min = [
                    xy[0][0].min(xy[1][0]).min(xy[2][0]),
                    xy[0][1].min(xy[1][1]).min(xy[2][1]),
                ];
                let max = [
                    xy[0][0].max(xy[1][0]).max(xy[2][0]),
                    xy[0][1].max(xy[1][1]).max(xy[2][1]),
                ];
                let offscreen = max[0] < 0.0
                    || max[1] < 0.0
                    || min[0] > width as f32
                    || min[1] > height as f32;
                if offscreen {
                    return None;
                }

                Some(ScreenTriangle {
                    xy,
                    inv_depth,
                    normals: ids.map(|id| mesh.normals[id]),
                    min,
                    max,
                })
            })
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn scan(
        &self,
        triangle: &ScreenTriangle,
        light: &Vector3<f32>,
        y_start: usize,
        rows: usize,
        width: usize,
        pixels: &mut [u8],
        depths: &mut [f32],
    ) {
        let [p0, p1, p2] = triangle.xy;
        let edge = |a: [f32; 2], b: [f32; 2], p: [f32; 2]| {
            (b[0] - a[0]) * (p[1] - a[1]) - (b[1] - a[1]) * (p[0] - a[0])
        };
        let area = edge(p0, p1, p2);
        if area.abs() <= f32::EPSILON {
            return;
        }

        let x_lo = (triangle.min[0] - 0.5).ceil().max(0.0) as usize;
        let x_hi = ((triangle.max[0] - 0.5).floor() as isize).min(width as isize - 1);
        let y_lo = ((triangle.min[1] - 0.5).ceil().max(0.0) as usize).max(y_start);
        let y_hi = ((triangle.max[1] - 0.5).floor() as isize).min((y_start + rows) as isize - 1);
        if x_hi < 0 || y_hi < 0 {
            return;
        }

        for y in y_lo..=y_hi as usize {
            for x in x_lo..=x_hi as usize {
                let p = [x as f32 + 0.5, y as f32 + 0.5];
                let w = [
                    edge(p1, p2, p) / area,
                    edge(p2, p0, p) / area,
                    edge(p0, p1, p) / area,
                ];
                if w.iter().any(|&v| v < 0.0) {
                    continue;
                }

                let inv_z: f32 = (0..3).map(|n| w[n] * triangle.inv_depth[n]).sum();
                if inv_z <= 0.0 {
                    continue;
                }
                let z = 1.0 / inv_z;
                let idx = (y - y_start) * width + x;
                if z >= depths[idx] {
                    continue;
                }
                depths[idx] = z;

                let normal: Vector3<f32> = (0..3)
                    .map(|n| triangle.normals[n] * (w[n] * triangle.inv_depth[n]))
                    .sum::<Vector3<f32>>()
                    * z;
                let rgb = self.shade(&normal, light);
                pixels[idx * 3..idx * 3 + 3].copy_from_slice(&rgb);
            }
        }
    }

    /// Headlight Phong shading, lit from both sides.
    fn shade(&self, normal: &Vector3<f32>, light: &Vector3<f32>) -> [u8; 3] {
        let property = self.property;
        let cosine = normal
            .try_normalize(f32::EPSILON)
            .map(|n| n.dot(light).abs())
            .unwrap_or(1.0);
        let lit = property.ambient + property.diffuse * cosine;
        let highlight = property.specular * cosine.powf(property.specular_power);

        property
            .color
            .as_array()
            .map(|c| ((c * lit + highlight).clamp(0.0, 1.0) * 255.0).round() as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Bounds;
    use crate::property::Color;
    use nalgebra::Point3;

    fn quad(z: f32, half: f32) -> TriangleMesh {
        TriangleMesh {
            vertices: vec![
                Point3::new(-half, -half, z),
                Point3::new(half, -half, z),
                Point3::new(half, half, z),
                Point3::new(-half, half, z),
            ],
            normals: vec![Vector3::z(); 4],
            triangles: vec![[0, 1, 2], [0, 2, 3]],
        }
    }

    fn camera() -> Camera {
        let mut camera = Camera::default();
        camera.reset(&Bounds::new(
            Point3::new(-1.0, -1.0, -1.0),
            Point3::new(1.0, 1.0, 1.0),
        ));
        camera
    }

    #[test]
    fn facing_quad_is_fully_lit_in_the_center() {
        let mesh = quad(0.0, 0.5);
        let property = SurfaceProperty::with_color(Color::new(1.0, 0.0, 0.0));
        let mut frame = RgbImage::from_pixel(32, 32, image::Rgb([0, 0, 0]));
        let mut depth = vec![f32::INFINITY; 32 * 32];

        SurfaceRasterizer::new(&mesh, &property).draw(&camera(), &mut frame, &mut depth);

        assert_eq!(frame.get_pixel(16, 16).0, [255, 0, 0]);
        assert_eq!(frame.get_pixel(0, 0).0, [0, 0, 0]);
        assert!(depth[16 * 32 + 16].is_finite());
        assert!(depth[0].is_infinite());
    }

    #[test]
    fn nearer_surface_wins_the_depth_test() {
        let far = quad(-0.5, 0.5);
        let near = quad(0.5, 0.5);
        let red = SurfaceProperty::with_color(Color::new(1.0, 0.0, 0.0));
        let green = SurfaceProperty::with_color(Color::new(0.0, 1.0, 0.0));
        let camera = camera();
        let mut frame = RgbImage::new(32, 32);
        let mut depth = vec![f32::INFINITY; 32 * 32];

        SurfaceRasterizer::new(&near, &green).draw(&camera, &mut frame, &mut depth);
        SurfaceRasterizer::new(&far, &red).draw(&camera, &mut frame, &mut depth);

        assert_eq!(frame.get_pixel(16, 16).0, [0, 255, 0]);
    }

    #[test]
    fn geometry_behind_the_camera_is_culled() {
        let mesh = quad(50.0, 0.5);
        let property = SurfaceProperty::with_color(Color::WHITE);
        let mut frame = RgbImage::new(8, 8);
        let mut depth = vec![f32::INFINITY; 64];

        SurfaceRasterizer::new(&mesh, &property).draw(&camera(), &mut frame, &mut depth);

        assert!(frame.pixels().all(|p| p.0 == [0, 0, 0]));
    }

    #[test]
    fn ambient_and_specular_follow_the_property() {
        let mesh = quad(0.0, 0.5);
        let property = SurfaceProperty {
            color: Color::new(0.5, 0.5, 0.5),
            ambient: 0.2,
            diffuse: 0.0,
            specular: 0.1,
            specular_power: 4.0,
        };
        let mut frame = RgbImage::new(16, 16);
        let mut depth = vec![f32::INFINITY; 256];

        SurfaceRasterizer::new(&mesh, &property).draw(&camera(), &mut frame, &mut depth);

        // 0.5 * 0.2 + 0.1
        assert_eq!(frame.get_pixel(8, 8).0, [51, 51, 51]);
    }
}
