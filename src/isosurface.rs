//! Iso-surface extraction.
//!
//! Every grid cell is split into six tetrahedra that share the cell's main
//! diagonal. Neighbouring cells split their shared faces the same way, so
//! the extracted surface has no cracks and needs no case tables beyond the
//! three tetrahedron configurations.

use crate::camera::Bounds;
use crate::volume::Volume;

use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use std::collections::HashMap;
use tracing::debug;

/// Indexed triangle mesh with per-vertex normals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriangleMesh {
    pub vertices: Vec<Point3<f32>>,
    pub normals: Vec<Vector3<f32>>,
    pub triangles: Vec<[u32; 3]>,
}

impl TriangleMesh {
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn bounds(&self) -> Option<Bounds> {
        Bounds::from_points(&self.vertices)
    }

    /// Appends `other`, offsetting its indices.
    pub fn append(&mut self, mut other: TriangleMesh) {
        let offset = self.vertices.len() as u32;
        self.vertices.append(&mut other.vertices);
        self.normals.append(&mut other.normals);
        self.triangles.extend(
            other
                .triangles
                .into_iter()
                .map(|[a, b, c]| [a + offset, b + offset, c + offset]),
        );
    }
}

/// Cube corner offsets `(dx, dy, dz)`; bit 0 is x, bit 1 is y, bit 2 is z.
const CORNERS: [(usize, usize, usize); 8] = [
    (0, 0, 0),
    (1, 0, 0),
    (0, 1, 0),
    (1, 1, 0),
    (0, 0, 1),
    (1, 0, 1),
    (0, 1, 1),
    (1, 1, 1),
];

/// Six tetrahedra around the diagonal from corner 0 to corner 7.
const TETRAHEDRA: [[usize; 4]; 6] = [
    [0, 1, 3, 7],
    [0, 3, 2, 7],
    [0, 2, 6, 7],
    [0, 6, 4, 7],
    [0, 4, 5, 7],
    [0, 5, 1, 7],
];

/// Extracts the surface where the volume crosses `isovalue`.
///
/// Normals point from higher toward lower values, i.e. out of the region
/// above the iso-value.
pub fn extract_isosurface(volume: &Volume, isovalue: f32) -> TriangleMesh {
    let (depth, height, width) = volume.dim();
    if depth < 2 || height < 2 || width < 2 {
        return TriangleMesh::default();
    }

    let (min, max) = volume.scalar_range();
    if isovalue < min || isovalue > max {
        debug!(isovalue, min, max, "iso-value outside scalar range");
        return TriangleMesh::default();
    }

    let slabs: Vec<TriangleMesh> = (0..depth - 1)
        .into_par_iter()
        .map(|k| SlabExtractor::new(volume, isovalue).extract(k))
        .collect();

    let mut mesh = TriangleMesh::default();
    for slab in slabs {
        mesh.append(slab);
    }
    mesh
}

/// Extracts one layer of cells between slices `k` and `k + 1`.
struct SlabExtractor<'a> {
    volume: &'a Volume,
    isovalue: f32,
    mesh: TriangleMesh,
    /// Vertex index per grid edge, keyed by the ordered linear indices of its ends.
    edge_vertices: HashMap<(usize, usize), u32>,
}

impl<'a> SlabExtractor<'a> {
    fn new(volume: &'a Volume, isovalue: f32) -> Self {
        Self {
            volume,
            isovalue,
            mesh: TriangleMesh::default(),
            edge_vertices: HashMap::new(),
        }
    }

    fn extract(mut self, k: usize) -> TriangleMesh {
        let volume = self.volume;
        let (_, height, width) = volume.dim();
        let data = volume.data();

        for j in 0..height - 1 {
            for i in 0..width - 1 {
                let corners: [(usize, usize, usize); 8] =
                    CORNERS.map(|(dx, dy, dz)| (k + dz, j + dy, i + dx));
                let values: [f32; 8] = corners.map(|(z, y, x)| data[[z, y, x]]);

                let above = values.iter().filter(|&&v| v >= self.isovalue).count();
                if above == 0 || above == 8 {
                    continue;
                }

                for tetra in TETRAHEDRA {
                    self.polygonize(tetra.map(|c| corners[c]), tetra.map(|c| values[c]));
                }
            }
        }

        self.mesh
    }

    fn polygonize(&mut self, corners: [(usize, usize, usize); 4], values: [f32; 4]) {
        let (inside, outside): (Vec<usize>, Vec<usize>) =
            (0..4).partition(|&n| values[n] >= self.isovalue);

        match (inside.as_slice(), outside.as_slice()) {
            ([a], [b, c, d]) | ([b, c, d], [a]) => {
                let v0 = self.edge_vertex(corners[*a], corners[*b], values[*a], values[*b]);
                let v1 = self.edge_vertex(corners[*a], corners[*c], values[*a], values[*c]);
                let v2 = self.edge_vertex(corners[*a], corners[*d], values[*a], values[*d]);
                self.push_triangle([v0, v1, v2]);
            }
            ([a, b], [c, d]) => {
                let v0 = self.edge_vertex(corners[*a], corners[*c], values[*a], values[*c]);
                let v1 = self.edge_vertex(corners[*a], corners[*d], values[*a], values[*d]);
                let v2 = self.edge_vertex(corners[*b], corners[*d], values[*b], values[*d]);
                let v3 = self.edge_vertex(corners[*b], corners[*c], values[*b], values[*c]);
                self.push_triangle([v0, v1, v2]);
                self.push_triangle([v0, v2, v3]);
            }
            _ => {}
        }
    }

    fn linear_index(&self, (k, j, i): (usize, usize, usize)) -> usize {
        let (_, height, width) = self.volume.dim();
        (k * height + j) * width + i
    }

    /// Shared vertex on the edge between two grid points.
    fn edge_vertex(
        &mut self,
        p: (usize, usize, usize),
        q: (usize, usize, usize),
        vp: f32,
        vq: f32,
    ) -> u32 {
        // canonical orientation keeps shared edges bit-identical across slabs
        let (lp, lq) = (self.linear_index(p), self.linear_index(q));
        let (p, q, vp, vq, key) = if lp < lq {
            (p, q, vp, vq, (lp, lq))
        } else {
            (q, p, vq, vp, (lq, lp))
        };
        if let Some(&idx) = self.edge_vertices.get(&key) {
            return idx;
        }

        let t = if (vq - vp).abs() > f32::EPSILON {
            ((self.isovalue - vp) / (vq - vp)).clamp(0.0, 1.0)
        } else {
            0.5
        };

        let pp = self.volume.grid_point(p.0, p.1, p.2);
        let pq = self.volume.grid_point(q.0, q.1, q.2);
        let position = pp + (pq - pp) * t;

        let gp = self.volume.grid_gradient(p.0, p.1, p.2);
        let gq = self.volume.grid_gradient(q.0, q.1, q.2);
        let gradient = gp + (gq - gp) * t;
        let normal = (-gradient)
            .try_normalize(f32::EPSILON)
            .unwrap_or_else(|| {
                // flat gradient: fall back to the edge direction, low side outward
                let edge = if vp >= vq { pq - pp } else { pp - pq };
                edge.normalize()
            });

        let idx = self.mesh.vertices.len() as u32;
        self.mesh.vertices.push(position);
        self.mesh.normals.push(normal);
        self.edge_vertices.insert(key, idx);
        idx
    }

    /// Pushes a triangle wound counter-clockwise around the vertex normals.
    fn push_triangle(&mut self, [a, b, c]: [u32; 3]) {
        if a == b || b == c || a == c {
            return;
        }
        let vertices = &self.mesh.vertices;
        let (pa, pb, pc) = (
            vertices[a as usize],
            vertices[b as usize],
            vertices[c as usize],
        );
        let face = (pb - pa).cross(&(pc - pa));
        if face.norm_squared() <= f32::EPSILON * f32::EPSILON {
            return;
        }

        let normals = &self.mesh.normals;
        let mean = normals[a as usize] + normals[b as usize] + normals[c as usize];
        if face.dot(&mean) < 0.0 {
            self.mesh.triangles.push([a, c, b]);
        } else {
            self.mesh.triangles.push([a, b, c]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn sphere(n: usize, radius: f32) -> Volume {
        let c = (n - 1) as f32 / 2.0;
        let data = Array3::from_shape_fn((n, n, n), |(z, y, x)| {
            let d = ((x as f32 - c).powi(2) + (y as f32 - c).powi(2) + (z as f32 - c).powi(2))
                .sqrt();
            // 1000 inside, falling off linearly across the shell
            1000.0 - (d - radius) * 100.0
        });
        Volume::new(data, Vector3::repeat(1.0))
    }

    #[test]
    fn sphere_vertices_lie_on_the_iso_shell() {
        let volume = sphere(21, 6.3);
        let mesh = extract_isosurface(&volume, 1000.0);

        assert!(!mesh.is_empty());
        assert_eq!(mesh.vertices.len(), mesh.normals.len());

        let center = Point3::new(10.0, 10.0, 10.0);
        for vertex in &mesh.vertices {
            let r = (vertex - center).norm();
            assert!((r - 6.3).abs() < 0.15, "vertex at radius {r}");
        }
    }

    #[test]
    fn sphere_normals_point_outward_and_winding_encloses_volume() {
        let volume = sphere(21, 6.3);
        let mesh = extract_isosurface(&volume, 1000.0);
        let center = Point3::new(10.0, 10.0, 10.0);

        for (vertex, normal) in mesh.vertices.iter().zip(&mesh.normals) {
            assert!((vertex - center).normalize().dot(normal) > 0.9);
        }

        // divergence theorem: outward winding gives a positive enclosed volume
        let enclosed: f32 = mesh
            .triangles
            .iter()
            .map(|[a, b, c]| {
                let pa = mesh.vertices[*a as usize] - center;
                let pb = mesh.vertices[*b as usize] - center;
                let pc = mesh.vertices[*c as usize] - center;
                pa.dot(&pb.cross(&pc)) / 6.0
            })
            .sum();
        let expected = 4.0 / 3.0 * std::f32::consts::PI * 6.3_f32.powi(3);
        assert!(
            (enclosed - expected).abs() / expected < 0.05,
            "enclosed {enclosed}, expected {expected}"
        );
    }

    #[test]
    fn mesh_is_closed_within_the_volume() {
        let volume = sphere(15, 4.3);
        let mesh = extract_isosurface(&volume, 1000.0);

        // every edge of a closed surface is shared by exactly two triangles,
        // which only holds if vertices are merged across slabs
        let mut positions: HashMap<[u32; 3], usize> = HashMap::new();
        let mut ids = Vec::with_capacity(mesh.vertices.len());
        for v in &mesh.vertices {
            let key = [v.x.to_bits(), v.y.to_bits(), v.z.to_bits()];
            let next = positions.len();
            ids.push(*positions.entry(key).or_insert(next));
        }

        let mut edges: HashMap<(usize, usize), usize> = HashMap::new();
        for tri in &mesh.triangles {
            for (a, b) in [(tri[0], tri[1]), (tri[1], tri[2]), (tri[2], tri[0])] {
                let (a, b) = (ids[a as usize], ids[b as usize]);
                *edges.entry((a.min(b), a.max(b))).or_default() += 1;
            }
        }
        assert!(edges.values().all(|&count| count == 2));
    }

    #[test]
    fn isovalue_outside_range_yields_empty_mesh() {
        let volume = sphere(9, 2.0);
        assert!(extract_isosurface(&volume, 5000.0).is_empty());
    }

    #[test]
    fn flat_volume_yields_empty_mesh() {
        let volume = Volume::new(Array3::from_elem((1, 8, 8), 500.0), Vector3::repeat(1.0));
        assert!(extract_isosurface(&volume, 500.0).is_empty());
    }

    #[test]
    fn append_offsets_indices() {
        let tri = TriangleMesh {
            vertices: vec![Point3::origin(), Point3::new(1.0, 0.0, 0.0), Point3::new(0.0, 1.0, 0.0)],
            normals: vec![Vector3::z(); 3],
            triangles: vec![[0, 1, 2]],
        };
        let mut mesh = tri.clone();
        mesh.append(tri);
        assert_eq!(mesh.triangles, vec![[0, 1, 2], [3, 4, 5]]);
        assert_eq!(mesh.vertex_count(), 6);
    }
}
