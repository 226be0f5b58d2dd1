use crate::camera::{Bounds, Camera};
use crate::config::MAX_VIEWPORT;
use crate::gpu_raycaster::{GpuContext, GpuError, GpuRaycaster};
use crate::isosurface::TriangleMesh;
use crate::property::{Color, SurfaceProperty, VolumeProperty};
use crate::rasterizer::SurfaceRasterizer;
use crate::raycaster::VolumeRaycaster;
use crate::volume::Volume;

use image::{Rgb, RgbImage};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use web_time::Instant;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Viewport must be at least 1x1 pixels, got {0}x{1}")]
    EmptyViewport(u32, u32),

    #[error("Viewport {0}x{1} exceeds {MAX_VIEWPORT} pixels per edge")]
    ViewportTooLarge(u32, u32),

    #[error(transparent)]
    Gpu(#[from] GpuError),
}

/// A volume together with the property it is composited with.
#[derive(Debug, Clone)]
pub struct VolumeActor {
    pub volume: Arc<Volume>,
    pub property: VolumeProperty,
    /// Distance between samples along a ray in mm
    pub sample_distance: f32,
}

/// A mesh together with its surface material.
#[derive(Debug, Clone)]
pub struct SurfaceActor {
    pub mesh: TriangleMesh,
    pub property: SurfaceProperty,
}

#[derive(Debug, Clone)]
pub enum Prop {
    Volume(VolumeActor),
    Surface(SurfaceActor),
}

impl Prop {
    pub fn bounds(&self) -> Option<Bounds> {
        match self {
            Prop::Volume(actor) => Some(actor.volume.bounds()),
            Prop::Surface(actor) => actor.mesh.bounds(),
        }
    }
}

/// Props, background and camera of one viewport.
#[derive(Debug, Clone)]
pub struct Renderer {
    background: Color,
    props: Vec<Prop>,
    camera: Camera,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new(Color::BACKGROUND)
    }
}

impl Renderer {
    pub fn new(background: Color) -> Self {
        Self {
            background,
            props: Vec::new(),
            camera: Camera::default(),
        }
    }

    pub fn background(&self) -> Color {
        self.background
    }

    pub fn set_background(&mut self, background: Color) {
        self.background = background;
    }

    pub fn add_volume(&mut self, actor: VolumeActor) {
        self.props.push(Prop::Volume(actor));
    }

    pub fn add_actor(&mut self, actor: SurfaceActor) {
        self.props.push(Prop::Surface(actor));
    }

    pub fn props(&self) -> &[Prop] {
        &self.props
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    pub fn set_camera(&mut self, camera: Camera) {
        self.camera = camera;
    }

    /// Union of the bounds of all visible props.
    pub fn bounds(&self) -> Option<Bounds> {
        self.props
            .iter()
            .filter_map(Prop::bounds)
            .reduce(|a, b| a.union(&b))
    }

    /// Frame all props. Keeps the camera when the scene is empty.
    pub fn reset_camera(&mut self) {
        match self.bounds() {
            Some(bounds) => self.camera.reset(&bounds),
            None => debug!("no visible props, camera left unchanged"),
        }
    }

    /// Draw the scene. Volumes go through the GPU when a context is given.
    ///
    /// Surfaces are depth-tested against each other; volumes are composited
    /// over the finished surface pass.
    pub async fn render(
        &self,
        width: u32,
        height: u32,
        gpu: Option<&GpuContext>,
    ) -> Result<RgbImage, RenderError> {
        if width == 0 || height == 0 {
            return Err(RenderError::EmptyViewport(width, height));
        }
        if width > MAX_VIEWPORT || height > MAX_VIEWPORT {
            return Err(RenderError::ViewportTooLarge(width, height));
        }
        let started = Instant::now();

        let mut frame = RgbImage::from_pixel(width, height, Rgb(self.background.to_rgb8()));
        let mut depth = vec![f32::INFINITY; width as usize * height as usize];

        for prop in &self.props {
            if let Prop::Surface(actor) = prop {
                SurfaceRasterizer::new(&actor.mesh, &actor.property).draw(
                    &self.camera,
                    &mut frame,
                    &mut depth,
                );
            }
        }

        for prop in &self.props {
            if let Prop::Volume(actor) = prop {
                match gpu {
                    Some(gpu) => Self::composite_gpu(actor, &self.camera, gpu, &mut frame).await?,
                    None => VolumeRaycaster::new(&actor.volume, &actor.property, actor.sample_distance)
                        .composite(&self.camera, &mut frame),
                }
            }
        }

        info!(
            width,
            height,
            gpu = gpu.is_some(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "rendered frame"
        );
        Ok(frame)
    }

    async fn composite_gpu(
        actor: &VolumeActor,
        camera: &Camera,
        gpu: &GpuContext,
        frame: &mut RgbImage,
    ) -> Result<(), GpuError> {
        let (width, height) = frame.dimensions();
        let raycaster = GpuRaycaster::new(&actor.volume, gpu)?;
        let samples = raycaster
            .render(&actor.property, camera, width, height, actor.sample_distance)
            .await?;

        for (pixel, sample) in frame.pixels_mut().zip(samples) {
            if sample.alpha <= 0.0 {
                continue;
            }
            let background = pixel.0.map(|v| v as f32 / 255.0);
            let blended = sample.over(background);
            pixel.0 = blended.map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8);
        }
        Ok(())
    }
}
