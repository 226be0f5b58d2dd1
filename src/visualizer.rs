use crate::config::{ConfigError, RenderSettings};
use crate::enums::RenderMode;
use crate::isosurface::extract_isosurface;
use crate::property::{SurfaceProperty, VolumeProperty};
use crate::scene::{Renderer, SurfaceActor, VolumeActor};
use crate::volume::Volume;
use crate::volume_loader::{VolumeLoader, VolumeLoaderError};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use web_time::Instant;

#[derive(Debug, Error)]
pub enum VisualizerError {
    #[error(transparent)]
    Load(#[from] VolumeLoaderError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("No volume loaded")]
    NoData,
}

/// Turns a folder of slices and a set of render settings into a scene.
///
/// Every parameter is forwarded unchanged: shading coefficients and color
/// into the volume property for raycasting, iso-value and color into the
/// surface pipeline.
pub struct Visualizer {
    folder: PathBuf,
    settings: RenderSettings,
    volume: Option<Arc<Volume>>,
}

impl Visualizer {
    pub fn new(folder: impl Into<PathBuf>, settings: RenderSettings) -> Result<Self, VisualizerError> {
        settings.validate()?;
        Ok(Self {
            folder: folder.into(),
            settings,
            volume: None,
        })
    }

    /// Use an already loaded volume instead of reading the folder.
    pub fn with_volume(mut self, volume: Arc<Volume>) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    pub fn volume(&self) -> Option<&Arc<Volume>> {
        self.volume.as_ref()
    }

    /// Read the slices of the folder into a volume.
    pub fn read_data(&mut self) -> Result<Arc<Volume>, VisualizerError> {
        let volume = Arc::new(VolumeLoader::load_from_directory(
            &self.folder,
            self.settings.sort_by,
        )?);
        self.volume = Some(volume.clone());
        Ok(volume)
    }

    fn loaded(&self) -> Result<&Arc<Volume>, VisualizerError> {
        self.volume.as_ref().ok_or(VisualizerError::NoData)
    }

    pub fn raycast_rendering(&self) -> Result<VolumeActor, VisualizerError> {
        let volume = self.loaded()?.clone();
        let settings = &self.settings;

        let property = VolumeProperty {
            ambient: settings.ambient,
            diffuse: settings.diffuse,
            specular: settings.specular,
            specular_power: settings.specular_power,
            ..VolumeProperty::ct_preset(settings.color)
        };

        Ok(VolumeActor {
            volume,
            property,
            sample_distance: settings.sample_distance,
        })
    }

    pub fn surface_rendering(&self) -> Result<SurfaceActor, VisualizerError> {
        let volume = self.loaded()?;
        let started = Instant::now();

        let isovalue = self.settings.isovalue();
        let mesh = extract_isosurface(volume, isovalue);
        if mesh.is_empty() {
            warn!(
                isovalue,
                range = ?volume.scalar_range(),
                "iso-surface is empty"
            );
        }
        info!(
            isovalue,
            vertices = mesh.vertex_count(),
            triangles = mesh.triangle_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "extracted iso-surface"
        );

        Ok(SurfaceActor {
            mesh,
            property: SurfaceProperty::with_color(self.settings.color),
        })
    }

    /// Build the scene for the selected mode with the camera framing the data.
    ///
    /// The folder is read first unless a volume was supplied.
    pub fn render(&mut self) -> Result<Renderer, VisualizerError> {
        if self.volume.is_none() {
            self.read_data()?;
        }

        let mut renderer = Renderer::new(self.settings.background);
        match self.settings.mode {
            RenderMode::Raycast => renderer.add_volume(self.raycast_rendering()?),
            RenderMode::Surface => renderer.add_actor(self.surface_rendering()?),
        }

        // an empty surface has no bounds; frame the volume instead
        match renderer.bounds() {
            Some(_) => renderer.reset_camera(),
            None => renderer.camera_mut().reset(&self.loaded()?.bounds()),
        }
        Ok(renderer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::Color;
    use crate::scene::Prop;
    use nalgebra::Vector3;
    use ndarray::Array3;

    fn cube() -> Arc<Volume> {
        let data = Array3::from_shape_fn((9, 9, 9), |(z, y, x)| {
            let inside = (2..7).contains(&z) && (2..7).contains(&y) && (2..7).contains(&x);
            if inside { 800.0 } else { -1000.0 }
        });
        Arc::new(Volume::new(data, Vector3::new(1.0, 1.0, 2.0)))
    }

    fn settings(mode: RenderMode) -> RenderSettings {
        RenderSettings {
            mode,
            ambient: 0.3,
            diffuse: 0.6,
            specular: 0.4,
            specular_power: 25.0,
            isovalue: Some(100.0),
            color: Color::new(1.0, 0.0, 0.0),
            ..RenderSettings::default()
        }
    }

    #[test]
    fn raycast_forwards_shading_parameters() {
        let visualizer = Visualizer::new("unused", settings(RenderMode::Raycast))
            .unwrap()
            .with_volume(cube());
        let actor = visualizer.raycast_rendering().unwrap();

        assert_eq!(actor.property.ambient, 0.3);
        assert_eq!(actor.property.diffuse, 0.6);
        assert_eq!(actor.property.specular, 0.4);
        assert_eq!(actor.property.specular_power, 25.0);
        assert!(actor.property.shade);
        assert_eq!(actor.property.color.color(0.0), Color::new(1.0, 0.0, 0.0));
        assert_eq!(actor.sample_distance, 1.0);
    }

    #[test]
    fn surface_forwards_isovalue_and_color() {
        let visualizer = Visualizer::new("unused", settings(RenderMode::Surface))
            .unwrap()
            .with_volume(cube());
        let actor = visualizer.surface_rendering().unwrap();

        assert!(!actor.mesh.is_empty());
        assert_eq!(actor.property.color, Color::new(1.0, 0.0, 0.0));
        let bounds = actor.mesh.bounds().unwrap();
        // the 100 crossing sits between voxels 1 and 2 (and 6 and 7) on each axis
        assert!(bounds.min.x > 1.0 && bounds.max.x < 7.0);
        assert!(bounds.min.z > 2.0 && bounds.max.z < 14.0);
    }

    #[test]
    fn render_builds_one_prop_for_the_mode_and_frames_it() {
        for mode in [RenderMode::Raycast, RenderMode::Surface] {
            let mut visualizer = Visualizer::new("unused", settings(mode))
                .unwrap()
                .with_volume(cube());
            let renderer = visualizer.render().unwrap();

            assert_eq!(renderer.props().len(), 1);
            match (mode, &renderer.props()[0]) {
                (RenderMode::Raycast, Prop::Volume(_)) | (RenderMode::Surface, Prop::Surface(_)) => {}
                (mode, prop) => panic!("{mode} produced {prop:?}"),
            }
            let center = renderer.bounds().unwrap().center();
            assert!((renderer.camera().focal_point() - center).norm() < 1e-4);
            assert_eq!(renderer.background(), Color::BACKGROUND);
        }
    }

    #[test]
    fn empty_surface_still_frames_the_volume() {
        let mut settings = settings(RenderMode::Surface);
        settings.isovalue = Some(5000.0);
        let volume = cube();
        let mut visualizer = Visualizer::new("unused", settings)
            .unwrap()
            .with_volume(volume.clone());
        let renderer = visualizer.render().unwrap();

        assert_eq!(renderer.camera().focal_point(), volume.bounds().center());
    }

    #[test]
    fn actors_need_data() {
        let visualizer = Visualizer::new("unused", RenderSettings::default()).unwrap();
        assert!(matches!(visualizer.raycast_rendering(), Err(VisualizerError::NoData)));
        assert!(matches!(visualizer.surface_rendering(), Err(VisualizerError::NoData)));
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let settings = RenderSettings {
            specular: f32::NAN,
            ..RenderSettings::default()
        };
        assert!(matches!(
            Visualizer::new("unused", settings),
            Err(VisualizerError::Config(_))
        ));
    }

    #[test]
    fn render_reads_the_folder_when_no_volume_is_given() {
        let dir = tempfile::tempdir().unwrap();
        let mut visualizer = Visualizer::new(dir.path(), RenderSettings::default()).unwrap();
        assert!(matches!(
            visualizer.render(),
            Err(VisualizerError::Load(VolumeLoaderError::NoValidImages))
        ));
    }
}
