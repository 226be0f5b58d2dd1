//! # DICOM-visualizer library
//!
//! This crate renders a folder of DICOM slices as a 3D volume, either by
//! raycasting the voxels through transfer functions or by extracting and
//! drawing an iso-surface.
//!
//! The slices are read with the dicom-rs ecosystem and stacked into a
//! [`Volume`] of Hounsfield units. If the environment supports it the files
//! are decoded in parallel using rayon. Two rendering modes are available:
//!  - Raycast: front-to-back compositing with scalar opacity, gradient
//!    opacity and color transfer functions and Phong shading
//!  - Surface: marching tetrahedra at an iso-value, drawn with a solid color
//!
//! Volumes can be composited on the CPU or, with [`Processor::GPU`], in a
//! WGPU compute shader. The `dicom-visualizer` binary opens an egui window
//! ([`app`]) or a line-based shell on top of the same [`Session`]. DICOM files are assumed to have the following
//! attributes:
//!   - No multiframe (always the first frame is used)
//!   - Images from the same series with equal rows and columns
//!
//! # Examples
//!
//! ## Rendering a folder of slices
//!
//! Read all DICOM files from the dicom/ directory, extract the surface at
//! 400 HU and write the view to a PNG file.
//!
//! ```no_run
//! # use dicom_visualizer::{RenderMode, RenderSettings, Visualizer};
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = RenderSettings {
//!     mode: RenderMode::Surface,
//!     isovalue: Some(400.0),
//!     ..RenderSettings::default()
//! };
//! let mut visualizer = Visualizer::new("dicom", settings)?;
//! let renderer = visualizer.render()?;
//! let image = renderer.render(800, 600, None).await?;
//! image.save("result.png")?;
//! # Ok(())
//! # }
//! ```
//!
//! [`Processor::GPU`]: enums::Processor::GPU

pub mod app;
pub mod camera;
pub mod cli;
pub mod config;
pub mod enums;
pub mod gpu_raycaster;
mod interpolator;
pub mod isosurface;
pub mod property;
pub mod rasterizer;
pub mod raycaster;
pub mod scene;
pub mod session;
pub mod transfer_function;
pub mod visualizer;
pub mod volume;
pub mod volume_loader;

pub use config::RenderSettings;
pub use enums::{Processor, RenderMode, SortBy};
pub use scene::Renderer;
pub use session::Session;
pub use visualizer::Visualizer;
pub use volume::Volume;
pub use volume_loader::VolumeLoader;
