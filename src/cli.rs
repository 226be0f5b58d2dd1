//! Command line of the `dicom-visualizer` binary.

use crate::config::{ConfigError, RenderSettings};
use crate::enums::{Processor, RenderMode, SortBy};
use crate::property::Color;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "dicom-visualizer", version, about = "Raycast and iso-surface rendering of DICOM series")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Render a folder of slices once and write a PNG
    Render {
        /// Folder containing the DICOM slices
        #[arg(value_name = "FOLDER")]
        folder: PathBuf,

        #[command(flatten)]
        options: RenderOptions,
    },

    /// Open the desktop window
    Gui {
        /// Folder to select on start
        #[arg(long, value_name = "FOLDER")]
        folder: Option<PathBuf>,

        #[command(flatten)]
        options: RenderOptions,
    },

    /// Read shell commands from stdin, rewriting the viewport after each render
    Interactive {
        /// Folder to select on start
        #[arg(long, value_name = "FOLDER")]
        folder: Option<PathBuf>,

        #[command(flatten)]
        options: RenderOptions,
    },
}

/// Flags that override values of the settings file.
#[derive(Args, Debug, Default, Clone)]
pub struct RenderOptions {
    /// JSON settings file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[arg(short, long, value_enum)]
    pub mode: Option<RenderMode>,

    #[arg(long)]
    pub ambient: Option<f32>,

    #[arg(long)]
    pub diffuse: Option<f32>,

    #[arg(long)]
    pub specular: Option<f32>,

    #[arg(long)]
    pub specular_power: Option<f32>,

    #[arg(short, long)]
    pub isovalue: Option<f32>,

    /// #rrggbb, r,g,b in [0, 1] or a color name
    #[arg(long)]
    pub color: Option<Color>,

    #[arg(long)]
    pub background: Option<Color>,

    #[arg(long)]
    pub width: Option<u32>,

    #[arg(long)]
    pub height: Option<u32>,

    #[arg(long, value_enum)]
    pub sort_by: Option<SortBy>,

    /// Composite volumes with a compute shader
    #[arg(long)]
    pub gpu: bool,

    /// PNG written after each render
    #[arg(short, long, value_name = "FILE", default_value = "viewport.png")]
    pub output: PathBuf,
}

impl RenderOptions {
    /// Settings from the config file (or defaults) with the flags applied.
    pub fn settings(&self) -> Result<RenderSettings, ConfigError> {
        let mut settings = match &self.config {
            Some(path) => RenderSettings::load(path)?,
            None => RenderSettings::default(),
        };

        if let Some(mode) = self.mode {
            settings.mode = mode;
        }
        let overrides = [
            (&mut settings.ambient, self.ambient),
            (&mut settings.diffuse, self.diffuse),
            (&mut settings.specular, self.specular),
            (&mut settings.specular_power, self.specular_power),
        ];
        for (slot, value) in overrides {
            if let Some(value) = value {
                *slot = value;
            }
        }
        if self.isovalue.is_some() {
            settings.isovalue = self.isovalue;
        }
        if let Some(color) = self.color {
            settings.color = color;
        }
        if let Some(background) = self.background {
            settings.background = background;
        }
        if let Some(width) = self.width {
            settings.width = width;
        }
        if let Some(height) = self.height {
            settings.height = height;
        }
        if let Some(sort_by) = self.sort_by {
            settings.sort_by = sort_by;
        }
        if self.gpu {
            settings.processor = Processor::GPU;
        }

        settings.validate()?;
        Ok(settings)
    }
}
