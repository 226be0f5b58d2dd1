//! Render settings shared by the adapter, the interactive session and the CLI.
//!
//! Settings can be stored as a JSON file; keys that are absent take their
//! default values:
//!
//! ```json
//! { "mode": "surface", "isovalue": 400, "color": "#e0d0b0" }
//! ```

use crate::enums::{Processor, RenderMode, SortBy};
use crate::property::Color;

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Iso-value used when none is configured.
pub const DEFAULT_ISOVALUE: f32 = 500.0;

/// Largest accepted viewport edge in pixels.
pub const MAX_VIEWPORT: u32 = 16384;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read settings: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub mode: RenderMode,
    pub ambient: f32,
    pub diffuse: f32,
    pub specular: f32,
    pub specular_power: f32,
    /// Scalar value at which the surface is extracted; unset means
    /// [`DEFAULT_ISOVALUE`] for one-shot renders and the slider minimum in
    /// the interactive frontends
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isovalue: Option<f32>,
    pub color: Color,
    pub background: Color,
    pub width: u32,
    pub height: u32,
    /// Distance between ray samples in mm
    pub sample_distance: f32,
    pub sort_by: SortBy,
    pub processor: Processor,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            mode: RenderMode::Raycast,
            ambient: 0.1,
            diffuse: 0.9,
            specular: 0.2,
            specular_power: 10.0,
            isovalue: None,
            color: Color::BLUE,
            background: Color::BACKGROUND,
            width: 800,
            height: 600,
            sample_distance: 1.0,
            sort_by: SortBy::default(),
            processor: Processor::default(),
        }
    }
}

impl RenderSettings {
    /// The configured iso-value or [`DEFAULT_ISOVALUE`].
    pub fn isovalue(&self) -> f32 {
        self.isovalue.unwrap_or(DEFAULT_ISOVALUE)
    }

    /// Read and validate a JSON settings file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&data)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let coefficients = [
            ("ambient", self.ambient),
            ("diffuse", self.diffuse),
            ("specular", self.specular),
            ("specular_power", self.specular_power),
        ];
        for (field, value) in coefficients {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("expected a non-negative number, got {value}"),
                });
            }
        }

        if let Some(isovalue) = self.isovalue.filter(|v| !v.is_finite()) {
            return Err(ConfigError::Invalid {
                field: "isovalue",
                reason: format!("expected a finite number, got {isovalue}"),
            });
        }
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::Invalid {
                field: "width/height",
                reason: format!("viewport {}x{} is empty", self.width, self.height),
            });
        }
        if self.width > MAX_VIEWPORT || self.height > MAX_VIEWPORT {
            return Err(ConfigError::Invalid {
                field: "width/height",
                reason: format!(
                    "viewport {}x{} exceeds {MAX_VIEWPORT} pixels per edge",
                    self.width, self.height
                ),
            });
        }
        if !(self.sample_distance.is_finite() && self.sample_distance > 0.0) {
            return Err(ConfigError::Invalid {
                field: "sample_distance",
                reason: format!("expected a positive number, got {}", self.sample_distance),
            });
        }
        Ok(())
    }
}
