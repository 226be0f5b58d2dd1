//! Interactive state around the [`Visualizer`].
//!
//! A [`Session`] is the model behind both the desktop window
//! ([`crate::app`]) and the terminal shell. It keeps the state of the
//! control panel: the selected folder, the render mode with the inputs it
//! enables, the shading values, the iso-value, the color and the current
//! scene. Once a scene exists every
//! parameter change rebuilds it and keeps the camera where the user left it.
//!
//! The shell is driven by one-line [`Command`]s:
//!
//! ```text
//! folder /data/ct-head
//! mode surface
//! isovalue 420
//! visualize
//! azimuth 30
//! snapshot head.png
//! ```

use crate::config::{MAX_VIEWPORT, RenderSettings};
use crate::enums::{Processor, RenderMode, SortBy};
use crate::gpu_raycaster::GpuContext;
use crate::property::{Color, ColorParseError};
use crate::scene::{RenderError, Renderer};
use crate::visualizer::{Visualizer, VisualizerError};
use crate::volume::Volume;

use image::RgbImage;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use web_time::Instant;

pub const NO_FOLDER_LABEL: &str = "No folder selected";

/// Range of the shading spin boxes.
pub const SHADING_RANGE: (f32, f32) = (0.0, 99.99);
/// Range of the iso-value slider.
pub const ISOVALUE_RANGE: (f32, f32) = (100.0, 1000.0);

pub const HELP: &str = "\
commands:
  folder <PATH>            select the folder of DICOM slices
  mode <raycast|surface>   choose the rendering mode
  ambient <VALUE>          raycast shading, 0 to 99.99
  diffuse <VALUE>
  specular <VALUE>
  specular-power <VALUE>
  isovalue <VALUE>         surface iso-value, 100 to 1000
  color <COLOR>            #rrggbb, r,g,b or a color name
  background <COLOR>
  visualize                build the scene
  azimuth <DEGREES>        orbit around the view-up axis
  elevation <DEGREES>      orbit around the horizontal axis
  roll <DEGREES>           rotate around the view direction
  zoom <FACTOR>            narrow the view angle
  dolly <FACTOR>           move toward the focal point
  reset-camera             frame the data again
  snapshot <PATH>          write the current view to a PNG file
  status                   show the current inputs
  help                     show this text
  quit                     leave the shell";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("No folder selected")]
    NoFolder,

    #[error("Not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("`{0}` is disabled in {1} mode")]
    InputDisabled(Input, RenderMode),

    #[error("`{0}` must be a finite number")]
    NotFinite(Input),

    #[error("`{0}` must be a finite number")]
    CameraNotFinite(&'static str),

    #[error("Nothing to show yet; run `visualize` first")]
    NoScene,

    #[error(transparent)]
    Visualizer(#[from] VisualizerError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("Failed to write {}: {source}", .path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Numeric inputs of the control panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    Ambient,
    Diffuse,
    Specular,
    SpecularPower,
    Isovalue,
}

impl Input {
    pub const ALL: [Input; 5] = [
        Input::Ambient,
        Input::Diffuse,
        Input::Specular,
        Input::SpecularPower,
        Input::Isovalue,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Input::Ambient => "ambient",
            Input::Diffuse => "diffuse",
            Input::Specular => "specular",
            Input::SpecularPower => "specular-power",
            Input::Isovalue => "isovalue",
        }
    }

    /// The mode in which the input can be edited.
    pub fn mode(&self) -> RenderMode {
        match self {
            Input::Isovalue => RenderMode::Surface,
            _ => RenderMode::Raycast,
        }
    }

    /// Clamp and quantize a value the way the input widget would.
    pub fn normalize(&self, value: f32) -> f32 {
        match self {
            Input::Isovalue => value.clamp(ISOVALUE_RANGE.0, ISOVALUE_RANGE.1).round(),
            _ => (value.clamp(SHADING_RANGE.0, SHADING_RANGE.1) * 100.0).round() / 100.0,
        }
    }
}

impl fmt::Display for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CameraOp {
    Azimuth(f32),
    Elevation(f32),
    Roll(f32),
    Zoom(f32),
    Dolly(f32),
    Reset,
}

impl CameraOp {
    pub fn name(&self) -> &'static str {
        match self {
            CameraOp::Azimuth(_) => "azimuth",
            CameraOp::Elevation(_) => "elevation",
            CameraOp::Roll(_) => "roll",
            CameraOp::Zoom(_) => "zoom",
            CameraOp::Dolly(_) => "dolly",
            CameraOp::Reset => "reset-camera",
        }
    }

    fn argument(&self) -> Option<f32> {
        match *self {
            CameraOp::Azimuth(value)
            | CameraOp::Elevation(value)
            | CameraOp::Roll(value)
            | CameraOp::Zoom(value)
            | CameraOp::Dolly(value) => Some(value),
            CameraOp::Reset => None,
        }
    }

    fn apply(&self, renderer: &mut Renderer) {
        let camera = renderer.camera_mut();
        match *self {
            CameraOp::Azimuth(degrees) => camera.azimuth(degrees),
            CameraOp::Elevation(degrees) => camera.elevation(degrees),
            CameraOp::Roll(degrees) => camera.roll(degrees),
            CameraOp::Zoom(factor) => camera.zoom(factor),
            CameraOp::Dolly(factor) => camera.dolly(factor),
            CameraOp::Reset => renderer.reset_camera(),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum CommandParseError {
    #[error("Empty command")]
    Empty,

    #[error("Unknown command `{0}`; try `help`")]
    Unknown(String),

    #[error("`{0}` expects an argument")]
    MissingArgument(&'static str),

    #[error("Invalid argument for `{command}`: {reason}")]
    InvalidArgument {
        command: &'static str,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Folder(PathBuf),
    Mode(RenderMode),
    Set(Input, f32),
    Color(Color),
    Background(Color),
    Visualize,
    Camera(CameraOp),
    Snapshot(PathBuf),
    Status,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = CommandParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        if line.is_empty() {
            return Err(CommandParseError::Empty);
        }
        let (keyword, rest) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(keyword, rest)| (keyword, rest.trim()));

        let argument = |command: &'static str| {
            if rest.is_empty() {
                Err(CommandParseError::MissingArgument(command))
            } else {
                Ok(rest)
            }
        };
        let number = |command: &'static str| -> Result<f32, CommandParseError> {
            let value = argument(command)?
                .parse::<f32>()
                .map_err(|err| CommandParseError::InvalidArgument {
                    command,
                    reason: err.to_string(),
                })?;
            if !value.is_finite() {
                return Err(CommandParseError::InvalidArgument {
                    command,
                    reason: format!("{value} is not a finite number"),
                });
            }
            Ok(value)
        };
        let color = |command: &'static str| -> Result<Color, CommandParseError> {
            argument(command)?
                .parse()
                .map_err(|err: ColorParseError| CommandParseError::InvalidArgument {
                    command,
                    reason: err.to_string(),
                })
        };

        let command = match keyword.to_ascii_lowercase().as_str() {
            "folder" => Command::Folder(PathBuf::from(argument("folder")?)),
            "mode" => Command::Mode(argument("mode")?.parse().map_err(|reason| {
                CommandParseError::InvalidArgument {
                    command: "mode",
                    reason,
                }
            })?),
            "ambient" => Command::Set(Input::Ambient, number("ambient")?),
            "diffuse" => Command::Set(Input::Diffuse, number("diffuse")?),
            "specular" => Command::Set(Input::Specular, number("specular")?),
            "specular-power" => Command::Set(Input::SpecularPower, number("specular-power")?),
            "isovalue" => Command::Set(Input::Isovalue, number("isovalue")?),
            "color" => Command::Color(color("color")?),
            "background" => Command::Background(color("background")?),
            "visualize" => Command::Visualize,
            "azimuth" => Command::Camera(CameraOp::Azimuth(number("azimuth")?)),
            "elevation" => Command::Camera(CameraOp::Elevation(number("elevation")?)),
            "roll" => Command::Camera(CameraOp::Roll(number("roll")?)),
            "zoom" => Command::Camera(CameraOp::Zoom(number("zoom")?)),
            "dolly" => Command::Camera(CameraOp::Dolly(number("dolly")?)),
            "reset-camera" => Command::Camera(CameraOp::Reset),
            "snapshot" => Command::Snapshot(PathBuf::from(argument("snapshot")?)),
            "status" => Command::Status,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            _ => return Err(CommandParseError::Unknown(keyword.to_string())),
        };
        Ok(command)
    }
}

/// What the caller should do after a command ran.
#[derive(Debug, Default, PartialEq)]
pub struct Outcome {
    pub message: Option<String>,
    /// The scene changed and the viewport is stale
    pub redraw: bool,
    pub quit: bool,
}

impl Outcome {
    fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    fn redraw(mut self, redraw: bool) -> Self {
        self.redraw = redraw;
        self
    }
}

struct CachedVolume {
    folder: PathBuf,
    sort_by: SortBy,
    volume: Arc<Volume>,
}

pub struct Session {
    folder: Option<PathBuf>,
    settings: RenderSettings,
    renderer: Option<Renderer>,
    cache: Option<CachedVolume>,
    gpu: Option<GpuContext>,
}

impl Session {
    /// Start a session; values outside the widget ranges are clamped.
    ///
    /// An unset iso-value starts at the slider minimum.
    pub fn new(settings: RenderSettings) -> Self {
        let mut settings = settings;
        settings.isovalue.get_or_insert(ISOVALUE_RANGE.0);
        for input in Input::ALL {
            let value = Self::value_of(&settings, input);
            if value.is_finite() {
                *Self::slot(&mut settings, input) = input.normalize(value);
            }
        }

        Self {
            folder: None,
            settings,
            renderer: None,
            cache: None,
            gpu: None,
        }
    }

    pub fn set_gpu(&mut self, gpu: Option<GpuContext>) {
        self.gpu = gpu;
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    pub fn folder(&self) -> Option<&Path> {
        self.folder.as_deref()
    }

    pub fn folder_label(&self) -> String {
        self.folder
            .as_ref()
            .map_or_else(|| NO_FOLDER_LABEL.to_string(), |f| f.display().to_string())
    }

    pub fn isovalue_label(&self) -> String {
        format!("Isovalue: {}", self.value(Input::Isovalue))
    }

    pub fn renderer(&self) -> Option<&Renderer> {
        self.renderer.as_ref()
    }

    pub fn can_visualize(&self) -> bool {
        self.folder.is_some()
    }

    pub fn is_enabled(&self, input: Input) -> bool {
        input.mode() == self.settings.mode
    }

    pub fn enabled_inputs(&self) -> Vec<Input> {
        Input::ALL
            .into_iter()
            .filter(|&input| self.is_enabled(input))
            .collect()
    }

    pub fn value(&self, input: Input) -> f32 {
        Self::value_of(&self.settings, input)
    }

    fn value_of(settings: &RenderSettings, input: Input) -> f32 {
        match input {
            Input::Ambient => settings.ambient,
            Input::Diffuse => settings.diffuse,
            Input::Specular => settings.specular,
            Input::SpecularPower => settings.specular_power,
            Input::Isovalue => settings.isovalue.unwrap_or(ISOVALUE_RANGE.0),
        }
    }

    fn slot(settings: &mut RenderSettings, input: Input) -> &mut f32 {
        match input {
            Input::Ambient => &mut settings.ambient,
            Input::Diffuse => &mut settings.diffuse,
            Input::Specular => &mut settings.specular,
            Input::SpecularPower => &mut settings.specular_power,
            Input::Isovalue => settings.isovalue.get_or_insert(ISOVALUE_RANGE.0),
        }
    }

    /// Choose the folder to read. A different folder clears the scene.
    pub fn select_folder(&mut self, folder: impl Into<PathBuf>) -> Result<(), SessionError> {
        let folder = folder.into();
        if !folder.is_dir() {
            return Err(SessionError::NotADirectory(folder));
        }
        if self.folder.as_ref() != Some(&folder) {
            self.renderer = None;
        }
        info!(folder = %folder.display(), "selected folder");
        self.folder = Some(folder);
        Ok(())
    }

    /// Switch modes; returns whether the scene was rebuilt.
    pub fn set_mode(&mut self, mode: RenderMode) -> Result<bool, SessionError> {
        if self.settings.mode == mode {
            return Ok(false);
        }
        let rebuilt = self.update(|settings| settings.mode = mode)?;
        debug!(%mode, enabled = ?self.enabled_inputs(), "switched mode");
        Ok(rebuilt)
    }

    /// Set a numeric input and return the value it was clamped to.
    pub fn set_input(&mut self, input: Input, value: f32) -> Result<f32, SessionError> {
        if !self.is_enabled(input) {
            return Err(SessionError::InputDisabled(input, self.settings.mode));
        }
        if !value.is_finite() {
            return Err(SessionError::NotFinite(input));
        }
        let value = input.normalize(value);
        if self.value(input) != value {
            self.update(|settings| *Self::slot(settings, input) = value)?;
        }
        Ok(value)
    }

    pub fn set_color(&mut self, color: Color) -> Result<bool, SessionError> {
        if self.settings.color == color {
            return Ok(false);
        }
        self.update(|settings| settings.color = color)
    }

    pub fn set_background(&mut self, background: Color) -> bool {
        self.settings.background = background;
        match &mut self.renderer {
            Some(renderer) => {
                renderer.set_background(background);
                true
            }
            None => false,
        }
    }

    /// Apply a change and rebuild an existing scene; the change is undone
    /// when the rebuild fails.
    fn update(&mut self, change: impl FnOnce(&mut RenderSettings)) -> Result<bool, SessionError> {
        let previous = self.settings.clone();
        change(&mut self.settings);
        self.refresh().map_err(|err| {
            self.settings = previous;
            err
        })
    }

    /// Change the viewport size, clamped to `1..=MAX_VIEWPORT` per edge.
    /// Returns whether the size changed.
    pub fn resize(&mut self, width: u32, height: u32) -> bool {
        let size = (width.clamp(1, MAX_VIEWPORT), height.clamp(1, MAX_VIEWPORT));
        if size == (self.settings.width, self.settings.height) {
            return false;
        }
        (self.settings.width, self.settings.height) = size;
        true
    }

    fn refresh(&mut self) -> Result<bool, SessionError> {
        if self.renderer.is_none() {
            return Ok(false);
        }
        self.visualize()?;
        Ok(true)
    }

    /// Rebuild the scene from the current inputs.
    ///
    /// The volume is read once per folder and sort order; an existing camera
    /// pose carries over to the new scene.
    pub fn visualize(&mut self) -> Result<&Renderer, SessionError> {
        let folder = self.folder.clone().ok_or(SessionError::NoFolder)?;
        let sort_by = self.settings.sort_by;
        let started = Instant::now();

        let mut visualizer = Visualizer::new(&folder, self.settings.clone())?;
        let cached = self
            .cache
            .as_ref()
            .filter(|cached| cached.folder == folder && cached.sort_by == sort_by)
            .map(|cached| cached.volume.clone());
        match cached {
            Some(volume) => visualizer = visualizer.with_volume(volume),
            None => {
                let volume = visualizer.read_data()?;
                self.cache = Some(CachedVolume {
                    folder,
                    sort_by,
                    volume,
                });
            }
        }

        let mut renderer = visualizer.render()?;
        if let Some(previous) = &self.renderer {
            renderer.set_camera(previous.camera().clone());
        }
        info!(
            mode = %self.settings.mode,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "visualized"
        );
        Ok(self.renderer.insert(renderer))
    }

    pub fn camera(&mut self, op: CameraOp) -> Result<(), SessionError> {
        if op.argument().is_some_and(|value| !value.is_finite()) {
            return Err(SessionError::CameraNotFinite(op.name()));
        }
        let renderer = self.renderer.as_mut().ok_or(SessionError::NoScene)?;
        op.apply(renderer);
        Ok(())
    }

    /// Render the current scene at the configured viewport size.
    ///
    /// Volumes go through the GPU when it was requested and is available;
    /// a failing GPU render is retried on the CPU.
    pub async fn snapshot(&self) -> Result<RgbImage, SessionError> {
        let renderer = self.renderer.as_ref().ok_or(SessionError::NoScene)?;
        let (width, height) = (self.settings.width, self.settings.height);

        let gpu = match (self.settings.processor, &self.gpu) {
            (Processor::GPU, Some(gpu)) => Some(gpu),
            (Processor::GPU, None) => {
                debug!("no GPU context, compositing on the CPU");
                None
            }
            (Processor::CPU, _) => None,
        };

        match renderer.render(width, height, gpu).await {
            Err(RenderError::Gpu(err)) => {
                warn!(%err, "GPU render failed, falling back to the CPU");
                Ok(renderer.render(width, height, None).await?)
            }
            result => Ok(result?),
        }
    }

    pub async fn save_snapshot(&self, path: &Path) -> Result<(), SessionError> {
        let frame = self.snapshot().await?;
        frame.save(path).map_err(|source| SessionError::Image {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "wrote snapshot");
        Ok(())
    }

    pub fn status(&self) -> String {
        let mut lines = vec![
            format!("folder: {}", self.folder_label()),
            format!("mode: {}", self.settings.mode),
        ];
        for input in Input::ALL {
            let state = if self.is_enabled(input) { "" } else { " (disabled)" };
            let line = match input {
                Input::Isovalue => format!("{}{state}", self.isovalue_label()),
                _ => format!("{input}: {:.2}{state}", self.value(input)),
            };
            lines.push(line);
        }
        lines.push(format!("color: {}", self.settings.color));
        lines.push(format!("background: {}", self.settings.background));
        lines.push(format!(
            "scene: {}",
            if self.renderer.is_some() { "ready" } else { "none" }
        ));
        lines.join("\n")
    }

    pub async fn execute(&mut self, command: Command) -> Result<Outcome, SessionError> {
        let outcome = match command {
            Command::Folder(folder) => {
                self.select_folder(folder)?;
                Outcome::message(self.folder_label())
            }
            Command::Mode(mode) => {
                let redraw = self.set_mode(mode)?;
                let enabled: Vec<&str> = self.enabled_inputs().iter().map(Input::name).collect();
                Outcome::message(format!("mode: {mode} (enabled: {})", enabled.join(", ")))
                    .redraw(redraw)
            }
            Command::Set(input, value) => {
                let had_scene = self.renderer.is_some();
                let applied = self.set_input(input, value)?;
                let message = match input {
                    Input::Isovalue => self.isovalue_label(),
                    _ => format!("{input}: {applied:.2}"),
                };
                Outcome::message(message).redraw(had_scene)
            }
            Command::Color(color) => {
                let redraw = self.set_color(color)?;
                Outcome::message(format!("color: {color}")).redraw(redraw)
            }
            Command::Background(color) => {
                let redraw = self.set_background(color);
                Outcome::message(format!("background: {color}")).redraw(redraw)
            }
            Command::Visualize => {
                self.visualize()?;
                Outcome::default().redraw(true)
            }
            Command::Camera(op) => {
                self.camera(op)?;
                Outcome::default().redraw(true)
            }
            Command::Snapshot(path) => {
                self.save_snapshot(&path).await?;
                Outcome::message(format!("wrote {}", path.display()))
            }
            Command::Status => Outcome::message(self.status()),
            Command::Help => Outcome::message(HELP),
            Command::Quit => Outcome {
                quit: true,
                ..Outcome::default()
            },
        };
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Prop;
    use crate::volume_loader::tests::write_series;

    fn ct_folder() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        // -24, 476, 976 and 1476 HU
        write_series(dir.path(), &[1000, 1500, 2000, 2500]);
        dir
    }

    fn small_settings() -> RenderSettings {
        RenderSettings {
            width: 24,
            height: 16,
            ..RenderSettings::default()
        }
    }

    #[test]
    fn starts_without_folder_in_raycast_mode() {
        let session = Session::new(RenderSettings::default());
        assert_eq!(session.folder_label(), "No folder selected");
        assert!(!session.can_visualize());
        assert_eq!(session.isovalue_label(), "Isovalue: 100");
        assert_eq!(
            session.enabled_inputs(),
            vec![
                Input::Ambient,
                Input::Diffuse,
                Input::Specular,
                Input::SpecularPower
            ]
        );
    }

    #[test]
    fn visualize_needs_a_folder() {
        let mut session = Session::new(RenderSettings::default());
        assert!(matches!(session.visualize(), Err(SessionError::NoFolder)));
    }

    #[test]
    fn folder_must_exist() {
        let mut session = Session::new(RenderSettings::default());
        assert!(matches!(
            session.select_folder("/definitely/not/here"),
            Err(SessionError::NotADirectory(_))
        ));
        assert_eq!(session.folder_label(), NO_FOLDER_LABEL);
    }

    #[test]
    fn mode_toggles_enabled_inputs() {
        let mut session = Session::new(RenderSettings::default());
        assert!(matches!(
            session.set_input(Input::Isovalue, 300.0),
            Err(SessionError::InputDisabled(Input::Isovalue, RenderMode::Raycast))
        ));

        session.set_mode(RenderMode::Surface).unwrap();
        assert_eq!(session.enabled_inputs(), vec![Input::Isovalue]);
        assert!(matches!(
            session.set_input(Input::Ambient, 0.5),
            Err(SessionError::InputDisabled(Input::Ambient, RenderMode::Surface))
        ));
        assert_eq!(session.set_input(Input::Isovalue, 300.0).unwrap(), 300.0);
        assert_eq!(session.isovalue_label(), "Isovalue: 300");
    }

    #[test]
    fn inputs_are_clamped_to_widget_ranges() {
        let mut session = Session::new(RenderSettings::default());
        assert_eq!(session.set_input(Input::Ambient, -3.0).unwrap(), 0.0);
        assert_eq!(session.set_input(Input::Diffuse, 250.0).unwrap(), 99.99);
        assert_eq!(session.set_input(Input::Specular, 0.126).unwrap(), 0.13);
        assert!(matches!(
            session.set_input(Input::SpecularPower, f32::NAN),
            Err(SessionError::NotFinite(Input::SpecularPower))
        ));

        session.set_mode(RenderMode::Surface).unwrap();
        assert_eq!(session.set_input(Input::Isovalue, 12.0).unwrap(), 100.0);
        assert_eq!(session.set_input(Input::Isovalue, 5000.0).unwrap(), 1000.0);
        assert_eq!(session.set_input(Input::Isovalue, 432.6).unwrap(), 433.0);
    }

    #[test]
    fn configured_isovalue_replaces_the_slider_minimum() {
        let session = Session::new(RenderSettings {
            isovalue: Some(420.0),
            ..RenderSettings::default()
        });
        assert_eq!(session.isovalue_label(), "Isovalue: 420");
    }

    #[test]
    fn initial_settings_are_clamped() {
        let session = Session::new(RenderSettings {
            isovalue: Some(20.0),
            specular_power: 128.0,
            ..RenderSettings::default()
        });
        assert_eq!(session.value(Input::Isovalue), 100.0);
        assert_eq!(session.value(Input::SpecularPower), 99.99);
    }

    #[test]
    fn resize_clamps_to_the_viewport_limits() {
        let mut session = Session::new(small_settings());
        assert!(!session.resize(24, 16));
        assert!(session.resize(0, 100_000));
        assert_eq!(
            (session.settings().width, session.settings().height),
            (1, MAX_VIEWPORT)
        );
    }

    #[test]
    fn changes_before_visualize_do_not_build_a_scene() {
        let dir = ct_folder();
        let mut session = Session::new(small_settings());
        session.select_folder(dir.path()).unwrap();
        session.set_input(Input::Ambient, 0.4).unwrap();
        assert!(!session.set_color(Color::new(1.0, 0.0, 0.0)).unwrap());
        assert!(session.renderer().is_none());
    }

    #[test]
    fn parameter_changes_rebuild_and_keep_the_camera() {
        let dir = ct_folder();
        let mut session = Session::new(small_settings());
        session.select_folder(dir.path()).unwrap();
        session.visualize().unwrap();

        session.camera(CameraOp::Azimuth(40.0)).unwrap();
        session.camera(CameraOp::Zoom(1.5)).unwrap();
        let pose = session.renderer().unwrap().camera().clone();

        session.set_input(Input::Specular, 0.7).unwrap();
        let renderer = session.renderer().unwrap();
        assert_eq!(renderer.camera(), &pose);
        match &renderer.props()[0] {
            Prop::Volume(actor) => assert_eq!(actor.property.specular, 0.7),
            prop => panic!("expected a volume, got {prop:?}"),
        }

        assert!(session.set_mode(RenderMode::Surface).unwrap());
        let renderer = session.renderer().unwrap();
        assert_eq!(renderer.camera(), &pose);
        assert!(matches!(renderer.props()[0], Prop::Surface(_)));
    }

    #[test]
    fn reset_camera_frames_the_data_again() {
        let dir = ct_folder();
        let mut session = Session::new(small_settings());
        session.select_folder(dir.path()).unwrap();
        let framed = session.visualize().unwrap().camera().clone();

        session.camera(CameraOp::Dolly(2.0)).unwrap();
        assert_ne!(session.renderer().unwrap().camera(), &framed);
        session.camera(CameraOp::Reset).unwrap();

        let camera = session.renderer().unwrap().camera();
        assert!((camera.position() - framed.position()).norm() < 1e-3);
    }

    #[test]
    fn selecting_another_folder_clears_the_scene() {
        let first = ct_folder();
        let second = ct_folder();
        let mut session = Session::new(small_settings());
        session.select_folder(first.path()).unwrap();
        session.visualize().unwrap();

        session.select_folder(first.path()).unwrap();
        assert!(session.renderer().is_some());
        session.select_folder(second.path()).unwrap();
        assert!(session.renderer().is_none());
        assert!(matches!(session.camera(CameraOp::Roll(10.0)), Err(SessionError::NoScene)));
    }

    #[test]
    fn non_finite_camera_arguments_leave_the_pose_alone() {
        let dir = ct_folder();
        let mut session = Session::new(small_settings());
        session.select_folder(dir.path()).unwrap();
        let framed = session.visualize().unwrap().camera().clone();

        for op in [
            CameraOp::Azimuth(f32::NAN),
            CameraOp::Elevation(f32::INFINITY),
            CameraOp::Roll(f32::NEG_INFINITY),
            CameraOp::Dolly(f32::NAN),
        ] {
            assert!(matches!(
                session.camera(op),
                Err(SessionError::CameraNotFinite(name)) if name == op.name()
            ));
        }
        assert_eq!(session.renderer().unwrap().camera(), &framed);

        session.set_input(Input::Ambient, 0.5).unwrap();
        let camera = session.renderer().unwrap().camera();
        assert!(camera.position().coords.iter().all(|c| c.is_finite()));
    }

    #[test]
    fn failed_rebuild_restores_the_previous_inputs() {
        let dir = ct_folder();
        let mut session = Session::new(small_settings());
        session.select_folder(dir.path()).unwrap();
        session.visualize().unwrap();

        // force the next rebuild to read the now empty folder
        session.cache = None;
        for entry in std::fs::read_dir(dir.path()).unwrap() {
            std::fs::remove_file(entry.unwrap().path()).unwrap();
        }
        let before = session.settings().clone();

        assert!(session.set_input(Input::Ambient, 0.5).is_err());
        assert!(session.set_color(Color::new(1.0, 0.0, 0.0)).is_err());
        assert!(session.set_mode(RenderMode::Surface).is_err());
        assert_eq!(session.settings(), &before);
        assert!(session.is_enabled(Input::Ambient));
        assert!(session.renderer().is_some());
    }

    #[test]
    fn volume_is_read_once_per_folder() {
        let dir = ct_folder();
        let mut session = Session::new(small_settings());
        session.select_folder(dir.path()).unwrap();
        session.visualize().unwrap();

        // the cached volume survives the files going away
        for entry in std::fs::read_dir(dir.path()).unwrap() {
            std::fs::remove_file(entry.unwrap().path()).unwrap();
        }
        session.set_input(Input::Diffuse, 0.5).unwrap();
        assert!(session.renderer().is_some());
    }

    #[test]
    fn parses_commands() {
        assert_eq!(
            "folder /data/ct head".parse::<Command>().unwrap(),
            Command::Folder(PathBuf::from("/data/ct head"))
        );
        assert_eq!(
            "  MODE surface ".parse::<Command>().unwrap(),
            Command::Mode(RenderMode::Surface)
        );
        assert_eq!(
            "specular-power 12.5".parse::<Command>().unwrap(),
            Command::Set(Input::SpecularPower, 12.5)
        );
        assert_eq!(
            "color red".parse::<Command>().unwrap(),
            Command::Color(Color::new(1.0, 0.0, 0.0))
        );
        assert_eq!(
            "zoom 2".parse::<Command>().unwrap(),
            Command::Camera(CameraOp::Zoom(2.0))
        );
        assert_eq!(
            "reset-camera".parse::<Command>().unwrap(),
            Command::Camera(CameraOp::Reset)
        );
        assert_eq!("exit".parse::<Command>().unwrap(), Command::Quit);
    }

    #[test]
    fn rejects_malformed_commands() {
        assert_eq!("".parse::<Command>(), Err(CommandParseError::Empty));
        assert_eq!(
            "explode now".parse::<Command>(),
            Err(CommandParseError::Unknown("explode".to_string()))
        );
        assert_eq!(
            "ambient".parse::<Command>(),
            Err(CommandParseError::MissingArgument("ambient"))
        );
        assert!(matches!(
            "isovalue lots".parse::<Command>(),
            Err(CommandParseError::InvalidArgument { command: "isovalue", .. })
        ));
        assert!(matches!(
            "mode wireframe".parse::<Command>(),
            Err(CommandParseError::InvalidArgument { command: "mode", .. })
        ));
        for line in ["azimuth nan", "elevation inf", "roll -inf", "ambient NaN"] {
            assert!(
                matches!(line.parse::<Command>(), Err(CommandParseError::InvalidArgument { .. })),
                "{line} was accepted"
            );
        }
    }

    #[tokio::test]
    async fn executes_a_session_script() {
        let dir = ct_folder();
        let output = tempfile::tempdir().unwrap();
        let snapshot = output.path().join("view.png");
        let mut session = Session::new(small_settings());

        let script = [
            format!("folder {}", dir.path().display()),
            "mode surface".to_string(),
            "isovalue 700".to_string(),
            "visualize".to_string(),
            "azimuth 15".to_string(),
            format!("snapshot {}", snapshot.display()),
        ];
        let mut outcomes = Vec::new();
        for line in &script {
            outcomes.push(session.execute(line.parse().unwrap()).await.unwrap());
        }

        assert_eq!(outcomes[2].message.as_deref(), Some("Isovalue: 700"));
        assert!(!outcomes[2].redraw);
        assert!(outcomes[3].redraw);
        assert!(outcomes[4].redraw);

        let written = image::open(&snapshot).unwrap();
        assert_eq!((written.width(), written.height()), (24, 16));

        assert!(session.execute(Command::Quit).await.unwrap().quit);
    }

    #[tokio::test]
    async fn snapshot_needs_a_scene() {
        let session = Session::new(small_settings());
        assert!(matches!(session.snapshot().await, Err(SessionError::NoScene)));
    }

    #[tokio::test]
    async fn gpu_without_context_falls_back_to_cpu() {
        let dir = ct_folder();
        let mut session = Session::new(RenderSettings {
            processor: Processor::GPU,
            ..small_settings()
        });
        session.select_folder(dir.path()).unwrap();
        session.visualize().unwrap();

        let frame = session.snapshot().await.unwrap();
        assert_eq!(frame.dimensions(), (24, 16));
    }
}
