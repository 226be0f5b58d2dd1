//! Desktop window around a [`Session`].
//!
//! The left panel holds the controls: folder picker, rendering mode, the
//! raycast shading inputs, the iso-value slider, the color and the
//! Visualize button. Inputs that do not apply to the selected mode are
//! disabled. The central panel shows the rendered viewport; dragging orbits
//! the camera and scrolling dollies it.

use crate::enums::RenderMode;
use crate::property::Color;
use crate::session::{CameraOp, ISOVALUE_RANGE, Input, SHADING_RANGE, Session, SessionError};

use egui::{Color32, ColorImage, Margin, RichText, Sense, TextureHandle, TextureOptions};
use image::RgbImage;
use tracing::{debug, warn};

/// Orbit in degrees per dragged point.
const DEGREES_PER_POINT: f32 = 0.4;
/// Dolly factor per scrolled point; scrolling up moves closer.
const DOLLY_PER_POINT: f32 = 1.002;

/// Open the window and run until it is closed.
pub fn run(session: Session) -> Result<(), eframe::Error> {
    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1100.0, 720.0])
            .with_min_inner_size([640.0, 480.0]),
        ..Default::default()
    };

    eframe::run_native(
        "DICOM Visualizer",
        native_options,
        Box::new(|_cc| Ok(Box::new(VisualizerApp::new(session)))),
    )
}

pub struct VisualizerApp {
    session: Session,
    viewport: Option<TextureHandle>,
    /// The viewport no longer shows the current scene
    stale: bool,
    error: Option<String>,
}

impl VisualizerApp {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            viewport: None,
            stale: false,
            error: None,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Record the result of a session call; successful calls that touched
    /// the scene mark the viewport for redraw.
    fn report<T>(&mut self, result: Result<T, SessionError>, redraw: impl FnOnce(&T) -> bool) {
        match result {
            Ok(value) => {
                self.error = None;
                self.stale |= redraw(&value);
            }
            Err(err) => {
                warn!(%err, "control rejected");
                self.error = Some(err.to_string());
            }
        }
    }

    fn control_panel(&mut self, ctx: &egui::Context) {
        egui::SidePanel::left("control_panel")
            .default_width(260.0)
            .resizable(false)
            .show(ctx, |ui| {
                ui.heading("Controls");
                ui.separator();

                if ui.button("Select Folder").clicked() {
                    if let Some(folder) = rfd::FileDialog::new().pick_folder() {
                        let result = self.session.select_folder(folder);
                        self.report(result, |_| true);
                    }
                }
                ui.label(self.session.folder_label());
                ui.add_space(8.0);

                self.mode_controls(ui);
                ui.add_space(8.0);

                ui.label(RichText::new("Raycast shading").strong());
                egui::Grid::new("shading").num_columns(2).show(ui, |ui| {
                    for input in [
                        Input::Ambient,
                        Input::Diffuse,
                        Input::Specular,
                        Input::SpecularPower,
                    ] {
                        ui.label(input_label(input));
                        self.shading_input(ui, input);
                        ui.end_row();
                    }
                });
                ui.add_space(8.0);

                self.isovalue_slider(ui);
                ui.add_space(8.0);

                self.color_controls(ui);
                ui.add_space(12.0);

                let visualize = ui.add_enabled(
                    self.session.can_visualize(),
                    egui::Button::new("Visualize"),
                );
                if visualize.clicked() {
                    let result = self.session.visualize().map(|_| ());
                    self.report(result, |_| true);
                }

                if let Some(error) = &self.error {
                    ui.add_space(8.0);
                    ui.label(RichText::new(error).color(Color32::from_rgb(230, 90, 90)));
                }
            });
    }

    fn mode_controls(&mut self, ui: &mut egui::Ui) {
        let current = self.session.settings().mode;
        let mut mode = current;
        ui.radio_value(&mut mode, RenderMode::Raycast, "Raycast Rendering");
        ui.radio_value(&mut mode, RenderMode::Surface, "Surface Rendering");
        if mode != current {
            let result = self.session.set_mode(mode);
            self.report(result, |rebuilt| *rebuilt);
        }
    }

    fn shading_input(&mut self, ui: &mut egui::Ui, input: Input) {
        let mut value = self.session.value(input);
        let response = ui.add_enabled(
            self.session.is_enabled(input),
            egui::DragValue::new(&mut value)
                .range(SHADING_RANGE.0..=SHADING_RANGE.1)
                .speed(0.01)
                .fixed_decimals(2),
        );
        if response.changed() {
            let had_scene = self.session.renderer().is_some();
            let result = self.session.set_input(input, value);
            self.report(result, |_| had_scene);
        }
    }

    fn isovalue_slider(&mut self, ui: &mut egui::Ui) {
        let enabled = self.session.is_enabled(Input::Isovalue);
        let mut value = self.session.value(Input::Isovalue);
        ui.add_enabled(enabled, egui::Label::new(self.session.isovalue_label()));
        let response = ui.add_enabled(
            enabled,
            egui::Slider::new(&mut value, ISOVALUE_RANGE.0..=ISOVALUE_RANGE.1)
                .integer()
                .show_value(false),
        );
        if response.changed() {
            let had_scene = self.session.renderer().is_some();
            let result = self.session.set_input(Input::Isovalue, value);
            self.report(result, |_| had_scene);
        }
    }

    fn color_controls(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.label("Color");
            let mut rgb = self.session.settings().color.as_array();
            if ui.color_edit_button_rgb(&mut rgb).changed() {
                let result = self.session.set_color(Color::new(rgb[0], rgb[1], rgb[2]));
                self.report(result, |rebuilt| *rebuilt);
            }

            ui.label("Background");
            let mut rgb = self.session.settings().background.as_array();
            if ui.color_edit_button_rgb(&mut rgb).changed() {
                self.stale |= self.session.set_background(Color::new(rgb[0], rgb[1], rgb[2]));
            }
        });
    }

    fn viewport_panel(&mut self, ctx: &egui::Context) {
        egui::CentralPanel::default().show(ctx, |ui| {
            ui.spacing_mut().window_margin = Margin::same(5);
            let size = ui.available_size();
            let (width, height) = viewport_pixels(size, ctx.pixels_per_point());
            if self.session.resize(width, height) {
                debug!(width, height, "viewport resized");
                self.stale = true;
            }

            if self.session.renderer().is_none() {
                self.viewport = None;
                ui.centered_and_justified(|ui| {
                    ui.label(RichText::new("Select a folder and press Visualize").weak());
                });
                return;
            }

            self.redraw(ctx);
            let (rect, response) = ui.allocate_exact_size(size, Sense::click_and_drag());
            if let Some(texture) = &self.viewport {
                let uv = egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0));
                ui.painter().image(texture.id(), rect, uv, Color32::WHITE);
            }

            let mut ops = Vec::new();
            if response.dragged() {
                ops.extend(drag_to_camera(response.drag_delta()));
            }
            if response.hovered() {
                let scroll = ui.input(|i| i.smooth_scroll_delta.y);
                ops.extend(scroll_to_dolly(scroll));
            }
            for op in ops {
                let result = self.session.camera(op);
                self.report(result, |_| true);
            }
            if self.stale {
                ctx.request_repaint();
            }
        });
    }

    /// Render the scene into the viewport texture when it is stale.
    fn redraw(&mut self, ctx: &egui::Context) {
        if !self.stale && self.viewport.is_some() {
            return;
        }
        self.stale = false;

        match futures::executor::block_on(self.session.snapshot()) {
            Ok(frame) => {
                let image = to_color_image(&frame);
                match &mut self.viewport {
                    Some(texture) => texture.set(image, TextureOptions::LINEAR),
                    None => {
                        let texture = ctx.load_texture("viewport", image, TextureOptions::LINEAR);
                        self.viewport = Some(texture);
                    }
                }
            }
            Err(err) => {
                warn!(%err, "failed to render viewport");
                self.error = Some(err.to_string());
            }
        }
    }
}

impl eframe::App for VisualizerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        egui::TopBottomPanel::top("top_panel").show(ctx, |ui| {
            egui::menu::bar(ui, |ui| {
                ui.menu_button("File", |ui| {
                    if ui.button("Quit").clicked() {
                        ctx.send_viewport_cmd(egui::ViewportCommand::Close);
                    }
                });
            });
        });

        self.control_panel(ctx);
        self.viewport_panel(ctx);
    }
}

fn input_label(input: Input) -> &'static str {
    match input {
        Input::Ambient => "Ambient",
        Input::Diffuse => "Diffuse",
        Input::Specular => "Specular",
        Input::SpecularPower => "Specular Power",
        Input::Isovalue => "Isovalue",
    }
}

/// Physical pixel size of a panel measured in points.
fn viewport_pixels(size: egui::Vec2, pixels_per_point: f32) -> (u32, u32) {
    let scale = if pixels_per_point.is_finite() && pixels_per_point > 0.0 {
        pixels_per_point
    } else {
        1.0
    };
    (
        (size.x * scale).round().max(1.0) as u32,
        (size.y * scale).round().max(1.0) as u32,
    )
}

/// Horizontal drag orbits around the view-up axis, vertical drag around
/// the horizontal axis.
fn drag_to_camera(delta: egui::Vec2) -> Vec<CameraOp> {
    let mut ops = Vec::with_capacity(2);
    if delta.x != 0.0 {
        ops.push(CameraOp::Azimuth(-delta.x * DEGREES_PER_POINT));
    }
    if delta.y != 0.0 {
        ops.push(CameraOp::Elevation(delta.y * DEGREES_PER_POINT));
    }
    ops
}

fn scroll_to_dolly(scroll: f32) -> Option<CameraOp> {
    (scroll != 0.0 && scroll.is_finite()).then(|| CameraOp::Dolly(DOLLY_PER_POINT.powf(scroll)))
}

fn to_color_image(frame: &RgbImage) -> ColorImage {
    let (width, height) = frame.dimensions();
    ColorImage::from_rgb([width as usize, height as usize], frame.as_raw())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RenderSettings;

    #[test]
    fn drag_maps_to_azimuth_and_elevation() {
        assert_eq!(
            drag_to_camera(egui::vec2(10.0, -5.0)),
            vec![CameraOp::Azimuth(-4.0), CameraOp::Elevation(-2.0)]
        );
        assert_eq!(drag_to_camera(egui::vec2(0.0, 2.5)), vec![CameraOp::Elevation(1.0)]);
        assert!(drag_to_camera(egui::Vec2::ZERO).is_empty());
    }

    #[test]
    fn scrolling_up_dollies_in() {
        match scroll_to_dolly(50.0) {
            Some(CameraOp::Dolly(factor)) => assert!(factor > 1.0),
            other => panic!("expected a dolly, got {other:?}"),
        }
        match scroll_to_dolly(-50.0) {
            Some(CameraOp::Dolly(factor)) => assert!(factor > 0.0 && factor < 1.0),
            other => panic!("expected a dolly, got {other:?}"),
        }
        assert_eq!(scroll_to_dolly(0.0), None);
        assert_eq!(scroll_to_dolly(f32::NAN), None);
    }

    #[test]
    fn frame_becomes_a_texture_of_the_same_size() {
        let mut frame = RgbImage::new(3, 2);
        frame.put_pixel(2, 1, image::Rgb([10, 20, 30]));

        let image = to_color_image(&frame);
        assert_eq!(image.size, [3, 2]);
        assert_eq!(image.pixels[5], Color32::from_rgb(10, 20, 30));
        assert_eq!(image.pixels[0], Color32::from_rgb(0, 0, 0));
    }

    #[test]
    fn viewport_size_follows_the_display_scale() {
        assert_eq!(viewport_pixels(egui::vec2(400.0, 300.0), 2.0), (800, 600));
        assert_eq!(viewport_pixels(egui::vec2(0.0, 10.4), 1.0), (1, 10));
        assert_eq!(viewport_pixels(egui::vec2(20.0, 20.0), f32::NAN), (20, 20));
    }

    #[test]
    fn rejected_controls_surface_the_error() {
        let mut app = VisualizerApp::new(Session::new(RenderSettings::default()));
        let result = app.session.visualize().map(|_| ());
        app.report(result, |_| true);

        assert_eq!(app.error.as_deref(), Some("No folder selected"));
        assert!(!app.stale);
        assert!(app.session().renderer().is_none());
    }
}
