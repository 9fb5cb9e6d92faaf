use std::path::PathBuf;

use egui::{Color32, RichText};
use log::{error, info, warn};

use crate::canvas::Canvas;
use crate::catalog::{Catalog, Category, PropertyValue};
use crate::document;
use crate::graph::{Diagram, NodeId};
use crate::plan::{self, Registry};
use crate::scene::{ArmedTemplate, Scene, Tool, ToolState};

const ZOOM_PRESETS: [(&str, f32); 5] = [
    ("50%", 0.5),
    ("75%", 0.75),
    ("100%", 1.0),
    ("125%", 1.25),
    ("150%", 1.5),
];

/// A command deferred behind the unsaved-changes confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingAction {
    New,
    Open,
    Exit,
}

pub struct DesignerApp {
    scene: Scene,
    canvas: Canvas,
    catalog: Catalog,
    registry: Registry,
    tool: Tool,
    /// Armed toolbox entry as (category, index into that category's list).
    armed: Option<(Category, usize)>,
    save_path: Option<PathBuf>,
    status: String,
    confirm: Option<PendingAction>,
    about_open: bool,
    /// Local edit buffer for the selected node's label.
    label_edit: Option<(NodeId, String)>,
}

impl DesignerApp {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            scene: Scene::new(),
            canvas: Canvas::default(),
            catalog,
            registry: Registry::builtin(),
            tool: Tool::Pointer,
            armed: None,
            save_path: None,
            status: String::new(),
            confirm: None,
            about_open: false,
            label_edit: None,
        }
    }

    fn tool_state(&self) -> ToolState {
        let armed = self.armed.and_then(|(category, index)| {
            let template = self.catalog.modules.get(&category)?.get(index)?;
            Some(ArmedTemplate {
                name: template.name.clone(),
                category,
                kwargs: template.kwargs.clone(),
            })
        });
        ToolState {
            tool: self.tool,
            armed,
        }
    }

    fn set_status(&mut self, text: impl Into<String>) {
        self.status = text.into();
    }

    fn request(&mut self, action: PendingAction, ctx: &egui::Context) {
        if self.scene.is_dirty() {
            self.confirm = Some(action);
        } else {
            self.perform(action, ctx);
        }
    }

    fn perform(&mut self, action: PendingAction, ctx: &egui::Context) {
        match action {
            PendingAction::New => {
                self.scene.reset(Diagram::new());
                self.save_path = None;
                self.label_edit = None;
                self.set_status("new diagram");
                info!("new diagram");
            }
            PendingAction::Open => self.open(),
            PendingAction::Exit => ctx.send_viewport_cmd(egui::ViewportCommand::Close),
        }
    }

    fn open(&mut self) {
        let Some(path) = rfd::FileDialog::new()
            .add_filter("JSON", &["json"])
            .pick_file()
        else {
            self.set_status("open cancelled");
            return;
        };
        match document::load_from_path(&path, &self.catalog.version) {
            Ok((diagram, warnings)) => {
                self.scene.reset(diagram);
                self.save_path = Some(path.clone());
                self.label_edit = None;
                if warnings.is_empty() {
                    self.set_status(format!("opened {}", path.display()));
                } else {
                    let joined = warnings
                        .iter()
                        .map(|w| w.to_string())
                        .collect::<Vec<_>>()
                        .join("; ");
                    self.set_status(format!("opened {} ({joined})", path.display()));
                }
                info!("opened {}", path.display());
            }
            Err(err) => {
                // Load failed: the in-memory diagram is untouched.
                error!("open failed: {err}");
                self.set_status(format!("open failed: {err}"));
            }
        }
    }

    fn save(&mut self) -> bool {
        let path = match &self.save_path {
            Some(path) => path.clone(),
            None => {
                let Some(path) = rfd::FileDialog::new()
                    .add_filter("JSON", &["json"])
                    .set_file_name("diagram.json")
                    .save_file()
                else {
                    self.set_status("save cancelled");
                    return false;
                };
                self.save_path = Some(path.clone());
                path
            }
        };
        match document::save_to_path(&path, &self.scene.diagram, &self.catalog.version) {
            Ok(()) => {
                self.scene.mark_clean();
                self.set_status(format!("saved {}", path.display()));
                info!("saved {}", path.display());
                true
            }
            Err(err) => {
                error!("save failed: {err}");
                self.set_status(format!("save failed: {err}"));
                false
            }
        }
    }

    /// Save, then interpret the document into a training plan. Running the
    /// plan is the trainer's job; here it is assembled, validated and logged.
    fn run(&mut self) {
        if !self.save() {
            self.set_status("run aborted: not saved");
            return;
        }
        let file = document::serialize(&self.scene.diagram, &self.catalog.version);
        match plan::assemble(&file, &self.registry) {
            Ok(plan) => {
                let layers: Vec<&str> = plan.layers.iter().map(|l| l.op.as_str()).collect();
                info!(
                    "training plan ready: {} layers [{}], loss {}, optimizer {}, {} epochs",
                    plan.layers.len(),
                    layers.join(", "),
                    plan.loss.op,
                    plan.optimizer.op,
                    plan.hyperparameters.epoch,
                );
                self.set_status(format!(
                    "plan ready: {} layers, loss {}, optimizer {}",
                    plan.layers.len(),
                    plan.loss.op,
                    plan.optimizer.op,
                ));
            }
            Err(err) => {
                error!("run failed: {err}");
                self.set_status(format!("run failed: {err}"));
            }
        }
    }

    fn menu_bar(&mut self, ui: &mut egui::Ui, ctx: &egui::Context) {
        egui::menu::bar(ui, |ui| {
            ui.menu_button("File", |ui| {
                if ui.button("New").clicked() {
                    self.request(PendingAction::New, ctx);
                    ui.close_menu();
                }
                if ui.button("Open").clicked() {
                    self.request(PendingAction::Open, ctx);
                    ui.close_menu();
                }
                if ui.button("Save").clicked() {
                    self.save();
                    ui.close_menu();
                }
                ui.separator();
                if ui.button("Exit").clicked() {
                    self.request(PendingAction::Exit, ctx);
                    ui.close_menu();
                }
            });
            ui.menu_button("About", |ui| {
                if ui.button("About").clicked() {
                    self.about_open = true;
                    ui.close_menu();
                }
            });
        });
    }

    fn toolbar(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.selectable_value(&mut self.tool, Tool::Pointer, "pointer");
            ui.selectable_value(&mut self.tool, Tool::Line, "line");
            ui.separator();

            let current = ZOOM_PRESETS
                .iter()
                .find(|(_, z)| (*z - self.canvas.zoom).abs() < 0.01)
                .map(|(label, _)| *label)
                .unwrap_or("custom");
            egui::ComboBox::from_id_salt("zoom_presets")
                .selected_text(current)
                .width(70.0)
                .show_ui(ui, |ui| {
                    for (label, zoom) in ZOOM_PRESETS {
                        if ui.selectable_label(false, label).clicked() {
                            self.canvas.zoom = zoom;
                        }
                    }
                });
            if ui.button("Reset View").clicked() {
                self.canvas.reset_view();
            }
            ui.separator();

            if ui.button("Delete").clicked() {
                self.scene.delete_selected();
            }
            if ui.button("Run").clicked() {
                self.run();
            }

            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                if self.scene.is_dirty() {
                    ui.label(RichText::new("unsaved").color(Color32::YELLOW));
                }
                ui.label(&self.status);
            });
        });
    }

    fn toolbox(&mut self, ui: &mut egui::Ui) {
        ui.heading("Modules");
        ui.separator();
        egui::ScrollArea::vertical().show(ui, |ui| {
            for (&category, templates) in &self.catalog.modules {
                egui::CollapsingHeader::new(category.to_string())
                    .default_open(true)
                    .show(ui, |ui| {
                        for (index, template) in templates.iter().enumerate() {
                            let armed = self.armed == Some((category, index));
                            if ui.selectable_label(armed, &template.name).clicked() {
                                // Exclusive arming; clicking the armed entry disarms.
                                self.armed = if armed { None } else { Some((category, index)) };
                            }
                        }
                    });
            }
        });
    }

    fn property_panel(&mut self, ui: &mut egui::Ui) {
        ui.heading("Properties");
        ui.separator();

        let Some(node_id) = self.scene.selected_node() else {
            // Deselect clears any in-progress label edit.
            self.label_edit = None;
            ui.label("nothing selected");
            return;
        };
        let Some(node) = self.scene.diagram.node(node_id) else {
            return;
        };

        // The label buffer follows the selection.
        let label_stale = !matches!(&self.label_edit, Some((id, _)) if *id == node_id);
        if label_stale {
            self.label_edit = Some((node_id, node.label.clone()));
        }
        let category = node.category;
        let kwargs: Vec<(String, PropertyValue)> = node
            .kwargs
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut label_changed = false;
        if let Some((_, buffer)) = &mut self.label_edit {
            ui.horizontal(|ui| {
                ui.label("name:");
                if ui.text_edit_singleline(buffer).changed() {
                    label_changed = true;
                }
            });
        }
        if label_changed {
            if let Some((_, buffer)) = &self.label_edit {
                self.scene.diagram.set_label(node_id, buffer.clone());
                self.scene.mark_dirty();
            }
        }
        ui.horizontal(|ui| {
            ui.label("dtype:");
            ui.label(category.to_string());
        });
        ui.separator();

        // Edit against local copies, apply afterwards: the widget loop cannot
        // hold a borrow of the diagram it writes back into.
        let mut edits: Vec<(String, PropertyValue)> = Vec::new();
        egui::Grid::new("kwargs_grid").num_columns(2).show(ui, |ui| {
            for (key, value) in kwargs {
                ui.label(&key);
                match value {
                    PropertyValue::Bool(mut v) => {
                        if ui.checkbox(&mut v, "").changed() {
                            edits.push((key, PropertyValue::Bool(v)));
                        }
                    }
                    PropertyValue::Int(mut v) => {
                        if ui.add(egui::DragValue::new(&mut v)).changed() {
                            edits.push((key, PropertyValue::Int(v)));
                        }
                    }
                    PropertyValue::Float(mut v) => {
                        let drag = egui::DragValue::new(&mut v)
                            .speed(0.001)
                            .max_decimals(5);
                        if ui.add(drag).changed() {
                            edits.push((key, PropertyValue::Float(v)));
                        }
                    }
                    PropertyValue::Text(mut v) => {
                        if ui.text_edit_singleline(&mut v).changed() {
                            edits.push((key, PropertyValue::Text(v)));
                        }
                    }
                }
                ui.end_row();
            }
        });

        for (key, value) in edits {
            match self.scene.diagram.set_property(node_id, &key, value) {
                Ok(()) => self.scene.mark_dirty(),
                Err(err) => {
                    // The prior value is retained; surface the rejection.
                    warn!("property edit rejected: {err}");
                    self.set_status(format!("edit rejected: {err}"));
                }
            }
        }
    }

    fn confirm_dialog(&mut self, ctx: &egui::Context) {
        let Some(action) = self.confirm else {
            return;
        };
        egui::Window::new("Close without saving?")
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                ui.label("The diagram has unsaved changes.");
                ui.horizontal(|ui| {
                    if ui.button("Discard").clicked() {
                        self.confirm = None;
                        self.perform(action, ctx);
                    }
                    if ui.button("Save first").clicked() {
                        self.confirm = None;
                        if self.save() {
                            self.perform(action, ctx);
                        }
                    }
                    if ui.button("Cancel").clicked() {
                        self.confirm = None;
                    }
                });
            });
    }

    fn about_dialog(&mut self, ctx: &egui::Context) {
        if !self.about_open {
            return;
        }
        let mut open = self.about_open;
        egui::Window::new("About")
            .collapsible(false)
            .resizable(false)
            .open(&mut open)
            .show(ctx, |ui| {
                ui.label("Pipeline Designer");
                ui.label(format!("save format {}", document::SAVE_VERSION));
                ui.label(format!("module catalog {}", self.catalog.version));
            });
        self.about_open = open;
    }
}

/// Delete shortcut; suppressed while a text field owns the keyboard, so
/// forward-delete inside the label or a text property edits text instead of
/// removing the selected node.
fn delete_shortcut(ctx: &egui::Context) -> bool {
    ctx.input(|i| i.key_pressed(egui::Key::Delete)) && !ctx.wants_keyboard_input()
}

impl eframe::App for DesignerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if delete_shortcut(ctx) {
            self.scene.delete_selected();
        }

        egui::TopBottomPanel::top("menu_and_toolbar").show(ctx, |ui| {
            self.menu_bar(ui, ctx);
            self.toolbar(ui);
        });

        egui::SidePanel::left("toolbox")
            .default_width(160.0)
            .show(ctx, |ui| self.toolbox(ui));

        egui::SidePanel::right("properties")
            .default_width(260.0)
            .show(ctx, |ui| self.property_panel(ui));

        let tools = self.tool_state();
        egui::CentralPanel::default().show(ctx, |ui| {
            self.canvas.show(ui, &mut self.scene, &tools);
        });

        self.confirm_dialog(ctx);
        self.about_dialog(ctx);
    }
}
