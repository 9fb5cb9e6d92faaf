use egui::{Color32, FontId, Pos2, Rect, Sense, Shape, Stroke, StrokeKind, Ui, Vec2, vec2};

use crate::graph::ArrowId;
use crate::scene::{Scene, SceneItem, Tool, ToolState};

const MIN_ZOOM: f32 = 0.2;
const MAX_ZOOM: f32 = 5.0;
const NODE_PADDING: Vec2 = vec2(16.0, 8.0);
const FONT_SIZE: f32 = 14.0;

/// The diagram canvas: paints the scene and feeds pointer events into it.
/// Zoom and pan are pure view state; the scene only ever sees scene-space
/// coordinates.
pub struct Canvas {
    pub zoom: f32,
    pan: Vec2,
}

impl Default for Canvas {
    fn default() -> Self {
        Self {
            zoom: 1.0,
            pan: Vec2::ZERO,
        }
    }
}

impl Canvas {
    pub fn reset_view(&mut self) {
        self.zoom = 1.0;
        self.pan = Vec2::ZERO;
    }

    fn to_screen(&self, origin: Pos2, p: Pos2) -> Pos2 {
        origin + (p.to_vec2() * self.zoom) + self.pan
    }

    fn to_scene(&self, origin: Pos2, p: Pos2) -> Pos2 {
        (((p - origin) - self.pan) / self.zoom).to_pos2()
    }

    pub fn show(&mut self, ui: &mut Ui, scene: &mut Scene, tools: &ToolState) {
        let rect = ui.available_rect_before_wrap();
        let response = ui.interact(rect, ui.id().with("diagram_canvas"), Sense::click_and_drag());
        let origin = rect.min;

        // Mouse wheel zoom around the cursor, as the rest of the view code
        // expects screen = origin + scene * zoom + pan.
        if let Some(hover) = ui.input(|i| i.pointer.hover_pos()) {
            if rect.contains(hover) {
                let scroll = ui.input(|i| i.raw_scroll_delta.y);
                if scroll != 0.0 {
                    let zoom_factor = 1.15_f32;
                    let old_zoom = self.zoom;
                    let new_zoom = (self.zoom * zoom_factor.powf(scroll.signum())).clamp(MIN_ZOOM, MAX_ZOOM);
                    let before = ((hover - origin) - self.pan) / old_zoom;
                    self.zoom = new_zoom;
                    self.pan = (hover - origin) - before * self.zoom;
                }
            }
        }

        // Pointer events, translated into scene space. A plain click is a
        // press and release at the same point.
        if let Some(pos) = response.interact_pointer_pos() {
            let scene_pos = self.to_scene(origin, pos);
            if response.drag_started() {
                scene.pointer_pressed(scene_pos, tools);
            } else if response.dragged() {
                scene.pointer_moved(scene_pos);
            } else if response.drag_stopped() {
                scene.pointer_released(scene_pos);
            } else if response.clicked() {
                scene.pointer_pressed(scene_pos, tools);
                scene.pointer_released(scene_pos);
            }
        }

        let prev_clip = ui.clip_rect();
        ui.set_clip_rect(rect);
        let painter = ui.painter();

        painter.rect_filled(rect, 0.0, ui.visuals().extreme_bg_color);
        painter.rect_stroke(
            rect,
            0.0,
            Stroke::new(1.0, Color32::DARK_GRAY),
            StrokeKind::Inside,
        );

        // Keep each node's box size in sync with its measured label so arrow
        // clipping matches what is actually drawn.
        let font = FontId::proportional(FONT_SIZE);
        let resized: Vec<_> = scene
            .diagram
            .nodes()
            .map(|(id, node)| {
                let galley = painter.layout_no_wrap(node.label.clone(), font.clone(), Color32::WHITE);
                (id, galley.size() + NODE_PADDING)
            })
            .collect();
        for (id, size) in resized {
            scene.diagram.set_node_size(id, size);
        }

        // Arrows first, nodes on top.
        let arrow_ids: Vec<ArrowId> = scene.diagram.arrows().map(|(id, _)| id).collect();
        for id in arrow_ids {
            let Some(geom) = scene.diagram.arrow_geometry(id) else {
                continue;
            };
            let p1 = self.to_screen(origin, geom.line.p1);
            let p2 = self.to_screen(origin, geom.line.p2);
            let stroke = Stroke::new(2.0, Color32::BLACK);
            painter.line_segment([p1, p2], stroke);
            if let Some(head) = geom.head {
                let points = head.iter().map(|&p| self.to_screen(origin, p)).collect();
                painter.add(Shape::convex_polygon(points, Color32::BLACK, Stroke::NONE));
            }
            if scene.is_selected(SceneItem::Arrow(id)) {
                // Two dashed guide lines offset above and below the arrow.
                let thin = Stroke::new(1.0, Color32::BLACK);
                let offset = vec2(0.0, 4.0);
                painter.add(Shape::dashed_line(&[p1 + offset, p2 + offset], thin, 4.0, 4.0));
                painter.add(Shape::dashed_line(&[p1 - offset, p2 - offset], thin, 4.0, 4.0));
            }
        }

        let node_data: Vec<_> = scene
            .diagram
            .nodes()
            .map(|(id, node)| (id, node.rect(), node.label.clone()))
            .collect();
        for (id, node_rect, label) in node_data {
            let screen_rect = Rect::from_min_max(
                self.to_screen(origin, node_rect.min),
                self.to_screen(origin, node_rect.max),
            );
            let selected = scene.is_selected(SceneItem::Node(id));
            let fill = if selected {
                ui.visuals().selection.bg_fill
            } else {
                Color32::from_rgb(100, 200, 255)
            };
            let stroke = if selected {
                Stroke::new(2.0, ui.visuals().selection.stroke.color)
            } else {
                Stroke::new(1.0, Color32::DARK_GRAY)
            };
            painter.rect(screen_rect, 4.0, fill, stroke, StrokeKind::Inside);
            painter.text(
                screen_rect.center(),
                egui::Align2::CENTER_CENTER,
                label,
                FontId::proportional(FONT_SIZE * self.zoom),
                Color32::BLACK,
            );
        }

        if let Some(preview) = scene.preview_line() {
            painter.line_segment(
                [
                    self.to_screen(origin, preview.p1),
                    self.to_screen(origin, preview.p2),
                ],
                Stroke::new(2.0, Color32::BLACK),
            );
        }

        ui.set_clip_rect(prev_clip);

        // Placement and connect gestures change the cursor to hint the mode.
        if rect.contains(ui.input(|i| i.pointer.hover_pos().unwrap_or(Pos2::ZERO))) {
            match (tools.tool, &tools.armed) {
                (Tool::Pointer, Some(_)) => {
                    ui.ctx().set_cursor_icon(egui::CursorIcon::Crosshair);
                }
                (Tool::Line, _) => {
                    ui.ctx().set_cursor_icon(egui::CursorIcon::Cell);
                }
                _ => {}
            }
        }
    }
}
