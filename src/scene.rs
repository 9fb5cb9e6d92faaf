use egui::{Pos2, Vec2};
use indexmap::IndexSet;
use log::debug;

use crate::catalog::{Category, Kwargs};
use crate::geometry::{Segment, distance_to_segment};
use crate::graph::{ArrowId, Diagram, NodeId};

/// How close (in scene units) a click must land to an arrow's line to select it.
pub const ARROW_HIT_DISTANCE: f32 = 8.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Pointer,
    Line,
}

#[derive(Debug, Clone)]
pub struct ArmedTemplate {
    pub name: String,
    pub category: Category,
    pub kwargs: Kwargs,
}

/// Tool state is passed by value into every pointer handler instead of being
/// stored on the scene, so the state machine runs without any UI attached.
#[derive(Debug, Clone)]
pub struct ToolState {
    pub tool: Tool,
    pub armed: Option<ArmedTemplate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SceneItem {
    Node(NodeId),
    Arrow(ArrowId),
}

#[derive(Debug, Clone, Copy)]
enum Drag {
    Idle,
    /// Transient preview segment; nothing is persisted until release.
    DrawingLine { origin: Pos2, current: Pos2 },
    MovingNode { node: NodeId, grab: Vec2 },
}

/// The diagram controller: owns the graph, the drag state machine and the
/// selection set. All mutations run synchronously inside pointer handlers.
pub struct Scene {
    pub diagram: Diagram,
    drag: Drag,
    selection: IndexSet<SceneItem>,
    dirty: bool,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    pub fn new() -> Self {
        Self {
            diagram: Diagram::new(),
            drag: Drag::Idle,
            selection: IndexSet::new(),
            dirty: false,
        }
    }

    /// Replaces the whole graph (New / Open).
    pub fn reset(&mut self, diagram: Diagram) {
        self.diagram = diagram;
        self.drag = Drag::Idle;
        self.selection.clear();
        self.dirty = false;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn selection(&self) -> impl Iterator<Item = SceneItem> + '_ {
        self.selection.iter().copied()
    }

    pub fn selected_node(&self) -> Option<NodeId> {
        self.selection.iter().find_map(|item| match item {
            SceneItem::Node(id) => Some(*id),
            SceneItem::Arrow(_) => None,
        })
    }

    pub fn is_selected(&self, item: SceneItem) -> bool {
        self.selection.contains(&item)
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    pub fn preview_line(&self) -> Option<Segment> {
        match self.drag {
            Drag::DrawingLine { origin, current } => Some(Segment::new(origin, current)),
            _ => None,
        }
    }

    /// Later-created nodes draw on top, so they win the hit test.
    pub fn hit_node(&self, pos: Pos2) -> Option<NodeId> {
        self.diagram
            .nodes()
            .rev()
            .find(|(_, n)| n.rect().contains(pos))
            .map(|(id, _)| id)
    }

    pub fn hit_arrow(&self, pos: Pos2) -> Option<ArrowId> {
        self.diagram
            .arrows()
            .rev()
            .find(|(id, _)| {
                self.diagram
                    .arrow_geometry(*id)
                    .is_some_and(|g| distance_to_segment(pos, g.line.p1, g.line.p2) <= ARROW_HIT_DISTANCE)
            })
            .map(|(id, _)| id)
    }

    pub fn pointer_pressed(&mut self, pos: Pos2, tools: &ToolState) {
        match tools.tool {
            Tool::Pointer => {
                if let Some(template) = &tools.armed {
                    // One-shot placement per click; the armed entry stays armed.
                    let label = format!("{}_{}", template.name, self.diagram.item_count);
                    self.diagram.item_count += 1;
                    self.diagram
                        .add_node(label, template.category, &template.kwargs, pos);
                    self.dirty = true;
                    return;
                }
                if let Some(node) = self.hit_node(pos) {
                    self.selection.clear();
                    self.selection.insert(SceneItem::Node(node));
                    let grab = pos - self.diagram.node(node).map(|n| n.pos).unwrap_or(pos);
                    self.drag = Drag::MovingNode { node, grab };
                } else if let Some(arrow) = self.hit_arrow(pos) {
                    self.selection.clear();
                    self.selection.insert(SceneItem::Arrow(arrow));
                } else {
                    self.selection.clear();
                }
            }
            Tool::Line => {
                self.drag = Drag::DrawingLine { origin: pos, current: pos };
            }
        }
    }

    pub fn pointer_moved(&mut self, pos: Pos2) {
        match self.drag {
            Drag::DrawingLine { origin, .. } => {
                self.drag = Drag::DrawingLine { origin, current: pos };
            }
            Drag::MovingNode { node, grab } => {
                self.diagram.move_node(node, pos - grab);
                self.dirty = true;
            }
            Drag::Idle => {}
        }
    }

    pub fn pointer_released(&mut self, pos: Pos2) {
        match self.drag {
            Drag::DrawingLine { origin, .. } => {
                self.drag = Drag::Idle;
                let (Some(start), Some(end)) = (self.hit_node(origin), self.hit_node(pos)) else {
                    return;
                };
                // A failed connect is not an error condition, just a no-op.
                match self.diagram.connect(start, end) {
                    Ok(_) => self.dirty = true,
                    Err(reason) => debug!("connect gesture discarded: {reason}"),
                }
            }
            Drag::MovingNode { .. } => {
                self.drag = Drag::Idle;
            }
            Drag::Idle => {}
        }
    }

    /// Deletes every selected item in selection-insertion order: nodes cascade
    /// through their incident arrows, explicitly selected arrows detach on
    /// their own.
    pub fn delete_selected(&mut self) {
        let items: Vec<SceneItem> = self.selection.drain(..).collect();
        for item in items {
            match item {
                SceneItem::Node(node) => {
                    if self.diagram.node(node).is_some() {
                        if let Err(err) = self.diagram.remove_node(node) {
                            log::error!("delete failed: {err}");
                        }
                    }
                }
                SceneItem::Arrow(arrow) => {
                    // A node deletion earlier in the selection may already
                    // have cascaded through this arrow.
                    if self.diagram.arrow(arrow).is_some() {
                        if let Err(err) = self.diagram.detach(arrow) {
                            log::error!("delete failed: {err}");
                        }
                    }
                }
            }
            self.dirty = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use egui::pos2;

    fn tools(tool: Tool, armed: Option<&str>) -> ToolState {
        ToolState {
            tool,
            armed: armed.map(|name| ArmedTemplate {
                name: name.to_owned(),
                category: Category::Model,
                kwargs: Kwargs::new(),
            }),
        }
    }

    fn place(scene: &mut Scene, name: &str, pos: Pos2) -> NodeId {
        let t = tools(Tool::Pointer, Some(name));
        scene.pointer_pressed(pos, &t);
        scene.hit_node(pos).unwrap()
    }

    #[test]
    fn armed_click_places_one_node_and_numbers_it() {
        let mut scene = Scene::new();
        let t = tools(Tool::Pointer, Some("Linear"));
        scene.pointer_pressed(pos2(10.0, 10.0), &t);
        scene.pointer_released(pos2(10.0, 10.0));
        scene.pointer_pressed(pos2(300.0, 10.0), &t);

        assert_eq!(scene.diagram.node_count(), 2);
        let labels: Vec<_> = scene.diagram.nodes().map(|(_, n)| n.label.clone()).collect();
        assert_eq!(labels, ["Linear_0", "Linear_1"]);
        assert_eq!(scene.diagram.item_count, 2);
        assert!(scene.is_dirty());
    }

    #[test]
    fn line_gesture_connects_two_nodes() {
        let mut scene = Scene::new();
        let a = place(&mut scene, "Linear", pos2(10.0, 10.0));
        let b = place(&mut scene, "ReLU", pos2(400.0, 10.0));

        let t = tools(Tool::Line, None);
        scene.pointer_pressed(pos2(12.0, 12.0), &t);
        scene.pointer_moved(pos2(200.0, 12.0));
        assert!(scene.preview_line().is_some());
        scene.pointer_released(pos2(405.0, 12.0));

        assert!(scene.preview_line().is_none());
        assert_eq!(scene.diagram.arrow_count(), 1);
        assert!(scene.diagram.are_connected(a, b));
    }

    #[test]
    fn line_gesture_over_empty_space_is_a_noop() {
        let mut scene = Scene::new();
        place(&mut scene, "Linear", pos2(10.0, 10.0));

        let t = tools(Tool::Line, None);
        scene.pointer_pressed(pos2(12.0, 12.0), &t);
        scene.pointer_released(pos2(900.0, 900.0));
        assert_eq!(scene.diagram.arrow_count(), 0);
    }

    #[test]
    fn connect_failures_are_swallowed() {
        let mut scene = Scene::new();
        let a = place(&mut scene, "Linear", pos2(10.0, 10.0));
        let b = place(&mut scene, "ReLU", pos2(400.0, 10.0));
        scene.diagram.connect(a, b).unwrap();

        let t = tools(Tool::Line, None);
        // Duplicate (reverse direction).
        scene.pointer_pressed(pos2(405.0, 12.0), &t);
        scene.pointer_released(pos2(12.0, 12.0));
        // Self loop: press and release on the same node.
        scene.pointer_pressed(pos2(12.0, 12.0), &t);
        scene.pointer_released(pos2(15.0, 15.0));

        assert_eq!(scene.diagram.arrow_count(), 1);
    }

    #[test]
    fn pointer_drag_moves_a_node() {
        let mut scene = Scene::new();
        let a = place(&mut scene, "Linear", pos2(10.0, 10.0));
        let before = scene.diagram.node(a).unwrap().pos;

        let t = tools(Tool::Pointer, None);
        scene.pointer_pressed(pos2(15.0, 15.0), &t);
        scene.pointer_moved(pos2(115.0, 65.0));
        scene.pointer_released(pos2(115.0, 65.0));

        let after = scene.diagram.node(a).unwrap().pos;
        assert_eq!(after - before, egui::vec2(100.0, 50.0));
        assert!(scene.is_selected(SceneItem::Node(a)));
    }

    #[test]
    fn topmost_node_wins_hit_test() {
        let mut scene = Scene::new();
        let _under = place(&mut scene, "Linear", pos2(10.0, 10.0));
        // Placed later, overlapping the first: draws on top.
        let t = tools(Tool::Pointer, Some("ReLU"));
        scene.pointer_pressed(pos2(20.0, 15.0), &t);
        let over = scene.hit_node(pos2(25.0, 18.0)).unwrap();
        assert_eq!(scene.diagram.node(over).unwrap().label, "ReLU_1");
    }

    #[test]
    fn clicking_empty_space_clears_selection() {
        let mut scene = Scene::new();
        place(&mut scene, "Linear", pos2(10.0, 10.0));
        let t = tools(Tool::Pointer, None);
        scene.pointer_pressed(pos2(15.0, 15.0), &t);
        scene.pointer_released(pos2(15.0, 15.0));
        assert_eq!(scene.selection().count(), 1);

        scene.pointer_pressed(pos2(800.0, 800.0), &t);
        assert_eq!(scene.selection().count(), 0);
    }

    #[test]
    fn arrow_can_be_selected_and_deleted_alone() {
        let mut scene = Scene::new();
        let a = place(&mut scene, "Linear", pos2(0.0, 0.0));
        let b = place(&mut scene, "ReLU", pos2(400.0, 0.0));
        let arrow = scene.diagram.connect(a, b).unwrap();

        // Click near the middle of the connecting line.
        let t = tools(Tool::Pointer, None);
        scene.pointer_pressed(pos2(250.0, 13.0), &t);
        assert!(scene.is_selected(SceneItem::Arrow(arrow)));

        scene.delete_selected();
        assert_eq!(scene.diagram.arrow_count(), 0);
        // Endpoints untouched.
        assert_eq!(scene.diagram.node_count(), 2);
    }

    #[test]
    fn deleting_a_node_with_its_arrow_selected_does_not_double_detach() {
        let mut scene = Scene::new();
        let a = place(&mut scene, "Linear", pos2(0.0, 0.0));
        let b = place(&mut scene, "ReLU", pos2(400.0, 0.0));
        let arrow = scene.diagram.connect(a, b).unwrap();

        scene.clear_selection();
        // Node first: its removal cascades through the arrow before the
        // arrow's own turn comes up.
        scene.selection.insert(SceneItem::Node(a));
        scene.selection.insert(SceneItem::Arrow(arrow));
        scene.delete_selected();

        assert_eq!(scene.diagram.node_count(), 1);
        assert_eq!(scene.diagram.arrow_count(), 0);
        assert_eq!(scene.selection().count(), 0);
    }
}
