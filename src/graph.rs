use egui::{Pos2, Rect, Vec2, vec2};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::{Category, Kwargs, PropertyValue};
use crate::geometry::{Segment, arrowhead_wings, clip_to_polygon, rect_polygon};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArrowId(u32);

/// Default box size for a freshly placed node; the canvas replaces it with
/// the measured label size on the next frame.
pub const DEFAULT_NODE_SIZE: Vec2 = vec2(110.0, 26.0);

/// Wing length of the arrowhead triangle.
pub const ARROW_SIZE: f32 = 20.0;

#[derive(Debug, Clone)]
pub struct Node {
    pub label: String,
    pub category: Category,
    pub kwargs: Kwargs,
    pub pos: Pos2,
    pub size: Vec2,
}

impl Node {
    pub fn rect(&self) -> Rect {
        Rect::from_min_size(self.pos, self.size)
    }

    pub fn center_pos(&self) -> Pos2 {
        self.pos + self.size / 2.0
    }

    /// Closed bounding polygon used for arrow clipping.
    pub fn polygon(&self) -> [Pos2; 5] {
        rect_polygon(self.pos, self.size)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Arrow {
    pub start: NodeId,
    pub end: NodeId,
}

/// Render geometry of an arrow. The line runs from the end item's boundary
/// to the start item's boundary, so the head sits at `line.p1`.
#[derive(Debug, Clone, Copy)]
pub struct ArrowGeometry {
    pub line: Segment,
    pub head: Option<[Pos2; 3]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("a node cannot be connected to itself")]
    SelfLoop,
    #[error("nodes are already connected")]
    DuplicateConnection,
    #[error("start node already has an outgoing arrow")]
    OutgoingOccupied,
    #[error("unknown node handle")]
    UnknownNode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("graph invariant violated: {0}")]
    InvariantViolation(&'static str),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PropertyError {
    #[error("property `{key}` expects {expected}, got {got}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        got: &'static str,
    },
    #[error("no property named `{0}`")]
    UnknownKey(String),
}

/// The diagram graph: an arena of nodes and arrows addressed by stable
/// handles. Adjacency is derived by querying the arrow arena, so the
/// bidirectional node/arrow bookkeeping of a doubly-linked design holds by
/// construction. Insertion order of both arenas is preserved, which gives
/// incoming/outgoing lists and serialization roots the same order the user
/// created them in.
#[derive(Debug, Default)]
pub struct Diagram {
    nodes: IndexMap<NodeId, Node>,
    arrows: IndexMap<ArrowId, Arrow>,
    next_node: u32,
    next_arrow: u32,
    /// Monotonic counter for auto-numbered labels; persisted in the save
    /// file so labels stay unique across load.
    pub item_count: u32,
}

impl Diagram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node with a deep copy of the template kwargs, so editing one
    /// instance never touches the catalog entry or sibling instances.
    pub fn add_node(
        &mut self,
        label: impl Into<String>,
        category: Category,
        template_kwargs: &Kwargs,
        pos: Pos2,
    ) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        self.nodes.insert(
            id,
            Node {
                label: label.into(),
                category,
                kwargs: template_kwargs.clone(),
                pos,
                size: DEFAULT_NODE_SIZE,
            },
        );
        id
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn arrow(&self, id: ArrowId) -> Option<&Arrow> {
        self.arrows.get(&id)
    }

    pub fn nodes(&self) -> impl DoubleEndedIterator<Item = (NodeId, &Node)> {
        self.nodes.iter().map(|(&id, n)| (id, n))
    }

    pub fn arrows(&self) -> impl DoubleEndedIterator<Item = (ArrowId, &Arrow)> {
        self.arrows.iter().map(|(&id, a)| (id, a))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn arrow_count(&self) -> usize {
        self.arrows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn incoming(&self, node: NodeId) -> impl Iterator<Item = ArrowId> + '_ {
        self.arrows
            .iter()
            .filter(move |(_, a)| a.end == node)
            .map(|(&id, _)| id)
    }

    pub fn outgoing(&self, node: NodeId) -> impl Iterator<Item = ArrowId> + '_ {
        self.arrows
            .iter()
            .filter(move |(_, a)| a.start == node)
            .map(|(&id, _)| id)
    }

    /// Undirected connectivity check used to reject parallel edges.
    pub fn are_connected(&self, a: NodeId, b: NodeId) -> bool {
        self.arrows
            .values()
            .any(|arrow| (arrow.start == a && arrow.end == b) || (arrow.start == b && arrow.end == a))
    }

    /// Creates a directed arrow `start -> end`. Rejects self-loops, a second
    /// arrow between an already-linked pair (in either direction), and a
    /// second outgoing arrow from `start` (every node feeds at most one
    /// consumer, which is what keeps the save-file traversal well-defined).
    pub fn connect(&mut self, start: NodeId, end: NodeId) -> Result<ArrowId, ConnectError> {
        if !self.nodes.contains_key(&start) || !self.nodes.contains_key(&end) {
            return Err(ConnectError::UnknownNode);
        }
        if start == end {
            return Err(ConnectError::SelfLoop);
        }
        if self.are_connected(start, end) {
            return Err(ConnectError::DuplicateConnection);
        }
        if self.outgoing(start).next().is_some() {
            return Err(ConnectError::OutgoingOccupied);
        }
        let id = ArrowId(self.next_arrow);
        self.next_arrow += 1;
        self.arrows.insert(id, Arrow { start, end });
        Ok(id)
    }

    /// Removes an arrow. Detaching a handle the arena no longer holds is a
    /// bookkeeping bug in the caller, not an expected condition.
    pub fn detach(&mut self, arrow: ArrowId) -> Result<Arrow, GraphError> {
        self.arrows
            .shift_remove(&arrow)
            .ok_or(GraphError::InvariantViolation("detach of an arrow not in the diagram"))
    }

    /// Removes a node, first severing every incident arrow (incoming, then
    /// outgoing).
    pub fn remove_node(&mut self, node: NodeId) -> Result<Node, GraphError> {
        if !self.nodes.contains_key(&node) {
            return Err(GraphError::InvariantViolation("remove of a node not in the diagram"));
        }
        let incident: Vec<ArrowId> = self.incoming(node).chain(self.outgoing(node)).collect();
        for arrow in incident {
            self.detach(arrow)?;
        }
        self.nodes
            .shift_remove(&node)
            .ok_or(GraphError::InvariantViolation("node vanished during removal"))
    }

    pub fn move_node(&mut self, node: NodeId, pos: Pos2) {
        if let Some(n) = self.nodes.get_mut(&node) {
            n.pos = pos;
        }
    }

    pub fn set_node_size(&mut self, node: NodeId, size: Vec2) {
        if let Some(n) = self.nodes.get_mut(&node) {
            n.size = size;
        }
    }

    pub fn set_label(&mut self, node: NodeId, label: impl Into<String>) {
        if let Some(n) = self.nodes.get_mut(&node) {
            n.label = label.into();
        }
    }

    /// Writes a property value; the new value's kind must match the existing
    /// entry's kind. On rejection the prior value is retained.
    pub fn set_property(
        &mut self,
        node: NodeId,
        key: &str,
        value: PropertyValue,
    ) -> Result<(), PropertyError> {
        let Some(n) = self.nodes.get_mut(&node) else {
            return Err(PropertyError::UnknownKey(key.to_owned()));
        };
        let Some(current) = n.kwargs.get_mut(key) else {
            return Err(PropertyError::UnknownKey(key.to_owned()));
        };
        if !current.same_kind(&value) {
            return Err(PropertyError::TypeMismatch {
                key: key.to_owned(),
                expected: current.kind(),
                got: value.kind(),
            });
        }
        *current = value;
        Ok(())
    }

    /// Recomputes an arrow's render geometry from its endpoints' current
    /// positions. When the endpoint boxes overlap, clipping against them is
    /// ill-defined and the line falls back to raw centers; a zero-length
    /// line carries no head (nothing to orient it by).
    pub fn arrow_geometry(&self, arrow: ArrowId) -> Option<ArrowGeometry> {
        let a = self.arrows.get(&arrow)?;
        let start = self.nodes.get(&a.start)?;
        let end = self.nodes.get(&a.end)?;

        let line = if start.rect().intersects(end.rect()) {
            Segment::new(end.center_pos(), start.center_pos())
        } else {
            let center_line = Segment::new(start.center_pos(), end.center_pos());
            let end_point = clip_to_polygon(center_line, &end.polygon());
            let start_point = clip_to_polygon(center_line, &start.polygon());
            Segment::new(end_point, start_point)
        };

        let head = if line.length() == 0.0 {
            None
        } else {
            let (w1, w2) = arrowhead_wings(line, ARROW_SIZE);
            Some([line.p1, w1, w2])
        };

        Some(ArrowGeometry { line, head })
    }
}
