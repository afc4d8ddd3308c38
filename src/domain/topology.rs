//! Building topology graph
//!
//! Rooms are nodes, room edges and stair links are undirected weighted edges.
//! A graph is built fresh for every routing request and never cached, since
//! the topology may change between alerts.

use crate::domain::types::{Exit, RoomEdge, RoomId, Stair};
use rustc_hash::{FxHashMap, FxHashSet};

/// Cost of a floor transition, independent of any declared distance
pub const STAIR_WEIGHT: u32 = 1;

/// Rooms that terminate an evacuation route
pub type ExitSet = FxHashSet<RoomId>;

/// Symmetric adjacency map: room -> (neighbor -> weight)
#[derive(Debug, Clone, Default)]
pub struct Graph {
    adjacency: FxHashMap<RoomId, FxHashMap<RoomId, u32>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an undirected edge; a repeated pair keeps the latest weight
    pub fn add_edge(&mut self, a: RoomId, b: RoomId, weight: u32) {
        self.adjacency.entry(a).or_default().insert(b, weight);
        self.adjacency.entry(b).or_default().insert(a, weight);
    }

    /// Weight of the edge between two rooms, if connected
    pub fn weight(&self, a: RoomId, b: RoomId) -> Option<u32> {
        self.adjacency.get(&a).and_then(|neighbors| neighbors.get(&b).copied())
    }

    pub fn neighbors(&self, room: RoomId) -> impl Iterator<Item = (RoomId, u32)> + '_ {
        self.adjacency
            .get(&room)
            .into_iter()
            .flat_map(|neighbors| neighbors.iter().map(|(&id, &w)| (id, w)))
    }

    pub fn contains(&self, room: RoomId) -> bool {
        self.adjacency.contains_key(&room)
    }

    pub fn nodes(&self) -> impl Iterator<Item = RoomId> + '_ {
        self.adjacency.keys().copied()
    }

    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    /// Number of undirected edges
    pub fn edge_count(&self) -> usize {
        let directed: usize = self.adjacency.values().map(|n| n.len()).sum();
        let self_loops = self
            .adjacency
            .iter()
            .filter(|(id, neighbors)| neighbors.contains_key(id))
            .count();
        (directed + self_loops) / 2
    }
}

/// Assemble the graph for one building from its raw records
///
/// Any room referenced by an edge or stair becomes a node. Stairs are added
/// after room edges, so a stair always wins for a pair declared by both.
pub fn build_graph(edges: &[RoomEdge], stairs: &[Stair]) -> Graph {
    let mut graph = Graph::new();

    for edge in edges {
        graph.add_edge(edge.room1, edge.room2, edge.distance);
    }

    for stair in stairs {
        graph.add_edge(stair.floor1_room, stair.floor2_room, STAIR_WEIGHT);
    }

    graph
}

pub fn exit_set(exits: &[Exit]) -> ExitSet {
    exits.iter().map(|exit| exit.room_id).collect()
}
