//! Shortest evacuation route search
//!
//! Dijkstra from the triggering room, stopping at the first exit extracted.
//! Nodes are settled in non-decreasing distance order, so the first exit
//! popped is the nearest one. When several exits are equidistant, which one
//! is returned depends on heap order and is not specified.

use crate::domain::topology::{ExitSet, Graph};
use crate::domain::types::RoomId;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Separator between room names in the human-readable route
pub const NAME_SEPARATOR: &str = " -> ";

/// Path from the start room to the reached exit, both inclusive
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteResult {
    pub room_ids: Vec<RoomId>,
    pub room_names: Vec<String>,
    pub total_distance: u64,
}

impl RouteResult {
    /// Room names joined with an arrow, for notification text
    pub fn names_route(&self) -> String {
        self.room_names.join(NAME_SEPARATOR)
    }

    /// Space-separated room ids, the payload pushed to clients
    pub fn ids_route(&self) -> String {
        self.room_ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(" ")
    }

    /// The exit this route ends at
    pub fn exit(&self) -> Option<RoomId> {
        self.room_ids.last().copied()
    }
}

/// Find the shortest route from `start` to the nearest member of `exits`
///
/// Returns `None` when no exit is reachable. Rooms without a display name
/// fall back to their id.
pub fn find_route(
    graph: &Graph,
    start: RoomId,
    exits: &ExitSet,
    names: &FxHashMap<RoomId, String>,
) -> Option<RouteResult> {
    let mut dist: FxHashMap<RoomId, u64> = FxHashMap::default();
    let mut previous: FxHashMap<RoomId, RoomId> = FxHashMap::default();
    let mut settled: FxHashSet<RoomId> = FxHashSet::default();
    let mut heap = BinaryHeap::new();

    dist.insert(start, 0);
    heap.push(Reverse((0u64, start)));

    while let Some(Reverse((d, room))) = heap.pop() {
        if !settled.insert(room) {
            continue;
        }

        if exits.contains(&room) {
            return Some(assemble(start, room, d, &previous, names));
        }

        for (neighbor, weight) in graph.neighbors(room) {
            if settled.contains(&neighbor) {
                continue;
            }
            let candidate = d + u64::from(weight);
            let better = dist.get(&neighbor).map_or(true, |&known| candidate < known);
            if better {
                dist.insert(neighbor, candidate);
                previous.insert(neighbor, room);
                heap.push(Reverse((candidate, neighbor)));
            }
        }
    }

    None
}

fn assemble(
    start: RoomId,
    exit: RoomId,
    total_distance: u64,
    previous: &FxHashMap<RoomId, RoomId>,
    names: &FxHashMap<RoomId, String>,
) -> RouteResult {
    let mut room_ids = vec![exit];
    let mut cursor = exit;
    while cursor != start {
        match previous.get(&cursor) {
            Some(&prev) => {
                room_ids.push(prev);
                cursor = prev;
            }
            None => break,
        }
    }
    room_ids.reverse();

    let room_names = room_ids
        .iter()
        .map(|id| names.get(id).cloned().unwrap_or_else(|| id.to_string()))
        .collect();

    RouteResult { room_ids, room_names, total_distance }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::topology::{build_graph, exit_set};
    use crate::domain::types::{BuildingId, Exit, RoomEdge, Stair};
    use uuid::Uuid;

    fn room(n: u128) -> RoomId {
        RoomId(Uuid::from_u128(n))
    }

    fn edge(a: u128, b: u128, distance: u32) -> RoomEdge {
        RoomEdge { room1: room(a), room2: room(b), distance }
    }

    fn exits(rooms: &[u128]) -> ExitSet {
        let list: Vec<Exit> = rooms
            .iter()
            .map(|&r| Exit { building_id: BuildingId(Uuid::nil()), room_id: room(r), floor: 0, kind: String::new() })
            .collect();
        exit_set(&list)
    }

    fn names(pairs: &[(u128, &str)]) -> FxHashMap<RoomId, String> {
        pairs.iter().map(|&(r, n)| (room(r), n.to_string())).collect()
    }

    #[test]
    fn test_line_of_three_rooms() {
        // A -3- B -2- C(exit)
        let graph = build_graph(&[edge(1, 2, 3), edge(2, 3, 2)], &[]);
        let names = names(&[(1, "A"), (2, "B"), (3, "C")]);

        let route = find_route(&graph, room(1), &exits(&[3]), &names).unwrap();

        assert_eq!(route.room_ids, vec![room(1), room(2), room(3)]);
        assert_eq!(route.room_names, vec!["A", "B", "C"]);
        assert_eq!(route.total_distance, 5);
        assert_eq!(route.names_route(), "A -> B -> C");
        assert_eq!(route.exit(), Some(room(3)));
    }

    #[test]
    fn test_stair_between_floors() {
        // S -4- F1 =stair= F2(exit), the stair's declared distance is irrelevant
        let stair = Stair { building_id: BuildingId(Uuid::nil()), floor1_room: room(11), floor2_room: room(12) };
        let graph = build_graph(&[edge(10, 11, 4)], &[stair]);
        let names = names(&[(10, "S"), (11, "F1"), (12, "F2")]);

        let route = find_route(&graph, room(10), &exits(&[12]), &names).unwrap();

        assert_eq!(route.room_ids, vec![room(10), room(11), room(12)]);
        assert_eq!(route.room_names, vec!["S", "F1", "F2"]);
        assert_eq!(route.total_distance, 5);
    }

    #[test]
    fn test_disconnected_room_has_no_route() {
        let graph = build_graph(&[edge(1, 2, 1)], &[]);
        assert!(find_route(&graph, room(99), &exits(&[2]), &FxHashMap::default()).is_none());
    }

    #[test]
    fn test_unreachable_exit_has_no_route() {
        let graph = build_graph(&[edge(1, 2, 1), edge(3, 4, 1)], &[]);
        assert!(find_route(&graph, room(1), &exits(&[4]), &FxHashMap::default()).is_none());
    }

    #[test]
    fn test_no_exits_has_no_route() {
        let graph = build_graph(&[edge(1, 2, 1)], &[]);
        assert!(find_route(&graph, room(1), &ExitSet::default(), &FxHashMap::default()).is_none());
    }

    #[test]
    fn test_start_room_is_exit() {
        let graph = build_graph(&[edge(1, 2, 1)], &[]);
        let route = find_route(&graph, room(1), &exits(&[1, 2]), &names(&[(1, "Lobby")])).unwrap();
        assert_eq!(route.room_ids, vec![room(1)]);
        assert_eq!(route.total_distance, 0);
    }

    #[test]
    fn test_prefers_nearer_of_two_exits() {
        // 1 -10- 2(exit), 1 -3- 3 -3- 4(exit)
        let graph = build_graph(&[edge(1, 2, 10), edge(1, 3, 3), edge(3, 4, 3)], &[]);
        let route = find_route(&graph, room(1), &exits(&[2, 4]), &FxHashMap::default()).unwrap();
        assert_eq!(route.room_ids, vec![room(1), room(3), room(4)]);
        assert_eq!(route.total_distance, 6);
    }

    #[test]
    fn test_longer_hop_count_can_be_shorter() {
        let graph = build_graph(&[edge(1, 9, 20), edge(1, 2, 1), edge(2, 3, 1), edge(3, 9, 1)], &[]);
        let route = find_route(&graph, room(1), &exits(&[9]), &FxHashMap::default()).unwrap();
        assert_eq!(route.total_distance, 3);
        assert_eq!(route.room_ids.len(), 4);
    }

    #[test]
    fn test_equidistant_exits_pick_either() {
        let graph = build_graph(&[edge(1, 2, 5), edge(1, 3, 5)], &[]);
        let route = find_route(&graph, room(1), &exits(&[2, 3]), &FxHashMap::default()).unwrap();
        assert_eq!(route.total_distance, 5);
        assert!(matches!(route.exit(), Some(r) if r == room(2) || r == room(3)));
    }

    #[test]
    fn test_missing_name_falls_back_to_id() {
        let graph = build_graph(&[edge(1, 2, 1)], &[]);
        let route = find_route(&graph, room(1), &exits(&[2]), &names(&[(1, "Hall")])).unwrap();
        assert_eq!(route.room_names, vec!["Hall".to_string(), room(2).to_string()]);
    }

    #[test]
    fn test_ids_route_is_space_separated() {
        let graph = build_graph(&[edge(1, 2, 1)], &[]);
        let route = find_route(&graph, room(1), &exits(&[2]), &FxHashMap::default()).unwrap();
        assert_eq!(route.ids_route(), format!("{} {}", room(1), room(2)));
    }

    #[test]
    fn test_route_json_shape() {
        let graph = build_graph(&[edge(1, 2, 4)], &[]);
        let route = find_route(&graph, room(1), &exits(&[2]), &names(&[(1, "A"), (2, "B")])).unwrap();
        let json = serde_json::to_value(&route).unwrap();
        assert_eq!(json["totalDistance"], 4);
        assert_eq!(json["roomNames"][1], "B");
        assert_eq!(json["roomIds"].as_array().unwrap().len(), 2);
    }

    /// Minimum cost over all simple paths from `start` to any exit
    fn brute_force(graph: &Graph, start: RoomId, exits: &ExitSet) -> Option<u64> {
        fn walk(
            graph: &Graph,
            at: RoomId,
            cost: u64,
            exits: &ExitSet,
            seen: &mut FxHashSet<RoomId>,
            best: &mut Option<u64>,
        ) {
            if exits.contains(&at) {
                *best = Some(best.map_or(cost, |b| b.min(cost)));
                return;
            }
            for (next, w) in graph.neighbors(at) {
                if seen.insert(next) {
                    walk(graph, next, cost + u64::from(w), exits, seen, best);
                    seen.remove(&next);
                }
            }
        }

        let mut best = None;
        let mut seen = FxHashSet::default();
        seen.insert(start);
        walk(graph, start, 0, exits, &mut seen, &mut best);
        best
    }

    fn path_cost(graph: &Graph, route: &RouteResult) -> Option<u64> {
        route
            .room_ids
            .windows(2)
            .map(|pair| graph.weight(pair[0], pair[1]).map(u64::from))
            .sum()
    }

    proptest::proptest! {
        #[test]
        fn prop_matches_brute_force(
            raw in proptest::collection::vec((0u128..7, 0u128..7, 0u32..20), 0..16),
            exit_rooms in proptest::collection::vec(0u128..7, 0..3),
            start in 0u128..7,
        ) {
            let edges: Vec<RoomEdge> = raw.iter().map(|&(a, b, w)| edge(a, b, w)).collect();
            let graph = build_graph(&edges, &[]);
            let exits = exits(&exit_rooms);

            let expected = brute_force(&graph, room(start), &exits);
            let found = find_route(&graph, room(start), &exits, &FxHashMap::default());

            match (expected, found) {
                (None, None) => {}
                (Some(cost), Some(route)) => {
                    proptest::prop_assert_eq!(route.total_distance, cost);
                    proptest::prop_assert_eq!(route.room_ids.first().copied(), Some(room(start)));
                    proptest::prop_assert!(exits.contains(&route.exit().unwrap()));
                    proptest::prop_assert_eq!(path_cost(&graph, &route), Some(cost));
                    proptest::prop_assert_eq!(route.room_names.len(), route.room_ids.len());
                }
                (expected, found) => {
                    proptest::prop_assert!(false, "expected {:?}, found {:?}", expected, found);
                }
            }
        }
    }
}
