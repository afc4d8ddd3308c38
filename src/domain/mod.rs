//! Domain models - building topology, evacuation routes and shared records
//!
//! - `types` - ids and records (rooms, edges, stairs, exits, sensors, notifications)
//! - `topology` - graph builder over a building's rooms
//! - `route` - shortest path from a room to the nearest exit

pub mod route;
pub mod topology;
pub mod types;

pub use route::{find_route, RouteResult};
pub use topology::{build_graph, exit_set, ExitSet, Graph, STAIR_WEIGHT};
