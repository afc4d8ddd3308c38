//! Alert dispatch - evacuation route fan-out for a smoke alarm
//!
//! On an above-threshold reading the dispatcher resolves the sensor's room
//! and building, computes the route to the nearest exit, then for every
//! occupant persists a notification and pushes the room-id route to their
//! live connection. Occupants are handled as independent futures joined
//! before returning; one occupant's failure never affects another's.

use crate::domain::route::{find_route, RouteResult};
use crate::domain::topology::{build_graph, exit_set};
use crate::domain::types::{BuildingId, Room, RoomId, SensorId, SensorReading, UserId};
use crate::infra::metrics::Metrics;
use crate::services::directory::{
    NotificationStore, OccupantDirectory, SensorDirectory, StoreError, TopologySource,
};
use crate::services::registry::ConnectionRegistry;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Errors that invalidate a whole dispatch
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("sensor {0} not found")]
    SensorNotFound(SensorId),

    #[error("room {0} not found")]
    RoomNotFound(RoomId),

    #[error("directory lookup failed: {0}")]
    Directory(#[from] StoreError),
}

/// Prefix of the human-readable notification text
pub const ALERT_MESSAGE_PREFIX: &str = "Smoke detected! Evacuation route: ";

/// What happened for one occupant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OccupantDelivery {
    pub user_id: UserId,
    pub persisted: bool,
    pub pushed: bool,
}

/// Result of one fan-out
#[derive(Debug, Clone, Default)]
pub struct DispatchOutcome {
    pub route: Option<RouteResult>,
    pub deliveries: Vec<OccupantDelivery>,
}

impl DispatchOutcome {
    pub fn notified(&self) -> usize {
        self.deliveries.iter().filter(|d| d.persisted).count()
    }

    pub fn pushed(&self) -> usize {
        self.deliveries.iter().filter(|d| d.pushed).count()
    }
}

/// Collaborators the dispatcher reads from and writes to
#[derive(Clone)]
pub struct Directories {
    pub sensors: Arc<dyn SensorDirectory>,
    pub topology: Arc<dyn TopologySource>,
    pub occupants: Arc<dyn OccupantDirectory>,
    pub notifications: Arc<dyn NotificationStore>,
}

impl Directories {
    /// All collaborators served by one backing store
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: SensorDirectory + TopologySource + OccupantDirectory + NotificationStore + 'static,
    {
        Self {
            sensors: store.clone(),
            topology: store.clone(),
            occupants: store.clone(),
            notifications: store,
        }
    }
}

pub struct AlertDispatcher {
    directories: Directories,
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<Metrics>,
}

impl AlertDispatcher {
    pub fn new(
        directories: Directories,
        registry: Arc<ConnectionRegistry>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { directories, registry, metrics }
    }

    /// Handle a reading already classified as above threshold
    ///
    /// Returns the computed route (or `None` when no exit is reachable) for
    /// acknowledgement to the device, regardless of how many pushes landed.
    pub async fn on_threshold_exceeded(
        &self,
        reading: &SensorReading,
    ) -> Result<Option<RouteResult>, DispatchError> {
        let sensor = self
            .directories
            .sensors
            .sensor(reading.sensor_id)
            .await?
            .ok_or(DispatchError::SensorNotFound(reading.sensor_id))?;

        let outcome = self.dispatch_for_room(sensor.room_id).await?;
        Ok(outcome.route)
    }

    /// Compute the route from a room and fan it out to the building's occupants
    pub async fn dispatch_for_room(&self, room_id: RoomId) -> Result<DispatchOutcome, DispatchError> {
        let started = Instant::now();
        self.metrics.record_dispatch_started();

        let room = self.resolve_room(room_id).await?;
        let (route, occupants) = tokio::try_join!(self.compute_route(&room), async {
            Ok::<_, DispatchError>(self.directories.occupants.occupants(room.building_id).await?)
        })?;

        self.metrics.record_route(route.is_some());

        let Some(route) = route else {
            self.metrics.record_dispatch_latency(started.elapsed().as_micros() as u64);
            warn!(
                room_id = %room.id,
                room = %room.name,
                building_id = %room.building_id,
                occupants = %occupants.len(),
                "route_not_found"
            );
            return Ok(DispatchOutcome { route: None, deliveries: Vec::new() });
        };

        let message = format!("{ALERT_MESSAGE_PREFIX}{}", route.names_route());
        let payload = route.ids_route();

        let deliveries = join_all(
            occupants.iter().map(|&user| self.notify_occupant(user, &message, &payload)),
        )
        .await;

        let outcome = DispatchOutcome { route: Some(route), deliveries };
        let latency_us = started.elapsed().as_micros() as u64;
        self.metrics.record_dispatch_latency(latency_us);

        info!(
            room_id = %room.id,
            room = %room.name,
            building_id = %room.building_id,
            distance = ?outcome.route.as_ref().map(|r| r.total_distance),
            occupants = %outcome.deliveries.len(),
            notified = %outcome.notified(),
            pushed = %outcome.pushed(),
            latency_us = %latency_us,
            "alert_dispatched"
        );

        Ok(outcome)
    }

    /// On-demand route from a room, without notifying anyone
    pub async fn evacuation_route(&self, room_id: RoomId) -> Result<Option<RouteResult>, DispatchError> {
        let room = self.resolve_room(room_id).await?;
        self.compute_route(&room).await
    }

    async fn resolve_room(&self, room_id: RoomId) -> Result<Room, DispatchError> {
        self.directories
            .sensors
            .room(room_id)
            .await?
            .ok_or(DispatchError::RoomNotFound(room_id))
    }

    async fn compute_route(&self, room: &Room) -> Result<Option<RouteResult>, DispatchError> {
        let building: BuildingId = room.building_id;
        let topology = &self.directories.topology;
        let (edges, stairs, exits, names) = tokio::try_join!(
            topology.edges(building),
            topology.stairs(building),
            topology.exits(building),
            topology.room_names(building),
        )?;

        let graph = build_graph(&edges, &stairs);
        let exits = exit_set(&exits);
        debug!(
            building_id = %building,
            nodes = %graph.node_count(),
            edges = %graph.edge_count(),
            exits = %exits.len(),
            "topology_built"
        );

        Ok(find_route(&graph, room.id, &exits, &names))
    }

    async fn notify_occupant(&self, user: UserId, message: &str, payload: &str) -> OccupantDelivery {
        let persisted = match self.directories.notifications.create(user, message.to_string()).await {
            Ok(notification) => {
                debug!(user_id = %user, notification_id = %notification.id, "notification_created");
                true
            }
            Err(e) => {
                warn!(user_id = %user, error = %e, "notification_create_failed");
                false
            }
        };
        self.metrics.record_notification(persisted);

        let pushed = self.registry.send(user, payload);
        self.metrics.record_push(pushed);

        OccupantDelivery { user_id: user, persisted, pushed }
    }
}
