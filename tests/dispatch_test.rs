//! End-to-end alert pipeline over the bundled demo site

use safe_escape::domain::types::{RoomId, SensorId, SensorReading, UserId};
use safe_escape::infra::Metrics;
use safe_escape::io::{NotificationLog, SiteStore};
use safe_escape::services::directory::NotificationStore;
use safe_escape::services::{
    AlertDispatcher, ConnectionHandle, ConnectionRegistry, Directories, Ingest, IngestOutcome,
};
use std::sync::Arc;
use tempfile::tempdir;

const OCCUPANT_1: &str = "0190a0b0-0000-7000-8000-00000000a001";
const OCCUPANT_2: &str = "0190a0b0-0000-7000-8000-00000000a002";
const LAB_SENSOR: &str = "0190a0b0-0000-7000-8000-00000000c201";
const RECEPTION_SENSOR: &str = "0190a0b0-0000-7000-8000-00000000c101";

struct Pipeline {
    ingest: Ingest,
    store: Arc<SiteStore>,
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<Metrics>,
}

fn pipeline(store: SiteStore) -> Pipeline {
    let store = Arc::new(store);
    let registry = Arc::new(ConnectionRegistry::new());
    let metrics = Arc::new(Metrics::new());
    let dispatcher = Arc::new(AlertDispatcher::new(
        Directories::from_store(store.clone()),
        registry.clone(),
        metrics.clone(),
    ));
    let ingest = Ingest::new(store.clone(), store.clone(), dispatcher, metrics.clone());
    Pipeline { ingest, store, registry, metrics }
}

fn user(raw: &str) -> UserId {
    raw.parse().unwrap()
}

#[tokio::test]
async fn test_stair_route_beats_same_floor_exit() {
    let p = pipeline(SiteStore::from_file("config/site.toml").unwrap());
    let (handle, mut rx) = ConnectionHandle::channel(8);
    p.registry.add(user(OCCUPANT_1), handle);

    let reading = SensorReading { sensor_id: LAB_SENSOR.parse().unwrap(), value: 80.0, is_above_threshold: true };
    let IngestOutcome::Dispatched(Some(route)) = p.ingest.ingest_reading(reading).await.unwrap() else {
        panic!("expected a route");
    };

    // Lab -3- Hallway B -stair- Hallway A -2- Main Exit beats Lab -3- Hallway B -6- Fire Escape
    assert_eq!(route.room_names, vec!["Lab", "Hallway B", "Hallway A", "Main Exit"]);
    assert_eq!(route.total_distance, 6);
    assert_eq!(route.exit(), Some("0190a0b0-0000-7000-8000-000000000103".parse::<RoomId>().unwrap()));

    // Push payload is the space-separated id route
    let payload = rx.try_recv().unwrap();
    let ids: Vec<RoomId> = payload.split(' ').map(|id| id.parse().unwrap()).collect();
    assert_eq!(ids, route.room_ids);

    // Both occupants get a notification; only one was connected
    for occupant in [OCCUPANT_1, OCCUPANT_2] {
        let list = p.store.list_for_user(user(occupant)).await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].message, "Smoke detected! Evacuation route: Lab -> Hallway B -> Hallway A -> Main Exit");
    }
    assert_eq!(p.metrics.pushes_delivered(), 1);
    assert_eq!(p.metrics.pushes_missed(), 1);
}

#[tokio::test]
async fn test_notifications_reach_the_jsonl_log() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("notifications.jsonl");
    let store = SiteStore::from_file("config/site.toml").unwrap().with_notification_log(NotificationLog::new(&path));
    let p = pipeline(store);

    let reading =
        SensorReading { sensor_id: RECEPTION_SENSOR.parse().unwrap(), value: 51.0, is_above_threshold: false };
    let outcome = p.ingest.ingest_reading(reading).await.unwrap();
    assert!(matches!(outcome, IngestOutcome::Dispatched(Some(_))));

    let content = std::fs::read_to_string(&path).unwrap();
    assert_eq!(content.lines().count(), 2);
    assert!(content.contains("Reception -> Hallway A -> Main Exit"));
}

#[tokio::test]
async fn test_concurrent_alarms_each_push_once() {
    let p = Arc::new(pipeline(SiteStore::from_file("config/site.toml").unwrap()));
    let (handle, mut rx) = ConnectionHandle::channel(64);
    p.registry.add(user(OCCUPANT_2), handle);

    let mut tasks = Vec::new();
    for i in 0..10 {
        let p = p.clone();
        let sensor: SensorId = if i % 2 == 0 { LAB_SENSOR } else { RECEPTION_SENSOR }.parse().unwrap();
        tasks.push(tokio::spawn(async move {
            p.ingest
                .ingest_reading(SensorReading { sensor_id: sensor, value: 99.0, is_above_threshold: true })
                .await
                .unwrap()
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let mut received = 0;
    while let Ok(payload) = rx.try_recv() {
        // Frames are whole routes, never interleaved fragments
        assert!(payload.split(' ').all(|id| id.parse::<RoomId>().is_ok()));
        received += 1;
    }
    assert_eq!(received, 10);
    assert_eq!(p.store.list_for_user(user(OCCUPANT_1)).await.unwrap().len(), 10);
}
