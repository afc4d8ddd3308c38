//! Shared types for the evacuation gateway

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declares a Uuid newtype id with Display/FromStr and transparent serde
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        #[repr(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Fresh time-ordered id
            pub fn new_v7() -> Self {
                Self(Uuid::now_v7())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Navigable room inside a building
    RoomId
);
uuid_id!(BuildingId);
uuid_id!(SensorId);
uuid_id!(
    /// Registered occupant / account
    UserId
);
uuid_id!(NotificationId);
uuid_id!(MeasurementId);

/// A room as known to the site directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub building_id: BuildingId,
    #[serde(default)]
    pub floor: i32,
    pub name: String,
}

/// Undirected, weighted room-to-room connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomEdge {
    pub room1: RoomId,
    pub room2: RoomId,
    pub distance: u32,
}

/// Stair link between rooms on different floors (always costs one hop)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stair {
    pub building_id: BuildingId,
    pub floor1_room: RoomId,
    pub floor2_room: RoomId,
}

/// Room designated as an evacuation endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exit {
    pub building_id: BuildingId,
    pub room_id: RoomId,
    #[serde(default)]
    pub floor: i32,
    #[serde(default)]
    pub kind: String,
}

/// Smoke sensor mounted in a room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    pub id: SensorId,
    pub room_id: RoomId,
    pub name: String,
    #[serde(default = "default_sensor_kind")]
    pub kind: String,
    pub threshold: f64,
}

fn default_sensor_kind() -> String {
    "smoke".to_string()
}

/// Raw reading as posted by a device
///
/// Field names follow the device wire format (`SensorId`, `Value`, `IsAboveThreshold`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SensorReading {
    pub sensor_id: SensorId,
    pub value: f64,
    #[serde(default)]
    pub is_above_threshold: bool,
}

/// Persisted raw measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub id: MeasurementId,
    pub sensor_id: SensorId,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl Measurement {
    pub fn from_reading(reading: &SensorReading) -> Self {
        Self {
            id: MeasurementId::new_v7(),
            sensor_id: reading.sensor_id,
            value: reading.value,
            timestamp: Utc::now(),
        }
    }
}

/// Alert notification kept for an occupant after the push
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: UserId,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub read: bool,
}

impl Notification {
    /// New unread notification stamped with the current time
    pub fn new(user_id: UserId, message: String) -> Self {
        Self {
            id: NotificationId::new_v7(),
            user_id,
            message,
            created_at: Utc::now(),
            read: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_uses_device_field_names() {
        let json = r#"{"SensorId":"6f1c1f0e-3c1a-4a8e-9d0b-0a4b7c9e2d11","Value":61.5,"IsAboveThreshold":true}"#;
        let reading: SensorReading = serde_json::from_str(json).unwrap();
        assert_eq!(reading.sensor_id.to_string(), "6f1c1f0e-3c1a-4a8e-9d0b-0a4b7c9e2d11");
        assert_eq!(reading.value, 61.5);
        assert!(reading.is_above_threshold);
    }

    #[test]
    fn test_reading_flag_defaults_to_false() {
        let json = r#"{"SensorId":"6f1c1f0e-3c1a-4a8e-9d0b-0a4b7c9e2d11","Value":3.0}"#;
        let reading: SensorReading = serde_json::from_str(json).unwrap();
        assert!(!reading.is_above_threshold);
    }

    #[test]
    fn test_id_round_trips_through_str() {
        let id = RoomId::new_v7();
        let parsed: RoomId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<RoomId>().is_err());
    }

    #[test]
    fn test_new_notification_is_unread() {
        let n = Notification::new(UserId::new_v7(), "Smoke detected!".to_string());
        assert!(!n.read);
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["read"], false);
        assert!(json.get("createdAt").is_some());
    }
}
