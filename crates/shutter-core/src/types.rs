use serde::{Deserialize, Serialize};
use std::fmt;

use crate::condition::{is_condition_true, Condition, COMPLETED};
use crate::meta::{LocalObjectReference, ObjectKey, ObjectMeta};

// ---------------------------------------------------------------------------
// DevicePhase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DevicePhase {
    Opening,
    Closing,
    Idle,
}

impl DevicePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            DevicePhase::Opening => "Opening",
            DevicePhase::Closing => "Closing",
            DevicePhase::Idle => "Idle",
        }
    }
}

impl fmt::Display for DevicePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// RequestPhase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RequestPhase {
    #[default]
    Pending,
    Moving,
    Completed,
}

impl RequestPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestPhase::Pending => "Pending",
            RequestPhase::Moving => "Moving",
            RequestPhase::Completed => "Completed",
        }
    }
}

impl fmt::Display for RequestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// DeviceRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    /// URL to contact the device under.
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSpec {
    pub device_type: String,
    pub endpoint: Endpoint,
    /// Directly commanded target, only honoured in direct convergence mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<DevicePhase>,
    /// Percentage open: 100 = completely open, 0 = completely closed.
    #[serde(default)]
    pub position: u8,
    /// Power consumption in watts.
    #[serde(default)]
    pub power: i64,
}

/// Desired and observed state of one physical roller shutter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub metadata: ObjectMeta,
    pub spec: DeviceSpec,
    #[serde(default)]
    pub status: DeviceStatus,
}

impl DeviceRecord {
    pub fn new(key: &ObjectKey, device_type: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::new(key),
            spec: DeviceSpec {
                device_type: device_type.into(),
                endpoint: Endpoint { url: url.into() },
                position: None,
            },
            status: DeviceStatus::default(),
        }
    }

    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }
}

// ---------------------------------------------------------------------------
// MoveRequest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveRequestSpec {
    /// Desired position for the shutter.
    pub position: u8,
    pub roller_shutter: LocalObjectReference,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveRequestStatus {
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub phase: RequestPhase,
}

/// One-shot command to move a device to a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveRequest {
    pub metadata: ObjectMeta,
    pub spec: MoveRequestSpec,
    #[serde(default)]
    pub status: MoveRequestStatus,
}

impl MoveRequest {
    pub fn new(key: &ObjectKey, device: impl Into<String>, position: u8) -> Self {
        Self {
            metadata: ObjectMeta::new(key),
            spec: MoveRequestSpec {
                position,
                roller_shutter: LocalObjectReference { name: device.into() },
            },
            status: MoveRequestStatus::default(),
        }
    }

    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    /// Key of the device this request targets (same namespace).
    pub fn device_key(&self) -> ObjectKey {
        ObjectKey::new(&self.metadata.namespace, &self.spec.roller_shutter.name)
    }

    pub fn targets(&self, device: &ObjectKey) -> bool {
        self.metadata.namespace == device.namespace && self.spec.roller_shutter.name == device.name
    }

    /// Terminal once the `Completed` condition is True.
    pub fn is_completed(&self) -> bool {
        is_condition_true(&self.status.conditions, COMPLETED)
    }
}
