//! Device driver capability contract and the type-tag registry.
//!
//! The engine never names a concrete device class. It looks up the record's
//! `spec.device_type` in a [`DriverRegistry`], asks the matching
//! [`DriverFactory`] for a driver bound to the record's endpoint, and talks to
//! the device only through [`DeviceDriver`].

pub mod http;
pub mod shelly25;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::Result;
use crate::types::Endpoint;

pub use shelly25::{Shelly25Factory, Shelly25Roller, SHELLY25_ROLLER};

// ---------------------------------------------------------------------------
// Telemetry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionState {
    #[default]
    Stop,
    Open,
    Close,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    #[default]
    Normal,
    SafetySwitch,
    Obstacle,
    Overpower,
    #[serde(other)]
    Other,
}

impl StopReason {
    /// Reason and message reported when movement halted because of a fault.
    /// `None` for a normal stop.
    pub fn fault(self) -> Option<(&'static str, &'static str)> {
        match self {
            StopReason::Obstacle => Some(("Obstacle", "obstacle detected, stopped movement")),
            StopReason::SafetySwitch => Some(("SafetySwitch", "safety switch triggered")),
            StopReason::Overpower => Some(("Overpower", "overpower detected, stopped movement")),
            StopReason::Normal | StopReason::Other => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Open,
    Close,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Raw snapshot reported by a roller device.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Telemetry {
    pub state: MotionState,
    #[serde(default)]
    pub power: f64,
    #[serde(default, rename = "isValid")]
    pub is_valid: bool,
    #[serde(default, rename = "safetySwitch")]
    pub safety_switch: bool,
    #[serde(default, rename = "overtemperature")]
    pub over_temperature: bool,
    #[serde(default)]
    pub stop_reason: StopReason,
    #[serde(default)]
    pub last_direction: Direction,
    /// Raw firmware value; uncalibrated units report -1.
    pub current_pos: i32,
    #[serde(default)]
    pub calibrating: bool,
    #[serde(default)]
    pub positioning: bool,
}

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

/// Query and command one physical device.
#[async_trait]
pub trait DeviceDriver: Send + Sync {
    /// Current telemetry.
    async fn status(&self) -> Result<Telemetry>;

    /// Command the device towards `position` (0-100) and return the
    /// telemetry reflecting the command's immediate effect.
    async fn move_to(&self, position: u8) -> Result<Telemetry>;
}

/// Builds drivers for one device class.
pub trait DriverFactory: Send + Sync {
    /// Type tag matched against `spec.deviceType`.
    fn device_type(&self) -> &str;

    fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn DeviceDriver>>;
}

// ---------------------------------------------------------------------------
// DriverRegistry
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct DriverRegistry {
    factories: BTreeMap<String, Arc<dyn DriverFactory>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in device class.
    pub fn with_defaults() -> Result<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(Shelly25Factory::new()?));
        Ok(registry)
    }

    /// Register a factory, replacing any previous one for the same type tag.
    pub fn register(&mut self, factory: Arc<dyn DriverFactory>) {
        self.factories
            .insert(factory.device_type().to_string(), factory);
    }

    pub fn get(&self, device_type: &str) -> Option<&Arc<dyn DriverFactory>> {
        self.factories.get(device_type)
    }

    /// Supported type tags, sorted.
    pub fn supported(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("supported", &self.supported())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn telemetry_decodes_device_payload() {
        let body = r#"{
            "state": "close",
            "power": 112.4,
            "isValid": true,
            "safetySwitch": false,
            "overtemperature": false,
            "stop_reason": "normal",
            "last_direction": "close",
            "current_pos": 63,
            "calibrating": false,
            "positioning": true
        }"#;
        let t: Telemetry = serde_json::from_str(body).unwrap();
        assert_eq!(t.state, MotionState::Close);
        assert_eq!(t.current_pos, 63);
        assert_eq!(t.last_direction, Direction::Close);
        assert!(t.is_valid);
        assert!(t.positioning);
    }

    #[test]
    fn unknown_enum_values_do_not_fail_decoding() {
        let t: Telemetry = serde_json::from_str(
            r#"{"state": "calibrate", "stop_reason": "mystery", "current_pos": 0}"#,
        )
        .unwrap();
        assert_eq!(t.state, MotionState::Unknown);
        assert_eq!(t.stop_reason, StopReason::Other);
        assert_eq!(t.stop_reason.fault(), None);
    }

    #[test]
    fn uncalibrated_position_decodes() {
        let t: Telemetry =
            serde_json::from_str(r#"{"state": "stop", "current_pos": -1}"#).unwrap();
        assert_eq!(t.current_pos, -1);
        assert_eq!(t.state, MotionState::Stop);
    }

    #[test]
    fn fault_reasons() {
        assert_eq!(StopReason::Obstacle.fault().unwrap().0, "Obstacle");
        assert_eq!(StopReason::SafetySwitch.fault().unwrap().0, "SafetySwitch");
        assert_eq!(StopReason::Overpower.fault().unwrap().0, "Overpower");
        assert!(StopReason::Normal.fault().is_none());
    }

    #[test]
    fn default_registry_supports_shelly() {
        let registry = DriverRegistry::with_defaults().unwrap();
        assert_eq!(registry.supported(), vec![SHELLY25_ROLLER]);
        assert!(registry.get("Shelly25Roller").is_some());
        assert!(registry.get("Somfy").is_none());
    }
}
