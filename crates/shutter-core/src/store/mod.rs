//! Desired-state store seam.
//!
//! The engine reads and writes records only through [`Store`]. Writes are
//! optimistic: every record carries the `resource_version` it was read at,
//! and a write against a newer stored version fails with
//! [`ShutterError::Conflict`]. The engine never merges; the next pass
//! reloads fresh state.
//!
//! Status is a separate writable facet: `update_*_status` replaces only the
//! status of the stored record, `update_device` replaces only the spec.

pub mod fs;
pub mod memory;

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::{Result, ShutterError};
use crate::meta::{is_valid_name, ObjectKey, ObjectMeta};
use crate::types::{DeviceRecord, MoveRequest};

pub use fs::FsStore;
pub use memory::MemoryStore;

pub const DEVICE_KIND: &str = "RollerShutter";
pub const REQUEST_KIND: &str = "RollerShutterRequest";

const EVENT_BUFFER: usize = 256;

/// Change notification, keyed by the device that should be reconciled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Device(ObjectKey),
    Request { key: ObjectKey, device: ObjectKey },
}

impl StoreEvent {
    /// Device key to enqueue for this change.
    pub fn device_key(&self) -> &ObjectKey {
        match self {
            StoreEvent::Device(key) => key,
            StoreEvent::Request { device, .. } => device,
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_device(&self, key: &ObjectKey) -> Result<Option<DeviceRecord>>;

    async fn get_request(&self, key: &ObjectKey) -> Result<Option<MoveRequest>>;

    /// Devices in `namespace`, or in every namespace when `None`.
    async fn list_devices(&self, namespace: Option<&str>) -> Result<Vec<DeviceRecord>>;

    /// Requests in `namespace`, or in every namespace when `None`. No
    /// ordering guarantee.
    async fn list_requests(&self, namespace: Option<&str>) -> Result<Vec<MoveRequest>>;

    async fn create_device(&self, device: DeviceRecord) -> Result<DeviceRecord>;

    async fn create_request(&self, request: MoveRequest) -> Result<MoveRequest>;

    /// Replace the spec, bumping `generation` when it changed.
    async fn update_device(&self, device: &DeviceRecord) -> Result<DeviceRecord>;

    async fn update_device_status(&self, device: &DeviceRecord) -> Result<DeviceRecord>;

    async fn update_request_status(&self, request: &MoveRequest) -> Result<MoveRequest>;

    /// Returns `false` if the request was already gone.
    async fn delete_request(&self, key: &ObjectKey) -> Result<bool>;

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}

// ---------------------------------------------------------------------------
// Shared helpers for implementations
// ---------------------------------------------------------------------------

/// Stamp identity on a record about to be created.
pub(crate) fn prepare_create(meta: &mut ObjectMeta, kind: &'static str) -> Result<()> {
    if !is_valid_name(&meta.namespace) || !is_valid_name(&meta.name) {
        return Err(ShutterError::InvalidKey(format!(
            "{kind} {}/{}",
            meta.namespace, meta.name
        )));
    }
    meta.uid = Uuid::new_v4();
    meta.generation = 1;
    meta.resource_version = 1;
    Ok(())
}

/// Optimistic-concurrency check of an incoming write against the stored record.
pub(crate) fn check_version(
    stored: &ObjectMeta,
    incoming: &ObjectMeta,
    kind: &'static str,
) -> Result<()> {
    if stored.resource_version != incoming.resource_version {
        return Err(ShutterError::Conflict {
            kind,
            key: stored.key().to_string(),
        });
    }
    Ok(())
}

pub(crate) fn in_namespace(meta: &ObjectMeta, namespace: Option<&str>) -> bool {
    namespace.is_none_or(|ns| meta.namespace == ns)
}

pub(crate) fn event_channel() -> broadcast::Sender<StoreEvent> {
    broadcast::channel(EVENT_BUFFER).0
}
