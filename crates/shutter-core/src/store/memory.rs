//! In-process store. Backs tests and embedders that bring their own
//! persistence.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;

use super::{
    check_version, event_channel, in_namespace, prepare_create, Store, StoreEvent, DEVICE_KIND,
    REQUEST_KIND,
};
use crate::error::{Result, ShutterError};
use crate::meta::ObjectKey;
use crate::types::{DeviceRecord, MoveRequest};

#[derive(Default)]
struct Inner {
    devices: BTreeMap<ObjectKey, DeviceRecord>,
    requests: BTreeMap<ObjectKey, MoveRequest>,
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            events: event_channel(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // a panic while holding the lock cannot leave a half-applied write
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn notify(&self, event: StoreEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_device(&self, key: &ObjectKey) -> Result<Option<DeviceRecord>> {
        Ok(self.lock().devices.get(key).cloned())
    }

    async fn get_request(&self, key: &ObjectKey) -> Result<Option<MoveRequest>> {
        Ok(self.lock().requests.get(key).cloned())
    }

    async fn list_devices(&self, namespace: Option<&str>) -> Result<Vec<DeviceRecord>> {
        Ok(self
            .lock()
            .devices
            .values()
            .filter(|d| in_namespace(&d.metadata, namespace))
            .cloned()
            .collect())
    }

    async fn list_requests(&self, namespace: Option<&str>) -> Result<Vec<MoveRequest>> {
        Ok(self
            .lock()
            .requests
            .values()
            .filter(|r| in_namespace(&r.metadata, namespace))
            .cloned()
            .collect())
    }

    async fn create_device(&self, mut device: DeviceRecord) -> Result<DeviceRecord> {
        prepare_create(&mut device.metadata, DEVICE_KIND)?;
        let key = device.key();
        {
            let mut inner = self.lock();
            if inner.devices.contains_key(&key) {
                return Err(ShutterError::AlreadyExists {
                    kind: DEVICE_KIND,
                    key: key.to_string(),
                });
            }
            inner.devices.insert(key.clone(), device.clone());
        }
        self.notify(StoreEvent::Device(key));
        Ok(device)
    }

    async fn create_request(&self, mut request: MoveRequest) -> Result<MoveRequest> {
        prepare_create(&mut request.metadata, REQUEST_KIND)?;
        let key = request.key();
        {
            let mut inner = self.lock();
            if inner.requests.contains_key(&key) {
                return Err(ShutterError::AlreadyExists {
                    kind: REQUEST_KIND,
                    key: key.to_string(),
                });
            }
            inner.requests.insert(key.clone(), request.clone());
        }
        self.notify(StoreEvent::Request {
            key,
            device: request.device_key(),
        });
        Ok(request)
    }

    async fn update_device(&self, device: &DeviceRecord) -> Result<DeviceRecord> {
        let key = device.key();
        let updated = {
            let mut inner = self.lock();
            let stored = inner
                .devices
                .get_mut(&key)
                .ok_or_else(|| ShutterError::NotFound {
                    kind: DEVICE_KIND,
                    key: key.to_string(),
                })?;
            check_version(&stored.metadata, &device.metadata, DEVICE_KIND)?;
            if stored.spec != device.spec {
                stored.spec = device.spec.clone();
                stored.metadata.generation += 1;
            }
            stored.metadata.resource_version += 1;
            stored.clone()
        };
        self.notify(StoreEvent::Device(key));
        Ok(updated)
    }

    async fn update_device_status(&self, device: &DeviceRecord) -> Result<DeviceRecord> {
        let key = device.key();
        let mut inner = self.lock();
        let stored = inner
            .devices
            .get_mut(&key)
            .ok_or_else(|| ShutterError::NotFound {
                kind: DEVICE_KIND,
                key: key.to_string(),
            })?;
        check_version(&stored.metadata, &device.metadata, DEVICE_KIND)?;
        stored.status = device.status.clone();
        stored.metadata.resource_version += 1;
        // status writes don't notify: the engine requeues itself
        Ok(stored.clone())
    }

    async fn update_request_status(&self, request: &MoveRequest) -> Result<MoveRequest> {
        let key = request.key();
        let mut inner = self.lock();
        let stored = inner
            .requests
            .get_mut(&key)
            .ok_or_else(|| ShutterError::NotFound {
                kind: REQUEST_KIND,
                key: key.to_string(),
            })?;
        check_version(&stored.metadata, &request.metadata, REQUEST_KIND)?;
        stored.status = request.status.clone();
        stored.metadata.resource_version += 1;
        Ok(stored.clone())
    }

    async fn delete_request(&self, key: &ObjectKey) -> Result<bool> {
        let removed = self.lock().requests.remove(key);
        match removed {
            Some(request) => {
                self.notify(StoreEvent::Request {
                    key: key.clone(),
                    device: request.device_key(),
                });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(ns: &str, name: &str) -> DeviceRecord {
        DeviceRecord::new(&ObjectKey::new(ns, name), "Shelly25Roller", "http://127.0.0.1")
    }

    #[tokio::test]
    async fn create_stamps_identity() {
        let store = MemoryStore::new();
        let created = store.create_device(device("home", "kitchen")).await.unwrap();
        assert_eq!(created.metadata.generation, 1);
        assert_eq!(created.metadata.resource_version, 1);
        assert!(!created.metadata.uid.is_nil());
    }

    #[tokio::test]
    async fn create_twice_is_rejected() {
        let store = MemoryStore::new();
        store.create_device(device("home", "kitchen")).await.unwrap();
        let err = store.create_device(device("home", "kitchen")).await.unwrap_err();
        assert!(matches!(err, ShutterError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn stale_status_write_conflicts() {
        let store = MemoryStore::new();
        let created = store.create_device(device("home", "kitchen")).await.unwrap();

        let mut first = created.clone();
        first.status.position = 10;
        store.update_device_status(&first).await.unwrap();

        let mut stale = created;
        stale.status.position = 90;
        let err = store.update_device_status(&stale).await.unwrap_err();
        assert!(err.is_conflict());

        let stored = store.get_device(&first.key()).await.unwrap().unwrap();
        assert_eq!(stored.status.position, 10);
        assert_eq!(stored.metadata.resource_version, 2);
    }

    #[tokio::test]
    async fn status_write_leaves_spec_alone() {
        let store = MemoryStore::new();
        let created = store.create_device(device("home", "kitchen")).await.unwrap();
        let mut changed = created.clone();
        changed.spec.device_type = "Other".into();
        changed.status.power = 7;
        let stored = store.update_device_status(&changed).await.unwrap();
        assert_eq!(stored.spec.device_type, "Shelly25Roller");
        assert_eq!(stored.status.power, 7);
        assert_eq!(stored.metadata.generation, 1);
    }

    #[tokio::test]
    async fn spec_update_bumps_generation_only_on_change() {
        let store = MemoryStore::new();
        let created = store.create_device(device("home", "kitchen")).await.unwrap();
        let same = store.update_device(&created).await.unwrap();
        assert_eq!(same.metadata.generation, 1);

        let mut changed = same.clone();
        changed.spec.position = Some(50);
        let stored = store.update_device(&changed).await.unwrap();
        assert_eq!(stored.metadata.generation, 2);
    }

    #[tokio::test]
    async fn list_filters_by_namespace() {
        let store = MemoryStore::new();
        store.create_device(device("a", "one")).await.unwrap();
        store.create_device(device("b", "two")).await.unwrap();
        assert_eq!(store.list_devices(Some("a")).await.unwrap().len(), 1);
        assert_eq!(store.list_devices(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn request_events_carry_device_key() {
        let store = MemoryStore::new();
        let mut events = store.subscribe();
        let req = MoveRequest::new(&ObjectKey::new("home", "r1"), "kitchen", 30);
        store.create_request(req).await.unwrap();
        let event = events.recv().await.unwrap();
        assert_eq!(event.device_key(), &ObjectKey::new("home", "kitchen"));

        assert!(store.delete_request(&ObjectKey::new("home", "r1")).await.unwrap());
        assert!(!store.delete_request(&ObjectKey::new("home", "r1")).await.unwrap());
    }
}
