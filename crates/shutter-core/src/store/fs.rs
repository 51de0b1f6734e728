//! YAML-file store.
//!
//! # Layout
//!
//! ```text
//! <root>/<namespace>/devices/<name>.yaml
//! <root>/<namespace>/requests/<name>.yaml
//! ```
//!
//! Every write goes through [`io::atomic_write`](crate::io::atomic_write).
//! Version checks and the write that follows happen under one process-local
//! lock, so concurrent writers inside this process see proper conflicts.
//! Edits made by other processes are not announced on the event stream; the
//! controller's periodic resync picks them up.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;

use super::{
    check_version, event_channel, in_namespace, prepare_create, Store, StoreEvent, DEVICE_KIND,
    REQUEST_KIND,
};
use crate::error::{Result, ShutterError};
use crate::io;
use crate::meta::ObjectKey;
use crate::types::{DeviceRecord, MoveRequest};

const DEVICES_DIR: &str = "devices";
const REQUESTS_DIR: &str = "requests";

pub struct FsStore {
    root: PathBuf,
    write_lock: Mutex<()>,
    events: broadcast::Sender<StoreEvent>,
}

impl FsStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
            events: event_channel(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn device_path(&self, key: &ObjectKey) -> PathBuf {
        self.root
            .join(&key.namespace)
            .join(DEVICES_DIR)
            .join(format!("{}.yaml", key.name))
    }

    fn request_path(&self, key: &ObjectKey) -> PathBuf {
        self.root
            .join(&key.namespace)
            .join(REQUESTS_DIR)
            .join(format!("{}.yaml", key.name))
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn namespaces(&self, namespace: Option<&str>) -> Result<Vec<String>> {
        if let Some(ns) = namespace {
            return Ok(vec![ns.to_string()]);
        }
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    out.push(name.to_string());
                }
            }
        }
        out.sort();
        Ok(out)
    }

    fn list<T: DeserializeOwned>(&self, namespace: Option<&str>, dir: &str) -> Result<Vec<T>> {
        let mut out = Vec::new();
        for ns in self.namespaces(namespace)? {
            for path in io::yaml_files(&self.root.join(&ns).join(dir))? {
                out.push(read_yaml(&path)?);
            }
        }
        Ok(out)
    }

    fn notify(&self, event: StoreEvent) {
        let _ = self.events.send(event);
    }
}

fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&data)?)
}

fn read_optional<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    read_yaml(path).map(Some)
}

fn write_yaml<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let data = serde_yaml::to_string(value)?;
    io::atomic_write(path, data.as_bytes())
}

#[async_trait]
impl Store for FsStore {
    async fn get_device(&self, key: &ObjectKey) -> Result<Option<DeviceRecord>> {
        read_optional(&self.device_path(key))
    }

    async fn get_request(&self, key: &ObjectKey) -> Result<Option<MoveRequest>> {
        read_optional(&self.request_path(key))
    }

    async fn list_devices(&self, namespace: Option<&str>) -> Result<Vec<DeviceRecord>> {
        let devices: Vec<DeviceRecord> = self.list(namespace, DEVICES_DIR)?;
        Ok(devices
            .into_iter()
            .filter(|d| in_namespace(&d.metadata, namespace))
            .collect())
    }

    async fn list_requests(&self, namespace: Option<&str>) -> Result<Vec<MoveRequest>> {
        let requests: Vec<MoveRequest> = self.list(namespace, REQUESTS_DIR)?;
        Ok(requests
            .into_iter()
            .filter(|r| in_namespace(&r.metadata, namespace))
            .collect())
    }

    async fn create_device(&self, mut device: DeviceRecord) -> Result<DeviceRecord> {
        prepare_create(&mut device.metadata, DEVICE_KIND)?;
        let key = device.key();
        let path = self.device_path(&key);
        {
            let _guard = self.lock();
            if path.exists() {
                return Err(ShutterError::AlreadyExists {
                    kind: DEVICE_KIND,
                    key: key.to_string(),
                });
            }
            write_yaml(&path, &device)?;
        }
        self.notify(StoreEvent::Device(key));
        Ok(device)
    }

    async fn create_request(&self, mut request: MoveRequest) -> Result<MoveRequest> {
        prepare_create(&mut request.metadata, REQUEST_KIND)?;
        let key = request.key();
        let path = self.request_path(&key);
        {
            let _guard = self.lock();
            if path.exists() {
                return Err(ShutterError::AlreadyExists {
                    kind: REQUEST_KIND,
                    key: key.to_string(),
                });
            }
            write_yaml(&path, &request)?;
        }
        self.notify(StoreEvent::Request {
            key,
            device: request.device_key(),
        });
        Ok(request)
    }

    async fn update_device(&self, device: &DeviceRecord) -> Result<DeviceRecord> {
        let key = device.key();
        let path = self.device_path(&key);
        let stored = {
            let _guard = self.lock();
            let mut stored: DeviceRecord =
                read_optional(&path)?.ok_or_else(|| ShutterError::NotFound {
                    kind: DEVICE_KIND,
                    key: key.to_string(),
                })?;
            check_version(&stored.metadata, &device.metadata, DEVICE_KIND)?;
            if stored.spec != device.spec {
                stored.spec = device.spec.clone();
                stored.metadata.generation += 1;
            }
            stored.metadata.resource_version += 1;
            write_yaml(&path, &stored)?;
            stored
        };
        self.notify(StoreEvent::Device(key));
        Ok(stored)
    }

    async fn update_device_status(&self, device: &DeviceRecord) -> Result<DeviceRecord> {
        let key = device.key();
        let path = self.device_path(&key);
        let _guard = self.lock();
        let mut stored: DeviceRecord =
            read_optional(&path)?.ok_or_else(|| ShutterError::NotFound {
                kind: DEVICE_KIND,
                key: key.to_string(),
            })?;
        check_version(&stored.metadata, &device.metadata, DEVICE_KIND)?;
        stored.status = device.status.clone();
        stored.metadata.resource_version += 1;
        write_yaml(&path, &stored)?;
        Ok(stored)
    }

    async fn update_request_status(&self, request: &MoveRequest) -> Result<MoveRequest> {
        let key = request.key();
        let path = self.request_path(&key);
        let _guard = self.lock();
        let mut stored: MoveRequest =
            read_optional(&path)?.ok_or_else(|| ShutterError::NotFound {
                kind: REQUEST_KIND,
                key: key.to_string(),
            })?;
        check_version(&stored.metadata, &request.metadata, REQUEST_KIND)?;
        stored.status = request.status.clone();
        stored.metadata.resource_version += 1;
        write_yaml(&path, &stored)?;
        Ok(stored)
    }

    async fn delete_request(&self, key: &ObjectKey) -> Result<bool> {
        let path = self.request_path(key);
        let removed = {
            let _guard = self.lock();
            match read_optional::<MoveRequest>(&path)? {
                Some(request) => {
                    io::remove_if_exists(&path)?;
                    Some(request)
                }
                None => None,
            }
        };
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
    use tempfile::TempDir;

    fn device(ns: &str, name: &str) -> DeviceRecord {
        DeviceRecord::new(&ObjectKey::new(ns, name), "Shelly25Roller", "http://127.0.0.1")
    }

    #[tokio::test]
    async fn records_land_in_namespace_layout() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        store.create_device(device("home", "kitchen")).await.unwrap();
        store
            .create_request(MoveRequest::new(&ObjectKey::new("home", "r1"), "kitchen", 20))
            .await
            .unwrap();

        assert!(dir.path().join("home/devices/kitchen.yaml").exists());
        assert!(dir.path().join("home/requests/r1.yaml").exists());
    }

    #[tokio::test]
    async fn status_update_persists_and_conflicts_when_stale() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        let created = store.create_device(device("home", "kitchen")).await.unwrap();

        let mut fresh = created.clone();
        fresh.status.position = 55;
        store.update_device_status(&fresh).await.unwrap();

        let err = store.update_device_status(&created).await.unwrap_err();
        assert!(err.is_conflict());

        // a second handle on the same directory sees the write
        let reopened = FsStore::open(dir.path()).unwrap();
        let stored = reopened.get_device(&created.key()).await.unwrap().unwrap();
        assert_eq!(stored.status.position, 55);
    }

    #[tokio::test]
    async fn lists_across_namespaces() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        store.create_device(device("a", "one")).await.unwrap();
        store.create_device(device("b", "two")).await.unwrap();
        assert_eq!(store.list_devices(None).await.unwrap().len(), 2);
        assert_eq!(store.list_devices(Some("b")).await.unwrap().len(), 1);
        assert!(store.list_requests(Some("missing")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        let key = ObjectKey::new("home", "r1");
        store
            .create_request(MoveRequest::new(&key, "kitchen", 20))
            .await
            .unwrap();
        assert!(store.delete_request(&key).await.unwrap());
        assert!(!store.delete_request(&key).await.unwrap());
        assert!(store.get_request(&key).await.unwrap().is_none());
    }
}
