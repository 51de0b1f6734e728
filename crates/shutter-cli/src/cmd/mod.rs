pub mod config;
pub mod device;
pub mod gc;
pub mod reconcile;
pub mod request;
pub mod run;

use crate::root::Paths;
use anyhow::Context;
use shutter_core::config::ControllerConfig;
use shutter_core::store::{FsStore, Store};
use std::future::Future;
use std::sync::Arc;

/// Drive one async operation to completion on a fresh runtime.
pub(crate) fn block_on<F: Future>(fut: F) -> anyhow::Result<F::Output> {
    let rt = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    Ok(rt.block_on(fut))
}

pub(crate) fn open_store(paths: &Paths) -> anyhow::Result<Arc<dyn Store>> {
    let store = FsStore::open(&paths.store)
        .with_context(|| format!("failed to open store at {}", paths.store.display()))?;
    Ok(Arc::new(store))
}

pub(crate) fn load_config(paths: &Paths) -> anyhow::Result<ControllerConfig> {
    ControllerConfig::load(&paths.config)
        .with_context(|| format!("failed to load config from {}", paths.config.display()))
}
