use crate::cmd::{block_on, load_config, open_store};
use crate::root::Paths;
use anyhow::Context;
use shutter_core::config::{ConvergenceMode, WarnLevel};
use shutter_core::controller::Controller;
use shutter_core::driver::DriverRegistry;
use shutter_core::engine::Engine;
use tokio::sync::watch;

pub fn run(
    paths: &Paths,
    workers: Option<usize>,
    mode: Option<ConvergenceMode>,
) -> anyhow::Result<()> {
    let mut config = load_config(paths)?;
    if let Some(workers) = workers {
        config.workers = workers;
    }
    if let Some(mode) = mode {
        config.mode = mode;
    }
    for w in config.validate() {
        if w.level == WarnLevel::Warning {
            tracing::warn!("config: {}", w.message);
        }
    }
    config.ensure_valid().context("invalid controller config")?;

    let store = open_store(paths)?;
    let drivers = DriverRegistry::with_defaults().context("failed to set up device drivers")?;
    tracing::info!(
        store = %paths.store.display(),
        drivers = ?drivers.supported(),
        "starting controller"
    );
    let controller = Controller::new(Engine::new(store, drivers, config));

    block_on(async move {
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("interrupt received");
                    let _ = tx.send(true);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "cannot listen for ctrl-c");
                    // keep the sender alive so the controller keeps running
                    std::future::pending::<()>().await;
                    drop(tx);
                }
            }
        });
        controller.run(rx).await
    })?
    .context("controller failed")
}
