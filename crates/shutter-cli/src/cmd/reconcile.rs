use crate::cmd::{block_on, load_config, open_store};
use crate::output::{or_dash, print_json};
use crate::root::Paths;
use anyhow::Context;
use shutter_core::driver::DriverRegistry;
use shutter_core::engine::Engine;
use shutter_core::meta::ObjectKey;
use shutter_core::types::{DevicePhase, RequestPhase};

pub fn run(paths: &Paths, key: &ObjectKey, json: bool) -> anyhow::Result<()> {
    let config = load_config(paths)?;
    config.ensure_valid().context("invalid controller config")?;
    let store = open_store(paths)?;
    let drivers = DriverRegistry::with_defaults().context("failed to set up device drivers")?;
    let engine = Engine::new(store.clone(), drivers, config);

    let (outcome, device) = block_on(async {
        let outcome = engine.reconcile(key).await?;
        let device = store.get_device(key).await?;
        Ok::<_, shutter_core::ShutterError>((outcome, device))
    })?
    .with_context(|| format!("failed to reconcile RollerShutter {key}"))?;

    let Some(device) = device else {
        anyhow::bail!("RollerShutter {key} not found");
    };

    if json {
        let value = serde_json::json!({
            "device": key.to_string(),
            "phase": outcome.phase.map(DevicePhase::as_str),
            "position": outcome.position,
            "activeRequest": outcome.active_request.as_ref().map(ToString::to_string),
            "requestPhase": outcome.request_phase.map(RequestPhase::as_str),
            "requeueAfterSecs": outcome.requeue_after.map(|d| d.as_secs()),
            "collected": outcome.collected.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "conditions": device.status.conditions,
        });
        return print_json(&value);
    }

    println!(
        "{key}: phase {}, position {}, requeue in {}s",
        or_dash(outcome.phase),
        or_dash(outcome.position),
        outcome.requeue_after.map_or(0, |d| d.as_secs()),
    );
    if let (Some(request), Some(phase)) = (&outcome.active_request, outcome.request_phase) {
        println!("request {request}: {phase}");
    }
    for c in &device.status.conditions {
        println!(
            "  {}={} ({}): {}",
            c.condition_type,
            c.status.as_str(),
            c.reason,
            c.message
        );
    }
    if !outcome.collected.is_empty() {
        println!("collected {} completed request(s)", outcome.collected.len());
    }
    Ok(())
}
