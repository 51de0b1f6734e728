//! Per-device reconciliation pass.
//!
//! One call to [`Engine::reconcile`] loads a device, picks its active
//! request, reads telemetry, optionally commands a move, derives phases and
//! conditions, persists status and reports when the device should be looked
//! at again.
//!
//! Precondition: the caller never runs two passes for the same device key
//! concurrently. The [`Controller`](crate::controller::Controller) work queue
//! guarantees this; the engine itself holds no locks.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::condition::{
    remove_condition, set_condition, Condition, AT_POSITION, COMPLETED, REACHABLE,
};
use crate::config::{ControllerConfig, ConvergenceMode};
use crate::deadline::bounded;
use crate::driver::{DeviceDriver, DriverRegistry, Telemetry};
use crate::error::{Result, ResultExt};
use crate::machine::Completion;
use crate::meta::ObjectKey;
use crate::selector::{collect_garbage, select_active};
use crate::store::Store;
use crate::types::{DevicePhase, DeviceRecord, MoveRequest, RequestPhase};

/// Summary of one successful pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    /// `None` when the device no longer exists.
    pub requeue_after: Option<Duration>,
    pub phase: Option<DevicePhase>,
    pub position: Option<u8>,
    pub active_request: Option<ObjectKey>,
    pub request_phase: Option<RequestPhase>,
    pub collected: Vec<ObjectKey>,
}

impl Reconciled {
    fn gone() -> Self {
        Self {
            requeue_after: None,
            phase: None,
            position: None,
            active_request: None,
            request_phase: None,
            collected: Vec::new(),
        }
    }
}

/// What the device-facing half of a pass managed to learn.
#[derive(Clone, Copy)]
enum Probe {
    /// Telemetry was read; phase is fresh.
    Observed,
    /// No driver could be used; reported through conditions.
    Misconfigured,
}

#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn Store>,
    drivers: DriverRegistry,
    config: ControllerConfig,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>, drivers: DriverRegistry, config: ControllerConfig) -> Self {
        Self {
            store,
            drivers,
            config,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    #[tracing::instrument(name = "reconcile", skip(self, key), fields(device = %key))]
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Reconciled> {
        let timeout = self.config.call_timeout();

        let Some(mut device) =
            bounded(timeout, "getting RollerShutter", self.store.get_device(key)).await?
        else {
            debug!("device no longer exists");
            return Ok(Reconciled::gone());
        };

        let mode = self.config.mode;
        let (mut history, mut active) = match mode {
            ConvergenceMode::Requests => {
                let op = format!("listing RollerShutterRequests in namespace {}", key.namespace);
                let requests = bounded(
                    timeout,
                    &op,
                    self.store.list_requests(Some(&key.namespace)),
                )
                .await?;
                let history: Vec<MoveRequest> =
                    requests.into_iter().filter(|r| r.targets(key)).collect();
                let active = select_active(&history, key).cloned();
                (history, active)
            }
            // the record's own spec.position drives; requests stay untouched
            ConvergenceMode::Direct => (Vec::new(), None),
        };
        if let Some(request) = &active {
            debug!(request = %request.key(), target = request.spec.position, "selected active request");
        }

        let device_type = device.spec.device_type.clone();
        let probe = match self.drivers.get(&device_type) {
            None => {
                self.report_unknown_type(&mut device);
                Probe::Misconfigured
            }
            Some(factory) => match factory.connect(&device.spec.endpoint) {
                Err(e) => {
                    warn!(error = %e, "device endpoint is unusable");
                    remove_condition(&mut device.status.conditions, AT_POSITION);
                    set_condition(
                        &mut device.status.conditions,
                        Condition::new(REACHABLE, false, "InvalidEndpoint", e.to_string())
                            .with_generation(device.metadata.generation),
                    );
                    Probe::Misconfigured
                }
                Ok(driver) => {
                    let converged = match mode {
                        ConvergenceMode::Requests => {
                            self.converge_request(driver.as_ref(), &mut device, active.as_mut())
                                .await
                        }
                        ConvergenceMode::Direct => {
                            self.converge_direct(driver.as_ref(), &mut device).await
                        }
                    };
                    converged.op(format!("reconciling {device_type}"))?;
                    Probe::Observed
                }
            },
        };

        // Persist
        device.status.observed_generation = device.metadata.generation;
        let device = bounded(
            timeout,
            "updating RollerShutter status",
            self.store.update_device_status(&device),
        )
        .await?;

        if let Some(request) = active.as_mut() {
            request.status.observed_generation = request.metadata.generation;
            *request = bounded(
                timeout,
                "updating RollerShutterRequest status",
                self.store.update_request_status(request),
            )
            .await?;
            // GC must see a completion written in this pass
            let written = request.key();
            if let Some(entry) = history.iter_mut().find(|r| r.key() == written) {
                *entry = request.clone();
            }
        }

        // GC runs after the status writes so its failure never discards them.
        let collected = match mode {
            ConvergenceMode::Requests => {
                collect_garbage(
                    self.store.as_ref(),
                    &history,
                    self.config.request_history_limit,
                    timeout,
                )
                .await?
            }
            ConvergenceMode::Direct => Vec::new(),
        };

        let requeue_after = match (probe, device.status.phase) {
            (Probe::Observed, Some(DevicePhase::Opening | DevicePhase::Closing)) => {
                self.config.moving_requeue()
            }
            _ => self.config.default_requeue(),
        };

        info!(
            phase = device.status.phase.map(DevicePhase::as_str).unwrap_or("-"),
            position = device.status.position,
            requeue_secs = requeue_after.as_secs(),
            "reconciled"
        );

        Ok(Reconciled {
            requeue_after: Some(requeue_after),
            phase: device.status.phase,
            position: matches!(probe, Probe::Observed).then_some(device.status.position),
            active_request: active.as_ref().map(MoveRequest::key),
            request_phase: active.as_ref().map(|r| r.status.phase),
            collected,
        })
    }

    fn report_unknown_type(&self, device: &mut DeviceRecord) {
        let supported = self.drivers.supported().join(", ");
        warn!(device_type = %device.spec.device_type, "unknown device type");
        set_condition(
            &mut device.status.conditions,
            Condition::new(
                REACHABLE,
                false,
                "UnknownDeviceType",
                format!(
                    "unknown device type {:?}, must be one of: [{supported}]",
                    device.spec.device_type
                ),
            )
            .with_generation(device.metadata.generation),
        );
        remove_condition(&mut device.status.conditions, AT_POSITION);
    }

    /// Read telemetry and mark the device reachable.
    async fn observe(&self, driver: &dyn DeviceDriver, device: &mut DeviceRecord) -> Result<Telemetry> {
        let telemetry = bounded(self.config.call_timeout(), "reading status", driver.status()).await?;
        set_condition(
            &mut device.status.conditions,
            Condition::new(REACHABLE, true, "Connected", "connected to device")
                .with_generation(device.metadata.generation),
        );
        apply_telemetry(device, &telemetry);
        Ok(telemetry)
    }

    /// Command `target` if the device isn't there yet, returning the
    /// freshest telemetry.
    async fn drive_towards(
        &self,
        driver: &dyn DeviceDriver,
        device: &mut DeviceRecord,
        telemetry: Telemetry,
        target: u8,
    ) -> Result<Telemetry> {
        if telemetry.current_pos == i32::from(target) {
            return Ok(telemetry);
        }
        debug!(from = telemetry.current_pos, to = target, "commanding to position");
        let telemetry = bounded(
            self.config.call_timeout(),
            "commanding to position",
            driver.move_to(target),
        )
        .await?;
        apply_telemetry(device, &telemetry);
        Ok(telemetry)
    }

    async fn converge_request(
        &self,
        driver: &dyn DeviceDriver,
        device: &mut DeviceRecord,
        request: Option<&mut MoveRequest>,
    ) -> Result<()> {
        let telemetry = self.observe(driver, device).await?;
        let Some(request) = request else {
            return Ok(());
        };

        let target = request.spec.position;
        let telemetry = self.drive_towards(driver, device, telemetry, target).await?;

        let completion = Completion::evaluate(&telemetry, target);
        set_condition(
            &mut request.status.conditions,
            Condition::new(
                COMPLETED,
                completion.is_reached(),
                completion.reason(),
                completion.message(),
            )
            .with_generation(request.metadata.generation),
        );
        request.status.phase = completion.request_phase();
        if let Completion::Halted { reason, .. } = completion {
            warn!(request = %request.key(), reason, "movement halted short of target");
        }
        Ok(())
    }

    async fn converge_direct(&self, driver: &dyn DeviceDriver, device: &mut DeviceRecord) -> Result<()> {
        let telemetry = self.observe(driver, device).await?;
        let Some(target) = device.spec.position else {
            remove_condition(&mut device.status.conditions, AT_POSITION);
            return Ok(());
        };

        let telemetry = self.drive_towards(driver, device, telemetry, target).await?;
        let completion = Completion::evaluate(&telemetry, target);
        set_condition(
            &mut device.status.conditions,
            Condition::new(
                AT_POSITION,
                completion.is_reached(),
                completion.reason(),
                completion.message(),
            )
            .with_generation(device.metadata.generation),
        );
        Ok(())
    }
}

fn apply_telemetry(device: &mut DeviceRecord, telemetry: &Telemetry) {
    device.status.phase = Some(DevicePhase::from_motion(telemetry.state));
    device.status.position = telemetry.current_pos.clamp(0, 100) as u8;
    device.status.power = telemetry.power as i64;
}
