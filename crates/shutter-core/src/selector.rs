//! Active-request selection and completed-request garbage collection.
//!
//! # Retention policy
//!
//! Per device, the `limit` most recently completed requests are kept and
//! every older completed request is deleted. "Most recent" is the
//! `lastTransitionTime` of the request's `Completed` condition, falling back
//! to creation time and then name, so the outcome never depends on the order
//! the store happens to list records in. Non-terminal requests are never
//! deleted.

use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::condition::{find_condition, COMPLETED};
use crate::deadline::bounded;
use crate::error::Result;
use crate::meta::ObjectKey;
use crate::store::Store;
use crate::types::MoveRequest;

/// The request that should drive `device` in this pass: the earliest-created
/// non-terminal request targeting it, ties broken by name.
pub fn select_active<'a>(requests: &'a [MoveRequest], device: &ObjectKey) -> Option<&'a MoveRequest> {
    requests
        .iter()
        .filter(|r| r.targets(device) && !r.is_completed())
        .min_by(|a, b| {
            (a.metadata.creation_timestamp, &a.metadata.name)
                .cmp(&(b.metadata.creation_timestamp, &b.metadata.name))
        })
}

fn completed_at(request: &MoveRequest) -> DateTime<Utc> {
    find_condition(&request.status.conditions, COMPLETED)
        .map(|c| c.last_transition_time)
        .unwrap_or(request.metadata.creation_timestamp)
}

/// Keys of completed requests that exceed the per-device retention `limit`.
/// A limit of 0 disables collection.
pub fn plan_garbage_collection(requests: &[MoveRequest], limit: usize) -> Vec<ObjectKey> {
    if limit == 0 {
        return Vec::new();
    }

    let mut by_device: BTreeMap<ObjectKey, Vec<&MoveRequest>> = BTreeMap::new();
    for request in requests.iter().filter(|r| r.is_completed()) {
        by_device.entry(request.device_key()).or_default().push(request);
    }

    let mut doomed = Vec::new();
    for (_, mut completed) in by_device {
        if completed.len() <= limit {
            continue;
        }
        // newest first
        completed.sort_by_key(|r| {
            Reverse((
                completed_at(r),
                r.metadata.creation_timestamp,
                r.metadata.name.clone(),
            ))
        });
        doomed.extend(completed.into_iter().skip(limit).map(MoveRequest::key));
    }
    doomed
}

/// Delete the planned requests. Already-deleted requests are not an error.
pub async fn collect_garbage(
    store: &dyn Store,
    requests: &[MoveRequest],
    limit: usize,
    call_timeout: Duration,
) -> Result<Vec<ObjectKey>> {
    let doomed = plan_garbage_collection(requests, limit);
    let mut deleted = Vec::with_capacity(doomed.len());
    for key in doomed {
        let op = format!("garbage collecting RollerShutterRequest {key}");
        if bounded(call_timeout, &op, store.delete_request(&key)).await? {
            tracing::debug!(request = %key, "garbage collected completed request");
            deleted.push(key);
        }
    }
    Ok(deleted)
}

// ---------------------------------------------------------------------------
// Collector
// ---------------------------------------------------------------------------

/// Standalone garbage-collection pass over every request in a namespace (or
/// in all namespaces), independent of any device's reconciliation.
#[derive(Clone)]
pub struct Collector {
    store: Arc<dyn Store>,
    limit: usize,
    call_timeout: Duration,
}

impl Collector {
    pub fn new(store: Arc<dyn Store>, limit: usize, call_timeout: Duration) -> Self {
        Self {
            store,
            limit,
            call_timeout,
        }
    }

    pub async fn collect(&self, namespace: Option<&str>) -> Result<Vec<ObjectKey>> {
        let requests = bounded(
            self.call_timeout,
            "listing RollerShutterRequests",
            self.store.list_requests(namespace),
        )
        .await?;
        let deleted =
            collect_garbage(self.store.as_ref(), &requests, self.limit, self.call_timeout).await?;
        if !deleted.is_empty() {
            tracing::info!(count = deleted.len(), "garbage collected completed requests");
        }
        Ok(deleted)
    }
}
