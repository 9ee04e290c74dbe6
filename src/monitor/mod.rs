//! The monitoring engine: per-target check loops and their supervisor.

mod status;

pub use status::{classify, Status};

use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::alert::AlertClient;
use crate::db::{CheckSample, Store, Target};
use crate::incident::{IncidentKind, IncidentManager};
use crate::probe;
use crate::util::short_id;

/// Supervises one check loop per enabled target. All loops share a single
/// broadcast stop signal; `shutdown` closes it and joins every loop before
/// returning, so the store outlives all writers.
pub struct Engine {
    store: Arc<Store>,
    incidents: Arc<IncidentManager>,
    targets: Vec<Target>,
    stop: broadcast::Sender<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    pub fn new(store: Arc<Store>, alert: Arc<AlertClient>, targets: Vec<Target>) -> Self {
        let (stop, _) = broadcast::channel(1);
        Self {
            incidents: Arc::new(IncidentManager::new(store.clone(), alert)),
            store,
            targets,
            stop,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the check loops. Non-blocking.
    pub fn start(&self) {
        let mut handles = self.handles.lock().unwrap();

        for target in &self.targets {
            if !target.enabled {
                tracing::info!("{} - skipped because disabled", target.url);
                continue;
            }

            let store = self.store.clone();
            let incidents = self.incidents.clone();
            let stop_rx = self.stop.subscribe();
            let target = target.clone();

            handles.push(tokio::spawn(run_target_loop(target, store, incidents, stop_rx)));
        }

        tracing::info!("uptime monitoring started for {} targets", handles.len());
    }

    /// A receiver on the shared stop signal, for collaborators that want to
    /// shut down alongside the engine.
    pub fn stop_signal(&self) -> broadcast::Receiver<()> {
        self.stop.subscribe()
    }

    /// Signal every loop to stop and wait until all of them have returned.
    pub async fn shutdown(&self) {
        let _ = self.stop.send(());

        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock().unwrap());
        for handle in handles {
            let _ = handle.await;
        }

        tracing::info!("uptime monitoring stopped");
    }
}

/// Own one target until the stop signal fires. The first check runs
/// immediately so startup health is observable; afterwards the cadence is
/// the retry interval while pending and the regular interval otherwise.
async fn run_target_loop(
    mut target: Target,
    store: Arc<Store>,
    incidents: Arc<IncidentManager>,
    mut stop_rx: broadcast::Receiver<()>,
) {
    loop {
        let status = check_target(&mut target, &store, &incidents).await;

        let delay = match status {
            Status::Pending => target.retry_interval,
            Status::Up | Status::Down => target.interval,
        };

        tokio::select! {
            _ = stop_rx.recv() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// One probe cycle: probe, classify, apply incident side effects, then
/// commit the observed state and a history sample.
pub(crate) async fn check_target(
    target: &mut Target,
    store: &Store,
    incidents: &IncidentManager,
) -> Status {
    let result = probe::check(target).await;

    let (status, new_retries) = classify(result.raw_up, target.is_up, target.retries, target.max_retries);
    target.retries = new_retries;

    match status {
        Status::Up => {
            target.retries = 0;
            if target.last_up.is_none() {
                target.last_up = Some(Utc::now());
            }
            incidents.resolve_open(target, IncidentKind::UnexpectedStatus).await;
            incidents.resolve_open(target, IncidentKind::Timeout).await;
            if target.certificate_monitoring {
                incidents.on_certificate(target, &result).await;
            }
            tracing::info!(
                "{} - UP - response time: {}ms - status: {}",
                target.url,
                result.response_time.as_millis(),
                result.status_code
            );
        }
        Status::Pending => {
            tracing::warn!(
                "{} - PENDING - retry {}/{} - status: {}",
                target.url,
                target.retries,
                target.max_retries,
                result.status_code
            );
        }
        Status::Down => {
            // Zeroed so the next failure cycle rebuilds the retry budget.
            target.retries = 0;
            incidents.on_down(target, &result).await;
            tracing::error!(
                "{} - DOWN - status: {} - {}",
                target.url,
                result.status_code,
                result.error.as_ref().map(|e| e.message.as_str()).unwrap_or_default()
            );
        }
    }

    let now = Utc::now();
    target.is_up = Some(result.raw_up);
    target.status_code = Some(result.status_code);
    target.response_time_ms = Some(result.response_time.as_millis() as i64);
    target.certificate_expired_date = result.cert_not_after;
    target.updated_at = now;

    let sample = CheckSample {
        id: short_id(),
        target_id: target.id.clone(),
        is_up: result.raw_up,
        status_code: result.status_code,
        response_time_ms: result.response_time.as_millis() as i64,
        created_at: now,
    };

    if let Err(e) = store.append_sample(&sample) {
        tracing::error!("{} - failed to save check sample: {}", target.url, e);
    }
    if let Err(e) = store.update_target_state(target) {
        tracing::error!("{} - failed to save target state: {}", target.url, e);
    }

    status
}
