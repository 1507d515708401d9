use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Notify;
use tracing::{info, warn};

use o2ims_store::{ObjectKind, StoreEvent};
use o2ims_template::revalidate;

use crate::context::Context;
use crate::enqueue::map_event;
use crate::error::ReconcileError;
use crate::outcome::MEDIUM_INTERVAL;
use crate::phase::reconcile_request;

/// Deduplicating work queue with per-request serialization.
///
/// A request is never reconciled concurrently with itself: enqueues landing
/// while it is active are folded into one re-run after the active pass
/// finishes. Distinct requests run in parallel across the worker pool.
#[derive(Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<String>,
    queued: HashSet<String>,
    active: HashSet<String>,
    rerun: HashSet<String>,
}

impl WorkQueue {
    pub fn enqueue(&self, key: &str) {
        let mut state = self.state.lock().unwrap();
        if state.active.contains(key) {
            state.rerun.insert(key.to_string());
            return;
        }
        if state.queued.insert(key.to_string()) {
            state.pending.push_back(key.to_string());
            drop(state);
            self.notify.notify_one();
        }
    }

    pub async fn next(&self) -> String {
        loop {
            let notified = self.notify.notified();
            if let Some(key) = self.try_claim() {
                return key;
            }
            notified.await;
        }
    }

    fn try_claim(&self) -> Option<String> {
        let mut state = self.state.lock().unwrap();
        let key = state.pending.pop_front()?;
        state.queued.remove(&key);
        state.active.insert(key.clone());
        Some(key)
    }

    pub fn done(&self, key: &str) {
        let mut state = self.state.lock().unwrap();
        state.active.remove(key);
        if state.rerun.remove(key) && state.queued.insert(key.to_string()) {
            state.pending.push_back(key.to_string());
            drop(state);
            self.notify.notify_one();
        }
    }
}

/// Runs the control loop: watches the store, fans events into the work
/// queue, and reconciles requests on a shared worker pool.
pub struct ReconcileManager {
    ctx: Context,
    queue: Arc<WorkQueue>,
    workers: usize,
}

impl ReconcileManager {
    pub fn new(ctx: Context) -> Self {
        Self { ctx, queue: Arc::new(WorkQueue::default()), workers: 2 }
    }

    /// Process events until the store's watch feed closes.
    pub async fn run(self: Arc<Self>) -> Result<(), ReconcileError> {
        let mut events = self.ctx.store.watch();

        for _ in 0..self.workers {
            let ctx = self.ctx.clone();
            let queue = self.queue.clone();
            tokio::spawn(run_worker(ctx, queue));
        }

        self.resync().await?;
        info!(workers = self.workers, "reconcile manager started");

        loop {
            match events.recv().await {
                Ok(event) => self.handle_event(event).await,
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "watch feed lagged; resyncing all requests");
                    if let Err(e) = self.resync().await {
                        warn!(error = %e, "resync failed");
                    }
                }
                Err(RecvError::Closed) => return Ok(()),
            }
        }
    }

    /// Revalidate every template and enqueue every request. Used at startup
    /// and after a lagged watch feed.
    async fn resync(&self) -> Result<(), ReconcileError> {
        for template in self.ctx.store.list_cluster_templates().await? {
            if let Err(e) = revalidate(
                self.ctx.store.as_ref(),
                &template.metadata.namespace,
                &template.metadata.name,
            )
            .await
            {
                warn!(template = %template.metadata.name, error = %e, "template revalidation failed");
            }
        }
        for request in self.ctx.store.list_provisioning_requests().await? {
            self.queue.enqueue(&request.metadata.name);
        }
        Ok(())
    }

    async fn handle_event(&self, event: StoreEvent) {
        // Template data edits re-run template validation before any request
        // sees them.
        match event.kind {
            ObjectKind::ClusterTemplate if event.spec_changed => {
                if let Err(e) =
                    revalidate(self.ctx.store.as_ref(), &event.namespace, &event.name).await
                {
                    warn!(template = %event.name, error = %e, "template revalidation failed");
                }
            }
            ObjectKind::ConfigMap if event.spec_changed => {
                match self.ctx.store.list_cluster_templates().await {
                    Ok(templates) => {
                        for template in templates
                            .iter()
                            .filter(|t| t.metadata.namespace == event.namespace)
                        {
                            if let Err(e) = revalidate(
                                self.ctx.store.as_ref(),
                                &template.metadata.namespace,
                                &template.metadata.name,
                            )
                            .await
                            {
                                warn!(template = %template.metadata.name, error = %e,
                                      "template revalidation failed");
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "template listing failed"),
                }
            }
            _ => {}
        }

        match map_event(self.ctx.store.as_ref(), &event).await {
            Ok(keys) => {
                for key in keys {
                    self.queue.enqueue(&key);
                }
            }
            Err(e) => warn!(error = %e, "event mapping failed"),
        }
    }
}

async fn run_worker(ctx: Context, queue: Arc<WorkQueue>) {
    loop {
        let key = queue.next().await;
        match reconcile_request(&ctx, &key).await {
            Ok(action) => {
                if let Some(delay) = action.requeue_after {
                    schedule(queue.clone(), key.clone(), delay);
                }
            }
            Err(e) => {
                warn!(request = %key, error = %e, "reconcile failed; backing off");
                schedule(queue.clone(), key.clone(), MEDIUM_INTERVAL);
            }
        }
        queue.done(&key);
    }
}

fn schedule(queue: Arc<WorkQueue>, key: String, delay: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        queue.enqueue(&key);
    });
}
