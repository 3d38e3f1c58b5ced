use crate::error::Result;
use crate::queue::WorkQueue;
use crate::reconciler::{Directive, Reconciler, DEFAULT_RETRY_DELAY};
use crate::store::CsrStore;
use csrsign_core::csr::{csr_gvk, csr_key};
use csrsign_core::{ResourceEvent, ResourceKey, WatchEventType};
use csrsign_signer::Signer;
use csrsign_storage::ResourceStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Configuration for the CSR controller
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Only CSRs with this spec.signerName are processed
    pub signer_name: String,
    /// Number of concurrent reconcile workers
    pub workers: usize,
    /// Requeue delay while the CA reports issuance as pending
    pub retry_delay: Duration,
    /// Periodic full resync, if any
    pub resync_interval: Option<Duration>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            signer_name: "example.com/foo".to_string(),
            workers: 2,
            retry_delay: DEFAULT_RETRY_DELAY,
            resync_interval: None,
        }
    }
}

/// Watches CertificateSigningRequests and feeds them to the reconciler
pub struct CsrController {
    store: ResourceStore,
    reconciler: Arc<Reconciler>,
    queue: WorkQueue<ResourceKey>,
    config: ControllerConfig,
}

impl CsrController {
    pub fn new(store: ResourceStore, signer: Arc<dyn Signer>, config: ControllerConfig) -> Self {
        let reconciler = Reconciler::new(
            Arc::new(store.clone()),
            signer,
            config.signer_name.clone(),
            config.retry_delay,
        );

        Self {
            store,
            reconciler: Arc::new(reconciler),
            queue: WorkQueue::new(),
            config,
        }
    }

    /// Run until the token is cancelled
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        info!(
            signer_name = %self.config.signer_name,
            workers = self.config.workers,
            retry_delay = ?self.config.retry_delay,
            "Starting CSR controller"
        );

        // Subscribe before listing so nothing written in between is missed
        let mut events = self.store.subscribe();
        self.enqueue_all().await?;

        let mut workers = JoinSet::new();
        for id in 0..self.config.workers.max(1) {
            let reconciler = Arc::clone(&self.reconciler);
            let queue = self.queue.clone();
            workers.spawn(worker(id, reconciler, queue));
        }

        let mut resync = self.config.resync_interval.map(|period| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval
        });
        if let Some(interval) = resync.as_mut() {
            // Startup already enqueued everything
            interval.tick().await;
        }

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("CSR controller shutting down");
                    break;
                }
                event = events.recv() => match event {
                    Ok(event) => self.handle_event(event).await,
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Event stream lagged, resyncing all CSRs");
                        if let Err(e) = self.enqueue_all().await {
                            error!("Resync failed: {}", e);
                        }
                    }
                    Err(RecvError::Closed) => {
                        warn!("Event stream closed, stopping controller");
                        break;
                    }
                },
                _ = tick(resync.as_mut()) => {
                    debug!("Periodic resync");
                    if let Err(e) = self.enqueue_all().await {
                        error!("Resync failed: {}", e);
                    }
                }
            }
        }

        self.queue.shutdown().await;
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("Reconcile worker panicked: {}", e);
            }
        }

        Ok(())
    }

    async fn handle_event(&self, event: ResourceEvent) {
        if event.gvk != csr_gvk() {
            return;
        }

        match event.event_type {
            WatchEventType::Added | WatchEventType::Modified => {
                debug!(csr = %event.resource_key, event = ?event.event_type, "Queueing CSR");
                self.queue.add(event.resource_key).await;
            }
            WatchEventType::Deleted | WatchEventType::Error => {}
        }
    }

    /// Queue every stored CSR
    async fn enqueue_all(&self) -> Result<()> {
        let csrs = CsrStore::list(&self.store).await?;
        debug!(count = csrs.len(), "Queueing all CSRs");

        for csr in csrs {
            if let Some(name) = csr.metadata.name {
                self.queue.add(csr_key(name)).await;
            }
        }

        Ok(())
    }
}

/// Resolves on the next resync tick, or never when resync is off
async fn tick(interval: Option<&mut tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn worker(id: usize, reconciler: Arc<Reconciler>, queue: WorkQueue<ResourceKey>) {
    debug!(worker = id, "Reconcile worker started");

    while let Some(key) = queue.get().await {
        match reconciler.reconcile(&key).await {
            Ok(outcome) => {
                queue.forget(&key).await;
                debug!(
                    csr = %key,
                    state = ?outcome.state,
                    mutation = ?outcome.mutation,
                    "Reconciled CSR"
                );
                if let Directive::RequeueAfter(delay) = outcome.directive {
                    queue.add_after(key.clone(), delay);
                }
            }
            Err(e) => {
                let retry_in = queue.add_rate_limited(key.clone()).await;
                error!(csr = %key, retry_in = ?retry_in, "Reconcile failed: {}", e);
            }
        }
        queue.done(&key).await;
    }

    debug!(worker = id, "Reconcile worker stopped");
}
