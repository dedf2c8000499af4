//! Metadata Replication Orchestrator
//!
//! Converts table-configuration-changed events into replication
//! obligations, runs a fixed pool of workers that drain the shared retry
//! queue, and re-schedules failed pushes with a fixed delay.
//!
//! An obligation states a desired end state (server S holds transaction T
//! for table X), not an ordered instruction: replaying it any number of
//! times converges because the receiving peer keys its effects by
//! transaction id and config version. Superseded obligations are never
//! cancelled or deduplicated; a stale push is a no-op on the peer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use super::{PushOutcome, ReplicationConfig};
use crate::directory::{ConfigDirectory, TableDefinition};
use crate::error::{Error, Result};
use crate::metadata::{MetadataSnapshot, MetadataStore, TransactionId};
use crate::network::PeerTransport;
use crate::queue::DelayedQueue;

/// Attempt count after which a failing obligation is logged at error level
const STUCK_ATTEMPTS_THRESHOLD: u32 = 10;

/// One pending replication obligation
///
/// Transient: never persisted. After a restart, outstanding obligations are
/// regenerated from the directory's current table list.
#[derive(Clone)]
pub struct ReplicationJob {
    /// Namespace of the table
    pub namespace: String,
    /// Table identifier
    pub table_id: String,
    /// Transaction id of the snapshot to deliver
    pub transaction_id: TransactionId,
    /// Config version the snapshot was published at
    pub config_version: u64,
    /// Target server still needing this snapshot
    pub server: String,
    /// The snapshot itself, shared across all jobs derived from one event
    pub snapshot: Arc<MetadataSnapshot>,
    /// Delivery attempts so far
    pub attempts: u32,
}

impl ReplicationJob {
    /// Short description for logging
    fn describe(&self) -> String {
        format!(
            "{}/{} @ {} -> {}",
            self.namespace, self.table_id, self.transaction_id, self.server
        )
    }
}

/// Replication orchestrator
pub struct MetadataReplication {
    /// Cluster config directory
    directory: Arc<ConfigDirectory>,
    /// Local metadata store
    store: Arc<MetadataStore>,
    /// Transport to remote peers
    transport: Arc<dyn PeerTransport>,
    /// Name of the local server (excluded from push targets)
    server_name: String,
    /// Replication configuration
    config: ReplicationConfig,
    /// Running flag
    running: AtomicBool,
    /// Shared retry queue; replaced on every (re)start
    queue: std::sync::Mutex<Arc<DelayedQueue<ReplicationJob>>>,
    /// Worker and listener task handles
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    /// Shutdown signal for the event listener
    shutdown: tokio::sync::watch::Sender<bool>,
}

impl MetadataReplication {
    /// Create a new orchestrator
    pub fn new(
        directory: Arc<ConfigDirectory>,
        store: Arc<MetadataStore>,
        transport: Arc<dyn PeerTransport>,
        config: ReplicationConfig,
    ) -> Self {
        let server_name = store.server_name().to_string();
        let (shutdown, _) = tokio::sync::watch::channel(false);

        Self {
            directory,
            store,
            transport,
            server_name,
            config,
            running: AtomicBool::new(false),
            queue: std::sync::Mutex::new(Arc::new(DelayedQueue::new())),
            tasks: tokio::sync::Mutex::new(Vec::new()),
            shutdown,
        }
    }

    /// Start the worker pool and the config-change listener
    ///
    /// Idempotent: a second call while running is a no-op. Current table
    /// configurations are re-applied on start so obligations lost to a
    /// restart are regenerated.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }

        let queue = Arc::new(DelayedQueue::new());
        *self.queue.lock().unwrap() = Arc::clone(&queue);
        self.shutdown.send_replace(false);

        // Subscribe before spawning: an event published the moment start()
        // returns must not slip past the listener task's first poll
        let events = self.directory.subscribe();

        let mut tasks = self.tasks.lock().await;

        for worker_id in 0..self.config.num_workers {
            let this = Arc::clone(&self);
            let queue = Arc::clone(&queue);
            tasks.push(tokio::spawn(async move {
                this.worker_loop(worker_id, queue).await;
            }));
        }

        let this = Arc::clone(&self);
        tasks.push(tokio::spawn(async move {
            this.listen_loop(events).await;
        }));

        drop(tasks);

        tracing::info!(
            "Metadata replication started with {} workers",
            self.config.num_workers
        );

        // Regenerate obligations for everything the directory knows about
        for definition in self.directory.list_tables().await {
            if let Err(e) = self.apply_table_config_change(&definition).await {
                tracing::error!(
                    "Failed to derive obligations for {}: {}",
                    definition.qualified_name(),
                    e
                );
            }
        }

        Ok(())
    }

    /// Stop the orchestrator and wait for every worker to exit
    ///
    /// A job mid-push finishes or fails normally; nothing is dequeued after
    /// the stop request.
    pub async fn stop(&self) {
        if self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        // send_replace stores the value even with no receiver yet, so a
        // listener task that has not had its first poll still observes it
        self.shutdown.send_replace(true);
        self.queue.lock().unwrap().close();

        let handles: Vec<_> = self.tasks.lock().await.drain(..).collect();
        futures::future::join_all(handles).await;

        tracing::info!("Metadata replication stopped");
    }

    /// Check whether the orchestrator is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Derive and enqueue obligations for one table-config change
    ///
    /// One obligation per (target server, transaction id) pair that the
    /// local store does not already report satisfied. The pre-check is
    /// advisory: a false negative only costs one idempotent push, and the
    /// peer remains the authority on whether it needs the snapshot.
    pub async fn apply_table_config_change(&self, definition: &TableDefinition) -> Result<usize> {
        if definition.namespace.is_empty() || definition.table_id.is_empty() {
            return Err(Error::TableDefinition {
                table: definition.qualified_name(),
                reason: "namespace and table id must be non-empty".into(),
            });
        }

        let snapshot = Arc::clone(&definition.snapshot);
        let transaction_id = *snapshot.transaction_id();
        let mut enqueued = 0;

        for server in snapshot.target_servers() {
            if server == self.server_name {
                // The local copy is written directly, no push needed. A
                // store error must not abort the loop: the remaining
                // servers still get their obligations
                if let Err(e) = self
                    .store
                    .apply_snapshot(
                        &definition.namespace,
                        &definition.table_id,
                        definition.version,
                        &snapshot,
                    )
                    .await
                {
                    tracing::warn!(
                        "Failed to apply {} locally: {}",
                        definition.qualified_name(),
                        e
                    );
                }
                continue;
            }

            let satisfied = self
                .store
                .server_has_transaction(
                    &definition.namespace,
                    &definition.table_id,
                    &server,
                    &transaction_id,
                )
                .await;

            if satisfied {
                tracing::debug!(
                    "Skipping {}: {} already holds {}",
                    definition.qualified_name(),
                    server,
                    transaction_id
                );
                continue;
            }

            let job = ReplicationJob {
                namespace: definition.namespace.clone(),
                table_id: definition.table_id.clone(),
                transaction_id,
                config_version: definition.version,
                server,
                snapshot: Arc::clone(&snapshot),
                attempts: 0,
            };

            self.queue.lock().unwrap().insert(job);
            enqueued += 1;
        }

        tracing::info!(
            "Derived {} obligation(s) for {} at {}",
            enqueued,
            definition.qualified_name(),
            transaction_id
        );

        Ok(enqueued)
    }

    /// Worker loop: drain the retry queue until shutdown
    async fn worker_loop(&self, worker_id: usize, queue: Arc<DelayedQueue<ReplicationJob>>) {
        tracing::debug!("Replication worker {} started", worker_id);

        while let Some(job) = queue.pop().await {
            if !self.is_running() {
                break;
            }
            self.replicate_with_retries(job, &queue).await;
        }

        tracing::debug!("Replication worker {} stopped", worker_id);
    }

    /// One delivery attempt; failures are re-enqueued with the retry delay
    ///
    /// This must never propagate an error: a worker stays alive no matter
    /// how a job fails.
    async fn replicate_with_retries(
        &self,
        mut job: ReplicationJob,
        queue: &DelayedQueue<ReplicationJob>,
    ) {
        job.attempts += 1;

        match self.replicate(&job).await {
            Ok(PushOutcome::Applied) => {
                tracing::info!("Replicated {} (attempt {})", job.describe(), job.attempts);

                // Remember the satisfied pair so later config changes can
                // skip it; best-effort only
                if let Err(e) = self
                    .store
                    .record_server_head(
                        &job.namespace,
                        &job.table_id,
                        &job.server,
                        &job.transaction_id,
                    )
                    .await
                {
                    tracing::warn!("Failed to record server head for {}: {}", job.server, e);
                }
            }
            Ok(PushOutcome::AlreadyCurrent) => {
                // Terminal for this obligation, but the peer may hold a
                // NEWER map rather than this exact id, so the advisory
                // cache must not claim this (server, id) pair is satisfied
                tracing::info!(
                    "Peer already current for {} (attempt {})",
                    job.describe(),
                    job.attempts
                );
            }
            Ok(PushOutcome::Rejected { reason }) => {
                self.reschedule(job, queue, &format!("rejected: {}", reason));
            }
            Err(e) => {
                self.reschedule(job, queue, &e.to_string());
            }
        }
    }

    /// Perform a single push attempt through the peer transport
    async fn replicate(&self, job: &ReplicationJob) -> Result<PushOutcome> {
        self.transport
            .push_snapshot(
                &job.server,
                &job.namespace,
                &job.table_id,
                job.config_version,
                &job.snapshot,
            )
            .await
    }

    /// Re-enqueue a failed job with the fixed retry delay
    fn reschedule(&self, job: ReplicationJob, queue: &DelayedQueue<ReplicationJob>, cause: &str) {
        if job.attempts >= STUCK_ATTEMPTS_THRESHOLD {
            tracing::error!(
                "Obligation {} still failing after {} attempts: {}",
                job.describe(),
                job.attempts,
                cause
            );
        } else {
            tracing::warn!(
                "Replication of {} failed (attempt {}): {}, retrying in {:?}",
                job.describe(),
                job.attempts,
                cause,
                self.config.retry_delay
            );
        }

        queue.insert_delayed(job, self.config.retry_delay);
    }

    /// Listen for table-config-changed events until shutdown
    async fn listen_loop(
        &self,
        mut events: tokio::sync::broadcast::Receiver<TableDefinition>,
    ) {
        let mut shutdown_rx = self.shutdown.subscribe();

        // stop() may already have been signalled before this task first ran
        if *shutdown_rx.borrow_and_update() {
            return;
        }

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                event = events.recv() => {
                    match event {
                        Ok(definition) => {
                            // A bad definition only affects its own table
                            if let Err(e) = self.apply_table_config_change(&definition).await {
                                tracing::error!(
                                    "Skipping config change for {}: {}",
                                    definition.qualified_name(),
                                    e
                                );
                            }
                        }
                        Err(RecvError::Lagged(missed)) => {
                            tracing::warn!(
                                "Config event stream lagged by {} events, re-reading all tables",
                                missed
                            );
                            for definition in self.directory.list_tables().await {
                                if let Err(e) = self.apply_table_config_change(&definition).await {
                                    tracing::error!(
                                        "Failed to re-derive obligations for {}: {}",
                                        definition.qualified_name(),
                                        e
                                    );
                                }
                            }
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        }
    }
}
