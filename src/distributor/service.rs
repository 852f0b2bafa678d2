//! The distributor: a pool of listener tasks in front of the routing table.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{info, warn, Instrument};

use crate::config::DistributorConfig;
use crate::distributor::dispatch::{DispatchError, Dispatcher};
use crate::lifecycle::{Shutdown, ShutdownSignal};
use crate::net::{Handler, HandlerError};
use crate::protocol::Message;
use crate::routing::{compile_targets, ConfigError, RoutingTable, TableSnapshot, TargetConfig};

/// A submitted message and the channel its result goes back on.
struct DispatchTask {
    message: Message,
    result: oneshot::Sender<Result<(), DispatchError>>,
}

/// A compiled table waiting to be installed.
struct TableUpdate {
    targets: Vec<crate::routing::Target>,
    applied: oneshot::Sender<()>,
}

type Shared<T> = Arc<Mutex<mpsc::Receiver<T>>>;

/// Fans decoded messages out to the HTTP backends whose IMEI pattern matches.
///
/// `workers` listener tasks share two rendezvous channels: one for table
/// updates, one for submitted messages. Each picked-up message is dispatched
/// on its own task against the table active at pickup time, so a slow
/// backend never blocks pickup of the next message.
///
/// Must be created inside a Tokio runtime.
pub struct Distributor {
    table: Arc<RoutingTable>,
    intake: mpsc::Sender<DispatchTask>,
    updates: mpsc::Sender<TableUpdate>,
    // Held so submissions after `close` park instead of failing.
    _parked: Shared<DispatchTask>,
    shutdown: Shutdown,
    closed: AtomicBool,
}

impl Distributor {
    pub fn new(config: &DistributorConfig) -> Self {
        let (intake, intake_rx) = mpsc::channel(1);
        let (updates, updates_rx) = mpsc::channel(1);
        let intake_rx: Shared<DispatchTask> = Arc::new(Mutex::new(intake_rx));
        let updates_rx: Shared<TableUpdate> = Arc::new(Mutex::new(updates_rx));

        let table = Arc::new(RoutingTable::new());
        let dispatcher = Dispatcher::new(config.policy, config.max_in_flight);
        let shutdown = Shutdown::new();

        let workers = config.workers.max(1);
        for worker in 0..workers {
            tokio::spawn(listen(
                worker,
                table.clone(),
                dispatcher.clone(),
                intake_rx.clone(),
                updates_rx.clone(),
                shutdown.subscribe(),
            ));
        }
        info!(
            workers,
            max_in_flight = config.max_in_flight,
            policy = ?config.policy,
            "Distributor started"
        );

        Self {
            table,
            intake,
            updates,
            _parked: intake_rx,
            shutdown,
            closed: AtomicBool::new(false),
        }
    }

    /// Replace the whole routing table.
    ///
    /// Every pattern is compiled first; on error nothing changes. On success
    /// the new table is active before this returns.
    pub async fn set_targets(&self, candidates: Vec<TargetConfig>) -> Result<(), ConfigError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ConfigError::Closed);
        }
        let targets = compile_targets(candidates)?;

        let (applied, wait_applied) = oneshot::channel();
        self.updates
            .send(TableUpdate { targets, applied })
            .await
            .map_err(|_| ConfigError::Closed)?;
        wait_applied.await.map_err(|_| ConfigError::Closed)
    }

    /// The active table.
    pub fn targets(&self) -> TableSnapshot {
        self.table.snapshot()
    }

    /// Configuration records of the active table, in order.
    pub fn target_configs(&self) -> Vec<TargetConfig> {
        self.table.snapshot().iter().map(|t| t.config().clone()).collect()
    }

    /// Submit `message` and wait for the outcome of its dispatch.
    ///
    /// After [`close`](Self::close) the submission is never picked up and
    /// this future does not resolve; callers bound it with their own
    /// deadline.
    pub async fn handle(&self, message: &Message) -> Result<(), DispatchError> {
        let (result, outcome) = oneshot::channel();
        let task = DispatchTask {
            message: message.clone(),
            result,
        };
        if self.intake.send(task).await.is_err() {
            return Err(DispatchError::Lost);
        }
        outcome.await.unwrap_or(Err(DispatchError::Lost))
    }

    /// Stop every listener task. Dispatches already running finish on their own.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            warn!("Distributor already closed");
            return;
        }
        info!("Closing distributor");
        self.shutdown.trigger();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Handler for Distributor {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        Distributor::handle(self, message).await.map_err(Into::into)
    }
}

async fn recv<T>(receiver: &Mutex<mpsc::Receiver<T>>) -> Option<T> {
    receiver.lock().await.recv().await
}

async fn listen(
    worker: usize,
    table: Arc<RoutingTable>,
    dispatcher: Dispatcher,
    intake: Shared<DispatchTask>,
    updates: Shared<TableUpdate>,
    mut shutdown: ShutdownSignal,
) {
    info!(worker, "Start distributor listener");
    loop {
        tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            Some(update) = recv(&updates) => {
                info!(worker, targets = update.targets.len(), "Set routing table");
                table.replace(update.targets);
                let _ = update.applied.send(());
            }
            Some(task) = recv(&intake) => {
                let targets = table.snapshot();
                let dispatcher = dispatcher.clone();
                let span = tracing::info_span!(
                    "dispatch",
                    worker,
                    imei = %task.message.identifier(),
                );
                tokio::spawn(
                    async move {
                        let outcome = dispatcher.dispatch(&task.message, &targets).await;
                        let _ = task.result.send(outcome);
                    }
                    .instrument(span),
                );
            }
            else => break,
        }
    }
    info!(worker, "Distributor listener stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributor::DispatchPolicy;
    use std::time::Duration;

    fn config(workers: usize) -> DistributorConfig {
        DistributorConfig {
            workers,
            max_in_flight: 0,
            policy: DispatchPolicy::FirstFailure,
        }
    }

    #[tokio::test]
    async fn set_targets_is_visible_immediately() {
        let distributor = Distributor::new(&config(2));
        distributor
            .set_targets(vec![
                TargetConfig::new("a", "^300", "http://127.0.0.1:9/a"),
                TargetConfig::new("b", ".*", "http://127.0.0.1:9/b"),
            ])
            .await
            .unwrap();

        let ids: Vec<_> = distributor.target_configs().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn invalid_table_leaves_previous() {
        let distributor = Distributor::new(&config(1));
        distributor
            .set_targets(vec![TargetConfig::new("a", "^300", "http://127.0.0.1:9/")])
            .await
            .unwrap();

        let err = distributor
            .set_targets(vec![
                TargetConfig::new("b", ".*", "http://127.0.0.1:9/"),
                TargetConfig::new("c", "(", "http://127.0.0.1:9/"),
            ])
            .await
            .unwrap_err();

        assert!(err.to_string().contains("\"(\""));
        assert_eq!(distributor.targets().len(), 1);
        assert_eq!(distributor.targets()[0].id(), "a");
    }

    #[tokio::test]
    async fn empty_table_accepts_everything() {
        let distributor = Distributor::new(&config(1));
        let message = Message::new();
        tokio::time::timeout(Duration::from_secs(1), distributor.handle(&message))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn handle_after_close_never_resolves() {
        let distributor = Distributor::new(&config(3));
        distributor.close();
        distributor.close();
        assert!(distributor.is_closed());

        let message = Message::new();
        let outcome = tokio::time::timeout(Duration::from_millis(200), distributor.handle(&message)).await;
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn set_targets_after_close_fails() {
        let distributor = Distributor::new(&config(1));
        distributor.close();
        let err = distributor
            .set_targets(vec![TargetConfig::new("a", ".*", "http://127.0.0.1:9/")])
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Closed));
    }
}
