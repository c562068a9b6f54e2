//! Leader-side replication
//!
//! Committed writes are handed off without waiting and forwarded, in order,
//! into a bounded intake queue. A single broadcaster task
//! copies each one into the inbox of every replica worker, and each worker
//! pushes its inbox to one follower with a plain client PUT.
//!
//! Replication is best-effort: a failed remote put is logged and dropped, and
//! nothing is reported back to the write path. A full inbox blocks the
//! broadcaster, which stalls delivery to every follower until it drains.

use crate::client::Client;
use crate::error::{DistKvError, Result};
use crate::store::Entry;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Capacity of the intake queue and of every worker inbox
pub const QUEUE_DEPTH: usize = 10;

type Inbox = mpsc::Sender<Arc<Entry>>;

/// Owns the hand-off queue, the broadcaster and the replica workers of a leader
pub struct Replicator {
    handoff: Mutex<Option<mpsc::UnboundedSender<Arc<Entry>>>>,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
    workers: Mutex<Vec<(String, oneshot::Receiver<()>)>>,
}

impl Replicator {
    /// Spawn one worker per follower address, the broadcaster and the
    /// forwarder feeding it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(followers: &[String]) -> Self {
        let mut inboxes = Vec::with_capacity(followers.len());
        let mut workers = Vec::with_capacity(followers.len());

        for follower in followers {
            let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
            let (worker, done) = ReplicaWorker::new(follower.clone(), rx);
            tokio::spawn(worker.run());
            inboxes.push((follower.clone(), tx));
            workers.push((follower.clone(), done));
        }

        let (handoff, handoff_rx) = mpsc::unbounded_channel();
        let (intake, intake_rx) = mpsc::channel(QUEUE_DEPTH);
        let forwarder = tokio::spawn(forward(handoff_rx, intake));
        let broadcaster = tokio::spawn(broadcast(intake_rx, inboxes));
        info!(followers = followers.len(), "Replication started");

        Self {
            handoff: Mutex::new(Some(handoff)),
            tasks: Mutex::new(vec![("forwarder", forwarder), ("broadcaster", broadcaster)]),
            workers: Mutex::new(workers),
        }
    }

    /// Hand a committed entry over for replication.
    ///
    /// Never waits on queue space or followers; entries keep their hand-off
    /// order. Fails once the replicator has been closed.
    pub async fn submit(&self, entry: Entry) -> Result<()> {
        let handoff = self.handoff.lock().await;
        let handoff = handoff
            .as_ref()
            .ok_or_else(|| DistKvError::Replication("replication is closed".to_string()))?;

        handoff
            .send(Arc::new(entry))
            .map_err(|_| DistKvError::Replication("forwarder has stopped".to_string()))
    }

    /// Close the hand-off queue and wait until every handed-off entry has
    /// passed through the broadcaster and every worker has drained its inbox
    /// and stopped. Returns how many workers signalled completion.
    ///
    /// Later calls return immediately with zero.
    pub async fn close(&self) -> usize {
        drop(self.handoff.lock().await.take());

        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for (name, task) in tasks {
            if let Err(e) = task.await {
                error!(task = name, error = %e, "Replication task failed");
            }
        }

        let workers = std::mem::take(&mut *self.workers.lock().await);
        let mut stopped = 0;
        for (follower, done) in workers {
            match done.await {
                Ok(()) => {
                    debug!(%follower, "Replica worker stopped");
                    stopped += 1;
                }
                Err(_) => error!(%follower, "Replica worker exited without signalling"),
            }
        }

        info!(workers = stopped, "Replication closed");
        stopped
    }
}

/// Move handed-off entries into the bounded intake queue, in order. This is
/// the only place that waits on intake space, so a stalled follower backs up
/// here instead of on the write path.
async fn forward(
    mut handoff: mpsc::UnboundedReceiver<Arc<Entry>>,
    intake: mpsc::Sender<Arc<Entry>>,
) {
    while let Some(entry) = handoff.recv().await {
        if intake.send(entry).await.is_err() {
            warn!("Broadcaster stopped, entry not replicated");
        }
    }
    debug!("Forwarder stopped");
}

/// Fan every entry from `intake` out to all inboxes, in arrival order.
async fn broadcast(mut intake: mpsc::Receiver<Arc<Entry>>, inboxes: Vec<(String, Inbox)>) {
    while let Some(entry) = intake.recv().await {
        for (follower, inbox) in &inboxes {
            if inbox.send(Arc::clone(&entry)).await.is_err() {
                warn!(%follower, "Replica inbox closed, entry not delivered");
            }
        }
    }
    debug!("Broadcaster stopped");
}

/// Pushes queued entries to a single follower
pub struct ReplicaWorker {
    follower: String,
    inbox: mpsc::Receiver<Arc<Entry>>,
    client: Option<Client>,
    done: oneshot::Sender<()>,
}

impl ReplicaWorker {
    /// Create a worker for `follower` and the receiver of its completion
    /// signal. The signal fires once, after the inbox is closed and drained.
    pub fn new(
        follower: String,
        inbox: mpsc::Receiver<Arc<Entry>>,
    ) -> (Self, oneshot::Receiver<()>) {
        let (done, done_rx) = oneshot::channel();
        let worker = Self {
            follower,
            inbox,
            client: None,
            done,
        };
        (worker, done_rx)
    }

    pub async fn run(mut self) {
        while let Some(entry) = self.inbox.recv().await {
            match self.replicate(&entry).await {
                Ok(()) => debug!(follower = %self.follower, key_len = entry.key.len(), "Replicated entry"),
                Err(e) => {
                    warn!(
                        follower = %self.follower,
                        key = %String::from_utf8_lossy(&entry.key),
                        error = %e,
                        "Replication failed, entry dropped"
                    );
                    // Reconnect on the next entry
                    self.client = None;
                }
            }
        }

        let _ = self.done.send(());
    }

    async fn replicate(&mut self, entry: &Entry) -> Result<()> {
        if self.client.is_none() {
            self.client = Some(Client::connect(&self.follower).await?);
        }
        if let Some(client) = self.client.as_mut() {
            client.put(&entry.key, &entry.value).await?;
        }
        Ok(())
    }
}
