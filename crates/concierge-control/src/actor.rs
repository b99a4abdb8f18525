//! Per-consultation single-writer actors.
//!
//! Every state transition and every fan-out for one consultation runs on that
//! consultation's actor, one job at a time, in submission order. Unrelated
//! consultations run on separate actors and never wait on each other.
//!
//! Actors are spawned on first use and exit after sitting idle for the configured
//! timeout. Retiring an actor and spawning its replacement both happen under the
//! registry lock, so at most one actor serves a consultation at any time.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use concierge_core::ConsultationId;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::error::{ControlError, Result};

type Job = BoxFuture<'static, ()>;
type Actors = Arc<Mutex<HashMap<ConsultationId, mpsc::Sender<Job>>>>;

/// Registry of live consultation actors.
pub struct ActorRegistry {
    actors: Actors,
    idle_timeout: Duration,
    mailbox: usize,
}

impl ActorRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(idle_timeout: Duration, mailbox: usize) -> Self {
        Self {
            actors: Arc::default(),
            idle_timeout,
            mailbox: mailbox.max(1),
        }
    }

    /// Run `task` on the actor for `consultation_id` and wait for its output.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Internal` if the actor dropped the job without running
    /// it to completion (the task panicked).
    pub async fn run<F, T>(&self, consultation_id: ConsultationId, task: F) -> Result<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let mut job: Job = async move {
            let _ = reply_tx.send(task.await);
        }
        .boxed();

        loop {
            let sender = self.sender_for(consultation_id);
            match sender.send(job).await {
                Ok(()) => break,
                Err(mpsc::error::SendError(returned)) => {
                    tracing::debug!(consultation_id = %consultation_id, "Actor stopped, respawning");
                    job = returned;
                    self.forget(consultation_id, &sender);
                }
            }
        }

        reply_rx.await.map_err(|_| {
            ControlError::Internal(format!(
                "consultation {consultation_id} actor dropped a job"
            ))
        })
    }

    /// Number of actors currently registered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actors.lock().len()
    }

    /// Whether no actor is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actors.lock().is_empty()
    }

    fn sender_for(&self, consultation_id: ConsultationId) -> mpsc::Sender<Job> {
        let mut actors = self.actors.lock();
        if let Some(sender) = actors.get(&consultation_id) {
            if !sender.is_closed() {
                return sender.clone();
            }
        }

        actors.retain(|_, sender| !sender.is_closed());
        let (sender, receiver) = mpsc::channel(self.mailbox);
        tokio::spawn(run_actor(
            consultation_id,
            receiver,
            self.idle_timeout,
            Arc::clone(&self.actors),
            self.mailbox,
        ));
        actors.insert(consultation_id, sender.clone());
        tracing::debug!(consultation_id = %consultation_id, "Spawned consultation actor");
        sender
    }

    fn forget(&self, consultation_id: ConsultationId, stale: &mpsc::Sender<Job>) {
        let mut actors = self.actors.lock();
        if actors
            .get(&consultation_id)
            .is_some_and(|current| current.same_channel(stale))
        {
            actors.remove(&consultation_id);
        }
    }
}

async fn run_actor(
    consultation_id: ConsultationId,
    mut jobs: mpsc::Receiver<Job>,
    idle: Duration,
    actors: Actors,
    mailbox: usize,
) {
    loop {
        match tokio::time::timeout(idle, jobs.recv()).await {
            Ok(Some(job)) => job.await,
            Ok(None) => break,
            Err(_) => match retire(consultation_id, &mut jobs, &actors, mailbox) {
                Some(successor) => {
                    tracing::debug!(consultation_id = %consultation_id, "Jobs arrived while retiring");
                    jobs = successor;
                }
                None => break,
            },
        }
    }
    tracing::debug!(consultation_id = %consultation_id, "Consultation actor exited");
}

/// Close an idle mailbox and unregister it.
///
/// Jobs queued before the close move, in order, into a fresh mailbox that replaces
/// the old one in the registry; the caller keeps serving it. Returns `None` when
/// nothing was queued and the actor may exit.
fn retire(
    consultation_id: ConsultationId,
    jobs: &mut mpsc::Receiver<Job>,
    actors: &Mutex<HashMap<ConsultationId, mpsc::Sender<Job>>>,
    mailbox: usize,
) -> Option<mpsc::Receiver<Job>> {
    let mut actors = actors.lock();
    jobs.close();

    let mut leftover = Vec::new();
    while let Ok(job) = jobs.try_recv() {
        leftover.push(job);
    }

    if leftover.is_empty() {
        if actors
            .get(&consultation_id)
            .is_some_and(mpsc::Sender::is_closed)
        {
            actors.remove(&consultation_id);
        }
        return None;
    }

    let (sender, successor) = mpsc::channel(mailbox.max(leftover.len()));
    for job in leftover {
        // Capacity covers every leftover job.
        let _ = sender.try_send(job);
    }
    actors.insert(consultation_id, sender);
    Some(successor)
}
