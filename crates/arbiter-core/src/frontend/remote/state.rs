//! Shared state between the pipeline thread and the service worker.
//!
//! Every read-modify-write happens under one lock, in particular the
//! "all answers in?" check of [`ServiceState::answers_done`] against
//! concurrent [`ServiceState::answer`] calls.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::{debug, info};

use super::protocol::{DecisionView, Notification};
use crate::domain::decision::AnswerCheck;
use crate::domain::errors::DecisionError;
use crate::domain::ids::DecisionId;
use crate::ports::frontend::BatchAnswer;

/// Returns `false` once its subscriber is gone.
pub type Callback = Box<dyn Fn(Notification) -> bool + Send + Sync>;

/// One published decision: what the client sees and how to check answers.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub view: DecisionView,
    pub check: AnswerCheck,
}

/// What the pipeline side finds when it polls.
#[derive(Debug, Clone, PartialEq)]
pub enum Poll {
    Waiting,
    Complete(Vec<(DecisionId, BatchAnswer)>),
    Cancelled,
}

#[derive(Default)]
struct Inner {
    pending: Option<BTreeMap<DecisionId, PendingEntry>>,
    answers: BTreeMap<DecisionId, BatchAnswer>,
    complete: bool,
    cancelled: bool,
    callbacks: BTreeMap<u64, Callback>,
    next_subscriber: u64,
}

#[derive(Clone, Default)]
pub struct ServiceState {
    inner: Arc<Mutex<Inner>>,
}

impl ServiceState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make a batch visible to the client.
    ///
    /// Fails while a previous batch is still pending or its answers have
    /// not been collected.
    pub fn publish(&self, entries: Vec<PendingEntry>) -> Result<(), DecisionError> {
        let mut inner = self.lock();
        let outstanding = inner.pending.as_ref().map_or(0, BTreeMap::len) + inner.answers.len();
        if inner.pending.is_some() || inner.complete || !inner.answers.is_empty() {
            return Err(DecisionError::OverlappingBatch { outstanding });
        }
        debug!(count = entries.len(), "publishing decisions");
        inner.pending = Some(
            entries
                .into_iter()
                .map(|entry| (entry.view.id, entry))
                .collect(),
        );
        inner.cancelled = false;
        Ok(())
    }

    /// Pending views in batch order, `None` when nothing is published.
    pub fn get_decisions(&self) -> Option<Vec<DecisionView>> {
        let inner = self.lock();
        let pending = inner.pending.as_ref()?;
        let mut views: Vec<DecisionView> = pending.values().map(|e| e.view.clone()).collect();
        views.sort_by_key(|view| view.index);
        Some(views)
    }

    /// Record one answer.
    ///
    /// `None` for an unknown key or a value that can not be read for the
    /// decision's kind, `Some(false)` for a rejected value. `null` asks to
    /// skip.
    pub fn answer(&self, key: &str, value: &Value) -> Option<bool> {
        let id: DecisionId = key.parse().ok()?;
        let mut inner = self.lock();
        let entry = inner.pending.as_ref()?.get(&id)?;

        let answer = if value.is_null() {
            if !entry.check.allow_skip() {
                return Some(false);
            }
            BatchAnswer::Skipped
        } else {
            let parsed = entry.check.kind().parse_json(value).ok()?;
            match entry.check.validate(parsed) {
                Ok(answer) => BatchAnswer::Answered(answer),
                Err(e) => {
                    debug!(decision = %id, error = %e, "rejected remote answer");
                    return Some(false);
                }
            }
        };
        inner.answers.insert(id, answer);
        Some(true)
    }

    /// `true` once every pending decision has an accepted answer; marks the
    /// batch complete and clears it.
    pub fn answers_done(&self) -> bool {
        let mut inner = self.lock();
        let Some(pending) = inner.pending.as_ref() else {
            return false;
        };
        if !pending.keys().all(|id| inner.answers.contains_key(id)) {
            return false;
        }
        inner.pending = None;
        inner.complete = true;
        true
    }

    /// Client aborts the current batch.
    pub fn cancel(&self) -> bool {
        let mut inner = self.lock();
        info!("remote client cancelled the decisions");
        inner.pending = None;
        inner.answers.clear();
        inner.complete = false;
        inner.cancelled = true;
        true
    }

    /// Take the result of the published batch, if there is one yet.
    pub fn poll(&self) -> Poll {
        let mut inner = self.lock();
        if inner.cancelled {
            inner.cancelled = false;
            return Poll::Cancelled;
        }
        if !inner.complete {
            return Poll::Waiting;
        }
        inner.complete = false;
        Poll::Complete(std::mem::take(&mut inner.answers).into_iter().collect())
    }

    /// Register a subscriber; the returned id removes it again.
    pub fn add_callback(
        &self,
        callback: impl Fn(Notification) -> bool + Send + Sync + 'static,
    ) -> u64 {
        let mut inner = self.lock();
        let id = inner.next_subscriber;
        inner.next_subscriber += 1;
        inner.callbacks.insert(id, Box::new(callback));
        id
    }

    pub fn remove_callback(&self, id: u64) {
        self.lock().callbacks.remove(&id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().callbacks.len()
    }

    /// Deliver to every subscriber, dropping those that are gone.
    pub fn notify(&self, notification: Notification) {
        self.lock()
            .callbacks
            .retain(|_, callback| callback(notification));
    }
}
