//! Debounce and retry timers for the evaluation pass.
//!
//! Timers are spawned sleeps that post a [`CoordinatorEvent`] back into the
//! coordinator loop. Each arm bumps a generation; the loop asks
//! [`Scheduler::accept`] before acting so a timer that was re-armed or
//! cleared never triggers late.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::core::CoordinatorEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Quiet period after the last trigger elapsed; evaluate now.
    Evaluation,
    /// A failed treatment is due for another attempt.
    Retry,
}

#[derive(Default)]
struct Slot {
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl Slot {
    fn cancel(&mut self) {
        self.generation += 1;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn pending(&self) -> bool {
        self.task.is_some()
    }
}

pub struct Scheduler {
    debounce: Duration,
    retry: Duration,
    event_tx: mpsc::Sender<CoordinatorEvent>,
    evaluation: Slot,
    retry_slot: Slot,
}

impl Scheduler {
    pub fn new(debounce: Duration, retry: Duration, event_tx: mpsc::Sender<CoordinatorEvent>) -> Self {
        Self {
            debounce,
            retry,
            event_tx,
            evaluation: Slot::default(),
            retry_slot: Slot::default(),
        }
    }

    /// (Re)arms the debounce timer. Only the last call in a burst leads to
    /// an evaluation.
    pub fn schedule_evaluation(&mut self) {
        self.evaluation.cancel();
        let generation = self.evaluation.generation;
        self.evaluation.task = Some(self.spawn_timer(TimerKind::Evaluation, generation, self.debounce));
    }

    /// Arms the retry timer unless one is already pending.
    pub fn schedule_retry(&mut self) {
        if self.retry_slot.pending() {
            return;
        }
        self.retry_slot.cancel();
        let generation = self.retry_slot.generation;
        debug!("Scheduler: retry in {:?}", self.retry);
        self.retry_slot.task = Some(self.spawn_timer(TimerKind::Retry, generation, self.retry));
    }

    pub fn clear_retry(&mut self) {
        if self.retry_slot.pending() {
            debug!("Scheduler: retry cleared");
        }
        self.retry_slot.cancel();
    }

    pub fn retry_pending(&self) -> bool {
        self.retry_slot.pending()
    }

    pub fn evaluation_pending(&self) -> bool {
        self.evaluation.pending()
    }

    /// Whether a fired timer is still current. Accepting disarms it.
    pub fn accept(&mut self, kind: TimerKind, generation: u64) -> bool {
        let slot = match kind {
            TimerKind::Evaluation => &mut self.evaluation,
            TimerKind::Retry => &mut self.retry_slot,
        };
        if slot.generation != generation || !slot.pending() {
            return false;
        }
        slot.task = None;
        true
    }

    fn spawn_timer(&self, kind: TimerKind, generation: u64, delay: Duration) -> JoinHandle<()> {
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx
                .send(CoordinatorEvent::TimerFired { kind, generation })
                .await;
        })
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.evaluation.cancel();
        self.retry_slot.cancel();
    }
}
