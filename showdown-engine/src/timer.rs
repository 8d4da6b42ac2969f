//! Forfeit timers: one armed task per active wager.
//!
//! The wait is always re-derived from the persisted `choice_deadline`,
//! never from an in-process countdown, so a restarted process resumes
//! correct behavior by re-arming from stored state. Cancellation aborts
//! the task, but a fire that slips through anyway is harmless: the
//! coordinator revalidates every timeout against the current record and
//! discards stale ones.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use showdown_core::WagerId;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::task::AbortHandle;

#[derive(Clone, Default)]
pub struct ForfeitTimers {
    tasks: Arc<Mutex<HashMap<WagerId, AbortHandle>>>,
}

impl ForfeitTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) the timer for a wager. `on_expiry` runs once the
    /// stored deadline passes; a deadline already in the past fires
    /// immediately.
    pub fn arm<F>(&self, id: WagerId, deadline: DateTime<Utc>, on_expiry: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let wait = (deadline - Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);

        let tasks = self.tasks.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            // Deregister before running so a re-arm from inside the
            // expiry path doesn't race its own removal.
            tasks.lock().remove(&id);
            on_expiry.await;
        });

        tracing::debug!(wager = %id, %deadline, "forfeit timer armed");
        if let Some(old) = self.tasks.lock().insert(id, handle.abort_handle()) {
            old.abort();
        }
    }

    /// Cancel the timer the moment the round no longer needs it.
    pub fn cancel(&self, id: WagerId) {
        if let Some(handle) = self.tasks.lock().remove(&id) {
            handle.abort();
            tracing::debug!(wager = %id, "forfeit timer cancelled");
        }
    }

    pub fn is_armed(&self, id: WagerId) -> bool {
        self.tasks.lock().contains_key(&id)
    }
}
