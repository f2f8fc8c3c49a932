//! Per-connection renewal timer.
//!
//! Each connection runs one timer task. It sleeps until the earliest
//! `expires_at - renewal_gap` among its Active subscriptions, then asks the
//! connection to renew whatever is due. The connection re-arms the timer
//! through a `watch` channel whenever its subscription set changes.

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::trace;

use crate::connection::{self, ConnectionKey};
use crate::shared::SharedState;
use crate::subscription::{EventSubscription, SubscriptionPhase};

/// When the timer should next fire, or `None` when nothing needs renewing.
///
/// Deadlines in the past are clamped to `now`.
pub(crate) fn next_deadline<'a>(
    subscriptions: impl IntoIterator<Item = &'a EventSubscription>,
    now: Instant,
    gap: Duration,
) -> Option<Instant> {
    subscriptions
        .into_iter()
        .filter(|s| s.phase() == SubscriptionPhase::Active)
        .map(|s| s.expires_at())
        .min()
        .map(|expires_at| {
            expires_at
                .checked_sub(gap)
                .map_or(now, |deadline| deadline.max(now))
        })
}

pub(crate) struct RenewalTimer {
    rearm: watch::Sender<Option<Instant>>,
    deadline: Option<Instant>,
    task: AbortHandle,
}

impl RenewalTimer {
    /// Start the timer task for a connection. The timer starts disarmed.
    pub fn spawn(shared: Weak<SharedState>, key: ConnectionKey) -> Self {
        let (rearm, receiver) = watch::channel(None);
        let task = tokio::spawn(run(shared, key, receiver)).abort_handle();
        Self {
            rearm,
            deadline: None,
            task,
        }
    }

    pub fn arm(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
        self.rearm.send_replace(deadline);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn dispose(&self) {
        self.task.abort();
    }
}

impl Drop for RenewalTimer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    shared: Weak<SharedState>,
    key: ConnectionKey,
    mut rearm: watch::Receiver<Option<Instant>>,
) {
    loop {
        let deadline = *rearm.borrow_and_update();
        match deadline {
            Some(at) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(at) => {
                        let Some(shared) = shared.upgrade() else { return };
                        trace!(udn = %key.udn, "renewal timer fired");
                        if !connection::renew_due_subscriptions(&shared, &key) {
                            return;
                        }
                    }
                    changed = rearm.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
            }
            None => {
                if rearm.changed().await.is_err() {
                    return;
                }
            }
        }
    }
}
