//! GENA subscriptions held by a device connection.

use std::time::Duration;

use tokio::time::Instant;

use crate::device_tree::ServiceHandle;

/// Where a subscription is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionPhase {
    Active,
    /// A renewal request is in flight
    Renewing,
    /// An UNSUBSCRIBE request is in flight
    Unsubscribing,
}

/// A subscription to one service's events, identified by the device-assigned SID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSubscription {
    sid: String,
    service: ServiceHandle,
    expires_at: Instant,
    event_key: u32,
    phase: SubscriptionPhase,
}

impl EventSubscription {
    /// A fresh subscription. The initial event (key 0) is accepted.
    pub(crate) fn new(sid: String, service: ServiceHandle, expires_at: Instant) -> Self {
        Self {
            sid,
            service,
            expires_at,
            event_key: 0,
            phase: SubscriptionPhase::Active,
        }
    }

    pub fn sid(&self) -> &str {
        &self.sid
    }

    pub fn service(&self) -> ServiceHandle {
        self.service
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Last accepted event key.
    pub fn event_key(&self) -> u32 {
        self.event_key
    }

    pub fn phase(&self) -> SubscriptionPhase {
        self.phase
    }

    pub(crate) fn set_phase(&mut self, phase: SubscriptionPhase) {
        self.phase = phase;
    }

    /// Record a granted (re)subscription.
    pub(crate) fn refresh(&mut self, expires_at: Instant) {
        self.expires_at = expires_at;
        self.phase = SubscriptionPhase::Active;
    }

    /// Whether the subscription has to be renewed by `now`.
    pub(crate) fn is_due(&self, now: Instant, gap: Duration) -> bool {
        self.phase == SubscriptionPhase::Active && self.expires_at <= now + gap
    }

    /// Accept or drop an event key.
    ///
    /// Keys count up and wrap from `u32::MAX` to 0. A key below the stored one
    /// is read as having wrapped. Keys more than `gap_threshold` ahead of the
    /// stored one are dropped and leave it unchanged; anything else, including
    /// a repeat of the stored key, is accepted and stored.
    pub(crate) fn set_new_event_key(&mut self, key: u32, gap_threshold: u64) -> bool {
        let stored = u64::from(self.event_key);
        let mut seq = u64::from(key);
        if seq < stored {
            seq += 1 << 32;
        }
        if seq > stored + gap_threshold {
            return false;
        }
        self.event_key = key;
        true
    }
}
