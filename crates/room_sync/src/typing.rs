//! Typing presence: an explicit timer state machine for the outbound signal
//! (last-sent timestamp + pending timer handle, abortable on teardown) and a
//! time-expiring set for inbound presence.

use std::collections::HashMap;

use tokio::{task::JoinHandle, time::Instant};

pub const TYPING_SIGNAL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(2000);
pub const TYPING_PRESENCE_TTL: std::time::Duration = std::time::Duration::from_millis(2000);

/// What a keystroke observed now should turn into.
#[derive(Debug, PartialEq, Eq)]
pub enum SignalPlan {
    /// Send the typing frame immediately.
    SendNow,
    /// Too soon since the last send; schedule one send after this delay.
    Defer(std::time::Duration),
    /// A deferred send is already scheduled; this keystroke collapses into it.
    Collapsed,
}

/// Outbound throttle + debounce: at most one signal per
/// `TYPING_SIGNAL_INTERVAL`, rapid keystrokes collapse into a single
/// deferred send per quiet period.
#[derive(Debug, Default)]
pub struct TypingSignaler {
    last_sent: Option<Instant>,
    pending: Option<JoinHandle<()>>,
}

impl TypingSignaler {
    pub fn on_keystroke(&mut self, now: Instant) -> SignalPlan {
        if self.pending.is_some() {
            return SignalPlan::Collapsed;
        }
        match self.last_sent {
            Some(last) if now.duration_since(last) < TYPING_SIGNAL_INTERVAL => {
                SignalPlan::Defer(TYPING_SIGNAL_INTERVAL - now.duration_since(last))
            }
            _ => SignalPlan::SendNow,
        }
    }

    pub fn mark_sent(&mut self, now: Instant) {
        self.last_sent = Some(now);
        self.pending = None;
    }

    pub fn set_pending(&mut self, handle: JoinHandle<()>) {
        self.pending = Some(handle);
    }

    /// Cancel any scheduled send. Called on teardown so no timer outlives
    /// the session generation.
    pub fn abort(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}

/// Inbound presence entries keyed by display name, each with its own expiry.
#[derive(Debug, Default)]
pub struct PresenceSet {
    entries: HashMap<String, Instant>,
}

impl PresenceSet {
    /// (Re)insert a sender, pushing their expiry `TYPING_PRESENCE_TTL` out.
    /// Returns the new expiry so the caller can schedule the removal check.
    pub fn refresh(&mut self, display_name: &str, now: Instant) -> Instant {
        let expires_at = now + TYPING_PRESENCE_TTL;
        self.entries.insert(display_name.to_string(), expires_at);
        expires_at
    }

    /// Remove the entry if its expiry has passed; a refresh in the meantime
    /// keeps it alive. Returns whether the set changed.
    pub fn expire_if_due(&mut self, display_name: &str, now: Instant) -> bool {
        match self.entries.get(display_name) {
            Some(&expires_at) if expires_at <= now => {
                self.entries.remove(display_name);
                true
            }
            _ => false,
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
