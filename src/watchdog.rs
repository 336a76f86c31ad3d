//! Communication-loss watchdog.
//!
//! Tracks recency of valid inbound traffic on the monotonic clock and
//! derives the two signals the light controller acts on: `comm_ok` and
//! `fail_safe_active`. The caller reports exactly one [`LinkActivity`] per
//! control cycle; the returned transition, when present, obliges the caller
//! to resynchronize the light outputs (see [`crate::lights`]).

use std::time::{Duration, Instant};

use heapless::Vec;

const MAX_LINK_EVENTS: usize = 16;

/// Communication-loss threshold on the monotonic clock.
pub const DEFAULT_COMM_TIMEOUT: Duration = Duration::from_secs(5);

/// What the receive side observed this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkActivity {
    /// A frame arrived and decoded cleanly.
    ValidFrame,
    /// A frame arrived but could not be decoded (including out-of-range
    /// values on a known identifier).
    UndecodableFrame,
    /// Nothing arrived within the bounded receive wait.
    Silence,
}

/// Edge emitted when the link changes state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkTransition {
    /// Valid traffic resumed after a loss. The caller must reset every
    /// governed light to its neutral baseline before applying the newly
    /// decoded values.
    Restored,
    /// Silence exceeded the timeout. The caller must drive every governed
    /// output to its inactive level once before fail-safe toggling begins.
    Lost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    CommLost,
    CommRestored,
    UndecodableTraffic,
}

#[derive(Debug, Clone, Copy)]
pub struct LinkEventRecord {
    pub event: LinkEvent,
    pub at: Instant,
}

/// Watchdog state owned exclusively by the light-state controller.
#[derive(Debug)]
pub struct LinkWatchdog {
    last_valid_frame: Instant,
    comm_ok: bool,
    fail_safe_active: bool,
    timeout: Duration,
    history: Vec<LinkEventRecord, MAX_LINK_EVENTS>,
}

impl LinkWatchdog {
    /// Starts optimistic: communication is assumed healthy until a measured
    /// silence of at least `timeout` proves otherwise.
    pub fn new(timeout: Duration, now: Instant) -> Self {
        Self {
            last_valid_frame: now,
            comm_ok: true,
            fail_safe_active: false,
            timeout,
            history: Vec::new(),
        }
    }

    /// Feed one cycle's observation; returns the transition the caller must
    /// act on, if any.
    pub fn observe(&mut self, activity: LinkActivity, now: Instant) -> Option<LinkTransition> {
        match activity {
            LinkActivity::ValidFrame => {
                self.last_valid_frame = now;
                self.fail_safe_active = false;
                if !self.comm_ok {
                    self.comm_ok = true;
                    self.record(LinkEvent::CommRestored, now);
                    return Some(LinkTransition::Restored);
                }
                None
            }
            LinkActivity::UndecodableFrame => {
                // Undecodable traffic is itself evidence of a protocol fault,
                // independent of the silence timeout. The last-valid time is
                // left untouched.
                self.fail_safe_active = true;
                self.record(LinkEvent::UndecodableTraffic, now);
                None
            }
            LinkActivity::Silence => {
                if self.comm_ok && now.duration_since(self.last_valid_frame) >= self.timeout {
                    self.comm_ok = false;
                    self.fail_safe_active = true;
                    self.record(LinkEvent::CommLost, now);
                    return Some(LinkTransition::Lost);
                }
                None
            }
        }
    }

    pub fn comm_ok(&self) -> bool {
        self.comm_ok
    }

    pub fn fail_safe_active(&self) -> bool {
        self.fail_safe_active
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn history(&self) -> &[LinkEventRecord] {
        &self.history
    }

    fn record(&mut self, event: LinkEvent, at: Instant) {
        // Bounded history; oldest entry gives way.
        if self.history.is_full() {
            self.history.remove(0);
        }
        let _ = self.history.push(LinkEventRecord { event, at });
    }
}
