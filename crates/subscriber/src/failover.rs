//! Failover / resubscription state machine
//!
//! Owns the ordered site list `[primary] + backup_sites` of one topic and
//! decides where and when the next connection attempt goes.
//!
//! - With backups, a disconnect or a failed attempt moves to the next site,
//!   cycling through the list.
//! - Under `sub_once`, a site that has been moved away from is retired for
//!   good. When no site is left the topic is exhausted.
//! - Without backups the single site is retried every interval.

use std::time::{Duration, Instant};

use contracts::{ConnectionState, SiteAddr};

/// Outcome of a failure event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Retry the same site after the interval
    Retry { site: SiteAddr },
    /// Moved to another site; the next attempt goes there after the interval
    Switched { from: SiteAddr, to: SiteAddr },
    /// No usable site remains
    Exhausted,
}

/// Per-topic connection lifecycle
#[derive(Debug, Clone)]
pub struct FailoverState {
    sites: Vec<SiteAddr>,
    retired: Vec<bool>,
    current: usize,
    sub_once: bool,
    interval: Duration,
    state: ConnectionState,
    /// Attempts since the last successful subscribe
    attempts: u64,
    next_attempt: Option<Instant>,
}

impl FailoverState {
    pub fn new(
        primary: SiteAddr,
        backups: impl IntoIterator<Item = SiteAddr>,
        sub_once: bool,
        interval: Duration,
    ) -> Self {
        let sites: Vec<SiteAddr> = std::iter::once(primary).chain(backups).collect();
        let retired = vec![false; sites.len()];
        Self {
            sites,
            retired,
            current: 0,
            sub_once,
            interval,
            state: ConnectionState::Init,
            attempts: 0,
            next_attempt: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn current_site(&self) -> &SiteAddr {
        &self.sites[self.current]
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    pub fn has_backups(&self) -> bool {
        self.sites.len() > 1
    }

    /// Sites still eligible for connection attempts
    pub fn remaining_sites(&self) -> usize {
        self.retired.iter().filter(|r| !**r).count()
    }

    /// `Init -> Connecting` (initial attempt, no wait)
    pub fn begin_connect(&mut self) {
        self.state = ConnectionState::Connecting;
    }

    pub fn on_subscribed(&mut self) {
        self.state = ConnectionState::Subscribed;
        self.attempts = 0;
        self.next_attempt = None;
    }

    /// Connection lost while subscribed
    pub fn on_disconnect(&mut self, now: Instant) -> Transition {
        self.fail(now)
    }

    /// A (re)connect or subscribe attempt failed
    pub fn on_attempt_failed(&mut self, now: Instant) -> Transition {
        self.attempts += 1;
        self.fail(now)
    }

    /// Whether a reconnect attempt is due
    pub fn is_due(&self, now: Instant) -> bool {
        self.state == ConnectionState::Reconnecting
            && self.next_attempt.map_or(true, |at| now >= at)
    }

    pub fn next_attempt(&self) -> Option<Instant> {
        match self.state {
            ConnectionState::Reconnecting => self.next_attempt,
            _ => None,
        }
    }

    pub fn mark_unsubscribed(&mut self) {
        self.state = ConnectionState::Unsubscribed;
        self.next_attempt = None;
    }

    fn fail(&mut self, now: Instant) -> Transition {
        if self.state.is_terminal() {
            return Transition::Exhausted;
        }
        if !self.has_backups() {
            self.schedule(now);
            return Transition::Retry {
                site: self.current_site().clone(),
            };
        }

        let from = self.current_site().clone();
        if self.sub_once {
            self.retired[self.current] = true;
        }
        match self.next_index() {
            Some(next) => {
                self.current = next;
                self.schedule(now);
                Transition::Switched {
                    from,
                    to: self.current_site().clone(),
                }
            }
            None => {
                self.state = ConnectionState::Failed;
                self.next_attempt = None;
                Transition::Exhausted
            }
        }
    }

    /// Next non-retired site after the current one, cyclically
    fn next_index(&self) -> Option<usize> {
        let n = self.sites.len();
        (1..=n)
            .map(|step| (self.current + step) % n)
            .find(|&i| !self.retired[i])
    }

    fn schedule(&mut self, now: Instant) {
        self.state = ConnectionState::Reconnecting;
        self.next_attempt = Some(now + self.interval);
    }
}
