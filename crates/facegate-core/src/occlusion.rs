//! Occlusion gate: a rate-limited, non-overlapping external check whose
//! result vetoes acceptance.
//!
//! The gate itself performs no I/O. The engine asks it for a [`CheckTicket`]
//! on every cycle; when one is granted the engine dispatches the external
//! check and later hands the ticket back together with the result. Tickets
//! carry the gate generation so results arriving after [`OcclusionGate::cancel`]
//! are discarded instead of leaking into the next session.

use std::fmt::Display;
use std::time::{Duration, Instant};

pub const MIN_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Permission to run one occlusion check. Not cloneable: at most one exists
/// per gate generation at a time.
#[derive(Debug)]
#[must_use = "a granted check must be resolved or the gate stays in flight"]
pub struct CheckTicket {
    generation: u64,
    dispatched_at: Instant,
}

impl CheckTicket {
    pub fn dispatched_at(&self) -> Instant {
        self.dispatched_at
    }
}

/// What [`OcclusionGate::resolve`] did with a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The blocked flag now holds the returned value.
    Updated { blocked: bool, changed: bool },
    /// The check failed; the previous flag is kept.
    Retained { blocked: bool },
    /// The ticket belongs to a cancelled generation.
    Stale,
}

#[derive(Debug)]
pub struct OcclusionGate {
    min_interval: Duration,
    last_checked_at: Option<Instant>,
    in_flight: bool,
    blocked: bool,
    generation: u64,
}

impl OcclusionGate {
    /// `min_interval` is raised to [`MIN_CHECK_INTERVAL`] if shorter.
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval: min_interval.max(MIN_CHECK_INTERVAL),
            last_checked_at: None,
            in_flight: false,
            blocked: false,
            generation: 0,
        }
    }

    /// Grant a check if none is in flight and the cooldown has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<CheckTicket> {
        if self.in_flight {
            return None;
        }
        if let Some(last) = self.last_checked_at {
            if now.saturating_duration_since(last) < self.min_interval {
                return None;
            }
        }

        self.in_flight = true;
        self.last_checked_at = Some(now);
        Some(CheckTicket {
            generation: self.generation,
            dispatched_at: now,
        })
    }

    /// Apply the outcome of a dispatched check.
    pub fn resolve<E: Display>(
        &mut self,
        ticket: CheckTicket,
        result: Result<bool, E>,
    ) -> Resolution {
        if ticket.generation != self.generation {
            tracing::debug!(
                ticket = ticket.generation,
                current = self.generation,
                "discarding occlusion result from cancelled session"
            );
            return Resolution::Stale;
        }

        self.in_flight = false;
        match result {
            Ok(blocked) => {
                let changed = blocked != self.blocked;
                self.blocked = blocked;
                if changed {
                    tracing::info!(blocked, "occlusion state changed");
                }
                Resolution::Updated { blocked, changed }
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    blocked = self.blocked,
                    "occlusion check failed; keeping last known state"
                );
                Resolution::Retained {
                    blocked: self.blocked,
                }
            }
        }
    }

    /// Forget all state and invalidate outstanding tickets.
    pub fn cancel(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.in_flight = false;
        self.blocked = false;
        self.last_checked_at = None;
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn last_checked_at(&self) -> Option<Instant> {
        self.last_checked_at
    }
}

impl Default for OcclusionGate {
    fn default() -> Self {
        Self::new(MIN_CHECK_INTERVAL)
    }
}
