//! Action Timer (C2) — a retry clock shared by submission/execution
//! retries and by event-handler timers in the registry.

use chrono::{DateTime, Utc};

/// An ordered retry clock: a delay list, an attempt counter, a pending
/// deadline, and a single in-flight flag.
///
/// The empty-delay-list edge policy ("behaves as `[0]`, retry
/// immediately, once") is applied once at construction rather than
/// checked at every call site.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionTimer {
    delays: Vec<u64>,
    num: Option<usize>,
    timeout: Option<DateTime<Utc>>,
    waiting: bool,
}

impl ActionTimer {
    /// Build a timer from a delay list (seconds). An empty list is
    /// treated as `[0]` per spec §4.2's edge policy.
    pub fn new(delays: Vec<u64>) -> Self {
        let delays = if delays.is_empty() { vec![0] } else { delays };
        Self {
            delays,
            num: None,
            timeout: None,
            waiting: false,
        }
    }

    /// Current attempt index, if `next` has been called at least once.
    pub const fn attempt(&self) -> Option<usize> {
        self.num
    }

    /// How many attempts have been dispatched so far.
    pub const fn attempts_made(&self) -> usize {
        match self.num {
            Some(n) => n + 1,
            None => 0,
        }
    }

    pub const fn is_timeout_set(&self) -> bool {
        self.timeout.is_some()
    }

    pub fn is_delay_done(&self, now: DateTime<Utc>) -> bool {
        self.timeout.is_some_and(|t| t <= now)
    }

    pub const fn is_waiting(&self) -> bool {
        self.waiting
    }

    pub fn set_waiting(&mut self) {
        self.waiting = true;
    }

    pub fn unset_waiting(&mut self) {
        self.waiting = false;
    }

    /// Clear the pending deadline after a failed dispatch, so the next
    /// tick's "no timeout set" check calls `next` again and advances to
    /// the following delay instead of re-dispatching the same one.
    pub fn reset_for_retry(&mut self) {
        self.timeout = None;
    }

    /// Advance to the next attempt.
    ///
    /// Returns the delay (seconds) that was just scheduled, or `None` if
    /// the timer is exhausted (attempt count would exceed the delay
    /// list length) and `no_exhaust` is false. Polling timers call this
    /// with `no_exhaust = true` so they never report exhaustion;
    /// handler timers use the default (`no_exhaust = false`), letting
    /// the registry detect exhaustion and remove the entry.
    pub fn next(&mut self, now: DateTime<Utc>, no_exhaust: bool) -> Option<u64> {
        let candidate = self.num.map_or(0, |n| n + 1);

        if candidate >= self.delays.len() && !no_exhaust {
            self.num = Some(candidate);
            self.timeout = None;
            return None;
        }

        self.num = Some(candidate);
        let idx = candidate.min(self.delays.len() - 1);
        let delay = self.delays[idx];
        self.timeout = Some(now + chrono::Duration::seconds(delay as i64));
        Some(delay)
    }

    /// `true` once `next` has reported exhaustion.
    pub fn is_exhausted(&self) -> bool {
        self.num.is_some_and(|n| n >= self.delays.len())
    }

    /// Human-readable delay-so-far rendering, for log lines. No
    /// semantic role — purely cosmetic, as spec §3 notes.
    pub fn delay_as_seconds(&self) -> String {
        match self.num {
            None => "0s".to_string(),
            Some(n) => {
                let idx = n.min(self.delays.len().saturating_sub(1));
                format!("{}s", self.delays.get(idx).copied().unwrap_or(0))
            }
        }
    }

    pub fn timeout_as_str(&self) -> String {
        self.timeout
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "unset".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn empty_delay_list_behaves_as_single_zero_delay() {
        let mut timer = ActionTimer::new(vec![]);
        let now = t0();
        assert_eq!(timer.next(now, false), Some(0));
        assert!(timer.is_delay_done(now));
        // Second call exhausts immediately.
        assert_eq!(timer.next(now, false), None);
        assert!(timer.is_exhausted());
    }

    #[test]
    fn retry_budget_matches_delay_list_length() {
        let mut timer = ActionTimer::new(vec![30, 60]);
        let now = t0();
        assert_eq!(timer.next(now, false), Some(30));
        assert_eq!(timer.attempts_made(), 1);
        assert_eq!(timer.next(now, false), Some(60));
        assert_eq!(timer.attempts_made(), 2);
        // A third attempt exceeds the two configured delays.
        assert_eq!(timer.next(now, false), None);
        assert!(timer.is_exhausted());
    }

    #[test]
    fn no_exhaust_timers_never_report_exhaustion() {
        let mut timer = ActionTimer::new(vec![5]);
        let now = t0();
        assert_eq!(timer.next(now, true), Some(5));
        assert_eq!(timer.next(now, true), Some(5));
        assert_eq!(timer.next(now, true), Some(5));
        assert!(!timer.is_exhausted());
    }

    #[test]
    fn is_delay_done_respects_timeout() {
        let mut timer = ActionTimer::new(vec![10]);
        let now = t0();
        timer.next(now, false);
        assert!(!timer.is_delay_done(now));
        assert!(timer.is_delay_done(now + chrono::Duration::seconds(10)));
    }

    #[test]
    fn waiting_flag_round_trips() {
        let mut timer = ActionTimer::new(vec![0]);
        assert!(!timer.is_waiting());
        timer.set_waiting();
        assert!(timer.is_waiting());
        timer.unset_waiting();
        assert!(!timer.is_waiting());
    }
}
