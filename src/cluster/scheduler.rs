//! Debounced per-event clustering scheduler.
//!
//! Every processed photo pushes its event's timer out by the quiet period,
//! so an upload burst collapses into one clustering run shortly after the
//! burst ends. The scheduler is a pure state machine over injected
//! [`Instant`]s; the daemon loop polls it, which keeps timing behavior
//! directly testable.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::debug;

enum EventEntry {
    /// Quiet period running; fires when `due_at` passes.
    Pending { due_at: Instant },
    /// A clustering run is in flight. `rearm` records that photos arrived
    /// meanwhile and a fresh quiet period must start once the run completes.
    Running { rearm: bool },
}

pub struct ClusterScheduler {
    quiet_period: Duration,
    events: HashMap<String, EventEntry>,
}

impl ClusterScheduler {
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            quiet_period,
            events: HashMap::new(),
        }
    }

    /// A photo finished processing for this event: start or extend the
    /// quiet period, or flag a re-run if clustering is in flight.
    pub fn photo_processed(&mut self, event_id: &str, now: Instant) {
        match self.events.get_mut(event_id) {
            Some(EventEntry::Running { rearm }) => {
                *rearm = true;
            }
            _ => {
                self.events.insert(
                    event_id.to_string(),
                    EventEntry::Pending {
                        due_at: now + self.quiet_period,
                    },
                );
            }
        }
    }

    /// Events whose quiet period has elapsed. Each returned event moves to
    /// the running state and will not be returned again until [`complete`]
    /// is called for it, so at most one run per event is ever in flight.
    ///
    /// [`complete`]: ClusterScheduler::complete
    pub fn due_events(&mut self, now: Instant) -> Vec<String> {
        let mut due = Vec::new();
        for (event_id, entry) in self.events.iter_mut() {
            if let EventEntry::Pending { due_at } = entry {
                if *due_at <= now {
                    *entry = EventEntry::Running { rearm: false };
                    due.push(event_id.clone());
                }
            }
        }
        due.sort();
        due
    }

    /// The clustering run for this event finished (successfully or not).
    /// If photos arrived during the run, a fresh quiet period starts.
    pub fn complete(&mut self, event_id: &str, now: Instant) {
        match self.events.get(event_id) {
            Some(EventEntry::Running { rearm: true }) => {
                debug!(event = %event_id, "photos arrived during run, rearming");
                self.events.insert(
                    event_id.to_string(),
                    EventEntry::Pending {
                        due_at: now + self.quiet_period,
                    },
                );
            }
            _ => {
                self.events.remove(event_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUIET: Duration = Duration::from_secs(30);

    #[test]
    fn test_fires_after_quiet_period() {
        let mut sched = ClusterScheduler::new(QUIET);
        let t0 = Instant::now();

        sched.photo_processed("e1", t0);
        assert!(sched.due_events(t0 + Duration::from_secs(29)).is_empty());
        assert_eq!(sched.due_events(t0 + QUIET), vec!["e1".to_string()]);
    }

    #[test]
    fn test_each_photo_extends_the_timer() {
        let mut sched = ClusterScheduler::new(QUIET);
        let t0 = Instant::now();

        sched.photo_processed("e1", t0);
        sched.photo_processed("e1", t0 + Duration::from_secs(20));

        // 30s after the first photo: the second pushed the deadline out
        assert!(sched.due_events(t0 + QUIET).is_empty());
        assert_eq!(
            sched.due_events(t0 + Duration::from_secs(50)),
            vec!["e1".to_string()]
        );
    }

    #[test]
    fn test_burst_collapses_to_one_run() {
        let mut sched = ClusterScheduler::new(QUIET);
        let t0 = Instant::now();

        for i in 0..100 {
            sched.photo_processed("e1", t0 + Duration::from_millis(i * 10));
        }

        let due = sched.due_events(t0 + Duration::from_secs(31));
        assert_eq!(due, vec!["e1".to_string()]);
        // Nothing more until complete
        assert!(sched.due_events(t0 + Duration::from_secs(120)).is_empty());
    }

    #[test]
    fn test_no_second_fire_while_running() {
        let mut sched = ClusterScheduler::new(QUIET);
        let t0 = Instant::now();

        sched.photo_processed("e1", t0);
        assert_eq!(sched.due_events(t0 + QUIET).len(), 1);
        assert!(sched.due_events(t0 + QUIET).is_empty());

        sched.complete("e1", t0 + Duration::from_secs(35));
        // No photos during the run: the event is idle
        assert!(sched.due_events(t0 + Duration::from_secs(120)).is_empty());
    }

    #[test]
    fn test_photo_during_run_rearms() {
        let mut sched = ClusterScheduler::new(QUIET);
        let t0 = Instant::now();

        sched.photo_processed("e1", t0);
        assert_eq!(sched.due_events(t0 + QUIET).len(), 1);

        // Photo lands while the run is in flight
        sched.photo_processed("e1", t0 + Duration::from_secs(32));
        sched.complete("e1", t0 + Duration::from_secs(35));

        // A fresh quiet period starts at completion time
        assert!(sched.due_events(t0 + Duration::from_secs(64)).is_empty());
        assert_eq!(
            sched.due_events(t0 + Duration::from_secs(65)),
            vec!["e1".to_string()]
        );
    }

    #[test]
    fn test_events_are_independent() {
        let mut sched = ClusterScheduler::new(QUIET);
        let t0 = Instant::now();

        sched.photo_processed("e1", t0);
        sched.photo_processed("e2", t0 + Duration::from_secs(10));

        assert_eq!(sched.due_events(t0 + QUIET), vec!["e1".to_string()]);
        assert_eq!(
            sched.due_events(t0 + Duration::from_secs(40)),
            vec!["e2".to_string()]
        );
    }

    #[test]
    fn test_due_events_returns_all_elapsed() {
        let mut sched = ClusterScheduler::new(QUIET);
        let t0 = Instant::now();

        sched.photo_processed("b", t0);
        sched.photo_processed("a", t0);

        assert_eq!(
            sched.due_events(t0 + QUIET),
            vec!["a".to_string(), "b".to_string()]
        );
    }
}
