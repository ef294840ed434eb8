//! One-shot deferred actions for the supervisor.
//!
//! Deadlines are measured from runtime start. Entries fire in deadline order,
//! ties in scheduling order, and the queue never grows past its initial
//! capacity.

use std::time::Duration;

pub(crate) const ALARM_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AlarmAction {
    /// End of the power-up reset hold.
    ReleaseHost,
    /// Real switch after the announcement has been shown.
    CommitSwitch,
    /// End of a reset pulse around a bank change or a requested reset.
    EndResetPulse,
}

#[derive(Debug, Clone, Copy)]
struct Alarm {
    deadline: Duration,
    seq: u64,
    action: AlarmAction,
}

#[derive(Debug)]
pub(crate) struct AlarmQueue {
    alarms: Vec<Alarm>,
    next_seq: u64,
}

impl AlarmQueue {
    pub(crate) fn new() -> Self {
        Self {
            alarms: Vec::with_capacity(ALARM_CAPACITY),
            next_seq: 0,
        }
    }

    /// Returns `false` when the queue is full and the alarm was not added.
    pub(crate) fn schedule(&mut self, now: Duration, delay: Duration, action: AlarmAction) -> bool {
        if self.alarms.len() == ALARM_CAPACITY {
            return false;
        }
        self.alarms.push(Alarm {
            deadline: now + delay,
            seq: self.next_seq,
            action,
        });
        self.next_seq += 1;
        true
    }

    pub(crate) fn is_pending(&self, action: AlarmAction) -> bool {
        self.alarms.iter().any(|a| a.action == action)
    }

    /// Earliest alarm whose deadline has passed, removed from the queue.
    pub(crate) fn pop_due(&mut self, now: Duration) -> Option<AlarmAction> {
        let (idx, _) = self
            .alarms
            .iter()
            .enumerate()
            .filter(|(_, a)| a.deadline <= now)
            .min_by_key(|(_, a)| (a.deadline, a.seq))?;
        Some(self.alarms.swap_remove(idx).action)
    }

    /// Time until the next alarm, zero if one is already due.
    pub(crate) fn time_to_next(&self, now: Duration) -> Option<Duration> {
        self.alarms
            .iter()
            .map(|a| a.deadline.saturating_sub(now))
            .min()
    }
}
