//! Per-process rescan scheduling.
//!
//! Every live process is rescanned for newly mapped libraries, but one that
//! keeps yielding nothing new backs off exponentially: after a repeated
//! fruitless scan it skips `backoff - 1` deployment passes before being
//! considered again. An mmap notification from the kernel resets the
//! backoff so the next pass picks the process up immediately.

use std::collections::HashMap;

use log::debug;

use crate::core::process::Pid;

pub(crate) const DEFAULT_BACKOFF_FACTOR: u32 = 2;
pub(crate) const DEFAULT_BACKOFF_MAX: u32 = 1 << 12;

#[derive(Clone, Copy, Debug)]
struct ScanState {
    /// Pass periods between scans. Grows by `factor` on every scan that
    /// finds nothing new.
    backoff: u32,
    /// Passes left to skip before the next scan.
    skip: u32,
}

pub(crate) struct RescanScheduler {
    factor: u32,
    max: u32,
    states: HashMap<Pid, ScanState>,
}

impl RescanScheduler {
    pub(crate) fn new(factor: u32, max: u32) -> RescanScheduler {
        RescanScheduler {
            factor: factor.max(1),
            max: max.max(1),
            states: HashMap::new(),
        }
    }

    /// Whether `pid` is due for a scan this pass. Never-seen processes scan
    /// immediately; backed-off ones burn a skip credit instead.
    pub(crate) fn should_scan(&mut self, pid: &Pid) -> bool {
        match self.states.get_mut(pid) {
            None => true,
            Some(state) if state.skip == 0 => true,
            Some(state) => {
                state.skip -= 1;
                false
            }
        }
    }

    /// Record a completed scan. A scan that attached something resets the
    /// backoff; a *repeated* fruitless one grows it up to the cap. The first
    /// scan of a process leaves it due again on the very next pass.
    pub(crate) fn record_scan(&mut self, pid: Pid, found_new: bool) {
        let first = !self.states.contains_key(&pid);
        let state = self.states.entry(pid).or_insert(ScanState {
            backoff: 1,
            skip: 0,
        });
        if found_new {
            state.backoff = 1;
        } else if !first {
            state.backoff = state.backoff.saturating_mul(self.factor).min(self.max);
        }
        state.skip = state.backoff - 1;
        debug!(
            "pid {} rescan backoff now {} pass(es)",
            pid.tgid, state.backoff
        );
    }

    /// Kernel reported a new executable mapping in `pid`: drop whatever
    /// backoff accumulated so the next pass scans it again.
    pub(crate) fn notify_map_change(&mut self, pid: Pid) {
        if let Some(state) = self.states.get_mut(&pid) {
            state.backoff = 1;
            state.skip = 0;
        }
    }

    /// Drop all state for a terminated process.
    pub(crate) fn forget(&mut self, pid: &Pid) {
        self.states.remove(pid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(tgid: u32) -> Pid {
        Pid {
            tgid,
            start_time: 100,
        }
    }

    #[test]
    fn exponential_backoff() {
        let mut sched = RescanScheduler::new(2, 8);
        let p = pid(1);

        // First fruitless scan: still due on the very next pass.
        assert!(sched.should_scan(&p));
        sched.record_scan(p, false);
        assert!(sched.should_scan(&p));
        sched.record_scan(p, false);

        // backoff 2: skip one pass.
        assert!(!sched.should_scan(&p));
        assert!(sched.should_scan(&p));
        sched.record_scan(p, false);

        // backoff 4: skip three passes.
        for _ in 0..3 {
            assert!(!sched.should_scan(&p));
        }
        assert!(sched.should_scan(&p));
        sched.record_scan(p, false);
        sched.record_scan(p, false);

        // Capped at 8 despite further fruitless scans.
        for _ in 0..7 {
            assert!(!sched.should_scan(&p));
        }
        assert!(sched.should_scan(&p));
    }

    #[test]
    fn new_probes_reset_backoff() {
        let mut sched = RescanScheduler::new(2, 8);
        let p = pid(1);
        sched.record_scan(p, false);
        sched.record_scan(p, false);
        sched.record_scan(p, true);
        assert!(sched.should_scan(&p));
    }

    #[test]
    fn map_change_overrides_backoff() {
        let mut sched = RescanScheduler::new(2, 1 << 12);
        let p = pid(1);
        for _ in 0..3 {
            sched.record_scan(p, false);
        }
        // backoff 4, skips the next three passes without a notification.
        assert!(!sched.should_scan(&p));

        sched.notify_map_change(p);
        assert!(sched.should_scan(&p));
    }

    #[test]
    fn forget_clears_state() {
        let mut sched = RescanScheduler::new(2, 8);
        let p = pid(1);
        sched.record_scan(p, false);
        sched.record_scan(p, false);
        assert!(!sched.should_scan(&p));
        sched.forget(&p);
        assert!(sched.should_scan(&p));
    }
}
