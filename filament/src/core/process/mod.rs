//! Process identity and lifetime tracking.

pub(crate) mod proc;

use std::collections::HashSet;

/// A process identity stable across pid reuse: the thread group id paired
/// with the kernel start time (clock ticks since boot, field 22 of
/// `/proc/<pid>/stat`).
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub(crate) struct Pid {
    pub(crate) tgid: u32,
    pub(crate) start_time: u64,
}

/// Result of one tracker update: processes seen for the first time and
/// processes gone since the previous update.
#[derive(Debug, Default)]
pub(crate) struct ProcessDiff {
    pub(crate) new: Vec<Pid>,
    pub(crate) deleted: Vec<Pid>,
}

/// Diffs successive process snapshots. A reused tgid with a different start
/// time shows up as one deletion plus one addition.
#[derive(Default)]
pub(crate) struct ProcessTracker {
    known: HashSet<Pid>,
}

impl ProcessTracker {
    pub(crate) fn update(&mut self, live: &HashSet<Pid>) -> ProcessDiff {
        let new = live.difference(&self.known).copied().collect();
        let deleted = self.known.difference(live).copied().collect();
        self.known = live.clone();
        ProcessDiff { new, deleted }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(tgid: u32, start_time: u64) -> Pid {
        Pid { tgid, start_time }
    }

    #[test]
    fn tracker_diffs_snapshots() {
        let mut tracker = ProcessTracker::default();

        let diff = tracker.update(&HashSet::from([pid(1, 10), pid(2, 20)]));
        assert_eq!(diff.new.len(), 2);
        assert!(diff.deleted.is_empty());

        // No change.
        let diff = tracker.update(&HashSet::from([pid(1, 10), pid(2, 20)]));
        assert!(diff.new.is_empty() && diff.deleted.is_empty());

        // Process 2 exited, 3 appeared.
        let diff = tracker.update(&HashSet::from([pid(1, 10), pid(3, 30)]));
        assert_eq!(diff.new, vec![pid(3, 30)]);
        assert_eq!(diff.deleted, vec![pid(2, 20)]);
    }

    #[test]
    fn pid_reuse_is_delete_plus_add() {
        let mut tracker = ProcessTracker::default();
        tracker.update(&HashSet::from([pid(1, 10)]));
        let diff = tracker.update(&HashSet::from([pid(1, 99)]));
        assert_eq!(diff.new, vec![pid(1, 99)]);
        assert_eq!(diff.deleted, vec![pid(1, 10)]);
    }
}
