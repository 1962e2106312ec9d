use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefreshOutcome {
    Completed { devices: usize, accepted: usize },
    TimedOut,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub passes_completed: u64,
    pub passes_aborted: u64,
    pub refreshes: u64,
    pub refreshes_timed_out: u32,
    pub refreshes_failed: u32,
    pub payloads_accepted: u64,
}

/// Decides which delivery passes are preceded by a discovery refresh.
#[derive(Debug)]
pub struct CycleScheduler {
    refresh_every: u32,
    pass_index: u64,
    stats: SchedulerStats,
}

impl CycleScheduler {
    pub fn new(refresh_every: u32) -> Self {
        Self {
            refresh_every: refresh_every.max(1),
            pass_index: 0,
            stats: SchedulerStats::default(),
        }
    }

    /// True for the first pass and every `refresh_every`-th one after it.
    pub fn refresh_due(&self) -> bool {
        self.pass_index % u64::from(self.refresh_every) == 0
    }

    pub fn record_refresh(&mut self, outcome: RefreshOutcome) {
        self.stats.refreshes += 1;
        match outcome {
            RefreshOutcome::Completed { accepted, .. } => {
                self.stats.payloads_accepted += accepted as u64;
            }
            RefreshOutcome::TimedOut => self.stats.refreshes_timed_out += 1,
            RefreshOutcome::Failed => self.stats.refreshes_failed += 1,
        }
    }

    /// Close out the current pass; `aborted` when the bus could not be recovered.
    pub fn complete_pass(&mut self, aborted: bool) {
        if aborted {
            self.stats.passes_aborted += 1;
        } else {
            self.stats.passes_completed += 1;
        }
        self.pass_index = self.pass_index.wrapping_add(1);
    }

    pub fn pass_index(&self) -> u64 {
        self.pass_index
    }

    pub fn get_stats(&self) -> &SchedulerStats {
        &self.stats
    }
}

impl Default for CycleScheduler {
    fn default() -> Self {
        Self::new(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_every_fifth_pass() {
        let mut scheduler = CycleScheduler::new(5);
        let mut due = Vec::new();
        for _ in 0..11 {
            due.push(scheduler.refresh_due());
            scheduler.complete_pass(false);
        }
        assert_eq!(
            due,
            [true, false, false, false, false, true, false, false, false, false, true]
        );
        assert_eq!(scheduler.get_stats().passes_completed, 11);
    }

    #[test]
    fn test_zero_interval_refreshes_every_pass() {
        let mut scheduler = CycleScheduler::new(0);
        for _ in 0..3 {
            assert!(scheduler.refresh_due());
            scheduler.complete_pass(false);
        }
    }

    #[test]
    fn test_refresh_outcomes_counted() {
        let mut scheduler = CycleScheduler::default();
        scheduler.record_refresh(RefreshOutcome::Completed { devices: 6, accepted: 3 });
        scheduler.record_refresh(RefreshOutcome::TimedOut);
        scheduler.record_refresh(RefreshOutcome::Failed);
        scheduler.complete_pass(true);

        let stats = scheduler.get_stats();
        assert_eq!(stats.refreshes, 3);
        assert_eq!(stats.payloads_accepted, 3);
        assert_eq!(stats.refreshes_timed_out, 1);
        assert_eq!(stats.refreshes_failed, 1);
        assert_eq!(stats.passes_aborted, 1);
        assert_eq!(scheduler.pass_index(), 1);
    }
}
