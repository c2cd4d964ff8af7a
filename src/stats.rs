//! Per-instance counters.
//!
//! Updated under the instance lock on the paths that already hold it, read
//! out as a snapshot copy.

/// Counters accumulated over the life of a scheduler instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedStats {
    /// Total `do_schedule` invocations.
    pub dispatches: u64,
    /// Dispatches that returned the idle VCPU for any reason.
    pub idle_picks: u64,
    /// Major frames started.
    pub frames_started: u64,
    /// Elections vetoed because the candidate's PCPU differed from the
    /// dispatching PCPU.
    pub migration_vetoes: u64,
    /// Elections overridden by pending tasklet work.
    pub tasklet_overrides: u64,
    /// Schedules successfully installed.
    pub installs: u64,
    /// Install attempts rejected by validation.
    pub install_rejects: u64,
    /// Synthetic control-domain slots appended.
    pub control_slots: u64,
}

impl SchedStats {
    /// One-line summary for the log.
    pub fn summary(&self) -> String {
        format!(
            "dispatches={} idle={} frames={} mig_veto={} tasklet={} installs={}/{} ctl_slots={}",
            self.dispatches,
            self.idle_picks,
            self.frames_started,
            self.migration_vetoes,
            self.tasklet_overrides,
            self.installs,
            self.installs + self.install_rejects,
            self.control_slots,
        )
    }
}
