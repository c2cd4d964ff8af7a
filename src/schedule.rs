//! The schedule table: minor-frame entries, provider lists, and the
//! feasibility rules enforced at install time.
//!
//! Storage is fixed-capacity inline arrays so the footprint of a table is
//! known at compile time and the dispatch path never allocates.

use crate::ctl::SchedError;
use crate::types::{TimeNs, VcpuKey, NSEC_PER_MSEC};

/// Maximum number of minor frames (services) per schedule. The control-plane
/// wire format encodes the same bound.
pub const MAX_ENTRIES: usize = 64;

/// Maximum number of candidate providers per schedule entry.
pub const MAX_PROVIDERS: usize = 8;

/// Timeslice used for synthetic control-domain entries and for the idle
/// slice of an empty schedule.
pub const DEFAULT_TIMESLICE_NS: TimeNs = 10 * NSEC_PER_MSEC;

/// One candidate executor for a schedule entry. `bound` caches the registry
/// slot the key currently resolves to; it is only valid under the instance
/// lock and is recomputed after every registry or table change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Provider {
    pub key: VcpuKey,
    pub(crate) bound: Option<usize>,
}

impl Provider {
    pub(crate) const EMPTY: Provider = Provider {
        key: VcpuKey {
            handle: crate::types::DomainHandle::ZERO,
            vcpu_id: 0,
        },
        bound: None,
    };

    pub fn new(key: VcpuKey) -> Self {
        Provider { key, bound: None }
    }

    /// The registry slot this provider currently resolves to, if any.
    pub fn bound(&self) -> Option<usize> {
        self.bound
    }
}

/// One minor frame: a service, its runtime, and its ordered provider list.
/// Provider order encodes primary/backup preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub service_id: i32,
    pub runtime: TimeNs,
    providers: [Provider; MAX_PROVIDERS],
    nr_providers: u32,
}

impl ScheduleEntry {
    pub(crate) const EMPTY: ScheduleEntry = ScheduleEntry {
        service_id: 0,
        runtime: 0,
        providers: [Provider::EMPTY; MAX_PROVIDERS],
        nr_providers: 0,
    };

    pub fn providers(&self) -> &[Provider] {
        &self.providers[..self.nr_providers as usize]
    }

    pub(crate) fn providers_mut(&mut self) -> &mut [Provider] {
        &mut self.providers[..self.nr_providers as usize]
    }
}

/// Install-time description of one schedule entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPlan {
    pub service_id: i32,
    pub runtime: TimeNs,
    pub providers: Vec<VcpuKey>,
}

/// Install-time description of a full schedule, as decoded from the control
/// plane or built programmatically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulePlan {
    pub major_frame: TimeNs,
    pub entries: Vec<EntryPlan>,
}

impl SchedulePlan {
    /// Shape and feasibility checks, applied before any mutation so a
    /// rejected plan leaves the installed table untouched.
    pub fn validate(&self) -> Result<(), SchedError> {
        if self.major_frame <= 0 {
            return Err(SchedError::InvalidArgument);
        }
        if self.entries.is_empty() || self.entries.len() > MAX_ENTRIES {
            return Err(SchedError::InvalidArgument);
        }

        let mut total_runtime: TimeNs = 0;
        for entry in &self.entries {
            if entry.runtime <= 0 {
                return Err(SchedError::InvalidArgument);
            }
            if entry.providers.is_empty() || entry.providers.len() > MAX_PROVIDERS {
                return Err(SchedError::InvalidArgument);
            }
            total_runtime = total_runtime
                .checked_add(entry.runtime)
                .ok_or(SchedError::InvalidArgument)?;
        }

        // The major frame must be long enough to run every entry.
        if total_runtime > self.major_frame {
            return Err(SchedError::InvalidArgument);
        }

        Ok(())
    }
}

/// The active schedule. Index i runs strictly before index i+1 within a
/// major frame.
#[derive(Debug, Clone)]
pub struct ScheduleTable {
    entries: [ScheduleEntry; MAX_ENTRIES],
    nr_entries: usize,
    major_frame: TimeNs,
}

impl ScheduleTable {
    pub fn new() -> Self {
        ScheduleTable {
            entries: [ScheduleEntry::EMPTY; MAX_ENTRIES],
            nr_entries: 0,
            major_frame: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.nr_entries
    }

    pub fn is_empty(&self) -> bool {
        self.nr_entries == 0
    }

    pub fn major_frame(&self) -> TimeNs {
        self.major_frame
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries[..self.nr_entries]
    }

    pub(crate) fn entries_mut(&mut self) -> &mut [ScheduleEntry] {
        &mut self.entries[..self.nr_entries]
    }

    /// Sum of entry runtimes. For a validated table this never exceeds
    /// `major_frame`.
    pub fn total_runtime(&self) -> TimeNs {
        self.entries().iter().map(|e| e.runtime).sum()
    }

    /// Overwrite the table from a validated plan. Bindings start cleared;
    /// the caller refreshes them from the registry.
    pub(crate) fn load(&mut self, plan: &SchedulePlan) {
        debug_assert!(plan.validate().is_ok());

        self.nr_entries = plan.entries.len();
        self.major_frame = plan.major_frame;
        for (slot, entry) in plan.entries.iter().enumerate() {
            let mut providers = [Provider::EMPTY; MAX_PROVIDERS];
            for (i, key) in entry.providers.iter().enumerate() {
                providers[i] = Provider::new(*key);
            }
            self.entries[slot] = ScheduleEntry {
                service_id: entry.service_id,
                runtime: entry.runtime,
                providers,
                nr_providers: entry.providers.len() as u32,
            };
        }
        for slot in self.nr_entries..MAX_ENTRIES {
            self.entries[slot] = ScheduleEntry::EMPTY;
        }
    }

    /// Append a synthetic slot for a control-domain VCPU and grow the major
    /// frame by the same amount, which keeps the feasibility invariant by
    /// construction. Returns false when the table is full.
    pub(crate) fn push_control_slot(&mut self, vcpu_id: i32, timeslice: TimeNs) -> bool {
        if self.nr_entries >= MAX_ENTRIES {
            return false;
        }

        let mut providers = [Provider::EMPTY; MAX_PROVIDERS];
        providers[0] = Provider::new(VcpuKey {
            handle: crate::types::DomainHandle::ZERO,
            vcpu_id,
        });
        self.entries[self.nr_entries] = ScheduleEntry {
            service_id: 0,
            runtime: timeslice,
            providers,
            nr_providers: 1,
        };
        self.nr_entries += 1;
        self.major_frame += timeslice;
        true
    }
}

impl Default for ScheduleTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DomainHandle;

    fn key(b: u8) -> VcpuKey {
        VcpuKey::new(DomainHandle::splat(b), 0)
    }

    fn plan_of(major_frame: TimeNs, runtimes: &[TimeNs]) -> SchedulePlan {
        SchedulePlan {
            major_frame,
            entries: runtimes
                .iter()
                .enumerate()
                .map(|(i, &runtime)| EntryPlan {
                    service_id: i as i32,
                    runtime,
                    providers: vec![key(i as u8 + 1)],
                })
                .collect(),
        }
    }

    #[test]
    fn valid_plan_accepted() {
        let plan = plan_of(30 * NSEC_PER_MSEC, &[10, 10, 10].map(|m| m * NSEC_PER_MSEC));
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn infeasible_plan_rejected() {
        let plan = plan_of(10 * NSEC_PER_MSEC, &[20 * NSEC_PER_MSEC]);
        assert_eq!(plan.validate(), Err(SchedError::InvalidArgument));
    }

    #[test]
    fn zero_major_frame_rejected() {
        let plan = plan_of(0, &[]);
        assert_eq!(plan.validate(), Err(SchedError::InvalidArgument));
    }

    #[test]
    fn zero_runtime_rejected() {
        let plan = plan_of(NSEC_PER_MSEC, &[0]);
        assert_eq!(plan.validate(), Err(SchedError::InvalidArgument));
    }

    #[test]
    fn provider_bounds_enforced() {
        let mut plan = plan_of(30 * NSEC_PER_MSEC, &[10 * NSEC_PER_MSEC]);
        plan.entries[0].providers.clear();
        assert_eq!(plan.validate(), Err(SchedError::InvalidArgument));

        plan.entries[0].providers = (0..=MAX_PROVIDERS as u8).map(key).collect();
        assert_eq!(plan.validate(), Err(SchedError::InvalidArgument));
    }

    #[test]
    fn runtime_sum_overflow_rejected() {
        let plan = plan_of(TimeNs::MAX, &[TimeNs::MAX, TimeNs::MAX]);
        assert_eq!(plan.validate(), Err(SchedError::InvalidArgument));
    }

    #[test]
    fn load_copies_plan() {
        let plan = plan_of(30 * NSEC_PER_MSEC, &[10, 20].map(|m| m * NSEC_PER_MSEC));
        let mut table = ScheduleTable::new();
        table.load(&plan);
        assert_eq!(table.len(), 2);
        assert_eq!(table.major_frame(), 30 * NSEC_PER_MSEC);
        assert_eq!(table.total_runtime(), 30 * NSEC_PER_MSEC);
        assert_eq!(table.entries()[1].providers()[0].key, key(2));
        assert_eq!(table.entries()[1].providers()[0].bound(), None);
    }

    #[test]
    fn control_slot_grows_frame_in_step() {
        let mut table = ScheduleTable::new();
        assert!(table.push_control_slot(0, DEFAULT_TIMESLICE_NS));
        assert!(table.push_control_slot(1, DEFAULT_TIMESLICE_NS));
        assert_eq!(table.len(), 2);
        assert_eq!(table.major_frame(), 2 * DEFAULT_TIMESLICE_NS);
        assert_eq!(table.total_runtime(), table.major_frame());
    }

    #[test]
    fn control_slot_stops_at_capacity() {
        let mut table = ScheduleTable::new();
        for i in 0..MAX_ENTRIES {
            assert!(table.push_control_slot(i as i32, DEFAULT_TIMESLICE_NS));
        }
        assert!(!table.push_control_slot(64, DEFAULT_TIMESLICE_NS));
        assert_eq!(table.len(), MAX_ENTRIES);
    }
}
