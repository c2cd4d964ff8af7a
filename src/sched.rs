//! The scheduler instance and its dispatch loop.
//!
//! One instance owns the schedule table, the VCPU registry, and the per-domain
//! records, all behind a single lock. Multiple PCPUs call `do_schedule`
//! concurrently; the lock is the only mutator gate, and it nests inside the
//! host's pool lock (never acquire the pool lock while holding it).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::{debug, info};

use crate::config::SchedConfig;
use crate::ctl::SchedError;
use crate::domain::{DomainInfo, DomainParams};
use crate::host::{Host, HostVcpu, TaskSlice};
use crate::schedule::{SchedulePlan, ScheduleTable};
use crate::stats::SchedStats;
use crate::types::{DomId, PcpuId, TimeNs, VcpuKey};

/// Scheduler-private record for one VCPU. Created asleep and unlinked;
/// linked into the registry by `insert_vcpu` and unlinked by `remove_vcpu`.
/// This record is the authoritative home of the awake flag.
#[derive(Debug)]
pub struct VcpuData {
    pub(crate) vcpu: Arc<HostVcpu>,
    pub(crate) awake: bool,
    pub(crate) linked: bool,
}

impl VcpuData {
    pub fn new(vcpu: Arc<HostVcpu>) -> Self {
        VcpuData {
            vcpu,
            awake: false,
            linked: false,
        }
    }

    pub fn is_awake(&self) -> bool {
        self.awake
    }
}

struct Inner {
    table: ScheduleTable,
    /// When the next major frame starts. Only moves forward, except that a
    /// schedule install pulls it to "now" so the new table takes effect
    /// immediately.
    next_major_frame: TimeNs,
    /// Cursor into the table for the frame in progress. Instance state, not
    /// PCPU state: it tracks wall-clock position within the major frame.
    sched_index: usize,
    next_switch_time: TimeNs,
    registry: Vec<VcpuData>,
    domains: HashMap<DomId, DomainInfo>,
    /// Idle records installed per PCPU by `switch_sched`. A PCPU must be
    /// switched in before it may dispatch.
    pcpus: Vec<Option<VcpuData>>,
    stats: SchedStats,
}

/// An ARINC 653 style time-partitioned scheduler instance.
pub struct Scheduler<H: Host> {
    host: Arc<H>,
    config: SchedConfig,
    inner: Mutex<Inner>,
}

fn find_record(registry: &[VcpuData], vcpu: &Arc<HostVcpu>) -> Option<usize> {
    registry.iter().position(|rec| Arc::ptr_eq(&rec.vcpu, vcpu))
}

/// Recompute every provider binding from the registry. Bindings are indices
/// into the registry and go stale on any membership or table change, so the
/// whole table is rebound wholesale.
fn refresh_bindings(inner: &mut Inner) {
    let Inner {
        table, registry, ..
    } = inner;
    for entry in table.entries_mut() {
        for provider in entry.providers_mut() {
            provider.bound = registry
                .iter()
                .position(|rec| rec.vcpu.key() == provider.key);
        }
    }
}

/// Pick the provider that executes this minor frame: the first one, in entry
/// order, whose binding resolves and whose domain record exists and is
/// healthy. Sleep and runnability are not election filters; they are checked
/// on the winner afterwards.
fn elect_provider(inner: &Inner, index: usize) -> Option<usize> {
    for provider in inner.table.entries()[index].providers() {
        let Some(slot) = provider.bound else {
            continue;
        };
        let rec = &inner.registry[slot];
        match inner.domains.get(&rec.vcpu.dom) {
            Some(dom) if dom.healthy => return Some(slot),
            _ => {}
        }
    }
    None
}

impl<H: Host> Scheduler<H> {
    pub fn new(host: Arc<H>, config: SchedConfig) -> Self {
        let nr_pcpus = host.nr_pcpus();
        Scheduler {
            host,
            config,
            inner: Mutex::new(Inner {
                table: ScheduleTable::new(),
                next_major_frame: 0,
                sched_index: 0,
                next_switch_time: 0,
                registry: Vec::new(),
                domains: HashMap::new(),
                pcpus: (0..nr_pcpus).map(|_| None).collect(),
                stats: SchedStats::default(),
            }),
        }
    }

    /// Take over a PCPU: install the record for its idle VCPU. From here on
    /// the instance lock serializes scheduling on this PCPU.
    pub fn switch_sched(&self, cpu: PcpuId, idle_data: VcpuData) {
        assert!(idle_data.vcpu.idle);
        let mut inner = self.inner.lock().unwrap();
        inner.pcpus[cpu.0 as usize] = Some(idle_data);
    }

    /// Link a VCPU record into the registry. When enabled, a control-domain
    /// VCPU also gets a synthetic schedule slot so the control domain can
    /// run before any operator schedule is installed; the major frame grows
    /// by the same timeslice, so feasibility holds by construction.
    pub fn insert_vcpu(&self, mut data: VcpuData) {
        debug_assert!(!data.vcpu.idle);
        debug_assert!(!data.linked);

        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;

        if self.config.control_slot && data.vcpu.dom == DomId::CONTROL {
            if inner
                .table
                .push_control_slot(data.vcpu.vcpu_id, self.config.default_timeslice_ns)
            {
                inner.stats.control_slots += 1;
                debug!(
                    "control slot for vcpu {} of dom {}, major frame now {} ns",
                    data.vcpu.vcpu_id,
                    data.vcpu.dom,
                    inner.table.major_frame()
                );
            }
        }

        data.linked = true;
        inner.registry.push(data);
        refresh_bindings(inner);
    }

    /// Unlink a VCPU record and hand it back. Providers bound to it resolve
    /// to nothing until an equivalent VCPU is inserted again.
    pub fn remove_vcpu(&self, vcpu: &Arc<HostVcpu>) -> Option<VcpuData> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;

        let slot = find_record(&inner.registry, vcpu)?;
        let mut data = inner.registry.remove(slot);
        data.linked = false;
        refresh_bindings(inner);
        Some(data)
    }

    /// Create the scheduler record for a new domain: its own parent,
    /// primary, healthy.
    pub fn init_domain(&self, dom: DomId) {
        info!("new domain {dom}");
        let mut inner = self.inner.lock().unwrap();
        inner.domains.insert(dom, DomainInfo::new(dom));
    }

    pub fn destroy_domain(&self, dom: DomId) {
        let mut inner = self.inner.lock().unwrap();
        inner.domains.remove(&dom);
    }

    /// Mark a VCPU asleep. If it is the one currently running on its PCPU,
    /// ask that PCPU to re-schedule so the dispatcher can pick idle.
    pub fn sleep(&self, vcpu: &Arc<HostVcpu>) {
        {
            let mut inner = self.inner.lock().unwrap();
            if let Some(slot) = find_record(&inner.registry, vcpu) {
                inner.registry[slot].awake = false;
            }
        }

        let cpu = vcpu.processor();
        let is_current = self
            .host
            .current_on(cpu)
            .is_some_and(|curr| Arc::ptr_eq(&curr, vcpu));
        if is_current {
            self.host.raise_schedule_softirq(cpu);
        }
    }

    /// Mark a VCPU awake and request a re-schedule on its PCPU. Whether the
    /// wake actually changes anything is the dispatcher's call.
    pub fn wake(&self, vcpu: &Arc<HostVcpu>) {
        {
            let mut inner = self.inner.lock().unwrap();
            if let Some(slot) = find_record(&inner.registry, vcpu) {
                inner.registry[slot].awake = true;
            }
        }

        self.host.raise_schedule_softirq(vcpu.processor());
    }

    /// Keep the VCPU where it is if its PCPU is in the domain's online mask;
    /// otherwise fall back to the first online PCPU. No rebalancing.
    pub fn pick_cpu(&self, vcpu: &Arc<HostVcpu>) -> PcpuId {
        let online = self.host.online_mask(vcpu.dom);
        let cpu = vcpu.processor();
        if online.test_cpu(cpu.0 as usize) {
            return cpu;
        }
        match online.first() {
            Some(first) => PcpuId(first as u32),
            None => cpu,
        }
    }

    /// The dispatcher. Advances the frame cursor to `now`, elects a provider
    /// for the current minor frame, and returns what to run and for how
    /// long. Executes entirely under the instance lock; the tasklet and
    /// migration overrides are applied after it is released.
    pub fn do_schedule(&self, cpu: PcpuId, now: TimeNs, tasklet_pending: bool) -> TaskSlice {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        inner.stats.dispatches += 1;

        let mut elected = None;
        if inner.table.is_empty() {
            // No schedule installed: idle for one default timeslice.
            inner.sched_index = 0;
            inner.next_major_frame = now + self.config.default_timeslice_ns;
            inner.next_switch_time = inner.next_major_frame;
        } else {
            if now >= inner.next_major_frame {
                // A new major frame begins where the previous one ended,
                // unless dispatch fell a full frame or more behind (first
                // dispatch after boot or install); then it begins now.
                let start = if now - inner.next_major_frame >= inner.table.major_frame() {
                    now
                } else {
                    inner.next_major_frame
                };
                inner.sched_index = 0;
                inner.next_major_frame = start + inner.table.major_frame();
                inner.next_switch_time = start + inner.table.entries()[0].runtime;
                inner.stats.frames_started += 1;
            }

            // Step over minor frames that have already elapsed. The cursor
            // resting at `nr_entries` means the frame's entries are
            // exhausted and the trailing gap runs idle until the next major
            // frame.
            let nr_entries = inner.table.len();
            while now >= inner.next_switch_time && inner.sched_index < nr_entries {
                inner.sched_index += 1;
                inner.next_switch_time = if inner.sched_index < nr_entries {
                    inner.next_switch_time + inner.table.entries()[inner.sched_index].runtime
                } else {
                    inner.next_major_frame
                };
            }

            if inner.sched_index < nr_entries {
                elected = elect_provider(inner, inner.sched_index);
            }
        }

        // A missed major frame means the partitioning guarantee is already
        // broken; halting is the safe posture.
        assert!(
            now < inner.next_major_frame,
            "missed major frame: now={now} next_major_frame={}",
            inner.next_major_frame
        );

        // The winner must be awake and host-runnable; otherwise its slot
        // idles. Backups are not promoted here: health is an explicit
        // operator signal, sleep is not.
        let candidate = elected.and_then(|slot| {
            let rec = &inner.registry[slot];
            (rec.awake && rec.vcpu.is_runnable()).then(|| rec.vcpu.clone())
        });

        let idle = inner.pcpus[cpu.0 as usize]
            .as_ref()
            .expect("PCPU dispatched without switch_sched")
            .vcpu
            .clone();

        let slice = inner.next_switch_time - now;
        assert!(slice > 0, "non-positive slice {slice} at now={now}");

        let mut task = candidate.unwrap_or_else(|| idle.clone());
        let migration_veto = !task.idle && task.processor() != cpu;
        if tasklet_pending {
            inner.stats.tasklet_overrides += 1;
        } else if migration_veto {
            inner.stats.migration_vetoes += 1;
        }
        if tasklet_pending || migration_veto || task.idle {
            inner.stats.idle_picks += 1;
        }
        drop(guard);

        // Tasklet work runs in idle context and overrides the election; a
        // VCPU whose host processor is elsewhere is never run here (this
        // scheduler does not migrate).
        if tasklet_pending || migration_veto {
            task = idle;
        }

        TaskSlice {
            task,
            time: slice,
            migrated: false,
        }
    }

    /// Install a new schedule. Validation happens before any mutation, so a
    /// rejected plan leaves the current table untouched. On success the new
    /// schedule takes effect at the very next dispatch: the next major frame
    /// is pulled to now rather than waiting for the current one to expire.
    pub fn install_schedule(&self, plan: &SchedulePlan) -> Result<(), SchedError> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;

        if let Err(err) = plan.validate() {
            inner.stats.install_rejects += 1;
            return Err(err);
        }

        inner.table.load(plan);
        refresh_bindings(inner);
        inner.next_major_frame = self.host.now();
        inner.stats.installs += 1;

        info!(
            "installed schedule: {} entries, major frame {} ns",
            inner.table.len(),
            inner.table.major_frame()
        );
        Ok(())
    }

    /// Snapshot the current schedule as a plan.
    pub fn schedule(&self) -> SchedulePlan {
        let inner = self.inner.lock().unwrap();
        SchedulePlan {
            major_frame: inner.table.major_frame(),
            entries: inner
                .table
                .entries()
                .iter()
                .map(|entry| crate::schedule::EntryPlan {
                    service_id: entry.service_id,
                    runtime: entry.runtime,
                    providers: entry.providers().iter().map(|p| p.key).collect(),
                })
                .collect(),
        }
    }

    /// Write the adjustable parameters of a domain.
    pub fn set_domain_params(
        &self,
        dom: DomId,
        params: &DomainParams,
    ) -> Result<(), SchedError> {
        let mut inner = self.inner.lock().unwrap();
        let sdom = inner
            .domains
            .get_mut(&dom)
            .ok_or(SchedError::InvalidArgument)?;

        let old_parent = sdom.parent;
        sdom.apply(dom, params);
        info!(
            "dom {dom}: parent {old_parent} -> {} {} {}",
            sdom.parent,
            if sdom.primary { "primary" } else { "backup" },
            if sdom.healthy { "healthy" } else { "unhealthy" },
        );
        Ok(())
    }

    /// Read back the adjustable parameters of a domain.
    pub fn domain_params(&self, dom: DomId) -> Result<DomainParams, SchedError> {
        let inner = self.inner.lock().unwrap();
        inner
            .domains
            .get(&dom)
            .map(DomainParams::from_info)
            .ok_or(SchedError::InvalidArgument)
    }

    /// Snapshot of the schedule table, bindings included.
    pub fn table_snapshot(&self) -> ScheduleTable {
        self.inner.lock().unwrap().table.clone()
    }

    /// The `(handle, vcpu)` keys currently in the registry, in slot order.
    pub fn registry_keys(&self) -> Vec<VcpuKey> {
        self.inner
            .lock()
            .unwrap()
            .registry
            .iter()
            .map(|rec| rec.vcpu.key())
            .collect()
    }

    pub fn stats(&self) -> SchedStats {
        self.inner.lock().unwrap().stats
    }
}
