//! The host surface: what the hypervisor provides to the scheduler and the
//! shared view of a host VCPU.
//!
//! The scheduler never owns VCPUs. The host hands out `Arc<HostVcpu>`
//! references, fixes the PCPU placement at creation, and keeps the
//! `runnable` flag current; the dispatcher reads both when validating an
//! elected candidate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cpumask::Cpumask;
use crate::types::{DomId, DomainHandle, PcpuId, TimeNs, VcpuKey};

/// Host-owned state of one virtual CPU, shared with the scheduler.
#[derive(Debug)]
pub struct HostVcpu {
    pub dom: DomId,
    pub handle: DomainHandle,
    pub vcpu_id: i32,
    /// True for the per-PCPU idle sentinel the host runs when no partition
    /// is eligible.
    pub idle: bool,
    processor: PcpuId,
    runnable: AtomicBool,
}

impl HostVcpu {
    pub fn new(dom: DomId, handle: DomainHandle, vcpu_id: i32, processor: PcpuId) -> Arc<Self> {
        Arc::new(HostVcpu {
            dom,
            handle,
            vcpu_id,
            idle: false,
            processor,
            runnable: AtomicBool::new(false),
        })
    }

    /// The idle sentinel for one PCPU. It never appears in the registry or
    /// in a schedule entry.
    pub fn idle(processor: PcpuId) -> Arc<Self> {
        Arc::new(HostVcpu {
            dom: DomId(-1),
            handle: DomainHandle::ZERO,
            vcpu_id: processor.0 as i32,
            idle: true,
            processor,
            runnable: AtomicBool::new(true),
        })
    }

    pub fn key(&self) -> VcpuKey {
        VcpuKey::new(self.handle, self.vcpu_id)
    }

    /// The PCPU the host assigned this VCPU to.
    pub fn processor(&self) -> PcpuId {
        self.processor
    }

    /// Host-reported runnability, distinct from the scheduler's awake flag.
    pub fn is_runnable(&self) -> bool {
        self.runnable.load(Ordering::Relaxed)
    }

    pub fn set_runnable(&self, runnable: bool) {
        self.runnable.store(runnable, Ordering::Relaxed);
    }
}

/// One dispatch decision: the VCPU to run, how long until the next decision
/// point, and whether the VCPU was migrated (never, for this scheduler).
#[derive(Debug, Clone)]
pub struct TaskSlice {
    pub task: Arc<HostVcpu>,
    pub time: TimeNs,
    pub migrated: bool,
}

/// Services the host hypervisor provides to the scheduler.
pub trait Host {
    /// Monotonic clock in nanoseconds.
    fn now(&self) -> TimeNs;

    fn nr_pcpus(&self) -> usize;

    /// The VCPU currently running on the given PCPU, if the host has
    /// published one.
    fn current_on(&self, cpu: PcpuId) -> Option<Arc<HostVcpu>>;

    /// The online PCPU mask for a domain's pool.
    fn online_mask(&self, dom: DomId) -> Cpumask;

    /// Request a re-schedule on the given PCPU.
    fn raise_schedule_softirq(&self, cpu: PcpuId);
}
