//! Deterministic simulated host.
//!
//! `SimHost` implements the `Host` trait with a settable monotonic clock,
//! per-PCPU current-VCPU slots, per-domain online masks, and a softirq log
//! the caller can drain. Together with the trace recorder it drives the
//! scheduler through scripted timelines with no real hardware underneath.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use crate::cpumask::Cpumask;
use crate::host::{Host, HostVcpu};
use crate::sched::Scheduler;
use crate::types::{DomId, PcpuId, TimeNs};

pub struct SimHost {
    nr_pcpus: usize,
    clock: AtomicI64,
    running: Mutex<Vec<Option<Arc<HostVcpu>>>>,
    online: Mutex<HashMap<DomId, Cpumask>>,
    softirqs: Mutex<Vec<PcpuId>>,
}

impl SimHost {
    pub fn new(nr_pcpus: usize) -> Arc<Self> {
        Arc::new(SimHost {
            nr_pcpus,
            clock: AtomicI64::new(0),
            running: Mutex::new(vec![None; nr_pcpus]),
            online: Mutex::new(HashMap::new()),
            softirqs: Mutex::new(Vec::new()),
        })
    }

    pub fn set_now(&self, now: TimeNs) {
        self.clock.store(now, Ordering::Relaxed);
    }

    pub fn advance(&self, delta: TimeNs) {
        self.clock.fetch_add(delta, Ordering::Relaxed);
    }

    /// Publish what a PCPU is running, as the host context switcher would.
    pub fn set_running(&self, cpu: PcpuId, vcpu: Option<Arc<HostVcpu>>) {
        self.running.lock().unwrap()[cpu.0 as usize] = vcpu;
    }

    /// Restrict a domain's pool. Domains without an explicit mask see every
    /// PCPU online.
    pub fn set_online_mask(&self, dom: DomId, mask: Cpumask) {
        self.online.lock().unwrap().insert(dom, mask);
    }

    /// Drain the re-schedule requests raised since the last call.
    pub fn take_softirqs(&self) -> Vec<PcpuId> {
        std::mem::take(&mut self.softirqs.lock().unwrap())
    }
}

impl Host for SimHost {
    fn now(&self) -> TimeNs {
        self.clock.load(Ordering::Relaxed)
    }

    fn nr_pcpus(&self) -> usize {
        self.nr_pcpus
    }

    fn current_on(&self, cpu: PcpuId) -> Option<Arc<HostVcpu>> {
        self.running.lock().unwrap()[cpu.0 as usize].clone()
    }

    fn online_mask(&self, dom: DomId) -> Cpumask {
        self.online
            .lock()
            .unwrap()
            .get(&dom)
            .cloned()
            .unwrap_or_else(|| Cpumask::all(self.nr_pcpus))
    }

    fn raise_schedule_softirq(&self, cpu: PcpuId) {
        self.softirqs.lock().unwrap().push(cpu);
    }
}

/// A single dispatch decision as recorded by the runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    pub time_ns: TimeNs,
    pub cpu: u32,
    pub kind: TraceKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceKind {
    /// A partition VCPU was dispatched for `slice` nanoseconds.
    Ran {
        dom: DomId,
        vcpu: i32,
        slice: TimeNs,
    },
    /// The PCPU idled for `slice` nanoseconds.
    Idle { slice: TimeNs },
}

/// A complete timeline of dispatch decisions, in chronological order.
#[derive(Debug, Clone, Default)]
pub struct Trace {
    events: Vec<TraceEvent>,
}

impl Trace {
    pub fn new() -> Self {
        Trace { events: Vec::new() }
    }

    pub fn record(&mut self, time_ns: TimeNs, cpu: u32, kind: TraceKind) {
        self.events.push(TraceEvent { time_ns, cpu, kind });
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    /// Total dispatched time for one domain.
    pub fn busy_time(&self, dom: DomId) -> TimeNs {
        self.events
            .iter()
            .map(|e| match e.kind {
                TraceKind::Ran { dom: d, slice, .. } if d == dom => slice,
                _ => 0,
            })
            .sum()
    }

    /// Total idle time across all PCPUs.
    pub fn idle_time(&self) -> TimeNs {
        self.events
            .iter()
            .map(|e| match e.kind {
                TraceKind::Idle { slice } => slice,
                _ => 0,
            })
            .sum()
    }

    /// Pretty-print the trace for debugging.
    pub fn dump(&self) {
        for event in &self.events {
            let desc = match &event.kind {
                TraceKind::Ran { dom, vcpu, slice } => {
                    format!("RUN   dom={dom} vcpu={vcpu} slice={slice}")
                }
                TraceKind::Idle { slice } => format!("IDLE  slice={slice}"),
            };
            eprintln!("[{:>12} ns] cpu={:<3} {}", event.time_ns, event.cpu, desc);
        }
    }
}

/// Drive one PCPU until the clock reaches `until`: dispatch, publish the
/// decision to the host, record it, and jump the clock to the end of the
/// returned slice.
pub fn run_until(
    sched: &Scheduler<SimHost>,
    host: &SimHost,
    cpu: PcpuId,
    until: TimeNs,
    trace: &mut Trace,
) {
    while host.now() < until {
        let now = host.now();
        let slice = sched.do_schedule(cpu, now, false);
        host.set_running(cpu, Some(slice.task.clone()));

        let kind = if slice.task.idle {
            TraceKind::Idle { slice: slice.time }
        } else {
            TraceKind::Ran {
                dom: slice.task.dom,
                vcpu: slice.task.vcpu_id,
                slice: slice.time,
            }
        };
        trace.record(now, cpu.0, kind);

        host.set_now(now + slice.time);
    }
}
