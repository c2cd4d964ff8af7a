//! a653sched - An ARINC 653 style time-partitioned VCPU scheduler core.
//!
//! Time is divided into a repeating major frame of fixed minor frames; each
//! minor frame is statically assigned to a service whose work one of an
//! ordered list of provider VCPUs executes. The dispatcher advances that
//! static schedule across wall-clock time; determinism, not throughput, is
//! the goal.
//!
//! # Architecture
//!
//! - **Scheduler**: the instance - registry, domain records, schedule table,
//!   and the `do_schedule` hot path, all behind one lock
//! - **Host**: the trait the embedding hypervisor implements (clock, per-PCPU
//!   current VCPU, online masks, re-schedule softirq)
//! - **Control plane**: schedule install/read and domain parameter put/get,
//!   with a fixed-shape wire format
//! - **SimHost**: a deterministic host for tests and the `a653sim` demo

pub mod config;
pub mod cpumask;
pub mod ctl;
pub mod domain;
pub mod host;
pub mod sched;
pub mod schedule;
pub mod sim;
pub mod stats;
pub mod types;

// Re-export the main public types for convenience.
pub use config::SchedConfig;
pub use cpumask::Cpumask;
pub use ctl::SchedError;
pub use domain::{DomainInfo, DomainParams};
pub use host::{Host, HostVcpu, TaskSlice};
pub use sched::{Scheduler, VcpuData};
pub use schedule::{
    EntryPlan, SchedulePlan, DEFAULT_TIMESLICE_NS, MAX_ENTRIES, MAX_PROVIDERS,
};
pub use sim::{SimHost, Trace, TraceEvent, TraceKind};
pub use stats::SchedStats;
pub use types::{DomId, DomainHandle, PcpuId, TimeNs, VcpuKey, NSEC_PER_MSEC};
