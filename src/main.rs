//! a653sim - Drive the partition scheduler over a simulated timeline.
//!
//! Builds a three-partition round (10 ms each, 30 ms major frame) on a
//! deterministic simulated host, runs the dispatcher for the requested
//! duration, and reports per-partition CPU time and scheduler counters.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use log::info;

use a653sched::sim::run_until;
use a653sched::{
    DomId, DomainHandle, EntryPlan, HostVcpu, PcpuId, SchedConfig, SchedulePlan, Scheduler,
    SimHost, Trace, VcpuData, VcpuKey, NSEC_PER_MSEC,
};

#[derive(Debug, Parser)]
struct Opts {
    /// Enable verbose output.
    /// Specify multiple times to increase verbosity.
    #[clap(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Number of simulated PCPUs.
    #[clap(short, long, default_value_t = 1)]
    cpus: u32,

    /// Simulated duration in milliseconds.
    #[clap(short, long, default_value_t = 120)]
    duration_ms: u64,

    /// Scheduler config: a JSON file path or an inline JSON string.
    #[clap(long)]
    config: Option<String>,

    /// Print the dispatch trace to stderr.
    #[clap(long)]
    dump_trace: bool,
}

fn main() -> Result<()> {
    let opts = Opts::parse();

    let llv = match opts.verbose {
        0 => simplelog::LevelFilter::Info,
        1 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    };
    let mut lcfg = simplelog::ConfigBuilder::new();
    lcfg.set_time_level(simplelog::LevelFilter::Error)
        .set_location_level(simplelog::LevelFilter::Off)
        .set_target_level(simplelog::LevelFilter::Off)
        .set_thread_level(simplelog::LevelFilter::Off);
    simplelog::TermLogger::init(
        llv,
        lcfg.build(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )?;

    let config = match &opts.config {
        Some(input) => SchedConfig::parse(input)?,
        None => SchedConfig::default(),
    };

    let host = SimHost::new(opts.cpus as usize);
    let sched = Scheduler::new(Arc::clone(&host), config);

    for cpu in 0..opts.cpus {
        let cpu = PcpuId(cpu);
        sched.switch_sched(cpu, VcpuData::new(HostVcpu::idle(cpu)));
    }

    // Three partitions, one VCPU each, all on PCPU 0.
    let partitions = [
        (DomId(1), DomainHandle::splat(0xaa)),
        (DomId(2), DomainHandle::splat(0xbb)),
        (DomId(3), DomainHandle::splat(0xcc)),
    ];
    for (dom, handle) in partitions {
        sched.init_domain(dom);
        let vcpu = HostVcpu::new(dom, handle, 0, PcpuId(0));
        vcpu.set_runnable(true);
        sched.insert_vcpu(VcpuData::new(Arc::clone(&vcpu)));
        sched.wake(&vcpu);
    }

    let plan = SchedulePlan {
        major_frame: 30 * NSEC_PER_MSEC,
        entries: partitions
            .iter()
            .map(|(dom, handle)| EntryPlan {
                service_id: dom.0,
                runtime: 10 * NSEC_PER_MSEC,
                providers: vec![VcpuKey::new(*handle, 0)],
            })
            .collect(),
    };
    sched.install_schedule(&plan)?;

    let mut trace = Trace::new();
    run_until(
        &sched,
        &host,
        PcpuId(0),
        opts.duration_ms as i64 * NSEC_PER_MSEC,
        &mut trace,
    );

    if opts.dump_trace {
        trace.dump();
    }

    for (dom, _) in partitions {
        info!(
            "dom {dom}: ran {} ms",
            trace.busy_time(dom) / NSEC_PER_MSEC
        );
    }
    info!("idle: {} ms", trace.idle_time() / NSEC_PER_MSEC);
    info!("{}", sched.stats().summary());

    Ok(())
}
