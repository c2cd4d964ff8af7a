//! Dispatcher scenarios on the simulated host: full rounds, trailing idle,
//! backup promotion, sleep/wake, immediate install, and the override rules.

use std::sync::Arc;

use a653sched::{
    DomId, DomainHandle, DomainParams, EntryPlan, HostVcpu, PcpuId, SchedConfig, SchedulePlan,
    Scheduler, SimHost, TimeNs, VcpuData, VcpuKey, DEFAULT_TIMESLICE_NS, NSEC_PER_MSEC,
};

const MS: TimeNs = NSEC_PER_MSEC;
const CPU0: PcpuId = PcpuId(0);

fn fixture(nr_cpus: usize) -> (Arc<SimHost>, Scheduler<SimHost>) {
    let host = SimHost::new(nr_cpus);
    let sched = Scheduler::new(Arc::clone(&host), SchedConfig::default());
    for cpu in 0..nr_cpus as u32 {
        let cpu = PcpuId(cpu);
        sched.switch_sched(cpu, VcpuData::new(HostVcpu::idle(cpu)));
    }
    (host, sched)
}

/// Create a domain with one awake, runnable VCPU on the given PCPU.
fn attach(
    sched: &Scheduler<SimHost>,
    dom: i32,
    handle_byte: u8,
    cpu: u32,
) -> Arc<HostVcpu> {
    let dom = DomId(dom);
    sched.init_domain(dom);
    let vcpu = HostVcpu::new(dom, DomainHandle::splat(handle_byte), 0, PcpuId(cpu));
    vcpu.set_runnable(true);
    sched.insert_vcpu(VcpuData::new(Arc::clone(&vcpu)));
    sched.wake(&vcpu);
    vcpu
}

fn round_robin_plan(major_frame_ms: TimeNs, handles: &[u8]) -> SchedulePlan {
    SchedulePlan {
        major_frame: major_frame_ms * MS,
        entries: handles
            .iter()
            .enumerate()
            .map(|(i, &b)| EntryPlan {
                service_id: i as i32,
                runtime: 10 * MS,
                providers: vec![VcpuKey::new(DomainHandle::splat(b), 0)],
            })
            .collect(),
    }
}

#[test]
fn simple_round() {
    let (_host, sched) = fixture(1);
    let a = attach(&sched, 1, 0xaa, 0);
    let b = attach(&sched, 2, 0xbb, 0);
    let c = attach(&sched, 3, 0xcc, 0);
    sched.install_schedule(&round_robin_plan(30, &[0xaa, 0xbb, 0xcc])).unwrap();

    // Walk the first frame in 1 ms steps: A for 10 ms, then B, then C.
    for t in 0..30 {
        let slice = sched.do_schedule(CPU0, t * MS, false);
        let expected = match t {
            0..=9 => &a,
            10..=19 => &b,
            _ => &c,
        };
        assert!(
            Arc::ptr_eq(&slice.task, expected),
            "wrong partition at t={t} ms"
        );
        assert!(slice.time > 0);
        assert!(!slice.migrated);
    }

    // The slices at the frame's decision points sum to the major frame.
    let mut now = 30 * MS;
    let mut total = 0;
    for _ in 0..3 {
        let slice = sched.do_schedule(CPU0, now, false);
        total += slice.time;
        now += slice.time;
    }
    assert_eq!(total, 30 * MS);
}

#[test]
fn trailing_gap_idles() {
    let (_host, sched) = fixture(1);
    let a = attach(&sched, 1, 0xaa, 0);
    let _b = attach(&sched, 2, 0xbb, 0);
    let _c = attach(&sched, 3, 0xcc, 0);
    sched.install_schedule(&round_robin_plan(50, &[0xaa, 0xbb, 0xcc])).unwrap();

    sched.do_schedule(CPU0, 0, false);

    // Between the last entry's end and the major frame boundary the PCPU
    // runs idle.
    let slice = sched.do_schedule(CPU0, 30 * MS, false);
    assert!(slice.task.idle);
    assert_eq!(slice.time, 20 * MS);

    let slice = sched.do_schedule(CPU0, 42 * MS, false);
    assert!(slice.task.idle);
    assert_eq!(slice.time, 8 * MS);

    // At the boundary the round restarts with A.
    let slice = sched.do_schedule(CPU0, 50 * MS, false);
    assert!(Arc::ptr_eq(&slice.task, &a));
    assert_eq!(slice.time, 10 * MS);
}

#[test]
fn backup_promotion_follows_health() {
    let (_host, sched) = fixture(1);
    let primary = attach(&sched, 1, 0xaa, 0);
    let backup = attach(&sched, 2, 0xab, 0);

    sched
        .install_schedule(&SchedulePlan {
            major_frame: 10 * MS,
            entries: vec![EntryPlan {
                service_id: 7,
                runtime: 10 * MS,
                providers: vec![
                    VcpuKey::new(DomainHandle::splat(0xaa), 0),
                    VcpuKey::new(DomainHandle::splat(0xab), 0),
                ],
            }],
        })
        .unwrap();

    let slice = sched.do_schedule(CPU0, 0, false);
    assert!(Arc::ptr_eq(&slice.task, &primary));

    // Marking the primary's domain unhealthy promotes the backup at the
    // very next dispatch.
    sched
        .set_domain_params(
            DomId(1),
            &DomainParams {
                parent: -1,
                healthy: false,
            },
        )
        .unwrap();
    let slice = sched.do_schedule(CPU0, 1 * MS, false);
    assert!(Arc::ptr_eq(&slice.task, &backup));

    // Restoring health restores the primary.
    sched
        .set_domain_params(
            DomId(1),
            &DomainParams {
                parent: -1,
                healthy: true,
            },
        )
        .unwrap();
    let slice = sched.do_schedule(CPU0, 2 * MS, false);
    assert!(Arc::ptr_eq(&slice.task, &primary));
}

#[test]
fn no_healthy_provider_idles() {
    let (_host, sched) = fixture(1);
    attach(&sched, 1, 0xaa, 0);
    attach(&sched, 2, 0xab, 0);
    sched
        .install_schedule(&SchedulePlan {
            major_frame: 10 * MS,
            entries: vec![EntryPlan {
                service_id: 7,
                runtime: 10 * MS,
                providers: vec![
                    VcpuKey::new(DomainHandle::splat(0xaa), 0),
                    VcpuKey::new(DomainHandle::splat(0xab), 0),
                ],
            }],
        })
        .unwrap();

    for dom in [1, 2] {
        sched
            .set_domain_params(
                DomId(dom),
                &DomainParams {
                    parent: -1,
                    healthy: false,
                },
            )
            .unwrap();
    }
    let slice = sched.do_schedule(CPU0, 0, false);
    assert!(slice.task.idle);
}

#[test]
fn sleeping_vcpu_idles_until_woken() {
    let (host, sched) = fixture(1);
    let a = attach(&sched, 1, 0xaa, 0);
    sched.install_schedule(&round_robin_plan(10, &[0xaa])).unwrap();

    let slice = sched.do_schedule(CPU0, 0, false);
    assert!(Arc::ptr_eq(&slice.task, &a));
    host.set_running(CPU0, Some(Arc::clone(&a)));
    host.take_softirqs();

    // Sleeping the currently-running VCPU requests a re-schedule on its
    // PCPU, and the next dispatch picks idle.
    sched.sleep(&a);
    assert_eq!(host.take_softirqs(), vec![CPU0]);

    let slice = sched.do_schedule(CPU0, 2 * MS, false);
    assert!(slice.task.idle);
    assert_eq!(slice.time, 8 * MS);

    // Waking it resumes the remaining slice of the current minor frame.
    sched.wake(&a);
    assert_eq!(host.take_softirqs(), vec![CPU0]);

    let slice = sched.do_schedule(CPU0, 3 * MS, false);
    assert!(Arc::ptr_eq(&slice.task, &a));
    assert_eq!(slice.time, 7 * MS);
}

#[test]
fn sleeping_non_current_vcpu_raises_nothing() {
    let (host, sched) = fixture(1);
    let a = attach(&sched, 1, 0xaa, 0);
    host.take_softirqs();

    sched.sleep(&a);
    assert!(host.take_softirqs().is_empty());
}

#[test]
fn install_takes_effect_immediately() {
    let (host, sched) = fixture(1);
    attach(&sched, 1, 0xaa, 0);
    attach(&sched, 2, 0xbb, 0);
    attach(&sched, 3, 0xcc, 0);
    sched.install_schedule(&round_robin_plan(30, &[0xaa, 0xbb, 0xcc])).unwrap();
    sched.do_schedule(CPU0, 0, false);

    // Mid-frame at t=15ms, replace the whole schedule with two 5 ms
    // entries. The new major frame starts right there, no waiting for the
    // old frame to expire.
    let d = attach(&sched, 4, 0xdd, 0);
    let e = attach(&sched, 5, 0xee, 0);
    host.set_now(15 * MS);
    sched
        .install_schedule(&SchedulePlan {
            major_frame: 10 * MS,
            entries: vec![
                EntryPlan {
                    service_id: 4,
                    runtime: 5 * MS,
                    providers: vec![VcpuKey::new(DomainHandle::splat(0xdd), 0)],
                },
                EntryPlan {
                    service_id: 5,
                    runtime: 5 * MS,
                    providers: vec![VcpuKey::new(DomainHandle::splat(0xee), 0)],
                },
            ],
        })
        .unwrap();

    let slice = sched.do_schedule(CPU0, 15 * MS, false);
    assert!(Arc::ptr_eq(&slice.task, &d));
    assert_eq!(slice.time, 5 * MS);

    let slice = sched.do_schedule(CPU0, 20 * MS, false);
    assert!(Arc::ptr_eq(&slice.task, &e));
    assert_eq!(slice.time, 5 * MS);
}

#[test]
fn empty_schedule_idles_for_default_timeslice() {
    let (_host, sched) = fixture(1);

    let slice = sched.do_schedule(CPU0, 0, false);
    assert!(slice.task.idle);
    assert_eq!(slice.time, DEFAULT_TIMESLICE_NS);

    let slice = sched.do_schedule(CPU0, 3 * MS, false);
    assert!(slice.task.idle);
    assert_eq!(slice.time, DEFAULT_TIMESLICE_NS);
}

#[test]
fn tasklet_work_overrides_election() {
    let (_host, sched) = fixture(1);
    attach(&sched, 1, 0xaa, 0);
    sched.install_schedule(&round_robin_plan(10, &[0xaa])).unwrap();

    let slice = sched.do_schedule(CPU0, 0, true);
    assert!(slice.task.idle);
    assert_eq!(slice.time, 10 * MS);
    assert_eq!(sched.stats().tasklet_overrides, 1);
}

#[test]
fn cross_pcpu_candidate_is_vetoed() {
    let (_host, sched) = fixture(2);
    // A's host processor is PCPU 1; dispatching on PCPU 0 must not run it.
    let a = attach(&sched, 1, 0xaa, 1);
    sched.install_schedule(&round_robin_plan(10, &[0xaa])).unwrap();

    let slice = sched.do_schedule(PcpuId(0), 0, false);
    assert!(slice.task.idle);
    assert!(!slice.migrated);
    assert_eq!(sched.stats().migration_vetoes, 1);

    // On its own PCPU it runs.
    let slice = sched.do_schedule(PcpuId(1), 1 * MS, false);
    assert!(Arc::ptr_eq(&slice.task, &a));
}

#[test]
fn unrunnable_vcpu_idles_without_promotion() {
    let (_host, sched) = fixture(1);
    let a = attach(&sched, 1, 0xaa, 0);
    let _backup = attach(&sched, 2, 0xab, 0);
    sched
        .install_schedule(&SchedulePlan {
            major_frame: 10 * MS,
            entries: vec![EntryPlan {
                service_id: 0,
                runtime: 10 * MS,
                providers: vec![
                    VcpuKey::new(DomainHandle::splat(0xaa), 0),
                    VcpuKey::new(DomainHandle::splat(0xab), 0),
                ],
            }],
        })
        .unwrap();

    // The host reports the elected VCPU not runnable: its slot idles, the
    // backup is not promoted (health is the only election filter).
    a.set_runnable(false);
    let slice = sched.do_schedule(CPU0, 0, false);
    assert!(slice.task.idle);
}

#[test]
fn frames_never_missed_under_steady_clock() {
    let (_host, sched) = fixture(1);
    attach(&sched, 1, 0xaa, 0);
    attach(&sched, 2, 0xbb, 0);
    attach(&sched, 3, 0xcc, 0);
    sched.install_schedule(&round_robin_plan(30, &[0xaa, 0xbb, 0xcc])).unwrap();

    // Steps never jump a whole major frame, so the fatal missed-frame trap
    // must never fire and every slice stays positive.
    let mut now = 0;
    while now < 900 * MS {
        let slice = sched.do_schedule(CPU0, now, false);
        assert!(slice.time > 0);
        assert!(!slice.migrated);
        now += 3 * MS;
    }
}

#[test]
fn pick_cpu_prefers_current_processor() {
    let (host, sched) = fixture(4);
    let a = attach(&sched, 1, 0xaa, 2);
    assert_eq!(sched.pick_cpu(&a), PcpuId(2));

    // Once the domain's pool excludes PCPU 2, fall back to the first
    // online PCPU.
    let mut mask = a653sched::Cpumask::new(4);
    mask.set_cpu(1).unwrap();
    mask.set_cpu(3).unwrap();
    host.set_online_mask(DomId(1), mask);
    assert_eq!(sched.pick_cpu(&a), PcpuId(1));
}
