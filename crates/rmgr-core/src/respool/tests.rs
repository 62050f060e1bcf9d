use super::*;
use anyhow::bail;

fn stat(host: &str, mem: u32, core: u32) -> SegStat {
    SegStat {
        info: SegInfo {
            id: SEGSTAT_ID_INVALID,
            hostname: host.to_string(),
            addresses: vec!["127.0.0.1".to_string(), format!("10.0.0.{}", mem % 250)],
            alive: true,
            ..SegInfo::default()
        },
        fts_available: true,
        fts_total_memory_mb: mem,
        fts_total_core: core,
        ..SegStat::default()
    }
}

struct ScriptedProber {
    fail: bool,
    probed: Vec<String>,
}

impl Prober for ScriptedProber {
    fn dispatch_probe(&mut self, segment: &SegStat) -> anyhow::Result<()> {
        if self.fail {
            bail!("no route to {}", segment.hostname());
        }
        self.probed.push(segment.hostname().to_string());
        Ok(())
    }
}

fn prober(fail: bool) -> ScriptedProber {
    ScriptedProber {
        fail,
        probed: Vec::new(),
    }
}

#[test]
fn identical_heartbeats_change_capacity_once() {
    let mut pool = ResourcePool::new(0, CapacitySource::Fts);
    let now = Instant::now();
    assert_eq!(pool.add_segment_with_stat(stat("sdw1", 8192, 8), now), IngestOutcome::New);
    for _ in 0..5 {
        let out = pool.add_segment_with_stat(stat("sdw1", 8192, 8), now);
        assert_eq!(out, IngestOutcome::Unchanged);
        assert!(!out.capacity_changed());
    }
    assert_eq!(pool.cluster_report_counter(), 6);
    assert_eq!(
        pool.add_segment_with_stat(stat("sdw1", 16384, 8), now),
        IngestOutcome::Changed
    );
}

#[test]
fn addresses_are_normalized_on_insert() {
    let mut pool = ResourcePool::new(0, CapacitySource::Fts);
    pool.add_segment_with_stat(stat("sdw1", 5, 1), Instant::now());
    assert_eq!(
        pool.host("sdw1").unwrap().stat.info.addresses,
        vec!["10.0.0.5", "127.0.0.1"]
    );
}

#[test]
fn ids_are_stable_until_invalidated() {
    let mut pool = ResourcePool::new(0, CapacitySource::Fts);
    let now = Instant::now();
    pool.add_segment_with_stat(stat("sdw1", 100, 1), now);
    pool.add_segment_with_stat(stat("sdw2", 100, 1), now);
    assert_eq!(pool.host("sdw2").unwrap().stat.info.id, 1);

    pool.mark_departed("sdw2");
    pool.add_segment_with_stat(stat("sdw2", 100, 1), now);
    assert_eq!(pool.host("sdw2").unwrap().stat.info.id, 1);

    pool.invalidate_id("sdw2");
    assert_eq!(pool.host("sdw2").unwrap().stat.info.id, SEGSTAT_ID_INVALID);
    pool.add_segment_with_stat(stat("sdw2", 100, 1), now);
    assert_eq!(pool.host("sdw2").unwrap().stat.info.id, 2);
}

#[test]
fn departure_marks_host_absent() {
    let mut pool = ResourcePool::new(0, CapacitySource::Fts);
    let now = Instant::now();
    pool.add_segment_with_stat(stat("sdw1", 100, 1), now);
    pool.add_segment_with_stat(stat("sdw2", 100, 1), now);
    pool.note_membership_host("sdw2");

    assert!(pool.mark_departed("sdw2"));
    let seg = pool.host("sdw2").unwrap();
    assert!(seg.departed);
    assert!(seg.stat.status_desc.contains(StatusDesc::DEPARTED));
    assert_eq!(pool.avail_node_count(), 1);
    assert_eq!(pool.slaves_host_count(), 1);
    assert_eq!(pool.membership_hosts().count(), 0);

    assert!(!pool.mark_departed("sdw2"));
    assert!(!pool.mark_departed("nobody"));

    // Coming back is a capacity change.
    assert_eq!(
        pool.add_segment_with_stat(stat("sdw2", 100, 1), now),
        IngestOutcome::Changed
    );
}

#[test]
fn members_admitted_only_while_cluster_is_short() {
    let mut pool = ResourcePool::new(2, CapacitySource::Fts);
    let now = Instant::now();
    assert!(pool.admits_member("sdw1"));
    pool.add_segment_with_stat(stat("sdw1", 100, 1), now);
    pool.add_segment_with_stat(stat("sdw2", 100, 1), now);
    assert!(!pool.admits_member("sdw3"));
    assert!(pool.admits_member("sdw2"));

    pool.mark_unavailable("sdw1", StatusDesc::HEARTBEAT_TIMEOUT);
    assert!(pool.admits_member("sdw3"));
}

#[test]
fn direct_reports_are_not_capped_by_expected_host_count() {
    let mut pool = ResourcePool::new(2, CapacitySource::Fts);
    let now = Instant::now();
    pool.add_segment_with_stat(stat("sdw1", 100, 1), now);
    pool.add_segment_with_stat(stat("sdw2", 100, 1), now);
    assert_eq!(
        pool.add_segment_with_stat(stat("sdw3", 100, 1), now),
        IngestOutcome::New
    );
    assert_eq!(pool.host("sdw3").unwrap().stat.info.id, 2);
    assert_eq!(pool.avail_node_count(), 3);
}

#[test]
fn segment_down_dispatches_probe_once() {
    let mut pool = ResourcePool::new(0, CapacitySource::Fts);
    pool.add_segment_with_stat(stat("sdw1", 100, 1), Instant::now());
    let mut p = prober(false);

    assert_eq!(pool.segment_is_down("sdw1", &mut p), DownOutcome::ProbeDispatched);
    assert!(pool.host("sdw1").unwrap().ru_alive_pending());
    // Still counted until the probe answers.
    assert_eq!(pool.avail_node_count(), 1);
    assert_eq!(pool.segment_is_down("sdw1", &mut p), DownOutcome::Skipped);
    assert_eq!(p.probed, vec!["sdw1"]);
    assert_eq!(pool.segment_is_down("ghost", &mut p), DownOutcome::UnknownHost);
}

#[test]
fn failed_dispatch_marks_unavailable() {
    let mut pool = ResourcePool::new(0, CapacitySource::Fts);
    pool.add_segment_with_stat(stat("sdw1", 100, 1), Instant::now());
    let mut p = prober(true);

    assert_eq!(pool.segment_is_down("sdw1", &mut p), DownOutcome::MarkedUnavailable);
    let seg = pool.host("sdw1").unwrap();
    assert_eq!(seg.availability, Availability::Unavailable);
    assert!(seg.stat.status_desc.contains(StatusDesc::FAILED_PROBING));
    assert_eq!(pool.cluster_capacity().memory_mb, 0);
    assert_eq!(pool.segment_is_down("sdw1", &mut p), DownOutcome::Skipped);
}

#[test]
fn probe_completion_converges() {
    let mut pool = ResourcePool::new(0, CapacitySource::Fts);
    let now = Instant::now();
    pool.add_segment_with_stat(stat("sdw1", 100, 1), now);
    pool.add_segment_with_stat(stat("sdw2", 100, 1), now);
    let mut p = prober(false);
    pool.segment_is_down("sdw1", &mut p);
    pool.segment_is_down("sdw2", &mut p);

    assert_eq!(pool.complete_probe("sdw1", true), ProbeCompletion::Restored);
    assert_eq!(pool.complete_probe("sdw1", true), ProbeCompletion::Ignored);
    assert_eq!(pool.complete_probe("sdw2", false), ProbeCompletion::MarkedUnavailable);
    assert!(pool
        .host("sdw2")
        .unwrap()
        .stat
        .status_desc
        .contains(StatusDesc::FAILED_PROBING));
    assert_eq!(pool.complete_probe("ghost", false), ProbeCompletion::UnknownHost);

    // A heartbeat brings the failed host back.
    assert_eq!(
        pool.add_segment_with_stat(stat("sdw2", 100, 1), now),
        IngestOutcome::Changed
    );
    assert!(pool.host("sdw2").unwrap().stat.status_desc.is_healthy());
}

#[test]
fn silent_segments_expire() {
    let mut pool = ResourcePool::new(0, CapacitySource::Fts);
    let start = Instant::now();
    pool.add_segment_with_stat(stat("sdw1", 100, 1), start);
    pool.add_segment_with_stat(stat("sdw2", 100, 1), start + Duration::from_secs(50));

    let expired = pool.expire_silent_segments(start + Duration::from_secs(70), Duration::from_secs(60));
    assert_eq!(expired, vec!["sdw1"]);
    assert!(pool
        .host("sdw1")
        .unwrap()
        .stat
        .status_desc
        .contains(StatusDesc::HEARTBEAT_TIMEOUT));
    assert!(pool
        .expire_silent_segments(start + Duration::from_secs(70), Duration::from_secs(60))
        .is_empty());
}

#[test]
fn cluster_capacity_uses_selected_view() {
    let mut pool = ResourcePool::new(0, CapacitySource::Grm);
    let now = Instant::now();
    let mut a = stat("sdw1", 8192, 8);
    a.grm_handled = true;
    a.grm_total_memory_mb = 4096;
    a.grm_total_core = 4;
    pool.add_segment_with_stat(a, now);
    pool.add_segment_with_stat(stat("sdw2", 8192, 8), now);

    let cap = pool.cluster_capacity();
    assert_eq!(cap.memory_mb, 4096);
    assert!((cap.core - 4.0).abs() < 1e-9);
    assert_eq!(cap.nodes, 2);
    assert_eq!(pool.segment_memories().len(), 2);
}
