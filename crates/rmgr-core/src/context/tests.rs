use super::*;
use crate::catalog::{ChannelCatalog, SegmentState};
use crate::conntrack::ConnectionTrack;
use crate::dispatch::Event;
use crate::error::RmError;
use crate::protocol::requests::{AcquireRequest, RequestShape};
use crate::respool::{DownOutcome, SegInfo, StatusDesc};
use tokio::sync::mpsc;

fn config() -> RmConfig {
    RmConfig {
        max_resource_contexts: 8,
        nocluster_timeout_secs: 0,
        ..RmConfig::default()
    }
}

fn stat(host: &str, mem: u32) -> SegStat {
    SegStat {
        info: SegInfo {
            hostname: host.to_string(),
            addresses: vec![format!("10.1.0.{}", host.trim_start_matches("sdw"))],
            alive: true,
            ..SegInfo::default()
        },
        fts_available: true,
        fts_total_memory_mb: mem,
        fts_total_core: 4,
        ..SegStat::default()
    }
}

/// Two 2048 MB hosts: pg_default gets half of 4096 MB, 8 vsegs of 256 MB.
fn ready(config: RmConfig, hosts: usize, t0: Instant) -> RmContext {
    let mut ctx = RmContext::new(config, t0).unwrap();
    for i in 0..hosts {
        ctx.add_segment(stat(&format!("sdw{i}"), 2048), t0);
    }
    ctx
}

fn acquire_req(conn_id: ConnId, num: i32, min: i32) -> AcquireRequest {
    AcquireRequest {
        session_id: 7,
        conn_id: conn_id.0,
        shape: RequestShape {
            max_seg_count_fix: num,
            min_seg_count_fix: min,
            ..RequestShape::default()
        },
        preferred: Vec::new(),
    }
}

fn registered(ctx: &mut RmContext, client: u64, now: Instant) -> ConnId {
    ctx.register(ClientId(client), "gpadmin", now).unwrap()
}

fn progress(ctx: &RmContext, id: ConnId) -> Progress {
    ctx.conns().get(id).unwrap().progress()
}

#[test]
fn register_when_ids_exhausted_changes_nothing() {
    let t0 = Instant::now();
    let mut ctx = ready(
        RmConfig {
            max_resource_contexts: 2,
            ..config()
        },
        2,
        t0,
    );
    registered(&mut ctx, 1, t0);
    registered(&mut ctx, 2, t0);
    let q = ctx.queues().queue_by_name("pg_default").unwrap();
    assert_eq!(ctx.queues().queue(q).num_connections, 2);

    assert_eq!(
        ctx.register(ClientId(3), "gpadmin", t0),
        Err(RmError::ConnIdFull)
    );
    assert_eq!(ctx.conns().len(), 2);
    assert_eq!(ctx.conns().free_ids(), 0);
    assert_eq!(ctx.queues().queue(q).num_connections, 2);
}

#[test]
fn unknown_user_cannot_register() {
    let t0 = Instant::now();
    let mut ctx = ready(config(), 2, t0);
    assert_eq!(
        ctx.register(ClientId(1), "mallory", t0),
        Err(RmError::NoUserId("mallory".into()))
    );
    assert_eq!(
        ctx.register_by_oid(ClientId(1), 999, t0),
        Err(RmError::NoUserId("999".into()))
    );
    assert_eq!(ctx.register_by_oid(ClientId(1), 10, t0), Ok(ConnId(0)));
}

#[test]
fn acquire_before_register_is_wrong_state() {
    let t0 = Instant::now();
    let mut ctx = ready(config(), 2, t0);
    let mut track = ConnectionTrack::new(ClientId(1), t0);
    let err = ctx
        .acquire_resource_on(&mut track, &acquire_req(ConnId::INVALID, 2, 1), t0)
        .unwrap_err();
    assert_eq!(err, RmError::WrongConnStat(Progress::Unregistered));
    assert_eq!(track.progress(), Progress::TransformError);
}

#[test]
fn second_return_is_wrong_state() {
    let t0 = Instant::now();
    let mut ctx = ready(config(), 2, t0);
    let id = registered(&mut ctx, 1, t0);
    let status = ctx.acquire_resource(id, &acquire_req(id, 4, 1), t0).unwrap();
    assert!(matches!(status, AcquireStatus::Granted(g) if g.seg_num == 4));
    assert_eq!(progress(&ctx, id), Progress::AllocDone);

    ctx.return_resource(id, t0).unwrap();
    assert_eq!(progress(&ctx, id), Progress::RegisterDone);
    assert_eq!(
        ctx.return_resource(id, t0),
        Err(RmError::WrongConnStat(Progress::RegisterDone))
    );
    // The session is still registered and can acquire again.
    assert!(ctx.conns().contains(id));
}

#[test]
fn identical_heartbeats_refresh_capacity_once() {
    let t0 = Instant::now();
    let mut ctx = RmContext::new(config(), t0).unwrap();
    for _ in 0..6 {
        ctx.add_segment(stat("sdw1", 2048), t0);
    }
    assert_eq!(ctx.queues().capacity_refresh_count(), 1);
    ctx.add_segment(stat("sdw1", 4096), t0);
    assert_eq!(ctx.queues().capacity_refresh_count(), 2);
}

#[test]
fn too_many_unavailable_hosts_rejects_acquire() {
    let t0 = Instant::now();
    let mut ctx = ready(
        RmConfig {
            slaves_host_count: 10,
            reject_request_nseg_limit: 0.3,
            ..config()
        },
        10,
        t0,
    );
    for i in 0..4 {
        ctx.pool.mark_unavailable(&format!("sdw{i}"), StatusDesc::HEARTBEAT_TIMEOUT);
    }
    ctx.refresh_capacity();
    assert_eq!(ctx.pool().avail_node_count(), 6);

    let id = registered(&mut ctx, 1, t0);
    let err = ctx.acquire_resource(id, &acquire_req(id, 2, 1), t0).unwrap_err();
    assert!(matches!(
        err,
        RmError::TooManyUnavailableHosts {
            unavailable: 4,
            expected: 10,
            ..
        }
    ));
    // A rejected session is dropped and its id comes back.
    assert!(!ctx.conns().contains(id));
    assert_eq!(ctx.conns().in_use(), 0);

    for i in 0..2 {
        ctx.add_segment(stat(&format!("sdw{i}"), 2048), t0);
    }
    assert_eq!(ctx.pool().avail_node_count(), 8);
    let id = registered(&mut ctx, 2, t0);
    let status = ctx.acquire_resource(id, &acquire_req(id, 2, 1), t0).unwrap();
    assert!(matches!(status, AcquireStatus::Granted(_)));
}

#[test]
fn returned_resource_goes_to_oldest_waiter_first() {
    let t0 = Instant::now();
    let mut ctx = ready(config(), 2, t0);
    let a = registered(&mut ctx, 1, t0);
    let d = registered(&mut ctx, 2, t0);
    let b = registered(&mut ctx, 3, t0);
    let c = registered(&mut ctx, 4, t0);

    for id in [a, d] {
        let s = ctx.acquire_resource(id, &acquire_req(id, 4, 4), t0).unwrap();
        assert!(matches!(s, AcquireStatus::Granted(_)));
    }
    assert_eq!(
        ctx.acquire_resource(b, &acquire_req(b, 4, 4), t0),
        Ok(AcquireStatus::Waiting)
    );
    assert_eq!(
        ctx.acquire_resource(c, &acquire_req(c, 1, 1), t0),
        Ok(AcquireStatus::Waiting)
    );
    ctx.drain_responses();

    ctx.return_resource(a, t0).unwrap();
    assert_eq!(progress(&ctx, b), Progress::AllocDone);
    assert_eq!(progress(&ctx, c), Progress::AllocWait);
    assert_eq!(ctx.conns().get(b).unwrap().grant.unwrap().seg_num, 4);

    let out = ctx.drain_responses();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].0, ClientId(3));
    assert_eq!(out[0].1.message_id, MessageId::ResponseAcquireResource);
}

#[test]
fn unregister_cancels_waiting_request() {
    let t0 = Instant::now();
    let mut ctx = ready(config(), 2, t0);
    let a = registered(&mut ctx, 1, t0);
    let b = registered(&mut ctx, 2, t0);
    ctx.acquire_resource(a, &acquire_req(a, 8, 8), t0).unwrap();
    assert_eq!(
        ctx.acquire_resource(b, &acquire_req(b, 2, 2), t0),
        Ok(AcquireStatus::Waiting)
    );

    ctx.unregister(b).unwrap();
    let q = ctx.queues().queue_by_name("pg_default").unwrap();
    assert_eq!(ctx.queues().queue(q).waiter_count(), 0);
    assert_eq!(ctx.unregister(b), Err(RmError::NoConnId(b)));

    ctx.unregister(a).unwrap();
    assert_eq!(ctx.queues().queue(q).used_memory_mb, 0);
    assert_eq!(ctx.conns().in_use(), 0);
}

#[test]
fn refresh_lease_skips_unknown_ids() {
    let t0 = Instant::now();
    let mut ctx = ready(config(), 2, t0);
    let id = registered(&mut ctx, 1, t0);
    let later = t0 + Duration::from_secs(5);
    assert_eq!(ctx.refresh_lease(&[id.0, 42, -1], later), 1);
    assert_eq!(ctx.conns().get(id).unwrap().last_act_time, later);
}

#[test]
fn idle_sessions_are_swept_and_release_resources() {
    let t0 = Instant::now();
    let mut ctx = ready(config(), 2, t0);
    let idle = registered(&mut ctx, 1, t0);
    let busy = registered(&mut ctx, 2, t0);
    ctx.acquire_resource(idle, &acquire_req(idle, 4, 1), t0).unwrap();

    let later = t0 + Duration::from_secs(ctx.config().session_lease_timeout_secs + 1);
    ctx.refresh_lease(&[busy.0], later);
    assert_eq!(ctx.sweep_idle_sessions(later), vec![idle]);
    assert!(!ctx.conns().contains(idle));
    assert!(ctx.conns().contains(busy));
    let q = ctx.queues().queue_by_name("pg_default").unwrap();
    assert_eq!(ctx.queues().queue(q).used_memory_mb, 0);
}

#[test]
fn sweep_keeps_waiting_and_deferred_sessions() {
    let t0 = Instant::now();
    let mut ctx = ready(config(), 2, t0);
    let holder = registered(&mut ctx, 1, t0);
    let waiter = registered(&mut ctx, 2, t0);
    assert!(matches!(
        ctx.acquire_resource(holder, &acquire_req(holder, 8, 8), t0),
        Ok(AcquireStatus::Granted(_))
    ));
    assert_eq!(
        ctx.acquire_resource(waiter, &acquire_req(waiter, 4, 4), t0),
        Ok(AcquireStatus::Waiting)
    );
    ctx.drain_responses();

    let later = t0 + Duration::from_secs(ctx.config().session_lease_timeout_secs + 1);
    ctx.refresh_lease(&[holder.0], later);
    assert!(ctx.sweep_idle_sessions(later).is_empty());
    assert_eq!(progress(&ctx, waiter), Progress::AllocWait);
    let q = ctx.queues().queue_by_name("pg_default").unwrap();
    assert_eq!(ctx.queues().queue(q).waiters().count(), 1);

    ctx.return_resource(holder, later).unwrap();
    assert_eq!(progress(&ctx, waiter), Progress::AllocDone);
    let out = ctx.drain_responses();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].0, ClientId(2));

    // Admission pause holds the next acquire as deferred.
    ctx.set_phase_paused(QuotaPhase::Admission, true);
    let deferred = registered(&mut ctx, 3, later);
    let body = acquire_req(deferred, 2, 1).encode().unwrap();
    ctx.handle_event(
        Event::Request(InboundRequest {
            client: ClientId(3),
            peer_ip: "10.9.9.9".into(),
            peer_hostname: None,
            frame: Frame::new(MessageId::RequestAcquireResource, 1, 0, body),
        }),
        later,
    );
    assert_eq!(ctx.deferred_count(), 1);
    let much_later = later + Duration::from_secs(ctx.config().session_lease_timeout_secs + 1);
    ctx.refresh_lease(&[holder.0, waiter.0], much_later);
    assert!(ctx.sweep_idle_sessions(much_later).is_empty());
    assert!(ctx.conns().contains(deferred));
    assert_eq!(ctx.deferred_count(), 1);
}

#[test]
fn acquire_defers_until_cluster_reports() {
    let t0 = Instant::now();
    let mut ctx = RmContext::new(
        RmConfig {
            nocluster_timeout_secs: 60,
            ..config()
        },
        t0,
    )
    .unwrap();
    let id = registered(&mut ctx, 1, t0);
    assert_eq!(
        ctx.acquire_resource(id, &acquire_req(id, 2, 1), t0),
        Ok(AcquireStatus::Deferred)
    );
    assert_eq!(progress(&ctx, id), Progress::RegisterDone);
    assert!(ctx.acquire_resource_quota(10, &RequestShape::default(), t0).unwrap().is_none());

    ctx.add_segment(stat("sdw1", 2048), t0);
    assert!(matches!(
        ctx.acquire_resource(id, &acquire_req(id, 2, 1), t0),
        Ok(AcquireStatus::Granted(_))
    ));
}

#[test]
fn admission_pause_defers_and_allocation_pause_queues() {
    let t0 = Instant::now();
    let mut ctx = ready(config(), 2, t0);
    let id = registered(&mut ctx, 1, t0);

    ctx.set_phase_paused(QuotaPhase::Admission, true);
    assert_eq!(
        ctx.acquire_resource(id, &acquire_req(id, 2, 1), t0),
        Ok(AcquireStatus::Deferred)
    );
    ctx.set_phase_paused(QuotaPhase::Admission, false);

    ctx.set_phase_paused(QuotaPhase::Allocation, true);
    assert_eq!(
        ctx.acquire_resource(id, &acquire_req(id, 2, 1), t0),
        Ok(AcquireStatus::Waiting)
    );
    ctx.set_phase_paused(QuotaPhase::Allocation, false);
    assert_eq!(progress(&ctx, id), Progress::AllocDone);
}

#[test]
fn quota_request_resolves_user_queue() {
    let t0 = Instant::now();
    let ctx = ready(config(), 2, t0);
    let shape = RequestShape {
        max_seg_count_fix: 3,
        ..RequestShape::default()
    };
    let (queue, grant) = ctx.acquire_resource_quota(10, &shape, t0).unwrap().unwrap();
    assert_eq!(queue, "pg_default");
    assert_eq!(grant.seg_num, 3);
    assert_eq!(
        ctx.acquire_resource_quota(77, &shape, t0),
        Err(RmError::NoUserId("77".into()))
    );
}

#[test]
fn membership_departure_is_not_an_error() {
    let t0 = Instant::now();
    let mut ctx = ready(config(), 2, t0);
    let before = ctx.queues().capacity_refresh_count();
    ctx.handle_membership_update("/rmgr/segments/sdw1", "", t0).unwrap();
    assert!(ctx.pool().host("sdw1").unwrap().departed);
    assert_eq!(ctx.pool().avail_node_count(), 1);
    assert_eq!(ctx.queues().capacity_refresh_count(), before + 1);

    ctx.handle_membership_update("/rmgr/segments/nobody", "", t0).unwrap();
    assert!(ctx
        .handle_membership_update("/rmgr/segments/sdw0", "{broken", t0)
        .is_err());
    assert_eq!(ctx.pool().avail_node_count(), 1);
}

#[test]
fn unreachable_segment_is_reported_to_catalog() {
    let t0 = Instant::now();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut ctx = ready(config(), 2, t0).with_catalog(ChannelCatalog::new(tx));

    let outcomes = ctx.segment_is_down(&["sdw0".to_string(), "ghost".to_string()]);
    assert_eq!(
        outcomes,
        vec![DownOutcome::MarkedUnavailable, DownOutcome::UnknownHost]
    );
    let update = rx.try_recv().unwrap();
    assert_eq!(update.hostname, "sdw0");
    assert_eq!(update.state, SegmentState::Down);
    assert!(rx.try_recv().is_err());

    // Coming back is reported too.
    ctx.add_segment(stat("sdw0", 2048), t0);
    assert_eq!(rx.try_recv().unwrap().state, SegmentState::Up);
}

#[test]
fn disabled_catalog_drops_updates() {
    let t0 = Instant::now();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut ctx = ready(
        RmConfig {
            catalog_updates: false,
            ..config()
        },
        2,
        t0,
    )
    .with_catalog(ChannelCatalog::new(tx));
    ctx.segment_is_down(&["sdw0".to_string()]);
    assert!(rx.try_recv().is_err());
}

#[test]
fn silent_segments_expire_and_shrink_capacity() {
    let t0 = Instant::now();
    let mut ctx = ready(config(), 2, t0);
    let later = t0 + Duration::from_secs(ctx.config().segment_heartbeat_timeout_secs + 1);
    ctx.add_segment(stat("sdw1", 2048), later);

    assert_eq!(ctx.expire_silent_segments(later), vec!["sdw0".to_string()]);
    let q = ctx.queues().queue_by_name("pg_default").unwrap();
    assert_eq!(ctx.queues().queue(q).cluster_seg_number, 4);
}

#[test]
fn lost_host_shrinks_held_grants_to_the_new_limit() {
    let t0 = Instant::now();
    let mut ctx = ready(config(), 2, t0);
    let id = registered(&mut ctx, 1, t0);
    let status = ctx.acquire_resource(id, &acquire_req(id, 8, 2), t0).unwrap();
    assert!(matches!(status, AcquireStatus::Granted(g) if g.seg_num == 8));

    ctx.segment_is_down(&["sdw0".to_string()]);
    let q = ctx.queues().queue_by_name("pg_default").unwrap();
    let queue = ctx.queues().queue(q);
    assert_eq!(queue.memory_limit_mb(), 1024);
    assert!(queue.used_memory_mb <= queue.memory_limit_mb());
    for (_, queue) in ctx.queues().queues() {
        assert!(queue.used_memory_mb <= queue.memory_limit_mb(), "{}", queue.name);
    }
    assert_eq!(ctx.conns().get(id).unwrap().grant.unwrap().seg_num, 4);

    // The shrunk grant is what goes back.
    ctx.return_resource(id, t0).unwrap();
    assert_eq!(ctx.queues().queue(q).used_memory_mb, 0);
    assert_eq!(ctx.queues().queue(ctx.queues().root()).used_memory_mb, 0);
}

#[test]
fn responses_staged_on_one_track_are_all_drained() {
    let t0 = Instant::now();
    let mut ctx = ready(config(), 2, t0);
    let id = registered(&mut ctx, 4, t0);
    ctx.drain_responses();

    ctx.send_on_track(id, Frame::new(MessageId::ResponseDummy, 1, 0, Vec::new()));
    ctx.send_on_track(id, Frame::new(MessageId::ResponseAcquireResource, 2, 0, Vec::new()));
    let out = ctx.drain_responses();
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].1.message_id, MessageId::ResponseDummy);
    assert_eq!(out[1].1.message_id, MessageId::ResponseAcquireResource);
    assert!(out.iter().all(|(client, _)| *client == ClientId(4)));
}
