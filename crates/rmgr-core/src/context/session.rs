//! Session operations: register, acquire, return, unregister, lease.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::RmContext;
use crate::conntrack::{ClientId, ConnId, ConnectionTrack, Progress};
use crate::error::RmError;
use crate::protocol::requests::{AcquireRequest, RequestShape};
use crate::protocol::Frame;
use crate::resqueue::{AllocOutcome, QueueId, ResourceGrant};

/// What became of an acquire request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AcquireStatus {
    Granted(ResourceGrant),
    /// Queued behind the queue's FIFO; a later event completes it.
    Waiting,
    /// Not handled yet. Retry the same request later.
    Deferred,
}

impl RmContext {
    /// Register a session for `user`.
    pub fn register(&mut self, client: ClientId, user: &str, now: Instant) -> Result<ConnId, RmError> {
        let queue = self.queues.users().queue_of(user)?;
        self.register_in_queue(client, user.to_string(), queue, now)
    }

    /// Register a session for the user with `oid`.
    pub fn register_by_oid(
        &mut self,
        client: ClientId,
        oid: i64,
        now: Instant,
    ) -> Result<ConnId, RmError> {
        let (user, queue) = self.queues.users().by_oid(oid)?;
        let user = user.to_string();
        self.register_in_queue(client, user, queue, now)
    }

    fn register_in_queue(
        &mut self,
        client: ClientId,
        user: String,
        queue: QueueId,
        now: Instant,
    ) -> Result<ConnId, RmError> {
        self.queues.attach_connection(queue);
        let conn_id = match self.conns.allocate_id() {
            Ok(id) => id,
            Err(e) => {
                self.queues.detach_connection(queue);
                warn!(user = %user, "{}", e);
                return Err(e);
            }
        };

        let mut track = ConnectionTrack::new(client, now);
        track.conn_id = conn_id;
        track.user_id = user;
        track.queue = Some(queue);
        if let Err(e) = track.transform(Progress::RegisterDone) {
            self.conns.release_id(conn_id);
            self.queues.detach_connection(queue);
            return Err(e);
        }
        info!(
            %conn_id,
            user = %track.user_id,
            queue = %self.queues.queue(queue).name,
            "connection registered"
        );
        self.conns.insert(track);
        Ok(conn_id)
    }

    /// Point a tracked session at the client and marks of its latest
    /// request. Unknown ids are left for the operation to report.
    pub fn bind_request(&mut self, conn_id: ConnId, client: ClientId, request: &Frame) {
        if let Some(track) = self.conns.get_mut(conn_id) {
            track.client = client;
            track.note_request(request);
        }
    }

    /// Acquire resources for a registered session.
    ///
    /// A rejection leaves the session in `TransformError` and drops it: its
    /// id is freed and any queue occupation released.
    pub fn acquire_resource(
        &mut self,
        conn_id: ConnId,
        request: &AcquireRequest,
        now: Instant,
    ) -> Result<AcquireStatus, RmError> {
        let mut track = self.conns.take(conn_id).map_err(|e| {
            warn!(%conn_id, "the resource context may be timed out");
            e
        })?;
        let result = self.acquire_resource_on(&mut track, request, now);
        match result {
            Err(_) => self.destroy_track(track),
            Ok(_) => self.conns.insert(track),
        }
        result
    }

    /// Acquire on a detached track. The caller owns the track afterwards and
    /// decides whether it goes back into the registry.
    pub fn acquire_resource_on(
        &mut self,
        track: &mut ConnectionTrack,
        request: &AcquireRequest,
        now: Instant,
    ) -> Result<AcquireStatus, RmError> {
        match self.try_acquire(track, request, now) {
            Ok(status) => Ok(status),
            Err(e) => {
                warn!(conn_id = %track.conn_id, "{}", e);
                if track.progress() != Progress::TransformError {
                    // Terminal; a refusal here only means we were already there.
                    let _ = track.transform(Progress::TransformError);
                }
                Err(e)
            }
        }
    }

    fn try_acquire(
        &mut self,
        track: &mut ConnectionTrack,
        request: &AcquireRequest,
        now: Instant,
    ) -> Result<AcquireStatus, RmError> {
        track.expect(Progress::RegisterDone)?;
        if self.should_defer(now) {
            debug!(conn_id = %track.conn_id, "resource request deferred");
            return Ok(AcquireStatus::Deferred);
        }
        self.check_cluster_health()?;

        let queue = track
            .queue
            .ok_or_else(|| RmError::NoUserId(track.user_id.clone()))?;
        track.session_id = request.session_id;
        track.shape = request.shape;
        track.preferred = request.preferred.clone();
        if request.shape.stat_nvseg > 0 {
            info!(
                conn_id = %track.conn_id,
                memory_mb = request.shape.stat_vseg_memory_mb,
                nvseg = request.shape.stat_nvseg,
                "statement level resource quota is active"
            );
        }

        let sized = self
            .queues
            .size_request(queue, &request.shape, self.pool.avail_node_count())?;
        track.transform(Progress::AllocWait)?;
        track.requested = Some(sized);
        track.res_request_time = Some(now);
        track.touch(now);

        match self.queues.acquire(queue, track.conn_id, sized) {
            AllocOutcome::Granted(grant) => {
                track.transform(Progress::AllocDone)?;
                track.grant = Some(grant);
                Ok(AcquireStatus::Granted(grant))
            }
            AllocOutcome::Waiting => Ok(AcquireStatus::Waiting),
        }
    }

    /// Reject when more hosts are down than the configured fraction allows.
    /// An unknown cluster size never rejects.
    pub fn check_cluster_health(&self) -> Result<(), RmError> {
        let expected = self.pool.slaves_host_count() as usize;
        if expected == 0 {
            return Ok(());
        }
        let avail = self.pool.avail_node_count() as usize;
        let unavailable = expected.saturating_sub(avail);
        let limit = self.config.reject_request_nseg_limit;
        let tolerated = (expected as f64 * limit).ceil() as usize;
        if unavailable > tolerated {
            return Err(RmError::TooManyUnavailableHosts {
                unavailable,
                expected,
                limit,
            });
        }
        Ok(())
    }

    /// Size a request for a user without reserving anything. `None` means
    /// deferred.
    pub fn acquire_resource_quota(
        &self,
        user_oid: i64,
        shape: &RequestShape,
        now: Instant,
    ) -> Result<Option<(String, ResourceGrant)>, RmError> {
        if self.should_defer(now) {
            return Ok(None);
        }
        self.check_cluster_health()?;
        let (queue, grant) =
            self.queues
                .acquire_resource_quota(user_oid, shape, self.pool.avail_node_count())?;
        debug!(user_oid, queue = %queue, seg_num = grant.seg_num, "resource quota sized");
        Ok(Some((queue, grant)))
    }

    /// Give back a granted allocation, or withdraw a waiting one. The
    /// session stays registered.
    pub fn return_resource(&mut self, conn_id: ConnId, now: Instant) -> Result<(), RmError> {
        let mut track = self.conns.take(conn_id)?;
        let result = self.return_on(&mut track, now);
        self.conns.insert(track);
        if result.is_ok() {
            self.dispatch_waiters();
        }
        result
    }

    fn return_on(&mut self, track: &mut ConnectionTrack, now: Instant) -> Result<(), RmError> {
        let queue = track.queue;
        match (track.progress(), queue) {
            (Progress::AllocDone, Some(q)) => {
                self.queues.release(q, track.conn_id);
                track.transform(Progress::RegisterDone)?;
                info!(conn_id = %track.conn_id, "returned resource");
            }
            (Progress::AllocWait, Some(q)) => {
                self.queues.cancel(q, track.conn_id);
                track.transform(Progress::RegisterDone)?;
                info!(conn_id = %track.conn_id, "cancelled waiting resource request");
            }
            (progress, _) => {
                warn!(conn_id = %track.conn_id, %progress, "the resource context status is invalid");
                return Err(RmError::WrongConnStat(progress));
            }
        }
        track.clear_request();
        track.touch(now);
        Ok(())
    }

    /// End a session: withdraw or return its allocation and free its id.
    pub fn unregister(&mut self, conn_id: ConnId) -> Result<(), RmError> {
        let mut track = self.conns.take(conn_id).map_err(|e| {
            warn!(%conn_id, "the resource context is invalid or timed out");
            e
        })?;
        match track.progress() {
            Progress::AllocWait | Progress::AllocDone => {
                let now = track.last_act_time;
                self.return_on(&mut track, now)?;
                self.dispatch_waiters();
            }
            Progress::RegisterDone => {
                let before = self.deferred.len();
                self.deferred.retain(|d| d.conn_id != Some(conn_id));
                if before != self.deferred.len() {
                    warn!(%conn_id, "dropped resource request not handled yet");
                }
            }
            progress => {
                warn!(%conn_id, %progress, "wrong resource context status for unregistering");
                self.conns.insert(track);
                return Err(RmError::WrongConnStat(progress));
            }
        }
        track.transform(Progress::Established)?;
        self.release_track(&track);
        info!(%conn_id, "connection is unregistered");
        Ok(())
    }

    /// Bump the activity time of each known id. Unknown ids are skipped.
    /// Returns how many were refreshed.
    pub fn refresh_lease(&mut self, conn_ids: &[i32], now: Instant) -> usize {
        let mut refreshed = 0;
        for &raw in conn_ids {
            match self.conns.get_mut(ConnId(raw)) {
                Some(track) => {
                    track.touch(now);
                    refreshed += 1;
                }
                None => warn!(conn_id = raw, "cannot find resource context for refreshing"),
            }
        }
        refreshed
    }

    /// Drop sessions idle past the lease timeout, returning whatever they
    /// hold. Returns the dropped ids.
    ///
    /// A session waiting in its queue or holding a deferred acquire is not
    /// idle; it stays until that request is answered or withdrawn.
    pub fn sweep_idle_sessions(&mut self, now: Instant) -> Vec<ConnId> {
        let timeout = Duration::from_secs(self.config.session_lease_timeout_secs);
        let idle: Vec<ConnId> = self
            .conns
            .iter()
            .filter(|t| t.progress() != Progress::AllocWait)
            .filter(|t| !self.deferred.iter().any(|d| d.conn_id == Some(t.conn_id)))
            .filter(|t| now.saturating_duration_since(t.last_act_time) > timeout)
            .map(|t| t.conn_id)
            .collect();
        for id in &idle {
            warn!(conn_id = %id, "resource context lease expired");
            if let Err(e) = self.unregister(*id) {
                // Only a track in a state unregister refuses ends up here.
                if let Ok(track) = self.conns.take(*id) {
                    warn!(conn_id = %id, "forcing removal of expired context: {}", e);
                    self.destroy_track(track);
                }
            }
        }
        idle
    }

    /// Drop a track that will not be reinserted, releasing everything it
    /// holds.
    pub(crate) fn destroy_track(&mut self, track: ConnectionTrack) {
        if let Some(q) = track.queue {
            self.queues.release(q, track.conn_id);
            self.queues.cancel(q, track.conn_id);
        }
        self.deferred.retain(|d| d.conn_id != Some(track.conn_id));
        self.release_track(&track);
        self.dispatch_waiters();
        debug!(conn_id = %track.conn_id, "connection track dropped");
    }

    fn release_track(&mut self, track: &ConnectionTrack) {
        self.conns.release_id(track.conn_id);
        if let Some(q) = track.queue {
            self.queues.detach_connection(q);
        }
    }
}
