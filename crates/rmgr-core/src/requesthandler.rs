//! One handler per request message id.
//!
//! Handlers decode the body, run the operation on the context and stage the
//! response. Session responses are staged on the session's track; everything
//! else goes straight back to the requesting client.

use std::path::Path;
use std::time::Instant;

use tracing::{debug, warn};

use crate::context::{AcquireStatus, QuotaPhase, RmContext};
use crate::conntrack::ConnId;
use crate::dispatch::InboundRequest;
use crate::dump::{dump_status, DumpKind};
use crate::error::{ResultCode, RmError};
use crate::protocol::requests::{
    AcquireQuotaRequest, AcquireRequest, ConnIdRequest, DumpStatusRequest, ImAliveRequest,
    QuotaControlRequest, RefreshRequest, RegisterByOidRequest, RegisterRequest,
    SegmentIsDownRequest, WireBody,
};
use crate::protocol::responses::{
    AcquireQuotaResponse, AcquireResponse, RegisterResponse, ResQueueStatusResponse,
    ResultResponse,
};
use crate::protocol::{Frame, MessageId, WireError};

/// Whether a request was answered or must be retried later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    Done,
    Deferred { conn_id: Option<ConnId> },
}

/// Route one request to its handler.
pub fn handle_request(ctx: &mut RmContext, req: &InboundRequest, now: Instant) -> Handled {
    let id = req.frame.message_id;
    debug!(client = req.client.0, message = ?id, "handling request");
    match id {
        MessageId::RequestConnectionReg => handle_register(ctx, req, now),
        MessageId::RequestConnectionRegByOid => handle_register_by_oid(ctx, req, now),
        MessageId::RequestConnectionUnreg => handle_unregister(ctx, req),
        MessageId::RequestAcquireResource => return handle_acquire(ctx, req, now),
        MessageId::RequestReturnResource => handle_return(ctx, req, now),
        MessageId::RequestAcquireResourceQuota => return handle_acquire_quota(ctx, req, now),
        MessageId::RequestRefreshResource => handle_refresh(ctx, req, now),
        MessageId::RequestSegmentIsDown => handle_segment_is_down(ctx, req),
        MessageId::RequestDumpStatus => handle_dump_status(ctx, req, now),
        MessageId::RequestDumpResQueueStatus => handle_dump_queue_status(ctx, req),
        MessageId::RequestQuotaControl => handle_quota_control(ctx, req),
        MessageId::RequestDummy => reply(ctx, req, ResultResponse::ok().encode()),
        MessageId::RequestImAlive => handle_im_alive(ctx, req, now),
        other => warn!(client = req.client.0, message = ?other, "unexpected message, ignored"),
    }
    Handled::Done
}

fn response_id(req: &InboundRequest) -> MessageId {
    req.frame
        .message_id
        .response()
        .unwrap_or(MessageId::ResponseDummy)
}

fn response_frame(req: &InboundRequest, body: Result<Vec<u8>, WireError>) -> Option<Frame> {
    match body {
        Ok(body) => Some(Frame::reply_to(&req.frame, response_id(req), body)),
        Err(e) => {
            warn!(client = req.client.0, "cannot encode response: {}", e);
            None
        }
    }
}

/// Answer the requesting client directly.
fn reply(ctx: &mut RmContext, req: &InboundRequest, body: Result<Vec<u8>, WireError>) {
    if let Some(frame) = response_frame(req, body) {
        ctx.send_direct(req.client, frame);
    }
}

/// Answer through the session's track when it is still tracked.
fn reply_on_track(
    ctx: &mut RmContext,
    req: &InboundRequest,
    conn_id: ConnId,
    body: Result<Vec<u8>, WireError>,
) {
    let Some(frame) = response_frame(req, body) else {
        return;
    };
    if ctx.conns().contains(conn_id) {
        ctx.send_on_track(conn_id, frame);
    } else {
        ctx.send_direct(req.client, frame);
    }
}

fn result_body(result: Result<(), RmError>) -> Result<Vec<u8>, WireError> {
    match result {
        Ok(()) => ResultResponse::ok().encode(),
        Err(e) => ResultResponse::failed(&e).encode(),
    }
}

fn register_body(result: Result<ConnId, RmError>) -> Result<Vec<u8>, WireError> {
    match result {
        Ok(conn_id) => RegisterResponse {
            result: ResultCode::Ok.as_u32(),
            conn_id: conn_id.0,
            error: None,
        }
        .encode(),
        Err(e) => RegisterResponse::failed(&e).encode(),
    }
}

fn handle_register(ctx: &mut RmContext, req: &InboundRequest, now: Instant) {
    let result = RegisterRequest::decode(&req.frame.body)
        .map_err(RmError::from)
        .and_then(|body| ctx.register(req.client, &body.user, now));
    finish_register(ctx, req, result);
}

fn handle_register_by_oid(ctx: &mut RmContext, req: &InboundRequest, now: Instant) {
    let result = RegisterByOidRequest::decode(&req.frame.body)
        .map_err(RmError::from)
        .and_then(|body| ctx.register_by_oid(req.client, body.oid, now));
    finish_register(ctx, req, result);
}

fn finish_register(ctx: &mut RmContext, req: &InboundRequest, result: Result<ConnId, RmError>) {
    match result {
        Ok(conn_id) => {
            ctx.bind_request(conn_id, req.client, &req.frame);
            reply_on_track(ctx, req, conn_id, register_body(Ok(conn_id)));
        }
        Err(e) => {
            warn!(client = req.client.0, "registration failed: {}", e);
            reply(ctx, req, register_body(Err(e)));
        }
    }
}

fn handle_unregister(ctx: &mut RmContext, req: &InboundRequest) {
    let result = ConnIdRequest::decode(&req.frame.body)
        .map_err(RmError::from)
        .and_then(|body| ctx.unregister(ConnId(body.conn_id)));
    reply(ctx, req, result_body(result));
}

fn handle_acquire(ctx: &mut RmContext, req: &InboundRequest, now: Instant) -> Handled {
    let body = match AcquireRequest::decode(&req.frame.body) {
        Ok(body) => body,
        Err(e) => {
            reply(ctx, req, AcquireResponse::failed(&RmError::from(e)).encode());
            return Handled::Done;
        }
    };
    let conn_id = ConnId(body.conn_id);
    ctx.bind_request(conn_id, req.client, &req.frame);
    match ctx.acquire_resource(conn_id, &body, now) {
        Ok(AcquireStatus::Granted(grant)) => {
            reply_on_track(ctx, req, conn_id, AcquireResponse::granted(grant).encode());
        }
        Ok(AcquireStatus::Waiting) => {
            debug!(%conn_id, "allocation waiting in resource queue");
        }
        Ok(AcquireStatus::Deferred) => {
            return Handled::Deferred {
                conn_id: Some(conn_id),
            }
        }
        Err(e) => reply(ctx, req, AcquireResponse::failed(&e).encode()),
    }
    Handled::Done
}

fn handle_return(ctx: &mut RmContext, req: &InboundRequest, now: Instant) {
    let decoded = ConnIdRequest::decode(&req.frame.body).map_err(RmError::from);
    let conn_id = decoded.as_ref().map(|b| ConnId(b.conn_id)).unwrap_or(ConnId::INVALID);
    let result = decoded.and_then(|_| {
        ctx.bind_request(conn_id, req.client, &req.frame);
        ctx.return_resource(conn_id, now)
    });
    reply_on_track(ctx, req, conn_id, result_body(result));
}

fn handle_acquire_quota(ctx: &mut RmContext, req: &InboundRequest, now: Instant) -> Handled {
    let result = AcquireQuotaRequest::decode(&req.frame.body)
        .map_err(RmError::from)
        .and_then(|body| ctx.acquire_resource_quota(body.user_oid, &body.shape, now));
    let response = match result {
        Ok(None) => return Handled::Deferred { conn_id: None },
        Ok(Some((queue, grant))) => AcquireQuotaResponse {
            result: ResultCode::Ok.as_u32(),
            queue,
            grant: Some(grant),
            error: None,
        },
        Err(e) => {
            warn!(client = req.client.0, "resource quota request failed: {}", e);
            AcquireQuotaResponse {
                result: e.code().as_u32(),
                queue: String::new(),
                grant: None,
                error: Some(e.to_string()),
            }
        }
    };
    reply(ctx, req, response.encode());
    Handled::Done
}

fn handle_refresh(ctx: &mut RmContext, req: &InboundRequest, now: Instant) {
    let result = RefreshRequest::decode(&req.frame.body)
        .map_err(RmError::from)
        .map(|body| {
            let refreshed = ctx.refresh_lease(&body.conn_ids, now);
            debug!(requested = body.conn_ids.len(), refreshed, "refreshed resource leases");
        });
    reply(ctx, req, result_body(result));
}

fn handle_segment_is_down(ctx: &mut RmContext, req: &InboundRequest) {
    let result = SegmentIsDownRequest::decode(&req.frame.body)
        .map_err(RmError::from)
        .map(|body| {
            ctx.segment_is_down(&body.hosts);
        });
    reply(ctx, req, result_body(result));
}

fn handle_dump_status(ctx: &mut RmContext, req: &InboundRequest, now: Instant) {
    let result = DumpStatusRequest::decode(&req.frame.body)
        .map_err(RmError::from)
        .and_then(|body| {
            let kind = DumpKind::from_u32(body.dump_type).ok_or_else(|| {
                RmError::DumpFailed(format!("unknown dump type {}", body.dump_type))
            })?;
            dump_status(ctx, kind, Path::new(&body.path), now)
        });
    reply(ctx, req, result_body(result));
}

fn handle_dump_queue_status(ctx: &mut RmContext, req: &InboundRequest) {
    let response = ResQueueStatusResponse {
        result: ResultCode::Ok.as_u32(),
        queues: ctx.queues().status(),
    };
    reply(ctx, req, response.encode());
}

fn handle_quota_control(ctx: &mut RmContext, req: &InboundRequest) {
    let result = QuotaControlRequest::decode(&req.frame.body)
        .map_err(RmError::from)
        .and_then(|body| {
            let phase = QuotaPhase::from_u32(body.phase).ok_or_else(|| {
                RmError::Wire(WireError::Invalid(format!("unknown quota phase {}", body.phase)))
            })?;
            ctx.set_phase_paused(phase, body.pause);
            Ok(())
        });
    reply(ctx, req, result_body(result));
}

fn handle_im_alive(ctx: &mut RmContext, req: &InboundRequest, now: Instant) {
    let result = ImAliveRequest::decode(&req.frame.body)
        .map_err(|e| {
            warn!(peer = %req.peer_ip, "undecodable heartbeat: {}", e);
            RmError::MalformedHeartbeat(e.to_string())
        })
        .and_then(|body| {
            ctx.ingest_heartbeat(body, &req.peer_ip, req.peer_hostname.as_deref(), now)
        })
        .map(|outcome| debug!(peer = %req.peer_ip, ?outcome, "heartbeat processed"));
    reply(ctx, req, result_body(result));
}
