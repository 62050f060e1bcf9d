//! One tracked session.

use std::collections::VecDeque;
use std::time::Instant;

use tracing::warn;

use super::{ConnId, Progress};
use crate::error::RmError;
use crate::protocol::requests::{PreferredHost, RequestShape};
use crate::protocol::Frame;
use crate::resqueue::{QueueId, ResourceGrant};

/// Transport-level identity of the client connection a track answers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

#[derive(Debug, Clone)]
pub struct ConnectionTrack {
    pub conn_id: ConnId,
    pub user_id: String,
    pub queue: Option<QueueId>,
    pub session_id: i64,
    pub client: ClientId,
    pub mark1: u8,
    pub mark2: u8,
    progress: Progress,

    pub shape: RequestShape,
    pub preferred: Vec<PreferredHost>,
    /// What the queue manager sized this session's current request to.
    pub requested: Option<ResourceGrant>,
    pub grant: Option<ResourceGrant>,

    pub res_request_time: Option<Instant>,
    pub last_act_time: Instant,

    /// Staged responses, oldest first.
    pub pending_responses: VecDeque<Frame>,
    pub response_sent: bool,
}

impl ConnectionTrack {
    /// A detached, unregistered track for `client`.
    pub fn new(client: ClientId, now: Instant) -> Self {
        Self {
            conn_id: ConnId::INVALID,
            user_id: String::new(),
            queue: None,
            session_id: -1,
            client,
            mark1: 0,
            mark2: 0,
            progress: Progress::Unregistered,
            shape: RequestShape::default(),
            preferred: Vec::new(),
            requested: None,
            grant: None,
            res_request_time: None,
            last_act_time: now,
            pending_responses: VecDeque::new(),
            response_sent: true,
        }
    }

    pub fn progress(&self) -> Progress {
        self.progress
    }

    /// Move to `to`, refusing illegal transitions. The track is not touched
    /// when the transition is refused.
    pub fn transform(&mut self, to: Progress) -> Result<(), RmError> {
        if !self.progress.can_transform(to) {
            warn!(
                conn_id = %self.conn_id,
                from = %self.progress,
                to = %to,
                "invalid connection track transition"
            );
            return Err(RmError::WrongConnStat(self.progress));
        }
        self.progress = to;
        Ok(())
    }

    /// Require the current state to be `expected`.
    pub fn expect(&self, expected: Progress) -> Result<(), RmError> {
        if self.progress != expected {
            warn!(
                conn_id = %self.conn_id,
                progress = %self.progress,
                expected = %expected,
                "request is invalid for connection track state"
            );
            return Err(RmError::WrongConnStat(self.progress));
        }
        Ok(())
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_act_time = now;
    }

    /// Remember the marks of the request being served so the response can
    /// echo them.
    pub fn note_request(&mut self, request: &Frame) {
        self.mark1 = request.mark1;
        self.mark2 = request.mark2;
    }

    /// Stage a response for the transport behind any not yet taken.
    pub fn build_response(&mut self, response: Frame) {
        self.pending_responses.push_back(response);
        self.response_sent = false;
    }

    /// Take the oldest staged response. The track counts as answered once
    /// nothing is left.
    pub fn take_response(&mut self) -> Option<Frame> {
        let out = self.pending_responses.pop_front();
        self.response_sent = self.pending_responses.is_empty();
        out
    }

    /// Clear per-request state after the allocation is returned or cancelled.
    pub fn clear_request(&mut self) {
        self.requested = None;
        self.grant = None;
        self.res_request_time = None;
        self.preferred.clear();
    }
}
