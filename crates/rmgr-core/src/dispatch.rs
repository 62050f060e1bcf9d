//! Event loop entry point.
//!
//! Every input (client request, membership change, probe result, timer
//! tick) is an [`Event`] handled to completion by [`RmContext::handle_event`]
//! before the next one. Deferred acquires are retried after each event.

use std::time::Instant;

use tracing::debug;

use crate::context::{DeferredRequest, RmContext};
use crate::conntrack::ClientId;
use crate::protocol::Frame;
use crate::requesthandler::{handle_request, Handled};

/// A decoded request plus what the transport knows about its sender.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub client: ClientId,
    pub peer_ip: String,
    /// Reverse lookup of `peer_ip`, resolved off the event loop.
    pub peer_hostname: Option<String>,
    pub frame: Frame,
}

#[derive(Debug, Clone)]
pub enum Event {
    Request(InboundRequest),
    /// Key/value change from the membership store; empty value = departure.
    Membership { key: String, value: String },
    ProbeResult { hostname: String, alive: bool },
    Tick,
}

impl RmContext {
    pub fn handle_event(&mut self, event: Event, now: Instant) {
        match event {
            Event::Request(request) => self.handle_inbound(request, now),
            Event::Membership { key, value } => {
                // Parse failures are logged and dropped inside.
                let _ = self.handle_membership_update(&key, &value, now);
            }
            Event::ProbeResult { hostname, alive } => {
                self.complete_probe(&hostname, alive);
            }
            Event::Tick => self.on_tick(now),
        }
        self.retry_deferred(now);
    }

    fn handle_inbound(&mut self, request: InboundRequest, now: Instant) {
        if let Handled::Deferred { conn_id } = handle_request(self, &request, now) {
            self.deferred.push_back(DeferredRequest { conn_id, request });
        }
    }

    fn on_tick(&mut self, now: Instant) {
        let dropped = self.sweep_idle_sessions(now);
        let expired = self.expire_silent_segments(now);
        if !dropped.is_empty() || !expired.is_empty() {
            debug!(sessions = dropped.len(), segments = expired.len(), "periodic sweep");
        }
    }

    /// Run deferred requests again in arrival order once they can be sized.
    fn retry_deferred(&mut self, now: Instant) {
        if self.deferred.is_empty() || self.should_defer(now) {
            return;
        }
        let pending = std::mem::take(&mut self.deferred);
        debug!(count = pending.len(), "retrying deferred requests");
        for d in pending {
            self.handle_inbound(d.request, now);
        }
    }
}
