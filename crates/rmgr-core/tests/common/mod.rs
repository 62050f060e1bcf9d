//! Drives an `RmContext` the way the server does: encoded request frames in,
//! response frames out.

#![allow(dead_code)]

use rmgr_core::config::RmConfig;
use rmgr_core::conntrack::{ClientId, ConnId};
use rmgr_core::context::RmContext;
use rmgr_core::dispatch::{Event, InboundRequest};
use rmgr_core::error::ResultCode;
use rmgr_core::protocol::requests::{
    AcquireRequest, ConnIdRequest, ImAliveRequest, RegisterRequest, RequestShape,
    SegmentIsDownRequest, WireBody,
};
use rmgr_core::protocol::responses::{AcquireResponse, RegisterResponse, ResultResponse};
use rmgr_core::protocol::{Frame, MessageId};
use rmgr_core::respool::{SegInfo, SegStat};
use std::time::{Duration, Instant};

pub const OK: u32 = 0;

pub fn code(c: ResultCode) -> u32 {
    c.as_u32()
}

/// Grace window off, small id pool.
pub fn config() -> RmConfig {
    RmConfig {
        max_resource_contexts: 16,
        nocluster_timeout_secs: 0,
        ..RmConfig::default()
    }
}

pub fn heartbeat(addresses: &[&str], memory_mb: u32) -> ImAliveRequest {
    ImAliveRequest {
        tmp_dir_count: 1,
        broken_tmp_dir_count: 0,
        stat: SegStat {
            info: SegInfo {
                hostname: "self-reported".into(),
                addresses: addresses.iter().map(|a| a.to_string()).collect(),
                alive: true,
                port: 40000,
                ..SegInfo::default()
            },
            fts_available: true,
            fts_total_memory_mb: memory_mb,
            fts_total_core: 4,
            ..SegStat::default()
        },
    }
}

pub struct Harness {
    pub ctx: RmContext,
    pub now: Instant,
    next_mark: u8,
    inbox: Vec<(ClientId, Frame)>,
}

impl Harness {
    pub fn new(config: RmConfig) -> Self {
        let now = Instant::now();
        Self::from_context(RmContext::new(config, now).unwrap(), now)
    }

    /// Wrap a context built by the caller; `now` should be its start time.
    pub fn from_context(ctx: RmContext, now: Instant) -> Self {
        Self {
            ctx,
            now,
            next_mark: 1,
            inbox: Vec::new(),
        }
    }

    /// A harness whose cluster has `hosts` segments of 2048 MB each.
    pub fn with_hosts(config: RmConfig, hosts: usize) -> Self {
        let mut h = Self::new(config);
        for i in 0..hosts {
            let ip = format!("10.0.1.{}", i + 1);
            h.heartbeat_from(&ip, &format!("sdw{i}"), heartbeat(&[&ip], 2048));
        }
        h.drain();
        h
    }

    pub fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    pub fn event(&mut self, event: Event) {
        self.ctx.handle_event(event, self.now);
    }

    /// Send a request from `client`; returns the mark it carried.
    pub fn send(&mut self, client: u64, id: MessageId, body: Vec<u8>) -> u8 {
        self.send_from(client, "10.9.9.9", None, id, body)
    }

    pub fn send_from(
        &mut self,
        client: u64,
        peer_ip: &str,
        peer_hostname: Option<&str>,
        id: MessageId,
        body: Vec<u8>,
    ) -> u8 {
        let mark = self.next_mark;
        self.next_mark = self.next_mark.wrapping_add(1);
        let request = InboundRequest {
            client: ClientId(client),
            peer_ip: peer_ip.to_string(),
            peer_hostname: peer_hostname.map(str::to_string),
            frame: Frame::new(id, mark, 0, body),
        };
        self.event(Event::Request(request));
        mark
    }

    /// Every response produced so far and not yet taken.
    pub fn drain(&mut self) -> Vec<(ClientId, Frame)> {
        let mut out = std::mem::take(&mut self.inbox);
        out.extend(self.ctx.drain_responses());
        out
    }

    /// The single pending response addressed to `client`, if any. Responses
    /// for other clients stay queued.
    pub fn reply_for(&mut self, client: u64) -> Option<Frame> {
        let pending = self.drain();
        let (mut mine, rest): (Vec<_>, Vec<_>) = pending
            .into_iter()
            .partition(|(c, _)| *c == ClientId(client));
        self.inbox = rest;
        assert!(mine.len() <= 1, "more than one response for client {client}");
        mine.pop().map(|(_, f)| f)
    }

    pub fn heartbeat_from(&mut self, ip: &str, hostname: &str, hb: ImAliveRequest) -> ResultResponse {
        self.send_from(
            1000,
            ip,
            Some(hostname),
            MessageId::RequestImAlive,
            hb.encode().unwrap(),
        );
        let frame = self.reply_for(1000).expect("heartbeat answered");
        assert_eq!(frame.message_id, MessageId::ResponseImAlive);
        ResultResponse::decode(&frame.body).unwrap()
    }

    pub fn register(&mut self, client: u64, user: &str) -> RegisterResponse {
        let body = RegisterRequest { user: user.into() }.encode().unwrap();
        let mark = self.send(client, MessageId::RequestConnectionReg, body);
        let frame = self.reply_for(client).expect("register answered");
        assert_eq!(frame.message_id, MessageId::ResponseConnectionReg);
        assert_eq!(frame.mark1, mark);
        RegisterResponse::decode(&frame.body).unwrap()
    }

    pub fn registered(&mut self, client: u64) -> ConnId {
        let resp = self.register(client, "gpadmin");
        assert_eq!(resp.result, OK, "{:?}", resp.error);
        ConnId(resp.conn_id)
    }

    /// Send an acquire; `None` while the request is waiting or deferred.
    pub fn acquire(&mut self, client: u64, conn: ConnId, num: i32, min: i32) -> Option<AcquireResponse> {
        let body = AcquireRequest {
            session_id: i64::from(conn.0) + 100,
            conn_id: conn.0,
            shape: RequestShape {
                max_seg_count_fix: num,
                min_seg_count_fix: min,
                ..RequestShape::default()
            },
            preferred: Vec::new(),
        }
        .encode()
        .unwrap();
        self.send(client, MessageId::RequestAcquireResource, body);
        self.acquire_reply(client)
    }

    pub fn acquire_reply(&mut self, client: u64) -> Option<AcquireResponse> {
        self.reply_for(client).map(|frame| {
            assert_eq!(frame.message_id, MessageId::ResponseAcquireResource);
            AcquireResponse::decode(&frame.body).unwrap()
        })
    }

    pub fn return_resource(&mut self, client: u64, conn: ConnId) -> ResultResponse {
        self.conn_call(client, MessageId::RequestReturnResource, conn)
    }

    pub fn unregister(&mut self, client: u64, conn: ConnId) -> ResultResponse {
        self.conn_call(client, MessageId::RequestConnectionUnreg, conn)
    }

    fn conn_call(&mut self, client: u64, id: MessageId, conn: ConnId) -> ResultResponse {
        let body = ConnIdRequest { conn_id: conn.0 }.encode().unwrap();
        self.send(client, id, body);
        let frame = self.reply_for(client).expect("answered");
        ResultResponse::decode(&frame.body).unwrap()
    }

    /// Report hosts down. Without a prober the dispatch fails, so each known
    /// host goes straight to unavailable.
    pub fn segment_down(&mut self, hosts: &[&str]) -> ResultResponse {
        let body = SegmentIsDownRequest {
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
        }
        .encode()
        .unwrap();
        self.send(900, MessageId::RequestSegmentIsDown, body);
        let frame = self.reply_for(900).expect("segment-down answered");
        assert_eq!(frame.message_id, MessageId::ResponseSegmentIsDown);
        ResultResponse::decode(&frame.body).unwrap()
    }
}
