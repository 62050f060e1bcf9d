//! Runtime pieces of `rmgr serve`: transport tasks feed one dispatcher task
//! that owns the [`RmContext`] and handles a single message at a time.

mod listener;
mod prober;
mod resolve;

use rmgr_core::conntrack::ClientId;
use rmgr_core::context::RmContext;
use rmgr_core::dispatch::Event;
use rmgr_core::protocol::Frame;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

pub use listener::spawn_rpc_listener;
pub use prober::TcpProber;

/// Everything the dispatcher reacts to.
#[derive(Debug)]
pub enum ServerMsg {
    /// A client connection opened; responses for it go to `tx`.
    Connected {
        client: ClientId,
        tx: mpsc::UnboundedSender<Frame>,
    },
    Disconnected(ClientId),
    Event(Event),
}

/// Apply messages to the context until the channel closes, emitting a tick
/// every `tick`. Responses are routed to whichever client they belong to.
pub async fn run_dispatcher(
    mut ctx: RmContext,
    mut rx: mpsc::UnboundedReceiver<ServerMsg>,
    tick: Duration,
) {
    let mut clients: HashMap<ClientId, mpsc::UnboundedSender<Frame>> = HashMap::new();
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let msg = tokio::select! {
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
            _ = ticker.tick() => ServerMsg::Event(Event::Tick),
        };
        match msg {
            ServerMsg::Connected { client, tx } => {
                tracing::debug!(client = client.0, "client connected");
                clients.insert(client, tx);
                continue;
            }
            ServerMsg::Disconnected(client) => {
                tracing::debug!(client = client.0, "client disconnected");
                clients.remove(&client);
                continue;
            }
            ServerMsg::Event(event) => ctx.handle_event(event, Instant::now()),
        }
        for (client, frame) in ctx.drain_responses() {
            let delivered = clients
                .get(&client)
                .map(|tx| tx.send(frame).is_ok())
                .unwrap_or(false);
            if !delivered {
                tracing::debug!(client = client.0, "client gone, response dropped");
            }
        }
    }
    tracing::info!("dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmgr_core::config::RmConfig;
    use rmgr_core::dispatch::InboundRequest;
    use rmgr_core::protocol::requests::{RegisterRequest, WireBody};
    use rmgr_core::protocol::responses::RegisterResponse;
    use rmgr_core::protocol::MessageId;

    #[tokio::test]
    async fn responses_reach_the_requesting_client() {
        let ctx = RmContext::new(RmConfig::default(), Instant::now()).unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_dispatcher(ctx, rx, Duration::from_secs(3600)));

        let (client_tx, mut client_rx) = mpsc::unbounded_channel();
        let client = ClientId(1);
        tx.send(ServerMsg::Connected {
            client,
            tx: client_tx,
        })
        .unwrap();
        let body = RegisterRequest {
            user: "gpadmin".into(),
        }
        .encode()
        .unwrap();
        tx.send(ServerMsg::Event(Event::Request(InboundRequest {
            client,
            peer_ip: "127.0.0.1".into(),
            peer_hostname: None,
            frame: Frame::new(MessageId::RequestConnectionReg, 4, 0, body),
        })))
        .unwrap();

        let frame = client_rx.recv().await.unwrap();
        assert_eq!(frame.message_id, MessageId::ResponseConnectionReg);
        assert_eq!(frame.mark1, 4);
        let resp = RegisterResponse::decode(&frame.body).unwrap();
        assert_eq!(resp.conn_id, 0);

        drop(tx);
        task.await.unwrap();
    }
}
