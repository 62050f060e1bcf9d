//! TCP RPC transport: one reader task and one writer task per client.

use anyhow::{Context, Result};
use rmgr_core::conntrack::ClientId;
use rmgr_core::dispatch::{Event, InboundRequest};
use rmgr_core::protocol::{Frame, MessageId};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::resolve::reverse_lookup;
use super::ServerMsg;
use crate::cli::framing::{read_frame, write_frame};

/// Bind `addr` and spawn the accept loop.
pub async fn spawn_rpc_listener(
    addr: &str,
    tx: mpsc::UnboundedSender<ServerMsg>,
) -> Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding RPC listener on {addr}"))?;
    let local = listener.local_addr()?;
    tracing::info!(addr = %local, "RPC listener ready");
    Ok((local, tokio::spawn(accept_loop(listener, tx))))
}

async fn accept_loop(listener: TcpListener, tx: mpsc::UnboundedSender<ServerMsg>) {
    let mut next_client = 0u64;
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                next_client += 1;
                tokio::spawn(serve_connection(
                    stream,
                    peer,
                    ClientId(next_client),
                    tx.clone(),
                ));
            }
            Err(e) => tracing::warn!("RPC accept: {}", e),
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    client: ClientId,
    tx: mpsc::UnboundedSender<ServerMsg>,
) {
    let (mut reader, mut writer) = stream.into_split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Frame>();
    if tx
        .send(ServerMsg::Connected {
            client,
            tx: out_tx,
        })
        .is_err()
    {
        return;
    }

    tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if let Err(e) = write_frame(&mut writer, &frame).await {
                tracing::debug!(client = client.0, "write failed: {:#}", e);
                break;
            }
        }
    });

    let peer_ip = peer.ip().to_string();
    // Resolved once, on the first heartbeat.
    let mut peer_hostname: Option<Option<String>> = None;
    loop {
        let frame = match read_frame(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(client = client.0, peer = %peer, "dropping connection: {:#}", e);
                break;
            }
        };
        let hostname = if frame.message_id == MessageId::RequestImAlive {
            if peer_hostname.is_none() {
                peer_hostname = Some(reverse_lookup(peer.ip()).await);
            }
            peer_hostname.clone().flatten()
        } else {
            None
        };
        let request = InboundRequest {
            client,
            peer_ip: peer_ip.clone(),
            peer_hostname: hostname,
            frame,
        };
        if tx.send(ServerMsg::Event(Event::Request(request))).is_err() {
            break;
        }
    }
    let _ = tx.send(ServerMsg::Disconnected(client));
}
