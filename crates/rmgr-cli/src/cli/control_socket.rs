//! Control socket: server (during `rmgr serve`) and client (for `rmgr member`).
//! Protocol: one line per membership change, mirroring the key/value store:
//! "put <key> <value>" or "delete <key>".

use anyhow::{bail, Context, Result};
use rmgr_core::dispatch::Event;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;

use super::server::ServerMsg;

/// Parse one control line into a membership event. Malformed lines yield `None`.
pub fn parse_control_line(line: &str) -> Option<Event> {
    let line = line.trim();
    let (verb, rest) = line.split_once(' ')?;
    match verb {
        "put" => {
            let (key, value) = rest.trim_start().split_once(' ')?;
            let value = value.trim();
            if value.is_empty() {
                return None;
            }
            Some(Event::Membership {
                key: key.to_string(),
                value: value.to_string(),
            })
        }
        "delete" => {
            let key = rest.trim();
            if key.is_empty() || key.contains(' ') {
                return None;
            }
            Some(Event::Membership {
                key: key.to_string(),
                value: String::new(),
            })
        }
        _ => None,
    }
}

/// Spawns a task that listens on `path` and forwards each well-formed line
/// to the dispatcher. Ignores malformed lines.
pub fn spawn_control_listener(
    tx: mpsc::UnboundedSender<ServerMsg>,
    path: impl AsRef<Path>,
) -> Result<tokio::task::JoinHandle<()>> {
    let path = path.as_ref().to_path_buf();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating control socket dir {}", dir.display()))?;
    }
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path)
        .with_context(|| format!("binding control socket {}", path.display()))?;
    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let mut reader = BufReader::new(stream).lines();
                        while let Ok(Some(line)) = reader.next_line().await {
                            match parse_control_line(&line) {
                                Some(event) => {
                                    if tx.send(ServerMsg::Event(event)).is_err() {
                                        break;
                                    }
                                }
                                None => tracing::debug!(line = %line, "ignored control line"),
                            }
                        }
                    });
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    });
    Ok(handle)
}

/// Sends one membership change to a running server.
pub async fn send_membership(socket_path: &Path, key: &str, value: Option<&str>) -> Result<()> {
    if !socket_path.exists() {
        bail!("no server control socket at {}", socket_path.display());
    }
    let msg = match value {
        Some(v) => format!("put {} {}\n", key, v.replace('\n', " ")),
        None => format!("delete {}\n", key),
    };
    let mut stream = UnixStream::connect(socket_path)
        .await
        .with_context(|| format!("connecting to {}", socket_path.display()))?;
    stream.write_all(msg.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn membership(event: Option<Event>) -> (String, String) {
        match event {
            Some(Event::Membership { key, value }) => (key, value),
            other => panic!("expected membership event, got {other:?}"),
        }
    }

    #[test]
    fn put_keeps_the_whole_value() {
        let (key, value) =
            membership(parse_control_line(r#"put /rmgr/segments/sdw1 {"a": 1, "b": 2}"#));
        assert_eq!(key, "/rmgr/segments/sdw1");
        assert_eq!(value, r#"{"a": 1, "b": 2}"#);
    }

    #[test]
    fn delete_is_an_empty_value() {
        let (key, value) = membership(parse_control_line("delete /rmgr/segments/sdw1\n"));
        assert_eq!(key, "/rmgr/segments/sdw1");
        assert!(value.is_empty());
    }

    #[test]
    fn malformed_lines_are_ignored() {
        assert!(parse_control_line("").is_none());
        assert!(parse_control_line("put /rmgr/segments/sdw1").is_none());
        assert!(parse_control_line("delete").is_none());
        assert!(parse_control_line("pause 3").is_none());
    }

    #[tokio::test]
    async fn lines_reach_the_dispatcher_channel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control.sock");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = spawn_control_listener(tx, &path).unwrap();

        send_membership(&path, "/rmgr/segments/sdw2", None).await.unwrap();
        match rx.recv().await.unwrap() {
            ServerMsg::Event(Event::Membership { key, value }) => {
                assert_eq!(key, "/rmgr/segments/sdw2");
                assert!(value.is_empty());
            }
            other => panic!("unexpected message {other:?}"),
        }
        handle.abort();
    }
}
