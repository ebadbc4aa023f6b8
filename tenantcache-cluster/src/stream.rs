//! JSON-lines transport over byte streams.
//!
//! Each message is one line of compact JSON. Used to connect a parent
//! process to worker processes through their stdin and stdout pipes.

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::channel::{PeerId, PeerLink};

/// Connect to `peer` through `reader`/`writer`, spawning one task per
/// direction.
///
/// Lines that are not JSON are skipped. The reader task ends at EOF, which
/// closes the link's inbound receiver; the writer task ends once every clone
/// of the outbound sink is dropped.
///
/// Must be called from within a tokio runtime.
pub fn spawn_stream_link<R, W>(peer: PeerId, reader: R, writer: W) -> PeerLink
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Value>();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<Value>();

    tokio::spawn(write_lines(peer, writer, outbound_rx));
    tokio::spawn(read_lines(peer, reader, inbound_tx));

    PeerLink::new(peer, Arc::new(outbound_tx), inbound_rx)
}

async fn write_lines<W>(peer: PeerId, mut writer: W, mut outbound: mpsc::UnboundedReceiver<Value>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = outbound.recv().await {
        let mut line = message.to_string();
        line.push('\n');
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = written {
            tracing::warn!(peer = %peer, error = %e, "Stream write failed, closing link");
            return;
        }
    }
    tracing::debug!(peer = %peer, "Outbound stream closed");
}

async fn read_lines<R>(peer: PeerId, reader: R, inbound: mpsc::UnboundedSender<Value>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Value>(line) {
                    Ok(message) => {
                        if inbound.send(message).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!(peer = %peer, error = %e, "Skipping non-JSON line");
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "Stream read failed");
                break;
            }
        }
    }
    tracing::debug!(peer = %peer, "Inbound stream closed");
}
