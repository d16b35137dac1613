//! TCP transport
//!
//! Newline-delimited JSON. Every connection opens with one `ControlRequest`
//! line. Control operations get exactly one `ControlReply` line back;
//! `subscribe` turns the connection into an observer that receives
//! `StreamMessage` lines until either side closes.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use super::{ControlClient, PositionFeed};
use crate::consts::{CONTROL_TIMEOUT_MS, OBSERVER_BUFFER};
use crate::error::{PendulumError, Result};
use crate::messages::{ControlReply, ControlRequest, PositionMessage, StreamMessage};
use crate::node::{Node, ObserverSession};
use crate::sim::PendulumConfig;

/// Accept connections for `node` until the listener fails.
///
/// Each connection is handled on its own task; per-connection errors are
/// logged and never end the accept loop.
pub async fn serve(listener: TcpListener, node: Arc<Node>) -> Result<()> {
    log::info!("Serving node on {}", listener.local_addr()?);
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                log::debug!("Accepted connection from {peer}");
                let node = Arc::clone(&node);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, node).await {
                        log::warn!("Connection from {peer} failed: {e}");
                    }
                });
            }
            Err(e) => log::error!("Accept error: {e}"),
        }
    }
}

async fn handle_connection(stream: TcpStream, node: Arc<Node>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let Some(line) = lines.next_line().await? else {
        return Ok(());
    };

    let request = match serde_json::from_str::<ControlRequest>(&line) {
        Ok(request) => request,
        Err(e) => {
            log::warn!("Malformed control request: {e}");
            return write_line(&mut writer, &ControlReply::err(e.to_string())).await;
        }
    };
    log::debug!("Control request: {}", request.name());

    let reply = match request {
        ControlRequest::Subscribe => return stream_to(node.connect(), lines, writer).await,
        ControlRequest::Start { config } => match node.start(config) {
            Ok(()) => ControlReply::ok(),
            Err(e) => ControlReply::err(e.to_string()),
        },
        ControlRequest::Continue => {
            node.resume();
            ControlReply::ok()
        }
        ControlRequest::Pause => {
            node.pause();
            ControlReply::ok()
        }
        ControlRequest::Stop => {
            node.stop();
            ControlReply::ok()
        }
    };
    write_line(&mut writer, &reply).await
}

/// Forward the session to the peer until it hangs up
async fn stream_to(
    mut session: ObserverSession,
    mut lines: Lines<BufReader<OwnedReadHalf>>,
    mut writer: OwnedWriteHalf,
) -> Result<()> {
    loop {
        tokio::select! {
            message = session.recv() => match message {
                Some(message) => write_line(&mut writer, &message).await?,
                None => break,
            },
            // Observers have nothing to say; anything but more input means gone
            line = lines.next_line() => match line {
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => break,
            },
        }
    }
    log::debug!("Observer stream closed");
    Ok(())
}

async fn write_line<T: Serialize>(writer: &mut OwnedWriteHalf, value: &T) -> Result<()> {
    let mut bytes = serde_json::to_vec(value)?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    Ok(())
}

/// Issues control requests, one connection per call
#[derive(Debug, Clone)]
pub struct TcpControlClient {
    timeout: Duration,
}

impl Default for TcpControlClient {
    fn default() -> Self {
        Self::new(Duration::from_millis(CONTROL_TIMEOUT_MS))
    }
}

impl TcpControlClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn request(&self, address: &str, request: ControlRequest) -> Result<()> {
        let operation = request.name();
        tokio::time::timeout(self.timeout, exchange(address, &request))
            .await
            .map_err(|_| {
                PendulumError::Transport(format!("{operation} to {address} timed out"))
            })?
    }
}

/// One request line out, one reply line back
async fn exchange(address: &str, request: &ControlRequest) -> Result<()> {
    let stream = TcpStream::connect(address).await?;
    let (reader, mut writer) = stream.into_split();
    write_line(&mut writer, request).await?;

    let mut lines = BufReader::new(reader).lines();
    let Some(line) = lines.next_line().await? else {
        return Err(PendulumError::Transport(format!(
            "{address} closed before replying to {}",
            request.name()
        )));
    };
    let reply: ControlReply = serde_json::from_str(&line)?;
    if reply.ok {
        return Ok(());
    }
    Err(PendulumError::Transport(format!(
        "{} rejected by {address}: {}",
        request.name(),
        reply.error.unwrap_or_default()
    )))
}

#[async_trait]
impl ControlClient for TcpControlClient {
    async fn start(&self, address: &str, config: PendulumConfig) -> Result<()> {
        self.request(address, ControlRequest::Start { config }).await
    }

    async fn resume(&self, address: &str) -> Result<()> {
        self.request(address, ControlRequest::Continue).await
    }

    async fn pause(&self, address: &str) -> Result<()> {
        self.request(address, ControlRequest::Pause).await
    }

    async fn stop(&self, address: &str) -> Result<()> {
        self.request(address, ControlRequest::Stop).await
    }
}

/// Subscribes to a node's stream and keeps only Position messages
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpPositionFeed;

#[async_trait]
impl PositionFeed for TcpPositionFeed {
    async fn subscribe(&self, address: &str) -> Result<mpsc::Receiver<PositionMessage>> {
        let stream = TcpStream::connect(address).await?;
        let (reader, mut writer) = stream.into_split();
        write_line(&mut writer, &ControlRequest::Subscribe).await?;

        let (tx, rx) = mpsc::channel(OBSERVER_BUFFER);
        let address = address.to_owned();
        tokio::spawn(async move {
            // Closing the write half would end the server's stream
            let _writer = writer;
            let mut lines = BufReader::new(reader).lines();
            loop {
                tokio::select! {
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => match serde_json::from_str::<StreamMessage>(&line) {
                            Ok(StreamMessage::Position(position)) => {
                                if tx.send(position).await.is_err() {
                                    break;
                                }
                            }
                            Ok(_) => {}
                            Err(e) => log::warn!("Bad stream message from {address}: {e}"),
                        },
                        Ok(None) => break,
                        Err(e) => {
                            log::warn!("Stream from {address} failed: {e}");
                            break;
                        }
                    },
                    _ = tx.closed() => break,
                }
            }
        });
        Ok(rx)
    }
}
