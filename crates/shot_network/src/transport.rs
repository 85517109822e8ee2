//! TCP transport: One message per connection.
//!
//! A sender connects, writes a single length-prefixed frame and closes. The
//! accept loop reads exactly one frame from each connection, decodes it and
//! forwards it into an mpsc channel as a [`TransportEvent`]. Nothing is ever
//! written back.
//!
//! Frame layout: a 4-byte big-endian body length followed by the message as
//! UTF-8 JSON.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, trace, warn};

use crate::error::NetworkError;
use crate::message::Message;

/// Largest accepted frame body.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

const LEN_PREFIX: usize = 4;

/// Outbound timeouts applied to every dial.
#[derive(Debug, Clone, Copy)]
pub struct DialTimeouts {
    pub connect: Duration,
    pub write: Duration,
}

impl Default for DialTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(2),
            write: Duration::from_secs(2),
        }
    }
}

/// An incoming event from the transport layer.
#[derive(Debug)]
pub enum TransportEvent {
    /// A message was received and decoded.
    Message { from_addr: SocketAddr, message: Message },
}

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

/// Encode a message as a complete frame (length prefix included).
pub fn encode_frame(message: &Message) -> Result<Vec<u8>, NetworkError> {
    let body = message.to_json().map_err(NetworkError::Encode)?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(NetworkError::FrameTooLarge(body.len()));
    }
    let mut frame = Vec::with_capacity(LEN_PREFIX + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode a complete frame produced by [`encode_frame`].
pub fn decode_frame(frame: &[u8]) -> Result<Message, NetworkError> {
    if frame.len() < LEN_PREFIX {
        return Err(NetworkError::Transport(format!(
            "Truncated frame: {} bytes",
            frame.len()
        )));
    }
    let (prefix, body) = frame.split_at(LEN_PREFIX);
    let len = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(NetworkError::FrameTooLarge(len));
    }
    if body.len() != len {
        return Err(NetworkError::Transport(format!(
            "Frame length mismatch: header says {len}, got {}",
            body.len()
        )));
    }
    Message::from_json(body).map_err(NetworkError::Decode)
}

/// Write one frame and flush.
pub async fn write_frame<W>(writer: &mut W, message: &Message) -> Result<(), NetworkError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame and decode it.
pub async fn read_frame<R>(reader: &mut R) -> Result<Message, NetworkError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; LEN_PREFIX];
    reader.read_exact(&mut len_buf).await?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(NetworkError::FrameTooLarge(len));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Message::from_json(&body).map_err(NetworkError::Decode)
}

// ---------------------------------------------------------------------------
// Server side
// ---------------------------------------------------------------------------

/// Bind the listening endpoint.
pub async fn listen(addr: SocketAddr) -> Result<TcpListener, NetworkError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| NetworkError::bind(addr, e))?;
    info!("Listening on {}", listener.local_addr().unwrap_or(addr));
    Ok(listener)
}

/// Run the accept loop until `shutdown` fires.
///
/// Each accepted connection gets its own task, which reads one frame within
/// `read_timeout` and emits a [`TransportEvent::Message`]. Connection tasks
/// still running at shutdown are aborted. The listener is dropped (closing
/// the port) when this function returns.
pub async fn serve(
    listener: TcpListener,
    event_tx: mpsc::Sender<TransportEvent>,
    mut shutdown: broadcast::Receiver<()>,
    read_timeout: Duration,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer_addr)) => {
                        trace!("Accepted connection from {peer_addr}");
                        let event_tx = event_tx.clone();
                        connections.spawn(async move {
                            handle_connection(stream, peer_addr, event_tx, read_timeout).await;
                        });
                    }
                    Err(e) => {
                        error!("TCP accept failed: {e}");
                    }
                }
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = shutdown.recv() => {
                info!("Accept loop shutting down");
                break;
            }
        }
    }

    connections.shutdown().await;
}

async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    event_tx: mpsc::Sender<TransportEvent>,
    read_timeout: Duration,
) {
    let result = tokio::time::timeout(read_timeout, read_frame(&mut stream)).await;
    match result {
        Ok(Ok(message)) => {
            debug!(
                "Received {} {} from {peer_addr} (ttl {})",
                message.kind, message.id, message.ttl
            );
            let _ = event_tx
                .send(TransportEvent::Message {
                    from_addr: peer_addr,
                    message,
                })
                .await;
        }
        Ok(Err(e)) => {
            warn!("Dropping bad frame from {peer_addr}: {e}");
        }
        Err(_) => {
            warn!("Read from {peer_addr} timed out after {read_timeout:?}");
        }
    }
}

// ---------------------------------------------------------------------------
// Client side
// ---------------------------------------------------------------------------

/// Open a short-lived connection to `host:port`, write `message`, and close.
///
/// Both the connect and the write are bounded by `timeouts`; the socket is
/// dropped on every path.
pub async fn dial(
    host: &str,
    port: u16,
    message: &Message,
    timeouts: DialTimeouts,
) -> Result<(), NetworkError> {
    let addr = format!("{host}:{port}");

    let mut stream = match tokio::time::timeout(timeouts.connect, TcpStream::connect((host, port)))
        .await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(NetworkError::from_io(&addr, e)),
        Err(_) => return Err(NetworkError::Timeout(timeouts.connect)),
    };

    let write = async {
        write_frame(&mut stream, message).await?;
        stream.shutdown().await?;
        Ok::<(), NetworkError>(())
    };

    match tokio::time::timeout(timeouts.write, write).await {
        Ok(Ok(())) => {
            trace!("Sent {} {} to {addr}", message.kind, message.id);
            Ok(())
        }
        Ok(Err(NetworkError::Io(e))) => Err(NetworkError::from_io(&addr, e)),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(NetworkError::Timeout(timeouts.write)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
