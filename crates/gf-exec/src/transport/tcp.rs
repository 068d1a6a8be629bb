//! Star-topology transport over TCP.
//!
//! The coordinator listens, workers connect and introduce themselves with a
//! `Hello` frame. Frames are newline-delimited JSON. Workers can only talk
//! to the coordinator, which is all the master/worker protocol needs.

use async_trait::async_trait;
use gf_types::{config_error, GfResult, TransportError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use super::{mailbox, Channel, Envelope, Mailbox, Message, Postbox, Transport};

const CONNECT_RETRY: Duration = Duration::from_millis(200);

#[derive(Debug, Serialize, Deserialize)]
enum Frame {
    Hello { rank: usize, size: usize },
    Envelope(Envelope),
}

type FrameReader = Lines<BufReader<OwnedReadHalf>>;

fn connection_error(message: impl Into<String>) -> TransportError {
    TransportError::Connection {
        message: message.into(),
    }
}

fn encode(frame: &Frame) -> GfResult<Vec<u8>> {
    let mut line = serde_json::to_vec(frame)?;
    line.push(b'\n');
    Ok(line)
}

async fn read_frame(lines: &mut FrameReader) -> GfResult<Option<Frame>> {
    let line = lines
        .next_line()
        .await
        .map_err(|e| connection_error(e.to_string()))?;
    match line {
        Some(line) => Ok(Some(serde_json::from_str(&line)?)),
        None => Ok(None),
    }
}

pub struct TcpTransport {
    rank: usize,
    size: usize,
    mailbox: Mailbox,
    writers: BTreeMap<usize, Mutex<OwnedWriteHalf>>,
    readers: Vec<JoinHandle<()>>,
}

impl TcpTransport {
    /// Bind `addr` and wait for `size - 1` workers to connect.
    pub async fn bind_coordinator(addr: &str, size: usize, wait: Duration) -> GfResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| connection_error(format!("cannot bind {addr}: {e}")))?;
        Self::coordinator(listener, size, wait).await
    }

    /// Accept `size - 1` workers on `listener`. Fails if they have not all
    /// said hello within `wait`.
    pub async fn coordinator(listener: TcpListener, size: usize, wait: Duration) -> GfResult<Self> {
        if size < 2 {
            return Err(config_error!("a TCP cluster needs at least 2 ranks, got {size}"));
        }
        let local = listener
            .local_addr()
            .map_err(|e| connection_error(e.to_string()))?;
        info!(addr = %local, workers = size - 1, "waiting for workers");

        let connections = timeout(wait, accept_workers(&listener, size))
            .await
            .map_err(|_| {
                connection_error(format!(
                    "timed out after {:?} waiting for {} workers",
                    wait,
                    size - 1
                ))
            })??;

        let (postbox, mailbox) = mailbox(0);
        let mut writers = BTreeMap::new();
        let mut readers = Vec::new();
        for (rank, (lines, writer)) in connections {
            writers.insert(rank, Mutex::new(writer));
            readers.push(spawn_reader(0, rank, lines, postbox.clone()));
        }
        info!(size, "all workers connected");

        Ok(Self {
            rank: 0,
            size,
            mailbox,
            writers,
            readers,
        })
    }

    /// Connect to the coordinator at `addr` as `rank`, retrying until
    /// `wait` has elapsed.
    pub async fn worker(addr: &str, rank: usize, size: usize, wait: Duration) -> GfResult<Self> {
        if rank == 0 || rank >= size {
            return Err(config_error!("worker rank must lie in 1..{size}, got {rank}"));
        }
        let deadline = Instant::now() + wait;
        let stream = loop {
            match TcpStream::connect(addr).await {
                Ok(stream) => break stream,
                Err(e) if Instant::now() < deadline => {
                    debug!(rank, addr, error = %e, "coordinator not reachable yet");
                    tokio::time::sleep(CONNECT_RETRY).await;
                }
                Err(e) => {
                    return Err(connection_error(format!("cannot reach {addr}: {e}")).into());
                }
            }
        };
        stream
            .set_nodelay(true)
            .map_err(|e| connection_error(e.to_string()))?;

        let (read_half, mut writer) = stream.into_split();
        writer
            .write_all(&encode(&Frame::Hello { rank, size })?)
            .await
            .map_err(|e| connection_error(e.to_string()))?;
        info!(rank, addr, "connected to coordinator");

        let (postbox, mailbox) = mailbox(rank);
        let lines = BufReader::new(read_half).lines();
        let reader = spawn_reader(rank, 0, lines, postbox);

        let mut writers = BTreeMap::new();
        writers.insert(0, Mutex::new(writer));
        Ok(Self {
            rank,
            size,
            mailbox,
            writers,
            readers: vec![reader],
        })
    }
}

async fn accept_workers(
    listener: &TcpListener,
    size: usize,
) -> GfResult<BTreeMap<usize, (FrameReader, OwnedWriteHalf)>> {
    let mut connections = BTreeMap::new();
    while connections.len() < size - 1 {
        let (stream, peer) = listener
            .accept()
            .await
            .map_err(|e| connection_error(e.to_string()))?;
        stream
            .set_nodelay(true)
            .map_err(|e| connection_error(e.to_string()))?;
        let (read_half, writer) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        match read_frame(&mut lines).await {
            Ok(Some(Frame::Hello { rank, size: theirs })) => {
                if theirs != size || rank == 0 || rank >= size {
                    return Err(connection_error(format!(
                        "{peer} claims rank {rank} of {theirs}, expected a rank in 1..{size}"
                    ))
                    .into());
                }
                if connections.contains_key(&rank) {
                    return Err(connection_error(format!("rank {rank} connected twice")).into());
                }
                info!(rank, %peer, "worker connected");
                connections.insert(rank, (lines, writer));
            }
            Ok(_) => warn!(%peer, "no hello from peer, ignoring connection"),
            Err(e) => warn!(%peer, error = %e, "bad hello, ignoring connection"),
        }
    }
    Ok(connections)
}

/// Forward frames from `peer` into our inbox until the connection closes.
fn spawn_reader(rank: usize, peer: usize, mut lines: FrameReader, postbox: Postbox) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match read_frame(&mut lines).await {
                Ok(Some(Frame::Envelope(envelope))) => {
                    if envelope.source != peer {
                        warn!(rank, peer, claimed = envelope.source, "dropping spoofed envelope");
                        continue;
                    }
                    if !postbox.deliver(envelope) {
                        break;
                    }
                }
                Ok(Some(Frame::Hello { .. })) => {
                    warn!(rank, peer, "unexpected hello after handshake");
                }
                Ok(None) => {
                    debug!(rank, peer, "peer closed connection");
                    break;
                }
                Err(e) => {
                    warn!(rank, peer, error = %e, "connection to peer failed");
                    break;
                }
            }
        }
    })
}

#[async_trait]
impl Transport for TcpTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    async fn send(&self, dest: usize, message: Message) -> GfResult<()> {
        let writer = self
            .writers
            .get(&dest)
            .ok_or(TransportError::InvalidDestination {
                rank: self.rank,
                dest,
                size: self.size,
            })?;
        let frame = encode(&Frame::Envelope(Envelope {
            source: self.rank,
            message,
        }))?;

        let mut writer = writer.lock().await;
        writer
            .write_all(&frame)
            .await
            .map_err(|e| connection_error(format!("send to rank {dest}: {e}")))?;
        Ok(())
    }

    async fn try_recv(&self, channel: Channel) -> GfResult<Option<Envelope>> {
        self.mailbox.try_recv(channel).await
    }

    async fn recv(&self, channel: Channel) -> GfResult<Envelope> {
        self.mailbox.recv(channel).await
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        for reader in &self.readers {
            reader.abort();
        }
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .field("peers", &self.writers.keys().collect::<Vec<_>>())
            .finish()
    }
}
