//! Rank-addressed message passing between the coordinator and workers.
//!
//! Rank 0 is the coordinator. Messages travel on three logical channels
//! (ready notifications, assignments, and barrier traffic) so that a rank
//! waiting on one channel never consumes traffic meant for another.

pub mod local;
pub mod tcp;

pub use local::LocalTransport;
pub use tcp::TcpTransport;

use async_trait::async_trait;
use gf_types::{GfResult, Job, TransportError};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tracing::debug;

/// Logical channel a message is delivered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Worker -> coordinator: "I can take a job".
    Ready,
    /// Coordinator -> worker: a job or the stop sentinel.
    Assignment,
    Barrier,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Channel::Ready => "ready",
            Channel::Assignment => "assignment",
            Channel::Barrier => "barrier",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    Ready,
    Assign(Job),
    Stop,
    BarrierArrive,
    BarrierRelease,
}

impl Message {
    pub fn channel(&self) -> Channel {
        match self {
            Message::Ready => Channel::Ready,
            Message::Assign(_) | Message::Stop => Channel::Assignment,
            Message::BarrierArrive | Message::BarrierRelease => Channel::Barrier,
        }
    }
}

/// A message tagged with the rank that sent it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub source: usize,
    pub message: Message,
}

/// Point-to-point messaging between the ranks of one cluster.
///
/// Delivery is reliable and ordered per (source, destination) pair.
#[async_trait]
pub trait Transport: Send + Sync {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    async fn send(&self, dest: usize, message: Message) -> GfResult<()>;

    /// Non-blocking probe: the next envelope on `channel`, if one is queued.
    async fn try_recv(&self, channel: Channel) -> GfResult<Option<Envelope>>;

    async fn recv(&self, channel: Channel) -> GfResult<Envelope>;

    /// Block until every rank has entered the barrier.
    async fn barrier(&self) -> GfResult<()> {
        let rank = self.rank();
        if rank == 0 {
            for _ in 1..self.size() {
                let envelope = self.recv(Channel::Barrier).await?;
                if envelope.message != Message::BarrierArrive {
                    return Err(unexpected(rank, &envelope));
                }
            }
            for dest in 1..self.size() {
                self.send(dest, Message::BarrierRelease).await?;
            }
        } else {
            self.send(0, Message::BarrierArrive).await?;
            let envelope = self.recv(Channel::Barrier).await?;
            if envelope.message != Message::BarrierRelease {
                return Err(unexpected(rank, &envelope));
            }
        }
        debug!(rank, "passed barrier");
        Ok(())
    }
}

pub(crate) fn unexpected(rank: usize, envelope: &Envelope) -> gf_types::GfError {
    TransportError::UnexpectedMessage {
        rank,
        message: format!("{:?} from rank {}", envelope.message, envelope.source),
    }
    .into()
}

/// Sending side of one rank's inbox.
#[derive(Debug, Clone)]
pub(crate) struct Postbox {
    ready: UnboundedSender<Envelope>,
    assignment: UnboundedSender<Envelope>,
    barrier: UnboundedSender<Envelope>,
}

impl Postbox {
    /// Returns false once the receiving rank has gone away.
    pub(crate) fn deliver(&self, envelope: Envelope) -> bool {
        let sender = match envelope.message.channel() {
            Channel::Ready => &self.ready,
            Channel::Assignment => &self.assignment,
            Channel::Barrier => &self.barrier,
        };
        sender.send(envelope).is_ok()
    }
}

/// Receiving side of one rank's inbox.
#[derive(Debug)]
pub(crate) struct Mailbox {
    rank: usize,
    ready: Mutex<UnboundedReceiver<Envelope>>,
    assignment: Mutex<UnboundedReceiver<Envelope>>,
    barrier: Mutex<UnboundedReceiver<Envelope>>,
}

pub(crate) fn mailbox(rank: usize) -> (Postbox, Mailbox) {
    let (ready_tx, ready_rx) = mpsc::unbounded_channel();
    let (assignment_tx, assignment_rx) = mpsc::unbounded_channel();
    let (barrier_tx, barrier_rx) = mpsc::unbounded_channel();
    (
        Postbox {
            ready: ready_tx,
            assignment: assignment_tx,
            barrier: barrier_tx,
        },
        Mailbox {
            rank,
            ready: Mutex::new(ready_rx),
            assignment: Mutex::new(assignment_rx),
            barrier: Mutex::new(barrier_rx),
        },
    )
}

impl Mailbox {
    fn receiver(&self, channel: Channel) -> &Mutex<UnboundedReceiver<Envelope>> {
        match channel {
            Channel::Ready => &self.ready,
            Channel::Assignment => &self.assignment,
            Channel::Barrier => &self.barrier,
        }
    }

    fn closed(&self, channel: Channel) -> gf_types::GfError {
        TransportError::Closed {
            rank: self.rank,
            channel: channel.to_string(),
        }
        .into()
    }

    pub(crate) async fn try_recv(&self, channel: Channel) -> GfResult<Option<Envelope>> {
        let mut receiver = self.receiver(channel).lock().await;
        match receiver.try_recv() {
            Ok(envelope) => Ok(Some(envelope)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(self.closed(channel)),
        }
    }

    pub(crate) async fn recv(&self, channel: Channel) -> GfResult<Envelope> {
        let mut receiver = self.receiver(channel).lock().await;
        match receiver.recv().await {
            Some(envelope) => Ok(envelope),
            None => Err(self.closed(channel)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_route_to_their_channel() {
        assert_eq!(Message::Ready.channel(), Channel::Ready);
        assert_eq!(Message::Stop.channel(), Channel::Assignment);
        let job = Job::new("g1_0", "/tmp/g1_0.par", "/tmp");
        assert_eq!(Message::Assign(job).channel(), Channel::Assignment);
        assert_eq!(Message::BarrierRelease.channel(), Channel::Barrier);
    }

    #[tokio::test]
    async fn mailbox_keeps_channels_apart() {
        let (postbox, mailbox) = mailbox(0);
        assert!(postbox.deliver(Envelope {
            source: 2,
            message: Message::BarrierArrive,
        }));
        assert!(postbox.deliver(Envelope {
            source: 1,
            message: Message::Ready,
        }));

        let ready = mailbox.try_recv(Channel::Ready).await.unwrap().unwrap();
        assert_eq!(ready.source, 1);
        assert!(mailbox.try_recv(Channel::Ready).await.unwrap().is_none());
        assert!(mailbox.try_recv(Channel::Assignment).await.unwrap().is_none());
        let barrier = mailbox.recv(Channel::Barrier).await.unwrap();
        assert_eq!(barrier.message, Message::BarrierArrive);
    }

    #[tokio::test]
    async fn dropped_postbox_closes_mailbox() {
        let (postbox, mailbox) = mailbox(1);
        drop(postbox);
        let err = mailbox.recv(Channel::Assignment).await.unwrap_err();
        assert!(err.to_string().contains("assignment"));
        assert!(mailbox.try_recv(Channel::Ready).await.is_err());
    }
}
