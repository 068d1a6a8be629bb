//! In-process transport: every rank is a task in the same runtime.

use async_trait::async_trait;
use gf_types::{config_error, GfResult, TransportError};

use super::{mailbox, Channel, Envelope, Mailbox, Message, Postbox, Transport};

/// One rank of an in-memory cluster built by [`LocalTransport::cluster`].
#[derive(Debug)]
pub struct LocalTransport {
    rank: usize,
    size: usize,
    mailbox: Mailbox,
    /// Inboxes of every rank, `None` at our own index.
    peers: Vec<Option<Postbox>>,
}

impl LocalTransport {
    /// Build `size` fully connected ranks, indexed by rank.
    pub fn cluster(size: usize) -> GfResult<Vec<Self>> {
        if size == 0 {
            return Err(config_error!("cluster size must be at least 1"));
        }
        let (postboxes, mailboxes): (Vec<_>, Vec<_>) = (0..size).map(mailbox).unzip();

        Ok(mailboxes
            .into_iter()
            .enumerate()
            .map(|(rank, mailbox)| {
                let peers = postboxes
                    .iter()
                    .enumerate()
                    .map(|(peer, postbox)| (peer != rank).then(|| postbox.clone()))
                    .collect();
                Self {
                    rank,
                    size,
                    mailbox,
                    peers,
                }
            })
            .collect())
    }
}

#[async_trait]
impl Transport for LocalTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    async fn send(&self, dest: usize, message: Message) -> GfResult<()> {
        let postbox = self
            .peers
            .get(dest)
            .and_then(Option::as_ref)
            .ok_or(TransportError::InvalidDestination {
                rank: self.rank,
                dest,
                size: self.size,
            })?;
        let channel = message.channel();
        let envelope = Envelope {
            source: self.rank,
            message,
        };
        if !postbox.deliver(envelope) {
            return Err(TransportError::Closed {
                rank: dest,
                channel: channel.to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn try_recv(&self, channel: Channel) -> GfResult<Option<Envelope>> {
        self.mailbox.try_recv(channel).await
    }

    async fn recv(&self, channel: Channel) -> GfResult<Envelope> {
        self.mailbox.recv(channel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn point_to_point_delivery() {
        let mut ranks = LocalTransport::cluster(3).unwrap();
        let two = ranks.pop().unwrap();
        let one = ranks.pop().unwrap();
        let zero = ranks.pop().unwrap();

        one.send(0, Message::Ready).await.unwrap();
        two.send(0, Message::Ready).await.unwrap();
        zero.send(2, Message::Stop).await.unwrap();

        let first = zero.recv(Channel::Ready).await.unwrap();
        let second = zero.recv(Channel::Ready).await.unwrap();
        let mut sources = vec![first.source, second.source];
        sources.sort();
        assert_eq!(sources, vec![1, 2]);

        let stop = two.recv(Channel::Assignment).await.unwrap();
        assert_eq!(stop, Envelope { source: 0, message: Message::Stop });
        assert!(one.try_recv(Channel::Assignment).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalid_destinations_are_rejected() {
        let ranks = LocalTransport::cluster(2).unwrap();
        assert!(ranks[0].send(0, Message::Ready).await.is_err());
        assert!(ranks[0].send(5, Message::Ready).await.is_err());
        assert!(LocalTransport::cluster(0).is_err());
    }

    #[tokio::test]
    async fn barrier_releases_all_ranks() {
        let ranks: Vec<Arc<LocalTransport>> = LocalTransport::cluster(4)
            .unwrap()
            .into_iter()
            .map(Arc::new)
            .collect();

        let mut tasks = Vec::new();
        for rank in &ranks {
            let rank = Arc::clone(rank);
            tasks.push(tokio::spawn(async move {
                rank.barrier().await.unwrap();
                rank.barrier().await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
    }

    #[tokio::test]
    async fn single_rank_barrier_is_a_no_op() {
        let ranks = LocalTransport::cluster(1).unwrap();
        ranks[0].barrier().await.unwrap();
    }
}
