//! AsyncDht node.

use crate::common::{Id, PeerRecord, Value};
use crate::dht::{ActorMessage, Dht, DhtWasShutdown};
use crate::rpc::CandidateNode;

impl Dht {
    /// Return an async version of the Dht client.
    pub fn as_async(self) -> AsyncDht {
        AsyncDht(self)
    }
}

#[derive(Debug, Clone)]
/// Async version of the Dht client.
pub struct AsyncDht(Dht);

impl AsyncDht {
    // === Getters ===

    /// This node's id.
    pub async fn id(&self) -> Result<Id, DhtWasShutdown> {
        let (sender, receiver) = flume::bounded(1);

        self.0
             .0
            .send(ActorMessage::Id(sender))
            .map_err(|_| DhtWasShutdown)?;

        receiver.recv_async().await.map_err(|_| DhtWasShutdown)
    }

    // === Public Methods ===

    /// Shutdown the actor thread, disconnecting all pending requests.
    pub async fn shutdown(&mut self) {
        let (sender, receiver) = flume::bounded(1);

        let _ = self.0 .0.send(ActorMessage::Shutdown(sender));
        let _ = receiver.recv_async().await;
    }

    /// Find the closest nodes to a target that answered, with the round
    /// trip time and write token of each.
    ///
    /// Resolves once the lookup is done. Resolves to an empty list if
    /// the lookup was cancelled.
    pub async fn find_node(&self, target: Id) -> Result<Vec<CandidateNode>, DhtWasShutdown> {
        let (sender, receiver) = flume::bounded(1);

        self.0
             .0
            .send(ActorMessage::FindNode(target, sender))
            .map_err(|_| DhtWasShutdown)?;

        Ok(receiver.recv_async().await.unwrap_or_default())
    }

    /// Stream verified peer records announced under a target, as they
    /// are found.
    ///
    /// The stream ends when the lookup is done or cancelled.
    pub fn get_peers(
        &self,
        target: Id,
    ) -> Result<flume::r#async::RecvStream<PeerRecord>, DhtWasShutdown> {
        // Streaming results must not block the actor thread, so this
        // channel is unbounded, unlike the one shot ones above.
        let (sender, receiver) = flume::unbounded();

        self.0
             .0
            .send(ActorMessage::FindPeers(target, sender))
            .map_err(|_| DhtWasShutdown)?;

        Ok(receiver.into_stream())
    }

    /// Find the value stored under a target.
    ///
    /// If `min_seq` is set, signed values with an older sequence number
    /// are ignored. Resolves to `None` if the lookup finished without
    /// finding a valid value.
    pub async fn get_value(
        &self,
        target: Id,
        min_seq: Option<i64>,
    ) -> Result<Option<Value>, DhtWasShutdown> {
        let (sender, receiver) = flume::unbounded();

        self.0
             .0
            .send(ActorMessage::FindValue(target, min_seq, sender))
            .map_err(|_| DhtWasShutdown)?;

        Ok(receiver.recv_async().await.ok())
    }

    /// Cancel the lookup for a target, disconnecting everyone waiting
    /// on it.
    pub fn cancel(&self, target: Id) {
        let _ = self.0 .0.send(ActorMessage::Cancel(target));
    }
}
