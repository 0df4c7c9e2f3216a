//! Dht node: a blocking client over the lookup engine's actor thread.

use std::thread;
use std::time::Duration;

use flume::{Receiver, Sender};
use tracing::info;

use crate::common::{Id, PeerRecord, Value};
use crate::routing_table::RoutingTable;
use crate::rpc::{CandidateNode, Config, ResponseSender, Rpc, Transport};

#[derive(Debug, Clone)]
/// A handle to the actor thread driving the lookup engine.
///
/// Cheap to clone. The thread keeps running until [Dht::shutdown] is
/// called or every handle is dropped.
pub struct Dht(pub(crate) Sender<ActorMessage>);

#[derive(Debug, thiserror::Error)]
#[error("The Dht was shutdown")]
pub struct DhtWasShutdown;

#[derive(Debug, Default, Clone)]
pub struct DhtBuilder {
    config: Config,
    id: Option<Id>,
}

impl DhtBuilder {
    /// Set custom configurations, see [Config].
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Set this node's id instead of a random one.
    pub fn id(mut self, id: Id) -> Self {
        self.id = Some(id);
        self
    }

    /// Spawn the actor thread over a transport and a routing table.
    pub fn build(
        self,
        transport: Box<dyn Transport>,
        routing_table: Box<dyn RoutingTable>,
    ) -> Dht {
        let mut rpc = Rpc::new(self.config, transport, routing_table);
        if let Some(id) = self.id {
            rpc = rpc.with_id(id);
        }

        let (sender, receiver) = flume::unbounded();

        thread::spawn(move || run(rpc, receiver));

        Dht(sender)
    }
}

impl Dht {
    /// Shorthand for [DhtBuilder::build] with default configurations.
    pub fn new(transport: Box<dyn Transport>, routing_table: Box<dyn RoutingTable>) -> Self {
        Dht::builder().build(transport, routing_table)
    }

    pub fn builder() -> DhtBuilder {
        DhtBuilder::default()
    }

    // === Getters ===

    /// This node's id.
    pub fn id(&self) -> Result<Id, DhtWasShutdown> {
        let (sender, receiver) = flume::bounded(1);

        self.0
            .send(ActorMessage::Id(sender))
            .map_err(|_| DhtWasShutdown)?;

        receiver.recv().map_err(|_| DhtWasShutdown)
    }

    // === Public Methods ===

    /// Shutdown the actor thread, disconnecting all pending requests.
    pub fn shutdown(&mut self) {
        let (sender, receiver) = flume::bounded(1);

        let _ = self.0.send(ActorMessage::Shutdown(sender));
        let _ = receiver.recv();
    }

    /// Find the closest nodes to a target that answered, with the round
    /// trip time and write token of each.
    ///
    /// Blocks until the lookup is done. Returns an empty list if the
    /// lookup was cancelled.
    pub fn find_node(&self, target: Id) -> Result<Vec<CandidateNode>, DhtWasShutdown> {
        let (sender, receiver) = flume::bounded(1);

        self.0
            .send(ActorMessage::FindNode(target, sender))
            .map_err(|_| DhtWasShutdown)?;

        Ok(receiver.recv().unwrap_or_default())
    }

    /// Stream verified peer records announced under a target, as they
    /// are found.
    ///
    /// The iterator ends when the lookup is done or cancelled.
    pub fn get_peers(&self, target: Id) -> Result<flume::IntoIter<PeerRecord>, DhtWasShutdown> {
        // Streaming results must not block the actor thread, so this
        // channel is unbounded, unlike the one shot ones above.
        let (sender, receiver) = flume::unbounded();

        self.0
            .send(ActorMessage::FindPeers(target, sender))
            .map_err(|_| DhtWasShutdown)?;

        Ok(receiver.into_iter())
    }

    /// Find the value stored under a target.
    ///
    /// If `min_seq` is set, signed values with an older sequence number
    /// are ignored. Returns `None` if the lookup finished without
    /// finding a valid value.
    pub fn get_value(
        &self,
        target: Id,
        min_seq: Option<i64>,
    ) -> Result<Option<Value>, DhtWasShutdown> {
        let (sender, receiver) = flume::unbounded();

        self.0
            .send(ActorMessage::FindValue(target, min_seq, sender))
            .map_err(|_| DhtWasShutdown)?;

        Ok(receiver.recv().ok())
    }

    /// Cancel the lookup for a target, disconnecting everyone waiting
    /// on it.
    pub fn cancel(&self, target: Id) {
        let _ = self.0.send(ActorMessage::Cancel(target));
    }
}

pub(crate) enum ActorMessage {
    Shutdown(Sender<()>),
    Id(Sender<Id>),
    FindNode(Id, Sender<Vec<CandidateNode>>),
    FindPeers(Id, Sender<PeerRecord>),
    FindValue(Id, Option<i64>, Sender<Value>),
    Cancel(Id),
}

fn run(mut rpc: Rpc, receiver: Receiver<ActorMessage>) {
    info!(id = ?rpc.id(), "Starting Dht actor thread");

    loop {
        match receiver.try_recv() {
            Ok(message) => match message {
                ActorMessage::Shutdown(sender) => {
                    // Disconnect pending requests before acknowledging.
                    drop(receiver);
                    let _ = sender.send(());
                    break;
                }
                ActorMessage::Id(sender) => {
                    let _ = sender.send(rpc.id());
                }
                ActorMessage::FindNode(target, sender) => {
                    rpc.find_node(target, ResponseSender::ClosestNodes(sender))
                }
                ActorMessage::FindPeers(target, sender) => {
                    rpc.find_peers(target, ResponseSender::Peers(sender))
                }
                ActorMessage::FindValue(target, seq, sender) => {
                    rpc.find_value(target, seq, ResponseSender::Value(sender))
                }
                ActorMessage::Cancel(target) => rpc.cancel(&target),
            },
            // Every handle was dropped.
            Err(flume::TryRecvError::Disconnected) => break,
            Err(flume::TryRecvError::Empty) => {}
        }

        rpc.tick();

        // The transport is polled, don't spin a core between ticks.
        thread::sleep(Duration::from_millis(1));
    }
}
