//! In-process transport
//!
//! Routes control calls and position subscriptions directly to `Node`s
//! registered under their addresses. Runs a whole row in one process.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};
use tokio::sync::mpsc;

use super::{ControlClient, PositionFeed};
use crate::consts::OBSERVER_BUFFER;
use crate::error::{PendulumError, Result};
use crate::messages::{PositionMessage, StreamMessage};
use crate::node::Node;
use crate::settings::NodeSettings;
use crate::sim::PendulumConfig;

#[derive(Default)]
pub struct MemoryCluster {
    nodes: RwLock<HashMap<String, Weak<Node>>>,
}

impl MemoryCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Build and register one node per address in `settings`.
    ///
    /// The returned nodes are the only strong references; dropping them
    /// removes the node from the cluster.
    pub fn spawn_row(self: &Arc<Self>, settings: &NodeSettings) -> Result<Vec<Arc<Node>>> {
        (0..settings.addresses.len())
            .map(|index| {
                let node_settings = NodeSettings {
                    index,
                    ..settings.clone()
                };
                let control = Arc::clone(self);
                let feed = Arc::clone(self);
                let node = Node::new(node_settings, control, feed)?;
                self.register(&node);
                Ok(node)
            })
            .collect()
    }

    pub fn register(&self, node: &Arc<Node>) {
        self.nodes
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(node.address().to_owned(), Arc::downgrade(node));
    }

    fn node(&self, address: &str) -> Result<Arc<Node>> {
        self.nodes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(address)
            .and_then(Weak::upgrade)
            .ok_or_else(|| PendulumError::Transport(format!("no node at {address}")))
    }
}

#[async_trait]
impl ControlClient for MemoryCluster {
    async fn start(&self, address: &str, config: PendulumConfig) -> Result<()> {
        self.node(address)?.start(config)
    }

    async fn resume(&self, address: &str) -> Result<()> {
        self.node(address)?.resume();
        Ok(())
    }

    async fn pause(&self, address: &str) -> Result<()> {
        self.node(address)?.pause();
        Ok(())
    }

    async fn stop(&self, address: &str) -> Result<()> {
        self.node(address)?.stop();
        Ok(())
    }
}

#[async_trait]
impl PositionFeed for MemoryCluster {
    async fn subscribe(&self, address: &str) -> Result<mpsc::Receiver<PositionMessage>> {
        let mut session = self.node(address)?.connect();
        let (tx, rx) = mpsc::channel(OBSERVER_BUFFER);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    message = session.recv() => match message {
                        Some(StreamMessage::Position(position)) => {
                            if tx.send(position).await.is_err() {
                                break;
                            }
                        }
                        Some(_) => {}
                        None => break,
                    },
                    _ = tx.closed() => break,
                }
            }
        });
        Ok(rx)
    }
}
