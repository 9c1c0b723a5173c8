//! Connection pool shared by every channel of a session

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use crate::transport::{Connector, OrdererClient, PeerClient, PeerTarget, TransportError};

#[derive(Default)]
struct Connections {
    peers: HashMap<String, Arc<dyn PeerClient>>,
    orderers: HashMap<String, Arc<dyn OrdererClient>>,
    closed: bool,
}

/// One connection per endpoint URL, opened lazily and closed together
pub(crate) struct ConnectionPool {
    connector: Arc<dyn Connector>,
    connect_timeout: Duration,
    connections: Mutex<Connections>,
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn Connector>, connect_timeout: Duration) -> Self {
        Self {
            connector,
            connect_timeout,
            connections: Mutex::new(Connections::default()),
        }
    }

    pub async fn peer(&self, target: &PeerTarget) -> Result<Arc<dyn PeerClient>, TransportError> {
        let mut connections = self.connections.lock().await;
        if connections.closed {
            return Err(TransportError::Closed);
        }
        if let Some(client) = connections.peers.get(&target.url) {
            return Ok(client.clone());
        }

        let client = tokio::time::timeout(self.connect_timeout, self.connector.connect_peer(target))
            .await
            .map_err(|_| TransportError::Timeout)??;
        debug!(peer = %target.name, url = %target.url, "Connected to peer");
        connections.peers.insert(target.url.clone(), client.clone());
        Ok(client)
    }

    pub async fn orderer(&self, url: &str) -> Result<Arc<dyn OrdererClient>, TransportError> {
        let mut connections = self.connections.lock().await;
        if connections.closed {
            return Err(TransportError::Closed);
        }
        if let Some(client) = connections.orderers.get(url) {
            return Ok(client.clone());
        }

        let client = tokio::time::timeout(self.connect_timeout, self.connector.connect_orderer(url))
            .await
            .map_err(|_| TransportError::Timeout)??;
        debug!(url = %url, "Connected to orderer");
        connections.orderers.insert(url.to_string(), client.clone());
        Ok(client)
    }

    /// Number of open connections
    pub async fn len(&self) -> usize {
        let connections = self.connections.lock().await;
        connections.peers.len() + connections.orderers.len()
    }

    /// Close every connection; later requests fail with `Closed`
    pub async fn close_all(&self) -> usize {
        let (peers, orderers) = {
            let mut connections = self.connections.lock().await;
            connections.closed = true;
            (
                std::mem::take(&mut connections.peers),
                std::mem::take(&mut connections.orderers),
            )
        };
        let count = peers.len() + orderers.len();
        for (_, peer) in peers {
            peer.close().await;
        }
        for (_, orderer) in orderers {
            orderer.close().await;
        }
        count
    }
}
