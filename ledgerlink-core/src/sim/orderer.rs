//! Simulated ordering service
//!
//! Envelopes are queued and cut into blocks when either the batch size is
//! reached or the batch timeout expires after the first queued envelope. Each
//! block is handed to every peer's delivery queue; peers validate and commit
//! independently.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use super::peer::{Block, Registry};
use crate::transport::{Envelope, RejectCode, TransportError};

pub(crate) struct SimOrderer {
    pub name: String,
    pub port: u16,
    registry: Arc<Registry>,
    queue: mpsc::UnboundedSender<Envelope>,
    online: AtomicBool,
    stalled: AtomicBool,
}

impl SimOrderer {
    /// Start the block cutter; must be called inside a tokio runtime
    pub fn start(
        name: String,
        port: u16,
        registry: Arc<Registry>,
        deliveries: Vec<mpsc::UnboundedSender<Arc<Block>>>,
        batch_size: usize,
        batch_timeout: Duration,
    ) -> Self {
        let (queue, envelopes) = mpsc::unbounded_channel();
        tokio::spawn(cut_blocks(envelopes, deliveries, batch_size.max(1), batch_timeout));
        Self {
            name,
            port,
            registry,
            queue,
            online: AtomicBool::new(true),
            stalled: AtomicBool::new(false),
        }
    }

    pub fn internal_url(&self) -> String {
        format!("grpcs://{}:{}", self.name, self.port)
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// A stalled orderer accepts envelopes but never orders them
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    pub fn check_online(&self) -> Result<(), TransportError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::Unavailable(format!("{} is down", self.name)))
        }
    }

    pub fn broadcast(&self, envelope: &Envelope) -> Result<(), TransportError> {
        self.check_online()?;
        if !self.registry.channels.contains_key(envelope.channel()) {
            return Err(TransportError::rejected(
                RejectCode::ChannelNotFound,
                envelope.channel().to_string(),
            ));
        }
        self.registry.verify_signed(
            &envelope.proposal.proposal.creator,
            &envelope.signed_bytes(),
            &envelope.signature,
        )?;

        if self.stalled.load(Ordering::SeqCst) {
            debug!(tx_id = %envelope.tx_id(), "Orderer stalled, dropping envelope");
            return Ok(());
        }
        self.queue
            .send(envelope.clone())
            .map_err(|_| TransportError::Unavailable(format!("{} is shutting down", self.name)))
    }
}

async fn cut_blocks(
    mut envelopes: mpsc::UnboundedReceiver<Envelope>,
    deliveries: Vec<mpsc::UnboundedSender<Arc<Block>>>,
    batch_size: usize,
    batch_timeout: Duration,
) {
    // genesis is block 0 on every channel
    let mut next_block: BTreeMap<String, u64> = BTreeMap::new();

    while let Some(first) = envelopes.recv().await {
        let mut batch = vec![first];
        let deadline = Instant::now() + batch_timeout;
        while batch.len() < batch_size {
            match tokio::time::timeout_at(deadline, envelopes.recv()).await {
                Ok(Some(envelope)) => batch.push(envelope),
                Ok(None) | Err(_) => break,
            }
        }

        let mut by_channel: BTreeMap<String, Vec<Envelope>> = BTreeMap::new();
        for envelope in batch {
            by_channel
                .entry(envelope.channel().to_string())
                .or_default()
                .push(envelope);
        }

        for (channel, transactions) in by_channel {
            let number = next_block.entry(channel.clone()).or_insert(1);
            let block = Arc::new(Block {
                channel,
                number: *number,
                transactions,
            });
            *number += 1;
            debug!(
                channel = %block.channel,
                block = block.number,
                transactions = block.transactions.len(),
                "Cut block"
            );
            for delivery in &deliveries {
                let _ = delivery.send(block.clone());
            }
        }
    }
}
