//! Channel handles

use std::cmp::Reverse;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use super::{Gateway, GatewayError};
use crate::contract::Contract;
use crate::transport::{OrdererClient, PeerClient};

/// Peer reachable on a channel
#[derive(Clone)]
pub struct ChannelPeer {
    pub name: String,
    pub msp_id: String,
    pub url: String,
    /// Block height at discovery time; 0 when configured statically
    pub ledger_height: u64,
    pub(crate) client: Arc<dyn PeerClient>,
}

impl fmt::Debug for ChannelPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelPeer")
            .field("name", &self.name)
            .field("msp_id", &self.msp_id)
            .field("url", &self.url)
            .field("ledger_height", &self.ledger_height)
            .finish()
    }
}

/// Resolved peers and orderers of one channel
pub(crate) struct ChannelLayout {
    pub channel: String,
    /// Sorted by preference: own organisation first, then highest ledger
    pub peers: Vec<ChannelPeer>,
    pub orderers: Vec<Arc<dyn OrdererClient>>,
    pub required_endorsements: usize,
}

impl ChannelLayout {
    pub fn new(
        channel: String,
        mut peers: Vec<ChannelPeer>,
        orderers: Vec<Arc<dyn OrdererClient>>,
        required_endorsements: usize,
        own_msp_id: &str,
    ) -> Self {
        peers.sort_by_key(|p| (p.msp_id != own_msp_id, Reverse(p.ledger_height), p.name.clone()));
        Self {
            channel,
            peers,
            orderers,
            required_endorsements: required_endorsements.max(1),
        }
    }

    /// Missing every orderer; submits cannot succeed on this layout
    pub fn is_degraded(&self) -> bool {
        self.orderers.is_empty()
    }
}

/// Current layout of a channel, shared by the session cache and every handle
pub(crate) type LayoutSlot = Arc<RwLock<Arc<ChannelLayout>>>;

pub(crate) fn read_layout(slot: &LayoutSlot) -> Arc<ChannelLayout> {
    slot.read().unwrap_or_else(PoisonError::into_inner).clone()
}

pub(crate) fn store_layout(slot: &LayoutSlot, layout: Arc<ChannelLayout>) {
    *slot.write().unwrap_or_else(PoisonError::into_inner) = layout;
}

/// Named channel reachable through a [`Gateway`]
///
/// Handles on the same channel share one layout: a refresh through any of
/// them is seen by all.
#[derive(Clone)]
pub struct Network {
    gateway: Gateway,
    channel: String,
    slot: LayoutSlot,
}

impl Network {
    pub(crate) fn new(gateway: Gateway, channel: &str, slot: LayoutSlot) -> Self {
        Self {
            gateway,
            channel: channel.to_string(),
            slot,
        }
    }

    pub fn name(&self) -> &str {
        &self.channel
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// Channel peers in the order they are tried
    pub fn peers(&self) -> Vec<ChannelPeer> {
        self.layout().peers.clone()
    }

    pub fn required_endorsements(&self) -> usize {
        self.layout().required_endorsements
    }

    /// Contract handle; an unknown contract is reported by the first call
    pub fn get_contract(&self, name: &str) -> Contract {
        Contract::new(self.clone(), name)
    }

    /// Resolve the channel's peers and orderers again, reconnecting to
    /// endpoints that were unreachable before
    pub async fn refresh(&self) -> Result<(), GatewayError> {
        self.gateway.refresh_channel(&self.channel, &self.slot).await?;
        Ok(())
    }

    pub(crate) fn layout(&self) -> Arc<ChannelLayout> {
        read_layout(&self.slot)
    }

    pub(crate) async fn refreshed_layout(&self) -> Result<Arc<ChannelLayout>, GatewayError> {
        self.gateway.refresh_channel(&self.channel, &self.slot).await
    }
}

impl fmt::Debug for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let layout = self.layout();
        f.debug_struct("Network")
            .field("channel", &self.channel)
            .field("peers", &layout.peers.len())
            .field("orderers", &layout.orderers.len())
            .finish()
    }
}
