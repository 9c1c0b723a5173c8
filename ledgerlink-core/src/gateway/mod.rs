//! Gateway sessions
//!
//! A [`Gateway`] is a session to the ledger network on behalf of exactly one
//! identity. It owns every peer and orderer connection opened for that
//! identity and hands out [`Network`] handles per channel. Channels are
//! resolved through peer discovery (rewriting discovered host names to
//! `localhost` when asked) or from the static `channels` section of the
//! connection profile.
//!
//! `disconnect` releases every connection and is idempotent. In-flight
//! calls observe the session's cancellation token and fail with a
//! connection error instead of hanging.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::identity::{Creator, Identity, IdentityError, SigningKeypair};
use crate::profile::{NetworkProfile, ProfileError};
use crate::transport::{
    rewrite_as_localhost, ChannelMembership, Connector, PeerClient, PeerTarget, RejectCode,
    RetryPolicy, TransportError,
};

mod network;
mod pool;

pub use network::{ChannelPeer, Network};
pub(crate) use network::ChannelLayout;
use network::{read_layout, store_layout, LayoutSlot};
use pool::ConnectionPool;

/// Session errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Profile error: {0}")]
    Profile(String),
}

impl From<ProfileError> for GatewayError {
    fn from(err: ProfileError) -> Self {
        GatewayError::Profile(err.to_string())
    }
}

/// Peer discovery policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryOptions {
    pub enabled: bool,
    /// Rewrite discovered host names to `localhost`, keeping ports
    pub as_localhost: bool,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            as_localhost: true,
        }
    }
}

/// Session options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayOptions {
    pub discovery: DiscoveryOptions,
    pub connect_timeout: Duration,
    pub endorse_timeout: Duration,
    /// Time allowed for the ordering service to accept a transaction
    pub submit_timeout: Duration,
    pub evaluate_timeout: Duration,
    /// Bounded wait for a submitted transaction to commit
    pub commit_timeout: Duration,
    /// Retry policy for evaluate
    pub retry: RetryPolicy,
    /// Endorsements required on channels configured without discovery
    pub static_endorsements: usize,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            discovery: DiscoveryOptions::default(),
            connect_timeout: Duration::from_secs(5),
            endorse_timeout: Duration::from_secs(30),
            submit_timeout: Duration::from_secs(5),
            evaluate_timeout: Duration::from_secs(5),
            commit_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            static_endorsements: 1,
        }
    }
}

struct GatewayInner {
    identity: Identity,
    signer: SigningKeypair,
    creator: Creator,
    profile: NetworkProfile,
    options: GatewayOptions,
    pool: ConnectionPool,
    bootstrap: Vec<Arc<dyn PeerClient>>,
    networks: Mutex<HashMap<String, LayoutSlot>>,
    disconnected: AtomicBool,
    shutdown: CancellationToken,
}

impl Drop for GatewayInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Session to a ledger network for one identity
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

impl Gateway {
    /// Open a session for `identity`, connecting to the peers of the
    /// profile's client organisation.
    ///
    /// Fails with [`GatewayError::Connection`] when none of them can be reached.
    pub async fn connect(
        profile: NetworkProfile,
        identity: Identity,
        connector: Arc<dyn Connector>,
        options: GatewayOptions,
    ) -> Result<Gateway, GatewayError> {
        let signer = identity.signer()?;
        let creator = identity.creator();
        let org_peers = profile.organization_peers(options.discovery.as_localhost)?;
        let pool = ConnectionPool::new(connector, options.connect_timeout);

        let mut bootstrap = Vec::new();
        for target in &org_peers {
            match pool.peer(target).await {
                Ok(client) => bootstrap.push(client),
                Err(e) => warn!(peer = %target.name, url = %target.url, error = %e, "Peer unreachable"),
            }
        }
        if bootstrap.is_empty() {
            pool.close_all().await;
            return Err(GatewayError::Connection(format!(
                "none of the {} peers of organization {} could be reached",
                org_peers.len(),
                profile.client.organization
            )));
        }

        info!(
            identity = %identity.label,
            msp_id = %identity.msp_id,
            peers = bootstrap.len(),
            discovery = options.discovery.enabled,
            "Gateway connected"
        );
        crate::metrics::record_session_opened();

        Ok(Gateway {
            inner: Arc::new(GatewayInner {
                identity,
                signer,
                creator,
                profile,
                options,
                pool,
                bootstrap,
                networks: Mutex::new(HashMap::new()),
                disconnected: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            }),
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.inner.identity
    }

    pub fn options(&self) -> &GatewayOptions {
        &self.inner.options
    }

    pub fn is_connected(&self) -> bool {
        !self.inner.disconnected.load(Ordering::SeqCst)
    }

    pub(crate) fn signer(&self) -> &SigningKeypair {
        &self.inner.signer
    }

    pub(crate) fn creator(&self) -> &Creator {
        &self.inner.creator
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.inner.shutdown
    }

    /// Open connections held by this session
    pub async fn connection_count(&self) -> usize {
        self.inner.pool.len().await
    }

    fn ensure_connected(&self) -> Result<(), GatewayError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(GatewayError::Connection("gateway is disconnected".to_string()))
        }
    }

    /// Handle for `channel`, resolving its peers and orderers on first use.
    ///
    /// A cached channel without any reachable orderer is resolved again.
    pub async fn get_network(&self, channel: &str) -> Result<Network, GatewayError> {
        self.ensure_connected()?;
        let cached = self.inner.networks.lock().await.get(channel).cloned();
        if let Some(slot) = cached {
            if read_layout(&slot).is_degraded() {
                self.refresh_channel(channel, &slot).await?;
            }
            return Ok(Network::new(self.clone(), channel, slot));
        }

        // Resolved outside the cache lock; a concurrent first use keeps the earlier entry
        let layout = self.resolve(channel).await?;
        let slot = self
            .inner
            .networks
            .lock()
            .await
            .entry(channel.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(layout)))
            .clone();
        Ok(Network::new(self.clone(), channel, slot))
    }

    /// Resolve `channel` again and publish the result to every handle on it
    pub(crate) async fn refresh_channel(
        &self,
        channel: &str,
        slot: &LayoutSlot,
    ) -> Result<Arc<ChannelLayout>, GatewayError> {
        self.ensure_connected()?;
        debug!(channel = %channel, "Re-resolving channel");
        let layout = self.resolve(channel).await?;
        store_layout(slot, layout.clone());
        Ok(layout)
    }

    async fn resolve(&self, channel: &str) -> Result<Arc<ChannelLayout>, GatewayError> {
        let resolve = async {
            if self.inner.options.discovery.enabled {
                self.resolve_discovered(channel).await
            } else {
                self.resolve_static(channel).await
            }
        };
        let layout = tokio::select! {
            biased;
            _ = self.inner.shutdown.cancelled() => {
                return Err(GatewayError::Connection("gateway is disconnected".to_string()));
            }
            layout = resolve => Arc::new(layout?),
        };

        info!(
            channel = %channel,
            peers = layout.peers.len(),
            orderers = layout.orderers.len(),
            required_endorsements = layout.required_endorsements,
            "Resolved channel"
        );
        Ok(layout)
    }

    async fn discover(&self, channel: &str) -> Result<ChannelMembership, GatewayError> {
        let timeout = self.inner.options.connect_timeout;
        let mut failures = Vec::new();
        for peer in &self.inner.bootstrap {
            let result = tokio::time::timeout(timeout, peer.discover(channel, &self.inner.creator))
                .await
                .unwrap_or(Err(TransportError::Timeout));
            match result {
                Ok(membership) => {
                    debug!(channel = %channel, via = %peer.name(), "Discovery succeeded");
                    return Ok(membership);
                }
                Err(TransportError::Rejected {
                    code: RejectCode::ChannelNotFound,
                    ..
                }) => return Err(GatewayError::ChannelNotFound(channel.to_string())),
                Err(TransportError::Rejected {
                    code: RejectCode::AccessDenied,
                    message,
                }) => return Err(GatewayError::AccessDenied(message)),
                Err(e) => {
                    warn!(channel = %channel, via = %peer.name(), error = %e, "Discovery failed");
                    failures.push(format!("{}: {}", peer.name(), e));
                }
            }
        }
        Err(GatewayError::Connection(format!(
            "discovery failed on every peer: {}",
            failures.join("; ")
        )))
    }

    async fn resolve_discovered(&self, channel: &str) -> Result<ChannelLayout, GatewayError> {
        let membership = self.discover(channel).await?;
        let as_localhost = self.inner.options.discovery.as_localhost;
        let endpoint = |url: &str| {
            if as_localhost {
                rewrite_as_localhost(url)
            } else {
                url.to_string()
            }
        };

        let mut peers = Vec::new();
        for discovered in &membership.peers {
            let target = PeerTarget {
                name: discovered.name.clone(),
                url: endpoint(&discovered.url),
                msp_id: discovered.msp_id.clone(),
            };
            match self.inner.pool.peer(&target).await {
                Ok(client) => peers.push(ChannelPeer {
                    name: target.name,
                    msp_id: target.msp_id,
                    url: target.url,
                    ledger_height: discovered.ledger_height,
                    client,
                }),
                Err(e) => warn!(peer = %target.name, url = %target.url, error = %e, "Discovered peer unreachable"),
            }
        }

        let orderer_urls: Vec<String> = membership.orderers.iter().map(|u| endpoint(u)).collect();
        self.finish_layout(channel, peers, &orderer_urls, membership.required_endorsements)
            .await
    }

    async fn resolve_static(&self, channel: &str) -> Result<ChannelLayout, GatewayError> {
        let as_localhost = self.inner.options.discovery.as_localhost;
        let (targets, orderer_urls) = self
            .inner
            .profile
            .channel_members(channel, as_localhost)
            .ok_or_else(|| GatewayError::ChannelNotFound(channel.to_string()))??;

        let mut peers = Vec::new();
        for target in targets {
            match self.inner.pool.peer(&target).await {
                Ok(client) => peers.push(ChannelPeer {
                    name: target.name,
                    msp_id: target.msp_id,
                    url: target.url,
                    ledger_height: 0,
                    client,
                }),
                Err(e) => warn!(peer = %target.name, url = %target.url, error = %e, "Configured peer unreachable"),
            }
        }
        self.finish_layout(channel, peers, &orderer_urls, self.inner.options.static_endorsements)
            .await
    }

    async fn finish_layout(
        &self,
        channel: &str,
        peers: Vec<ChannelPeer>,
        orderer_urls: &[String],
        required_endorsements: usize,
    ) -> Result<ChannelLayout, GatewayError> {
        if peers.is_empty() {
            return Err(GatewayError::Connection(format!(
                "no peer of channel {} could be reached",
                channel
            )));
        }

        let mut orderers = Vec::new();
        for url in orderer_urls {
            match self.inner.pool.orderer(url).await {
                Ok(client) => orderers.push(client),
                Err(e) => warn!(url = %url, error = %e, "Orderer unreachable"),
            }
        }
        if orderers.is_empty() {
            warn!(channel = %channel, "No orderer reachable; the channel is resolved again on next use");
        }

        Ok(ChannelLayout::new(
            channel.to_string(),
            peers,
            orderers,
            required_endorsements,
            &self.inner.identity.msp_id,
        ))
    }

    /// Release every connection. Calling it again is a no-op.
    pub async fn disconnect(&self) {
        if self.inner.disconnected.swap(true, Ordering::SeqCst) {
            debug!("Gateway already disconnected");
            return;
        }
        self.inner.shutdown.cancel();
        let closed = self.inner.pool.close_all().await;
        self.inner.networks.lock().await.clear();
        crate::metrics::record_session_closed();
        info!(identity = %self.inner.identity.label, connections = closed, "Gateway disconnected");
    }

    /// Run `flow` with this session and disconnect afterwards, whatever the outcome
    pub async fn scoped<F, Fut, T>(self, flow: F) -> T
    where
        F: FnOnce(Gateway) -> Fut,
        Fut: Future<Output = T>,
    {
        let output = flow(self.clone()).await;
        self.disconnect().await;
        output
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("identity", &self.inner.identity.label)
            .field("msp_id", &self.inner.identity.msp_id)
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimNetwork, VotingChaincode};
    use crate::test_utils::sample_identity;

    #[tokio::test]
    async fn test_connect_fails_without_reachable_peers() {
        let network = SimNetwork::builder()
            .organization("Org1", "Org1MSP", 1)
            .chaincode("mychannel", "voting", VotingChaincode::new())
            .build();
        network.set_peer_online("peer0.org1.example.com", false);

        let result = Gateway::connect(
            network.profile("Org1").unwrap(),
            sample_identity("appUser"),
            Arc::new(network.clone()),
            GatewayOptions::default(),
        )
        .await;

        assert!(matches!(result, Err(GatewayError::Connection(_))));
        assert_eq!(network.open_connections(), 0);
    }

    #[test]
    fn test_default_options() {
        let options = GatewayOptions::default();
        assert!(options.discovery.enabled);
        assert!(options.discovery.as_localhost);
        assert!(options.commit_timeout > options.evaluate_timeout);
    }
}
