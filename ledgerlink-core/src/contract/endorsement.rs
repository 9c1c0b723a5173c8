//! Endorsement collection
//!
//! A proposal is sent to as many preferred peers as the channel requires.
//! Responses are grouped by result digest; the transaction is endorsed once
//! one group holds the required number of distinct endorsers. Peers that fail
//! or disagree are topped up from the remaining candidates.

use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use super::ContractError;
use crate::gateway::ChannelPeer;
use crate::transport::{
    ChaincodeResponse, Endorsement, ProposalResponse, ReadWriteSet, SignedProposal, TransportError,
};

/// Simulation result agreed by enough endorsers
#[derive(Debug, Clone)]
pub(crate) struct Endorsed {
    pub response: ChaincodeResponse,
    pub rwset: ReadWriteSet,
    pub endorsements: Vec<Endorsement>,
}

struct Group {
    response: ChaincodeResponse,
    rwset: ReadWriteSet,
    endorsers: HashSet<String>,
    endorsements: Vec<Endorsement>,
}

/// Groups successful proposal responses by result
pub(crate) struct EndorsementCollector {
    required: usize,
    groups: HashMap<[u8; 32], Group>,
}

impl EndorsementCollector {
    pub fn new(required: usize) -> Self {
        Self {
            required: required.max(1),
            groups: HashMap::new(),
        }
    }

    /// Record a successful response; returns the endorsed result once a
    /// group reaches the required size
    pub fn add(&mut self, response: ProposalResponse) -> Option<Endorsed> {
        let endorsement = response.endorsement.clone()?;
        let digest = response.result_digest();
        let group = self.groups.entry(digest).or_insert_with(|| Group {
            response: response.response,
            rwset: response.rwset,
            endorsers: HashSet::new(),
            endorsements: Vec::new(),
        });
        if group.endorsers.insert(endorsement.endorser.clone()) {
            group.endorsements.push(endorsement);
        }

        (group.endorsers.len() >= self.required).then(|| Endorsed {
            response: group.response.clone(),
            rwset: group.rwset.clone(),
            endorsements: group.endorsements.clone(),
        })
    }

    /// Size of the largest agreeing group
    pub fn best(&self) -> usize {
        self.groups
            .values()
            .map(|g| g.endorsers.len())
            .max()
            .unwrap_or(0)
    }

    pub fn distinct_results(&self) -> usize {
        self.groups.len()
    }
}

async fn endorse_one<'a>(
    peer: &'a ChannelPeer,
    proposal: &SignedProposal,
) -> (&'a ChannelPeer, Result<ProposalResponse, TransportError>) {
    (peer, peer.client.process_proposal(proposal).await)
}

/// Gather `required` matching endorsements from `peers` (in preference order)
pub(crate) async fn collect_endorsements(
    peers: &[ChannelPeer],
    proposal: &SignedProposal,
    required: usize,
    channel: &str,
    contract: &str,
) -> Result<Endorsed, ContractError> {
    let mut collector = EndorsementCollector::new(required);
    let required = required.max(1);
    let mut candidates = peers.iter();
    let mut pending = FuturesUnordered::new();
    for peer in candidates.by_ref().take(required) {
        pending.push(endorse_one(peer, proposal));
    }

    let mut failures = Vec::new();
    while let Some((peer, result)) = pending.next().await {
        match result {
            Ok(response) if response.response.is_success() => {
                debug!(peer = %peer.name, tx_id = %proposal.tx_id(), "Endorsed");
                if let Some(endorsed) = collector.add(response) {
                    return Ok(endorsed);
                }
            }
            Ok(response) => {
                return Err(ContractError::Application {
                    message: response.response.message,
                });
            }
            Err(err @ TransportError::Rejected { .. }) => {
                return Err(ContractError::from_peer(err, channel, contract));
            }
            Err(err) => {
                warn!(peer = %peer.name, tx_id = %proposal.tx_id(), error = %err, "Endorsement request failed");
                failures.push(format!("{}: {}", peer.name, err));
            }
        }

        while pending.len() + collector.best() < required {
            match candidates.next() {
                Some(peer) => pending.push(endorse_one(peer, proposal)),
                None => break,
            }
        }
    }

    let mut reason = format!(
        "{} of {} required matching endorsements",
        collector.best(),
        required
    );
    if collector.distinct_results() > 1 {
        reason.push_str(&format!(
            "; peers returned {} different results",
            collector.distinct_results()
        ));
    }
    if !failures.is_empty() {
        reason.push_str(&format!("; {}", failures.join("; ")));
    }
    Err(ContractError::EndorsementFailure(reason))
}
