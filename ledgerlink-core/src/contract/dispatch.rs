//! Submit and evaluate pipelines

use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::endorsement::collect_endorsements;
use super::{CommitStatus, Contract, ContractError, Payload, TransactionRequest, TransactionResult};
use super::{TxKind, TxOptions};
use crate::gateway::ChannelLayout;
use crate::transport::{backoff_delay, CommitEvent, Envelope, Proposal, SignedProposal, TransportError};

/// Overall per-call deadline; each stage gets the lesser of its own timeout
/// and what is left of the call
struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    fn new(limit: Option<Duration>) -> Self {
        Self {
            at: limit.map(|d| Instant::now() + d),
        }
    }

    fn bound(&self, stage: Duration) -> Duration {
        match self.at {
            Some(at) => stage.min(at.saturating_duration_since(Instant::now())),
            None => stage,
        }
    }
}

fn outcome_label<T>(result: &Result<T, ContractError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(ContractError::Application { .. }) => "application",
        Err(ContractError::EndorsementFailure(_)) => "endorsement",
        Err(ContractError::OrderingFailure(_)) => "ordering",
        Err(ContractError::CommitFailure { .. }) => "commit_failure",
        Err(ContractError::CommitTimeout { .. }) | Err(ContractError::Timeout(_)) => "timeout",
        Err(ContractError::Cancelled) => "cancelled",
        Err(ContractError::Connection(_)) | Err(ContractError::PeerUnavailable(_)) => "unavailable",
        Err(_) => "rejected",
    }
}

impl Contract {
    /// Endorse, order and wait for the commit of `request`.
    ///
    /// Never retried. A [`ContractError::CommitTimeout`] means the outcome is
    /// unknown: the transaction may still commit later.
    pub async fn submit(
        &self,
        request: &TransactionRequest,
        options: &TxOptions,
    ) -> Result<TransactionResult, ContractError> {
        let started = Instant::now();
        let result = self.guarded(options, self.run_submit(request, options)).await;
        crate::metrics::record_submit(outcome_label(&result), started.elapsed().as_secs_f64());

        match &result {
            Ok(done) => info!(
                tx_id = %done.tx_id,
                channel = %self.network.name(),
                contract = %self.name,
                function = %request.function(),
                "Transaction committed"
            ),
            Err(e) => warn!(
                channel = %self.network.name(),
                contract = %self.name,
                function = %request.function(),
                error = %e,
                "Submit failed"
            ),
        }
        result
    }

    /// Run `request` on a single peer without ordering it
    pub async fn evaluate(
        &self,
        request: &TransactionRequest,
        options: &TxOptions,
    ) -> Result<TransactionResult, ContractError> {
        let started = Instant::now();
        let result = self.guarded(options, self.run_evaluate(request, options)).await;
        crate::metrics::record_evaluate(outcome_label(&result), started.elapsed().as_secs_f64());

        if let Err(e) = &result {
            debug!(
                channel = %self.network.name(),
                contract = %self.name,
                function = %request.function(),
                error = %e,
                "Evaluate failed"
            );
        }
        result
    }

    /// Race `work` against the session shutdown and the caller's token
    async fn guarded<T, F>(&self, options: &TxOptions, work: F) -> Result<T, ContractError>
    where
        F: Future<Output = Result<T, ContractError>>,
    {
        let gateway = self.network.gateway();
        if !gateway.is_connected() {
            return Err(ContractError::Connection("gateway is disconnected".to_string()));
        }
        let session = gateway.shutdown_token().clone();
        let call = options.cancel.clone().unwrap_or_else(CancellationToken::new);

        tokio::select! {
            biased;
            _ = session.cancelled() => Err(ContractError::Connection(
                "gateway disconnected during the call".to_string(),
            )),
            _ = call.cancelled() => Err(ContractError::Cancelled),
            result = work => result,
        }
    }

    fn sign_proposal(&self, request: &TransactionRequest) -> Result<SignedProposal, ContractError> {
        let gateway = self.network.gateway();
        let proposal = Proposal::new(
            self.network.name(),
            &self.name,
            request.function(),
            request.args().to_vec(),
            gateway.creator().clone(),
        );
        Ok(proposal.sign(gateway.signer())?)
    }

    async fn run_submit(
        &self,
        request: &TransactionRequest,
        options: &TxOptions,
    ) -> Result<TransactionResult, ContractError> {
        let gateway = self.network.gateway();
        let session = gateway.options();
        let mut layout = self.network.layout();
        let deadline = Deadline::new(options.timeout);
        if layout.is_degraded() {
            match self.network.refreshed_layout().await {
                Ok(fresh) => layout = fresh,
                Err(e) => warn!(channel = %layout.channel, error = %e, "Channel refresh failed"),
            }
        }

        let proposal = self.sign_proposal(request)?;
        let tx_id = proposal.tx_id().to_string();
        debug!(
            tx_id = %tx_id,
            channel = %layout.channel,
            required = layout.required_endorsements,
            "Collecting endorsements"
        );

        let endorse_timeout = deadline.bound(session.endorse_timeout);
        let endorsed = match timeout(
            endorse_timeout,
            collect_endorsements(
                &layout.peers,
                &proposal,
                layout.required_endorsements,
                &layout.channel,
                &self.name,
            ),
        )
        .await
        {
            Ok(Ok(endorsed)) => endorsed,
            Ok(Err(e)) => {
                if matches!(e, ContractError::EndorsementFailure(_)) {
                    crate::metrics::record_endorsement_failure();
                }
                return Err(e);
            }
            Err(_) => {
                crate::metrics::record_endorsement_failure();
                return Err(ContractError::Timeout(endorse_timeout));
            }
        };

        let payload = Payload::from_bytes(endorsed.response.payload.clone());
        let envelope = Envelope::new(
            proposal,
            endorsed.response,
            endorsed.rwset,
            endorsed.endorsements,
            gateway.signer(),
        );
        self.broadcast(&layout, &envelope, deadline.bound(session.submit_timeout))
            .await?;

        let commit_timeout = deadline.bound(session.commit_timeout);
        let event = match timeout(commit_timeout, self.wait_for_commit(&layout, &tx_id)).await {
            Ok(event) => event?,
            Err(_) => {
                crate::metrics::record_commit("TIMEOUT");
                return Err(ContractError::CommitTimeout {
                    tx_id,
                    timeout: commit_timeout,
                });
            }
        };
        crate::metrics::record_commit(event.code.as_str());
        if !event.code.is_valid() {
            return Err(ContractError::CommitFailure {
                tx_id,
                code: event.code,
            });
        }

        Ok(TransactionResult {
            kind: TxKind::Submit,
            tx_id,
            payload,
            commit: Some(CommitStatus {
                block_number: event.block_number,
                code: event.code,
            }),
        })
    }

    /// Hand the envelope to the first orderer that accepts it. Only failures
    /// that prove non-delivery move on to the next orderer.
    async fn broadcast(
        &self,
        layout: &ChannelLayout,
        envelope: &Envelope,
        limit: Duration,
    ) -> Result<(), ContractError> {
        let orderers = &layout.orderers;
        if orderers.is_empty() {
            return Err(ContractError::OrderingFailure(format!(
                "no orderer known for channel {}",
                envelope.channel()
            )));
        }

        let mut failures = Vec::new();
        for orderer in orderers {
            match timeout(limit, orderer.broadcast(envelope)).await {
                Ok(Ok(())) => {
                    debug!(tx_id = %envelope.tx_id(), orderer = %orderer.url(), "Envelope accepted");
                    return Ok(());
                }
                Ok(Err(TransportError::Rejected { code, message })) => {
                    return Err(ContractError::OrderingFailure(format!(
                        "{} rejected the transaction ({}): {}",
                        orderer.url(),
                        code,
                        message
                    )));
                }
                Ok(Err(e)) => {
                    warn!(orderer = %orderer.url(), error = %e, "Broadcast failed");
                    failures.push(format!("{}: {}", orderer.url(), e));
                }
                Err(_) => {
                    warn!(orderer = %orderer.url(), "Broadcast timed out");
                    failures.push(format!("{}: no answer within {:?}", orderer.url(), limit));
                }
            }
        }
        Err(ContractError::OrderingFailure(failures.join("; ")))
    }

    /// Commit event for `tx_id` from the most preferred peer that answers
    async fn wait_for_commit(
        &self,
        layout: &ChannelLayout,
        tx_id: &str,
    ) -> Result<CommitEvent, ContractError> {
        let mut failures = Vec::new();
        for peer in &layout.peers {
            match peer.client.commit_status(&layout.channel, tx_id).await {
                Ok(event) => {
                    debug!(
                        tx_id,
                        peer = %peer.name,
                        block = event.block_number,
                        code = %event.code.as_str(),
                        "Commit observed"
                    );
                    return Ok(event);
                }
                Err(e) if e.is_retryable() => {
                    warn!(tx_id, peer = %peer.name, error = %e, "Commit status unavailable");
                    failures.push(format!("{}: {}", peer.name, e));
                }
                Err(e) => return Err(ContractError::from_peer(e, &layout.channel, &self.name)),
            }
        }
        Err(ContractError::PeerUnavailable(format!(
            "no peer reported the commit status of {}: {}",
            tx_id,
            failures.join("; ")
        )))
    }

    async fn run_evaluate(
        &self,
        request: &TransactionRequest,
        options: &TxOptions,
    ) -> Result<TransactionResult, ContractError> {
        let session = self.network.gateway().options();
        let layout = self.network.layout();
        let deadline = Deadline::new(options.timeout);
        let policy = &session.retry;

        let proposal = self.sign_proposal(request)?;
        let tx_id = proposal.tx_id().to_string();
        let attempts = (policy.max_retries as usize + 1).min(layout.peers.len());

        let mut failures = Vec::new();
        for (attempt, peer) in layout.peers.iter().take(attempts).enumerate() {
            if attempt > 0 {
                crate::metrics::record_evaluate_retry();
                tokio::time::sleep(backoff_delay(attempt as u32 - 1, policy)).await;
            }
            let limit = deadline.bound(session.evaluate_timeout);
            if limit.is_zero() {
                return Err(ContractError::Timeout(options.timeout.unwrap_or(limit)));
            }

            let result = timeout(limit, peer.client.process_proposal(&proposal))
                .await
                .unwrap_or(Err(TransportError::Timeout));
            match result {
                Ok(response) if response.response.is_success() => {
                    debug!(tx_id = %tx_id, peer = %peer.name, "Evaluated");
                    return Ok(TransactionResult {
                        kind: TxKind::Evaluate,
                        tx_id,
                        payload: Payload::from_bytes(response.response.payload),
                        commit: None,
                    });
                }
                Ok(response) => {
                    return Err(ContractError::Application {
                        message: response.response.message,
                    });
                }
                Err(e) if e.is_retryable() => {
                    warn!(tx_id = %tx_id, peer = %peer.name, attempt, error = %e, "Evaluate attempt failed");
                    failures.push(format!("{}: {}", peer.name, e));
                }
                Err(e) => return Err(ContractError::from_peer(e, &layout.channel, &self.name)),
            }
        }

        if failures.is_empty() {
            failures.push(format!("no peers on channel {}", layout.channel));
        }
        // Every known peer is gone; look the channel up again for later calls
        if failures.len() >= layout.peers.len() {
            if let Err(e) = self.network.refreshed_layout().await {
                debug!(channel = %layout.channel, error = %e, "Channel refresh failed");
            }
        }
        Err(ContractError::PeerUnavailable(failures.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_caps_stage_timeouts() {
        let open = Deadline::new(None);
        assert_eq!(open.bound(Duration::from_secs(30)), Duration::from_secs(30));

        let tight = Deadline::new(Some(Duration::from_millis(100)));
        assert!(tight.bound(Duration::from_secs(30)) <= Duration::from_millis(100));

        let expired = Deadline::new(Some(Duration::ZERO));
        assert!(expired.bound(Duration::from_secs(5)).is_zero());
    }

    #[test]
    fn test_outcome_labels() {
        let ok: Result<(), ContractError> = Ok(());
        assert_eq!(outcome_label(&ok), "ok");
        let app: Result<(), ContractError> = Err(ContractError::Application {
            message: "nope".to_string(),
        });
        assert_eq!(outcome_label(&app), "application");
        let cancelled: Result<(), ContractError> = Err(ContractError::Cancelled);
        assert_eq!(outcome_label(&cancelled), "cancelled");
    }
}
