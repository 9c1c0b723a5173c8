//! Typed client for the voting contract
//!
//! `Vote` and `UpdateVoter` are two independent transactions. The voter is
//! only marked as having voted after the contract answered `Vote` with
//! [`VOTED_SUCCESSFULLY`]; if the second submit fails the vote stays counted.

use serde_json::Value;
use tracing::info;

use crate::contract::{Contract, ContractError, Payload, TransactionResult};

/// Payload returned by `Vote` when the vote was counted
pub const VOTED_SUCCESSFULLY: &str = "Voted successfully";

/// Result of [`VotingClient::vote_and_record`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteOutcome {
    /// Vote counted and voter updated
    Recorded {
        vote: TransactionResult,
        update: TransactionResult,
    },
    /// The contract declined the vote; `UpdateVoter` was not invoked
    Declined { message: String },
}

impl VoteOutcome {
    pub fn is_recorded(&self) -> bool {
        matches!(self, VoteOutcome::Recorded { .. })
    }
}

#[derive(Debug, Clone)]
pub struct VotingClient {
    contract: Contract,
}

impl VotingClient {
    pub fn new(contract: Contract) -> Self {
        Self { contract }
    }

    pub fn contract(&self) -> &Contract {
        &self.contract
    }

    /// Register the session identity as a voter; returns the contract's message
    pub async fn create_voter(&self) -> Result<String, ContractError> {
        let result = self.contract.submit_transaction("CreateVoter", &[]).await?;
        Ok(result.payload.to_string())
    }

    /// All vote items, or `None` when the ledger holds none
    pub async fn query_all_items(&self) -> Result<Option<Value>, ContractError> {
        self.contract
            .evaluate_transaction("QueryAllItems", &[])
            .await?
            .payload
            .parse_json()
    }

    pub async fn query_all_users(&self) -> Result<Option<Value>, ContractError> {
        self.contract
            .evaluate_transaction("QueryAllUsers", &[])
            .await?
            .payload
            .parse_json()
    }

    pub async fn query_item(&self, item_id: &str) -> Result<Payload, ContractError> {
        Ok(self
            .contract
            .evaluate_transaction("QueryItem", &[item_id])
            .await?
            .payload)
    }

    /// Vote for `item_id`, then record the choice on the voter.
    ///
    /// Any `Vote` payload other than [`VOTED_SUCCESSFULLY`] is returned as
    /// [`VoteOutcome::Declined`] without a second submit.
    pub async fn vote_and_record(&self, item_id: &str) -> Result<VoteOutcome, ContractError> {
        let vote = self.contract.submit_transaction("Vote", &[item_id]).await?;
        if vote.payload.as_str() != Some(VOTED_SUCCESSFULLY) {
            let message = vote.payload.to_string();
            info!(item = item_id, message = %message, "Vote declined");
            return Ok(VoteOutcome::Declined { message });
        }

        let update = self
            .contract
            .submit_transaction("UpdateVoter", &[item_id])
            .await?;
        info!(item = item_id, tx_id = %update.tx_id, "Vote recorded");
        Ok(VoteOutcome::Recorded { vote, update })
    }
}
