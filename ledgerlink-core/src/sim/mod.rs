//! In-process ledger network
//!
//! A certificate authority, peers with MVCC world state, an ordering service
//! and the voting chaincode, all running inside the current tokio runtime.
//! Used by the integration tests and the CLI demo; implements the same
//! [`CertificateAuthority`](crate::ca::CertificateAuthority) and
//! [`Connector`](crate::transport::Connector) traits a real deployment would.

mod ca;
mod chaincode;
mod network;
mod orderer;
mod peer;
mod voting;

pub use ca::SimCa;
pub use chaincode::{Chaincode, ChaincodeStub, VersionedValue, WorldState};
pub use network::{SimNetwork, SimNetworkBuilder};
pub use voting::{VoteItem, Voter, VotingChaincode};
