//! LedgerLink: client for a permissioned ledger network
//!
//! Identities live in a [`wallet`], are issued by a certificate authority
//! through [`ca::EnrollmentClient`], and open [`gateway::Gateway`] sessions
//! on whose channels [`contract::Contract`] handles submit and evaluate
//! transactions. [`sim`] provides an in-process network for tests and demos.

pub mod ca;
pub mod config;
pub mod contract;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod logging;
pub mod metrics;
pub mod profile;
pub mod sim;
pub mod transport;
pub mod voting;
pub mod wallet;

#[cfg(test)]
mod test_utils;

pub use error::{ErrorKind, LedgerError, LedgerResult};
pub use logging::{init_logging, LogLevel};
