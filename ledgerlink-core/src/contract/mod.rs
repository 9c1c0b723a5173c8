//! Transaction dispatch
//!
//! A [`Contract`] is a stateless descriptor (channel plus contract name).
//! `submit` runs the full endorse, order and commit cycle and is never
//! retried: once an envelope may have been ordered, resending it could apply
//! the change twice. `evaluate` asks exactly one peer and may be retried on
//! another peer when the first is unavailable.

use serde::de::DeserializeOwned;
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::gateway::Network;
use crate::transport::ValidationCode;

mod dispatch;
mod endorsement;
mod error;

pub use error::ContractError;

/// Ordered state change or single-peer read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxKind {
    Submit,
    Evaluate,
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxKind::Submit => f.write_str("submit"),
            TxKind::Evaluate => f.write_str("evaluate"),
        }
    }
}

/// Contract function call with positional string arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    kind: TxKind,
    function: String,
    args: Vec<String>,
}

impl TransactionRequest {
    pub fn new<S: AsRef<str>>(kind: TxKind, function: &str, args: &[S]) -> Self {
        Self {
            kind,
            function: function.to_string(),
            args: args.iter().map(|a| a.as_ref().to_string()).collect(),
        }
    }

    pub fn submit<S: AsRef<str>>(function: &str, args: &[S]) -> Self {
        Self::new(TxKind::Submit, function, args)
    }

    pub fn evaluate<S: AsRef<str>>(function: &str, args: &[S]) -> Self {
        Self::new(TxKind::Evaluate, function, args)
    }

    pub fn kind(&self) -> TxKind {
        self.kind
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

/// Per-call deadline and cancellation
#[derive(Debug, Clone, Default)]
pub struct TxOptions {
    /// Overall deadline; stage timeouts of the session still apply
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl TxOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Contract return value; an empty result is a success, not an error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Empty,
    Bytes(Vec<u8>),
}

impl Payload {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        if bytes.is_empty() {
            Payload::Empty
        } else {
            Payload::Bytes(bytes)
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Payload::Empty)
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Empty => &[],
            Payload::Bytes(bytes) => bytes,
        }
    }

    /// UTF-8 text, if the payload is valid UTF-8
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(self.as_bytes()).ok()
    }

    /// Decode JSON; `None` for an empty payload
    pub fn parse_json<T: DeserializeOwned>(&self) -> Result<Option<T>, ContractError> {
        match self {
            Payload::Empty => Ok(None),
            Payload::Bytes(bytes) => serde_json::from_slice(bytes)
                .map(Some)
                .map_err(|e| ContractError::Decode(e.to_string())),
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.as_bytes()))
    }
}

/// Where and how a submitted transaction was committed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitStatus {
    pub block_number: u64,
    pub code: ValidationCode,
}

/// Successful outcome of a call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionResult {
    pub kind: TxKind,
    pub tx_id: String,
    pub payload: Payload,
    /// Present for submits
    pub commit: Option<CommitStatus>,
}

impl TransactionResult {
    pub fn payload(&self) -> &Payload {
        &self.payload
    }
}

/// Handle to a named contract on a channel
#[derive(Debug, Clone)]
pub struct Contract {
    network: Network,
    name: String,
}

impl Contract {
    pub(crate) fn new(network: Network, name: &str) -> Self {
        Self {
            network,
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Submit `function(args)` with default options
    pub async fn submit_transaction(
        &self,
        function: &str,
        args: &[&str],
    ) -> Result<TransactionResult, ContractError> {
        self.submit(&TransactionRequest::submit(function, args), &TxOptions::default())
            .await
    }

    /// Evaluate `function(args)` with default options
    pub async fn evaluate_transaction(
        &self,
        function: &str,
        args: &[&str],
    ) -> Result<TransactionResult, ContractError> {
        self.evaluate(&TransactionRequest::evaluate(function, args), &TxOptions::default())
            .await
    }

    /// Dispatch on the request kind
    pub async fn invoke(
        &self,
        request: &TransactionRequest,
        options: &TxOptions,
    ) -> Result<TransactionResult, ContractError> {
        match request.kind() {
            TxKind::Submit => self.submit(request, options).await,
            TxKind::Evaluate => self.evaluate(request, options).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_payload_is_explicit() {
        let payload = Payload::from_bytes(Vec::new());
        assert!(payload.is_empty());
        assert_eq!(payload.as_str(), Some(""));
        assert_eq!(payload.parse_json::<serde_json::Value>().unwrap(), None);
    }

    #[test]
    fn test_payload_json() {
        let payload = Payload::from_bytes(br#"[{"Key":"0"}]"#.to_vec());
        let value: serde_json::Value = payload.parse_json().unwrap().unwrap();
        assert_eq!(value[0]["Key"], "0");
        assert_eq!(payload.to_string(), r#"[{"Key":"0"}]"#);

        let garbage = Payload::from_bytes(b"not json".to_vec());
        assert!(matches!(
            garbage.parse_json::<serde_json::Value>(),
            Err(ContractError::Decode(_))
        ));
    }

    #[test]
    fn test_request_builders() {
        let request = TransactionRequest::submit("Vote", &["1"]);
        assert_eq!(request.kind(), TxKind::Submit);
        assert_eq!(request.function(), "Vote");
        assert_eq!(request.args(), &["1".to_string()]);

        let empty: &[&str] = &[];
        assert!(TransactionRequest::evaluate("QueryAllItems", empty).args().is_empty());
    }
}
