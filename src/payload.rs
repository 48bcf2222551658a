#![forbid(unsafe_code)]

//! Inbound wallet payload.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An arbitrary JSON object submitted for scoring.
///
/// The payload is opaque to the dispatch layer and is handed to the scoring
/// collaborator unmodified. Only `wallet_address` is read here; a missing or
/// non-string value is treated as the empty string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletPayload(pub Map<String, Value>);

impl WalletPayload {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// The wallet address carried by the payload, or `""` when absent.
    pub fn wallet_address(&self) -> &str {
        self.0
            .get("wallet_address")
            .and_then(Value::as_str)
            .unwrap_or("")
    }
}

impl From<Map<String, Value>> for WalletPayload {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}
