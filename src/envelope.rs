#![forbid(unsafe_code)]

//! Canonical result envelopes.
//!
//! Both ingress surfaces emit exactly one of two JSON shapes per dispatch:
//!
//! ```text
//! success: {wallet_address, zscore, timestamp, processing_time_ms,
//!           categories: [{category, score, transaction_count, features}]}
//! failure: {wallet_address, error, timestamp, processing_time_ms,
//!           categories: [{category, error, transaction_count: 0}]}
//! ```
//!
//! `zscore` is a string with exactly 18 digits after the decimal point, not a
//! numeric field; callers parse it.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The single scored category emitted today.
pub const CATEGORY_DEXES: &str = "dexes";

/// Top-level error prefix and category error label for unhandled faults.
pub const UNHANDLED_ERROR_LABEL: &str = "Unhandled error";

/// Feature keys the HTTP surface removes from success envelopes.
pub const FILTERED_FEATURE_KEYS: [&str; 2] = ["score_breakdown", "user_tags"];

/// One scored category inside a success envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCategory {
    pub category: String,
    pub score: f64,
    pub transaction_count: u64,
    pub features: Map<String, Value>,
}

/// One failed category inside a failure envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedCategory {
    pub category: String,
    pub error: String,
    pub transaction_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessEnvelope {
    pub wallet_address: String,
    pub zscore: String,
    pub timestamp: u64,
    pub processing_time_ms: u64,
    pub categories: Vec<ScoredCategory>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureEnvelope {
    pub wallet_address: String,
    pub error: String,
    pub timestamp: u64,
    pub processing_time_ms: u64,
    pub categories: Vec<FailedCategory>,
}

/// The wire/response artifact for one dispatch.
///
/// Untagged: the variant is recognizable from its fields (`zscore` vs
/// `error`), matching the original wire contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultEnvelope {
    Success(SuccessEnvelope),
    Failure(FailureEnvelope),
}

impl ResultEnvelope {
    /// Build a success envelope from a scored outcome.
    pub fn success(
        wallet_address: &str,
        score: f64,
        transaction_count: u64,
        features: Map<String, Value>,
        processing_time_ms: u64,
    ) -> Self {
        Self::Success(SuccessEnvelope {
            wallet_address: wallet_address.to_string(),
            zscore: format_zscore(score),
            timestamp: epoch_secs(),
            processing_time_ms,
            categories: vec![ScoredCategory {
                category: CATEGORY_DEXES.to_string(),
                score,
                transaction_count,
                features,
            }],
        })
    }

    /// Build a failure envelope for a model-declared decline.
    pub fn declined(wallet_address: &str, reason: &str, processing_time_ms: u64) -> Self {
        Self::Failure(FailureEnvelope {
            wallet_address: wallet_address.to_string(),
            error: reason.to_string(),
            timestamp: epoch_secs(),
            processing_time_ms,
            categories: vec![FailedCategory {
                category: CATEGORY_DEXES.to_string(),
                error: reason.to_string(),
                transaction_count: 0,
            }],
        })
    }

    /// Build a failure envelope for an unhandled fault. The top-level error
    /// carries the fault message; the category record carries only the bare
    /// label, matching the original wire contract.
    pub fn unhandled(wallet_address: &str, fault: &str, processing_time_ms: u64) -> Self {
        Self::Failure(FailureEnvelope {
            wallet_address: wallet_address.to_string(),
            error: format!("{UNHANDLED_ERROR_LABEL}: {fault}"),
            timestamp: epoch_secs(),
            processing_time_ms,
            categories: vec![FailedCategory {
                category: CATEGORY_DEXES.to_string(),
                error: UNHANDLED_ERROR_LABEL.to_string(),
                transaction_count: 0,
            }],
        })
    }

    pub fn wallet_address(&self) -> &str {
        match self {
            Self::Success(e) => &e.wallet_address,
            Self::Failure(e) => &e.wallet_address,
        }
    }

    pub fn processing_time_ms(&self) -> u64 {
        match self {
            Self::Success(e) => e.processing_time_ms,
            Self::Failure(e) => e.processing_time_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Render a score with exactly 18 digits after the decimal point.
pub fn format_zscore(score: f64) -> String {
    format!("{score:.18}")
}

/// Remove the keys the HTTP surface does not report.
pub fn filter_features(features: &mut Map<String, Value>) {
    for key in FILTERED_FEATURE_KEYS {
        features.remove(key);
    }
}

/// Current wall-clock time as integer epoch seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn features(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn zscore_has_exactly_18_decimal_digits() {
        assert_eq!(format_zscore(2.5), "2.500000000000000000");
        assert_eq!(format_zscore(0.0), "0.000000000000000000");
        assert_eq!(format_zscore(-1.25), "-1.250000000000000000");

        let rendered = format_zscore(123.456);
        let fraction = rendered.split('.').nth(1).unwrap();
        assert_eq!(fraction.len(), 18);
    }

    #[test]
    fn success_envelope_matches_wire_shape() {
        let env = ResultEnvelope::success("0xABC", 2.5, 3, features(json!({"k": 1})), 12);
        let value = serde_json::to_value(&env).unwrap();

        assert_eq!(value["wallet_address"], "0xABC");
        assert_eq!(value["zscore"], "2.500000000000000000");
        assert_eq!(value["processing_time_ms"], 12);
        assert!(value["timestamp"].as_u64().unwrap() > 0);
        assert!(value.get("error").is_none());

        let categories = value["categories"].as_array().unwrap();
        assert_eq!(categories.len(), 1);
        assert_eq!(categories[0]["category"], "dexes");
        assert_eq!(categories[0]["score"], 2.5);
        assert_eq!(categories[0]["transaction_count"], 3);
        assert_eq!(categories[0]["features"], json!({"k": 1}));
    }

    #[test]
    fn declined_envelope_repeats_reason_in_category() {
        let env = ResultEnvelope::declined("", "no transactions", 4);
        let value = serde_json::to_value(&env).unwrap();

        assert_eq!(value["wallet_address"], "");
        assert_eq!(value["error"], "no transactions");
        let categories = value["categories"].as_array().unwrap();
        assert_eq!(categories[0]["error"], "no transactions");
        assert_eq!(categories[0]["transaction_count"], 0);
        assert!(categories[0].get("score").is_none());
    }

    #[test]
    fn unhandled_envelope_prefixes_top_level_error_only() {
        let env = ResultEnvelope::unhandled("0xABC", "boom", 0);
        let value = serde_json::to_value(&env).unwrap();

        assert_eq!(value["error"], "Unhandled error: boom");
        let categories = value["categories"].as_array().unwrap();
        assert_eq!(categories[0]["error"], "Unhandled error");
        assert_eq!(categories[0]["transaction_count"], 0);
    }

    #[test]
    fn untagged_deserialization_picks_the_right_variant() {
        let success = ResultEnvelope::success("0xABC", 1.0, 1, Map::new(), 1);
        let failure = ResultEnvelope::declined("0xABC", "nope", 1);

        let success_back: ResultEnvelope =
            serde_json::from_slice(&serde_json::to_vec(&success).unwrap()).unwrap();
        let failure_back: ResultEnvelope =
            serde_json::from_slice(&serde_json::to_vec(&failure).unwrap()).unwrap();

        assert!(success_back.is_success());
        assert!(!failure_back.is_success());
        assert_eq!(success_back, success);
        assert_eq!(failure_back, failure);
    }

    #[test]
    fn filter_features_removes_only_the_reserved_keys() {
        let mut map = features(json!({
            "k": 1,
            "score_breakdown": {"swap": 0.4},
            "user_tags": ["whale"],
        }));
        filter_features(&mut map);
        assert_eq!(serde_json::to_value(&map).unwrap(), json!({"k": 1}));
    }
}
