#![forbid(unsafe_code)]

//! Wallet scoring dispatch service.
//!
//! Two ingress surfaces (an axum HTTP endpoint and a stream worker) wrap the
//! same dispatch pipeline: invoke the scoring collaborator, classify the
//! outcome, build a canonical result envelope, and update shared counters.

pub mod dispatch;
pub mod envelope;
pub mod http_server;
pub mod payload;
pub mod scorer;
pub mod stats;
pub mod stream;
pub mod transport;
