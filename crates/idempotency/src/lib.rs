//! Idempotency claim protocol (domain types).
//!
//! A claim is a reservation record guarding a side-effecting operation
//! against duplicate execution. This crate holds the pure types; the claim
//! stores live in `aperture-infra`.

pub mod claim;
pub mod hash;

pub use claim::{ClaimDecision, ClaimKey, ClaimStatus, IdempotencyClaim};
pub use hash::RequestHash;
