//! `aperture-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod currency;
pub mod error;
pub mod id;
pub mod metadata;

pub use currency::Currency;
pub use error::{LedgerError, LedgerResult};
pub use id::{ClaimId, JournalId, PostingId};
pub use metadata::{Metadata, MetadataValue};
