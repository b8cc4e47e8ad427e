//! Courier. Off-chain core of a hub-and-spoke cross-chain messenger.
//!
//! This crate contains core primitives, traits, and types shared by the
//! Courier agents: message and bundle models, the canonical binary encoding,
//! the bundle commitment accumulator, the rocksdb-backed store, and the
//! async seams to the on-chain collaborators.

#![warn(missing_docs)]
#![warn(unused_extern_crates)]
#![forbid(unsafe_code)]

/// Bundle commitment accumulator
pub mod commitment;

/// Rocksdb-backed typed storage
pub mod db;

/// Traits for canonical binary representations
pub mod encode;

/// Error types for Courier
pub mod error;

/// Async traits for spoke and hub chains
pub mod traits;

/// Message, bundle, and fee models
pub mod types;

pub use commitment::{bundle_commitment, IncrementalMerkle};
pub use db::{CourierDB, DbError, DB};
pub use encode::{Decode, DecodeError, Encode};
pub use error::{
    ChainCommunicationError, ChainResult, FeeError, StateError, StoreError, SubmitError,
};
pub use traits::{HubChain, SpokeChain};
pub use types::*;

pub use primitive_types::H256;

/// The fixed challenge window: effects of a bundle are not considered
/// irreversible until one week has elapsed since submission.
pub const CHALLENGE_WINDOW_SECS: u64 = 7 * 24 * 60 * 60;

/// Basis-point denominator used by the fee split policy.
pub const BPS_DENOMINATOR: u128 = 10_000;
