//! A cross-chain bridge witness: observes the door accounts of a locking
//! and an issuing chain, signs attestations for the transfers it sees,
//! persists them, and serves or submits them as attestation batches.

pub mod api;
pub mod attestation;
pub mod cfg;
pub mod chain_listener;
pub mod client;
pub mod crypto;
pub mod db;
pub mod events;
pub mod federator;
pub mod launcher;
pub mod ser;
pub mod types;
