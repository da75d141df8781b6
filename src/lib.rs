// src/lib.rs
//! # DID Onboarding
//!
//! Client-side registration of legal-entity DIDs on a permissioned ledger.
//!
//! ## Layers
//! 1. **Wallet**: key provisioning, JWT signing, held credentials
//! 2. **Blockchain**: JSON-RPC writes, read API, transaction signing, anchoring
//! 3. **Contracts**: typed DID Registry methods
//! 4. **Services**: attestation, scoped tokens and the onboarding workflow
//!
//! The ledger never sees a private key: the registry hands out unsigned
//! transactions, the client signs them and submits them back.

pub mod blockchain;
pub mod config;
pub mod contracts;
pub mod error;
pub mod logging;
pub mod models;
pub mod services;
pub mod utils;
pub mod wallet;

pub use error::{Error, Result};
pub use services::onboarding::{
    DidRegistrationOrchestrator, OnboardingError, OnboardingOutcome, OnboardingRequest, OnboardingStep,
};
