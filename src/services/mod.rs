// src/services/mod.rs
//! Workflow services: attestation, token exchange and the onboarding
//! orchestrator that sequences them.

pub mod attestation;
pub mod onboarding;
pub mod token_exchange;
