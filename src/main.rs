// src/main.rs

//! # DID Onboarding - Command Line Entry Point
//!
//! Registers one legal-entity DID using the settings from `onboarding.*`
//! and `DID_ONBOARDING__*` environment variables (a `.env` file is honoured).
//!
//! ## Environment Variables Required
//! - `DID_ONBOARDING__REGISTRY_URL`: DID Registry API base
//! - `DID_ONBOARDING__AUTHORISATION_URL`: Authorisation API base
//! - `DID_ONBOARDING__ATTESTATION__ISSUER_URL`: issuer of the onboarding attestation
//!
//! `RUST_LOG` controls verbosity. Ctrl-C cancels the registration between
//! or during steps; `DID_ONBOARDING__RUN_TIMEOUT_MS` bounds the whole run.

use std::sync::Arc;

use anyhow::Context;
use dotenv::dotenv;
use tokio_util::sync::CancellationToken;

use did_onboarding::blockchain::anchor::AnchorWaiter;
use did_onboarding::blockchain::read_api::ReadApiClient;
use did_onboarding::blockchain::rpc_client::LedgerRpcClient;
use did_onboarding::config::Settings;
use did_onboarding::services::attestation::AttestationObtainer;
use did_onboarding::services::token_exchange::ScopedAccessTokenExchanger;
use did_onboarding::utils::http::build_client;
use did_onboarding::utils::interrupt::Interrupt;
use did_onboarding::DidRegistrationOrchestrator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let settings = Settings::load().context("loading settings")?;
    let request = settings
        .onboarding_request()
        .context("building the onboarding request")?;

    // One client for every component; clones share the pool
    let http = build_client(settings.request_timeout())?;

    let rpc = Arc::new(LedgerRpcClient::new(http.clone(), &settings.registry_url));
    let reader = Arc::new(ReadApiClient::new(http.clone(), &settings.registry_url));
    let attestation = Arc::new(AttestationObtainer::new(http.clone()));
    let tokens = Arc::new(ScopedAccessTokenExchanger::new(
        http,
        &settings.authorisation_url,
        attestation.clone(),
        request.attestation.clone(),
    ));
    let anchor = AnchorWaiter::new(settings.anchor).context("invalid anchor polling settings")?;
    let orchestrator = DidRegistrationOrchestrator::new(rpc, reader, tokens, attestation, anchor);

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupted; cancelling registration");
            on_ctrl_c.cancel();
        }
    });

    let mut interrupt = Interrupt::new(cancel);
    if let Some(limit) = settings.run_timeout() {
        interrupt = interrupt.with_deadline(tokio::time::Instant::now() + limit);
    }

    match orchestrator.run(&request, &interrupt).await {
        Ok(outcome) => {
            println!("DID: {}", outcome.did);
            println!("controller key: {}", outcome.keys.controller.kid(&outcome.did));
            println!("authentication key: {}", outcome.keys.authentication.kid(&outcome.did));
            for tx in &outcome.transactions {
                println!("- {:<30} {}", tx.step.to_string(), tx.tx_hash);
            }
            Ok(())
        }
        Err(err) => {
            for tx in &err.submitted {
                log::error!("already submitted: {} {}", tx.step, tx.tx_hash);
            }
            log::error!("visited: {:?}", err.history);
            Err(err).context("registration failed")
        }
    }
}
