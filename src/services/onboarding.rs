// src/services/onboarding.rs
//! Legal-entity DID onboarding.
//!
//! Drives one registration from key provisioning to a DID document with a
//! controller key, an authentication key and optional services:
//!
//! 1. provision keys and obtain the onboarding attestation
//! 2. `didr_invite` token, `insertDidDocument`, wait until readable
//! 3. `didr_write` token, `addVerificationMethod`, wait until readable
//! 4. `assertionMethod` and `authentication` relationships
//! 5. one `addService` per configured service
//!
//! Every write is signed locally and submitted with `sendSignedTransaction`.
//! Steps run strictly in order; the first error stops the registration and
//! nothing already written is rolled back.

use std::fmt;
use std::sync::Arc;

use log::Level;

use crate::blockchain::anchor::{AnchorPollResult, AnchorWaiter};
use crate::blockchain::transaction_signer::TransactionSigner;
use crate::blockchain::{DidDocumentSource, RegistryRpc};
use crate::contracts::did_registry::{DidRegistry, Validity};
use crate::error::{Error, Result};
use crate::logging::{DiagnosticSink, LogSink};
use crate::models::did::{base_document, generate_legal_entity_did, ServiceEndpoint, VerificationRelationship};
use crate::models::token::ScopedAccessToken;
use crate::models::transaction::UnsignedTransaction;
use crate::services::attestation::{AttestationRequest, AttestationSource};
use crate::services::token_exchange::{AccessTokenSource, HolderContext, INVITE_SCOPE, WRITE_SCOPE};
use crate::utils::interrupt::Interrupt;
use crate::wallet::credential_storage::CredentialStorage;
use crate::wallet::key_management::{DidKeySet, KeyMaterialProvisioner};

/// Workflow states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnboardingStep {
    ProvisionKeys,
    ObtainAttestation,
    GetInviteScopeToken,
    InsertDidDocument,
    SignAndSubmit,
    WaitAnchor,
    GetWriteScopeToken,
    AddVerificationMethod,
    AddAssertionRelationship,
    AddAuthenticationRelationship,
    AddService,
    Done,
    Failed,
}

impl fmt::Display for OnboardingStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Current state plus every state entered so far.
#[derive(Debug, Clone)]
pub struct OnboardingMachine {
    current: OnboardingStep,
    history: Vec<OnboardingStep>,
    failure: Option<String>,
}

impl OnboardingMachine {
    pub fn new() -> Self {
        Self {
            current: OnboardingStep::ProvisionKeys,
            history: vec![OnboardingStep::ProvisionKeys],
            failure: None,
        }
    }

    pub fn current(&self) -> OnboardingStep {
        self.current
    }

    pub fn history(&self) -> &[OnboardingStep] {
        &self.history
    }

    /// Reason recorded by [`fail`](Self::fail).
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    fn is_terminal(&self) -> bool {
        matches!(self.current, OnboardingStep::Done | OnboardingStep::Failed)
    }

    /// Moves to `next`. Terminal states are never left.
    pub fn advance(&mut self, next: OnboardingStep) {
        if self.is_terminal() || self.current == next {
            return;
        }
        self.current = next;
        self.history.push(next);
    }

    /// Enters `Failed`; returns the step that failed.
    pub fn fail(&mut self, reason: String) -> OnboardingStep {
        let step = self.current;
        if !self.is_terminal() {
            self.failure = Some(reason);
            self.current = OnboardingStep::Failed;
            self.history.push(OnboardingStep::Failed);
        }
        step
    }
}

impl Default for OnboardingMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything one registration needs from its caller.
#[derive(Clone)]
pub struct OnboardingRequest {
    /// DID to register; minted when `None`.
    pub did: Option<String>,
    /// Imported secp256k1 controller key.
    pub controller_key: Option<Vec<u8>>,
    /// Imported secp256r1 authentication key.
    pub authentication_key: Option<Vec<u8>>,
    pub attestation: AttestationRequest,
    pub services: Vec<ServiceEndpoint>,
    /// Validity of verification methods and relationships, in years.
    pub validity_years: i64,
    /// Fail instead of continuing when a write never becomes readable.
    pub require_anchoring: bool,
}

impl fmt::Debug for OnboardingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnboardingRequest")
            .field("did", &self.did)
            .field("controller_key", &self.controller_key.as_ref().map(|_| "<imported>"))
            .field("authentication_key", &self.authentication_key.as_ref().map(|_| "<imported>"))
            .field("attestation", &self.attestation)
            .field("services", &self.services)
            .field("validity_years", &self.validity_years)
            .field("require_anchoring", &self.require_anchoring)
            .finish()
    }
}

/// A transaction accepted by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedTransaction {
    /// Write step that produced it.
    pub step: OnboardingStep,
    pub tx_hash: String,
}

/// A completed registration.
#[derive(Debug, Clone)]
pub struct OnboardingOutcome {
    pub did: String,
    pub keys: DidKeySet,
    pub transactions: Vec<SubmittedTransaction>,
    pub anchor_waits: Vec<AnchorPollResult>,
    pub history: Vec<OnboardingStep>,
}

/// A registration stopped by the first failing step.
#[derive(Debug, thiserror::Error)]
#[error("onboarding failed at {step}: {source}")]
pub struct OnboardingError {
    pub step: OnboardingStep,
    #[source]
    pub source: Error,
    pub history: Vec<OnboardingStep>,
    /// Transactions the registry already accepted; they stay on the ledger.
    pub submitted: Vec<SubmittedTransaction>,
}

/// Mutable bookkeeping of one `run`.
struct Progress {
    machine: OnboardingMachine,
    submitted: Vec<SubmittedTransaction>,
    anchor_waits: Vec<AnchorPollResult>,
    sink: Arc<dyn DiagnosticSink>,
}

impl Progress {
    fn enter(&mut self, step: OnboardingStep) {
        self.machine.advance(step);
        self.sink.record(Level::Info, &format!("entering {step}"));
    }
}

/// Runs legal-entity registrations against one registry.
///
/// Holds no per-registration state, so one instance can serve concurrent
/// registrations from separate tasks.
pub struct DidRegistrationOrchestrator {
    registry: DidRegistry,
    reader: Arc<dyn DidDocumentSource>,
    tokens: Arc<dyn AccessTokenSource>,
    attestation: Arc<dyn AttestationSource>,
    anchor: AnchorWaiter,
    sink: Arc<dyn DiagnosticSink>,
}

impl DidRegistrationOrchestrator {
    pub fn new(
        rpc: Arc<dyn RegistryRpc>,
        reader: Arc<dyn DidDocumentSource>,
        tokens: Arc<dyn AccessTokenSource>,
        attestation: Arc<dyn AttestationSource>,
        anchor: AnchorWaiter,
    ) -> Self {
        Self {
            registry: DidRegistry::new(rpc),
            reader,
            tokens,
            attestation,
            anchor,
            sink: Arc::new(LogSink),
        }
    }

    /// Replaces the default [`LogSink`].
    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Registers one DID.
    ///
    /// # Errors
    /// [`OnboardingError`] naming the failed step, its cause, the states
    /// visited and the transactions already submitted.
    pub async fn run(
        &self,
        request: &OnboardingRequest,
        interrupt: &Interrupt,
    ) -> std::result::Result<OnboardingOutcome, OnboardingError> {
        let mut progress = Progress {
            machine: OnboardingMachine::new(),
            submitted: Vec::new(),
            anchor_waits: Vec::new(),
            sink: self.sink.clone(),
        };
        self.sink.record(Level::Info, "entering ProvisionKeys");

        match self.execute(request, interrupt, &mut progress).await {
            Ok((did, keys)) => {
                progress.enter(OnboardingStep::Done);
                self.sink.record(
                    Level::Info,
                    &format!("{did} onboarded with {} transaction(s)", progress.submitted.len()),
                );
                Ok(OnboardingOutcome {
                    did,
                    keys,
                    transactions: progress.submitted,
                    anchor_waits: progress.anchor_waits,
                    history: progress.machine.history().to_vec(),
                })
            }
            Err(source) => {
                let step = progress.machine.fail(source.to_string());
                self.sink
                    .record(Level::Error, &format!("onboarding failed at {step}: {source}"));
                Err(OnboardingError {
                    step,
                    source,
                    history: progress.machine.history().to_vec(),
                    submitted: progress.submitted,
                })
            }
        }
    }

    async fn execute(
        &self,
        request: &OnboardingRequest,
        interrupt: &Interrupt,
        progress: &mut Progress,
    ) -> Result<(String, DidKeySet)> {
        interrupt.check()?;
        let validity = Validity::from_now(request.validity_years)?;
        let keys = KeyMaterialProvisioner::provision_set(
            request.controller_key.as_deref(),
            request.authentication_key.as_deref(),
        )?;
        let did = match &request.did {
            Some(did) => did.clone(),
            None => generate_legal_entity_did()?,
        };
        let mut credentials = CredentialStorage::new();

        progress.enter(OnboardingStep::ObtainAttestation);
        let attestation = interrupt
            .guard(self.attestation.obtain(&request.attestation, &did, &keys, &credentials))
            .await?;
        if attestation.holder != did {
            self.sink.record(
                Level::Warn,
                &format!("attestation was issued to {} rather than {did}", attestation.holder),
            );
        }
        credentials.store_credential(attestation);

        progress.enter(OnboardingStep::GetInviteScopeToken);
        let invite = self
            .token(INVITE_SCOPE, &did, &keys, &mut credentials, interrupt)
            .await?;

        progress.enter(OnboardingStep::InsertDidDocument);
        let unsigned = interrupt
            .guard(self.registry.insert_did_document(
                &invite.access_token,
                &did,
                &keys.controller,
                &base_document(),
                validity,
            ))
            .await?;
        self.sign_and_submit(OnboardingStep::InsertDidDocument, &invite, &unsigned, &keys, interrupt, progress)
            .await?;
        self.wait_anchor(&did, None, request.require_anchoring, interrupt, progress)
            .await?;

        progress.enter(OnboardingStep::GetWriteScopeToken);
        let write = self
            .token(WRITE_SCOPE, &did, &keys, &mut credentials, interrupt)
            .await?;

        progress.enter(OnboardingStep::AddVerificationMethod);
        let unsigned = interrupt
            .guard(self.registry.add_verification_method(
                &write.access_token,
                &did,
                &keys.controller,
                &keys.authentication,
            ))
            .await?;
        self.sign_and_submit(OnboardingStep::AddVerificationMethod, &write, &unsigned, &keys, interrupt, progress)
            .await?;
        let method_id = keys.authentication.kid(&did);
        self.wait_anchor(&did, Some(&method_id), request.require_anchoring, interrupt, progress)
            .await?;

        for (step, relationship) in [
            (OnboardingStep::AddAssertionRelationship, VerificationRelationship::AssertionMethod),
            (OnboardingStep::AddAuthenticationRelationship, VerificationRelationship::Authentication),
        ] {
            progress.enter(step);
            let unsigned = interrupt
                .guard(self.registry.add_verification_relationship(
                    &write.access_token,
                    &did,
                    &keys.controller,
                    relationship,
                    keys.authentication.jwk_thumbprint(),
                    validity,
                ))
                .await?;
            self.sign_and_submit(step, &write, &unsigned, &keys, interrupt, progress)
                .await?;
        }

        for service in &request.services {
            progress.enter(OnboardingStep::AddService);
            let unsigned = interrupt
                .guard(self.registry.add_service(&write.access_token, &did, &keys.controller, service))
                .await?;
            self.sign_and_submit(OnboardingStep::AddService, &write, &unsigned, &keys, interrupt, progress)
                .await?;
        }

        Ok((did, keys))
    }

    async fn token(
        &self,
        scope: &str,
        did: &str,
        keys: &DidKeySet,
        credentials: &mut CredentialStorage,
        interrupt: &Interrupt,
    ) -> Result<ScopedAccessToken> {
        let mut holder = HolderContext { did, keys, credentials };
        interrupt
            .guard(self.tokens.access_token(scope, &mut holder))
            .await
    }

    async fn sign_and_submit(
        &self,
        for_step: OnboardingStep,
        token: &ScopedAccessToken,
        unsigned: &UnsignedTransaction,
        keys: &DidKeySet,
        interrupt: &Interrupt,
        progress: &mut Progress,
    ) -> Result<()> {
        progress.enter(OnboardingStep::SignAndSubmit);
        let signed = TransactionSigner::sign(unsigned, &keys.controller)?;
        let tx_hash = interrupt
            .guard(self.registry.send_signed_transaction(&token.access_token, &signed))
            .await?;
        self.sink
            .record(Level::Debug, &format!("{for_step} accepted as {tx_hash}"));
        progress.submitted.push(SubmittedTransaction {
            step: for_step,
            tx_hash,
        });
        Ok(())
    }

    async fn wait_anchor(
        &self,
        did: &str,
        target: Option<&str>,
        require_anchoring: bool,
        interrupt: &Interrupt,
        progress: &mut Progress,
    ) -> Result<()> {
        progress.enter(OnboardingStep::WaitAnchor);
        let result = self
            .anchor
            .wait(self.reader.as_ref(), did, target, interrupt)
            .await?;
        if result.is_timeout() {
            let waited_ms = u64::try_from(result.total_wait_time.as_millis()).unwrap_or(u64::MAX);
            if require_anchoring {
                return Err(Error::AnchorTimeout {
                    did: did.to_string(),
                    waited_ms,
                });
            }
            self.sink.record(
                Level::Warn,
                &format!("{did} not readable after {waited_ms}ms; continuing"),
            );
        }
        progress.anchor_waits.push(result);
        Ok(())
    }
}
