//! Drives one proof attempt from private inputs to a finished proof.
//!
//! Every attempt runs in a fresh [`Session`]:
//!
//! 1. each private input is secret-shared and the shares are fanned out to
//!    the parties under the session id;
//! 2. with a proof service configured, a single `prove` call returns the
//!    proof (delegated strategy);
//! 3. otherwise every party receives an init request carrying only the
//!    public inputs, and the first party is polled until it reports a
//!    terminal state or the attempt budget runs out (direct strategy).
//!
//! Waiting goes through an injectable [`Clock`], and a [`CancelToken`] stops
//! the session at the next suspension point.

use crate::config::Config;
use crate::distribution::distribute;
use crate::error::{Error, Result};
use crate::field::FieldElement;
use crate::session::{Session, SessionState};
use crate::sharing::{self, REP3_PARTY_COUNT};
use crate::transport::{
    HttpProofService, HttpTransport, InitRequest, MpcState, PartyTransport, ProofService,
    ProveRequest, StatusResponse,
};
use crate::types::{validate_parties, Party, ProofResult, Protocol, PublicInputs};
use crate::vote::VoteWitness;
use anyhow::Context;
use async_trait::async_trait;
use futures::future::join_all;
use log::{debug, info, warn};
use rand::rngs::OsRng;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 60;
pub const DEFAULT_CIRCUIT: &str = "vote";

/// Source of delays between status polls.
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Wall-clock delays through the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Cloneable handle that aborts a running proof session.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called on any clone.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // the sender lives as long as `self`, so this only ends on cancellation
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// A proof service runs the MPC and answers with the proof.
    Delegated,
    /// This client initializes the parties and polls the coordinator.
    Direct,
}

pub struct ProofOrchestrator<T: PartyTransport, C: Clock = TokioClock> {
    transport: T,
    proof_service: Option<Box<dyn ProofService>>,
    clock: C,
    parties: Vec<Party>,
    protocol: Protocol,
    circuit: String,
    poll: PollPolicy,
}

impl ProofOrchestrator<HttpTransport, TokioClock> {
    /// HTTP orchestrator for a validated configuration.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        config.validate()?;
        let timeout = Duration::from_secs(config.mpc.request_timeout_secs);
        let transport = HttpTransport::new(&config.parties, &config.mpc.api_base_path, timeout)
            .context("Failed to build party transport")?;

        let mut orchestrator = Self::new(transport, config.parties.clone(), config.mpc.protocol)?
            .with_circuit(config.mpc.circuit.clone())
            .with_poll_policy(config.polling.policy());

        if let Some(service) = &config.proof_service {
            let client = HttpProofService::new(
                &service.address,
                &config.mpc.api_base_path,
                service.resolve_api_key(),
                timeout,
            )
            .context("Failed to build proof service client")?;
            orchestrator = orchestrator.with_proof_service(client);
        }

        Ok(orchestrator)
    }
}

impl<T: PartyTransport> ProofOrchestrator<T, TokioClock> {
    pub fn new(transport: T, parties: Vec<Party>, protocol: Protocol) -> Result<Self> {
        validate_parties(&parties)?;
        if protocol == Protocol::Rep3 && parties.len() != REP3_PARTY_COUNT {
            return Err(Error::validation(format!(
                "rep3 requires exactly {REP3_PARTY_COUNT} parties, got {}",
                parties.len()
            )));
        }
        Ok(Self {
            transport,
            proof_service: None,
            clock: TokioClock,
            parties,
            protocol,
            circuit: DEFAULT_CIRCUIT.to_string(),
            poll: PollPolicy::default(),
        })
    }
}

impl<T: PartyTransport, C: Clock> ProofOrchestrator<T, C> {
    pub fn with_clock<C2: Clock>(self, clock: C2) -> ProofOrchestrator<T, C2> {
        ProofOrchestrator {
            transport: self.transport,
            proof_service: self.proof_service,
            clock,
            parties: self.parties,
            protocol: self.protocol,
            circuit: self.circuit,
            poll: self.poll,
        }
    }

    pub fn with_proof_service(mut self, service: impl ProofService + 'static) -> Self {
        self.proof_service = Some(Box::new(service));
        self
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_circuit(mut self, circuit: impl Into<String>) -> Self {
        self.circuit = circuit.into();
        self
    }

    pub fn strategy(&self) -> Strategy {
        if self.proof_service.is_some() {
            Strategy::Delegated
        } else {
            Strategy::Direct
        }
    }

    pub fn parties(&self) -> &[Party] {
        &self.parties
    }

    /// Proves a vote: shares the witness's private fields and runs a new session.
    pub async fn generate_proof(
        &self,
        witness: &VoteWitness,
        cancel: &CancelToken,
    ) -> Result<ProofResult> {
        witness.validate()?;
        self.prove(&witness.private_inputs(), witness.public_inputs(), cancel)
            .await
    }

    /// Runs a fresh session for arbitrary named private inputs.
    pub async fn prove(
        &self,
        private_inputs: &BTreeMap<String, FieldElement>,
        public_inputs: PublicInputs,
        cancel: &CancelToken,
    ) -> Result<ProofResult> {
        let mut session = self.new_session();
        self.run_session(&mut session, private_inputs, public_inputs, cancel)
            .await
    }

    pub fn new_session(&self) -> Session {
        Session::new(self.protocol, self.parties.clone())
    }

    /// Drives `session` to a terminal state.
    ///
    /// On error the session is left in `Failed`, `TimedOut` or `Cancelled`
    /// and must not be reused.
    pub async fn run_session(
        &self,
        session: &mut Session,
        private_inputs: &BTreeMap<String, FieldElement>,
        public_inputs: PublicInputs,
        cancel: &CancelToken,
    ) -> Result<ProofResult> {
        if session.state() != SessionState::Initiated {
            return Err(Error::Protocol(format!(
                "session {} was already used",
                session.id()
            )));
        }
        info!(
            "Starting {:?} proof session {} ({}, {} parties)",
            self.strategy(),
            session.id(),
            self.protocol,
            self.parties.len()
        );

        match self
            .drive(session, private_inputs, public_inputs, cancel)
            .await
        {
            Ok(result) => {
                session.transition(SessionState::Completed)?;
                info!("Session {} completed", session.id());
                Ok(result)
            }
            Err(e) => {
                warn!("Session {} ended without a proof: {}", session.id(), e);
                Err(session.fail_with(e))
            }
        }
    }

    async fn drive(
        &self,
        session: &mut Session,
        private_inputs: &BTreeMap<String, FieldElement>,
        public_inputs: PublicInputs,
        cancel: &CancelToken,
    ) -> Result<ProofResult> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let shares =
            sharing::share_inputs(private_inputs, self.protocol, &self.parties, &mut OsRng)?;

        tokio::select! {
            res = distribute(&self.transport, session.id(), &shares, &self.parties) => res?,
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        }

        match &self.proof_service {
            Some(service) => {
                self.run_delegated(service.as_ref(), session, public_inputs, cancel)
                    .await
            }
            None => self.run_direct(session, public_inputs, cancel).await,
        }
    }

    async fn run_delegated(
        &self,
        service: &dyn ProofService,
        session: &mut Session,
        public_inputs: PublicInputs,
        cancel: &CancelToken,
    ) -> Result<ProofResult> {
        session.transition(SessionState::Running)?;
        let request = ProveRequest {
            circuit: self.circuit.clone(),
            public_inputs,
            session_id: session.id().clone(),
            parties: self.parties.iter().map(|p| p.id).collect(),
        };

        let result = tokio::select! {
            res = service.prove(&request) => res?,
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        };
        result.validate()?;
        Ok(result)
    }

    async fn run_direct(
        &self,
        session: &mut Session,
        public_inputs: PublicInputs,
        cancel: &CancelToken,
    ) -> Result<ProofResult> {
        let request = InitRequest {
            session_id: session.id().clone(),
            protocol: self.protocol,
            circuit: self.circuit.clone(),
            public_inputs,
        };

        let inits = self
            .parties
            .iter()
            .map(|party| self.transport.init_session(party, &request));
        let results = tokio::select! {
            results = join_all(inits) => results,
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        };
        let mut first_error = None;
        for (party, result) in self.parties.iter().zip(results) {
            if let Err(e) = result {
                warn!("Session init on party {} failed: {}", party.id, e);
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        session.transition(SessionState::Running)?;
        self.poll_coordinator(session, cancel).await
    }

    async fn poll_coordinator(&self, session: &Session, cancel: &CancelToken) -> Result<ProofResult> {
        let coordinator = &self.parties[0];
        let max_attempts = self.poll.max_attempts;

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let status = tokio::select! {
                status = self.transport.session_status(coordinator, session.id()) => status,
                _ = cancel.cancelled() => return Err(Error::Cancelled),
            };

            match status {
                Ok(StatusResponse {
                    state: MpcState::Running,
                    ..
                }) => {
                    debug!(
                        "Session {} still running (attempt {}/{})",
                        session.id(),
                        attempt,
                        max_attempts
                    );
                }
                Ok(StatusResponse {
                    state: MpcState::Completed,
                    result,
                    ..
                }) => {
                    let result = result.ok_or_else(|| {
                        Error::Protocol(format!(
                            "party {} reported completion without a proof",
                            coordinator.id
                        ))
                    })?;
                    result.validate()?;
                    return Ok(result);
                }
                Ok(StatusResponse {
                    state: MpcState::Failed,
                    error,
                    ..
                }) => {
                    return Err(Error::Protocol(format!(
                        "MPC failed: {}",
                        error.as_deref().unwrap_or("no error detail")
                    )));
                }
                Err(Error::Transport(msg)) => {
                    warn!(
                        "Status poll {}/{} for session {} failed: {}",
                        attempt,
                        max_attempts,
                        session.id(),
                        msg
                    );
                }
                Err(e) => return Err(e),
            }

            if attempt < max_attempts {
                tokio::select! {
                    _ = self.clock.sleep(self.poll.interval) => {}
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                }
            }
        }

        Err(Error::Timeout {
            attempts: max_attempts,
        })
    }
}
