//! Proof session identity and lifecycle.

use crate::error::{Error, Result};
use crate::types::{Party, Protocol};
use log::debug;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;

const SESSION_ID_PREFIX: &str = "session_";
const SESSION_ID_RANDOM_BYTES: usize = 16;

/// Opaque per-attempt identifier shared by every request of one proof session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Fresh identifier with 128 bits from the OS random source.
    pub fn generate() -> Self {
        let mut bytes = [0u8; SESSION_ID_RANDOM_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(format!("{SESSION_ID_PREFIX}{}", hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Orchestration state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initiated,
    Running,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed
                | SessionState::Failed
                | SessionState::TimedOut
                | SessionState::Cancelled
        )
    }

    fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Initiated, Running) => true,
            (Initiated | Running, Completed | Failed | TimedOut | Cancelled) => true,
            _ => false,
        }
    }
}

/// One proof attempt. Discarded once terminal; never re-polled.
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    protocol: Protocol,
    parties: Vec<Party>,
    state: SessionState,
}

impl Session {
    pub fn new(protocol: Protocol, parties: Vec<Party>) -> Self {
        let id = SessionId::generate();
        debug!("Created session {} ({}, {} parties)", id, protocol, parties.len());
        Self {
            id,
            protocol,
            parties,
            state: SessionState::Initiated,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn parties(&self) -> &[Party] {
        &self.parties
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Moves to `next`, rejecting transitions out of a terminal state.
    pub fn transition(&mut self, next: SessionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::Protocol(format!(
                "session {} cannot move from {:?} to {:?}",
                self.id, self.state, next
            )));
        }
        debug!("Session {}: {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
        Ok(())
    }

    /// Records the terminal state matching `err` and hands the error back.
    pub(crate) fn fail_with(&mut self, err: Error) -> Error {
        let next = match err {
            Error::Timeout { .. } => SessionState::TimedOut,
            Error::Cancelled => SessionState::Cancelled,
            _ => SessionState::Failed,
        };
        if !self.state.is_terminal() {
            debug!("Session {}: {:?} -> {:?} ({})", self.id, self.state, next, err);
            self.state = next;
        }
        err
    }
}
