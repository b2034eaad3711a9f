//! Wire protocol to the computing parties and the delegated proof service.
//!
//! Endpoints, relative to `{endpoint}{api_base_path}`:
//! - `POST /shares`                 - deliver one party's shares for a session
//! - `POST /mpc/init`               - start the MPC session on a party
//! - `GET  /mpc/status/{sessionId}` - poll session state
//! - `POST /prove`                  - delegated proof (proof service only)

use crate::error::{Error, Result};
use crate::session::SessionId;
use crate::types::{Party, PartyId, ProofResult, Protocol, PublicInputs};
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Path prefix the MPC nodes and proof service expose their API under.
pub const DEFAULT_API_BASE_PATH: &str = "/api/v1";

pub const SESSION_HEADER: &str = "X-Session-ID";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharesRequest {
    pub session_id: SessionId,
    /// Input name to decimal share value.
    pub shares: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitRequest {
    pub session_id: SessionId,
    pub protocol: Protocol,
    pub circuit: String,
    pub public_inputs: PublicInputs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MpcState {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub state: MpcState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ProofResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProveRequest {
    pub circuit: String,
    pub public_inputs: PublicInputs,
    pub session_id: SessionId,
    pub parties: Vec<PartyId>,
}

/// Requests issued to a single computing party.
#[async_trait]
pub trait PartyTransport: Send + Sync {
    async fn send_shares(&self, party: &Party, request: &SharesRequest) -> Result<()>;

    async fn init_session(&self, party: &Party, request: &InitRequest) -> Result<()>;

    /// `Err(Transport)` for network failures and non-success statuses,
    /// `Err(Protocol)` for a body that is not a valid status payload.
    async fn session_status(&self, party: &Party, session_id: &SessionId)
        -> Result<StatusResponse>;
}

/// Service that runs the whole MPC proof on the caller's behalf.
#[async_trait]
pub trait ProofService: Send + Sync {
    async fn prove(&self, request: &ProveRequest) -> Result<ProofResult>;
}

fn join_url(endpoint: &str, base_path: &str, path: &str) -> String {
    format!(
        "{}{}{}",
        endpoint.trim_end_matches('/'),
        base_path.trim_end_matches('/'),
        path
    )
}

fn build_client(certificates: &[std::path::PathBuf], timeout: Duration) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().timeout(timeout);
    for path in certificates {
        let pem = std::fs::read(path).map_err(|e| {
            Error::Transport(format!(
                "failed to read TLS certificate {}: {e}",
                path.display()
            ))
        })?;
        let cert = reqwest::Certificate::from_pem(&pem)?;
        builder = builder.add_root_certificate(cert);
    }
    Ok(builder.build()?)
}

async fn expect_success(party: &Party, action: &str, resp: reqwest::Response) -> Result<()> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let body = resp.text().await.unwrap_or_default();
    Err(Error::Transport(format!(
        "party {} rejected {action}: HTTP {status}: {body}",
        party.id
    )))
}

/// HTTP/JSON transport to the parties.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    base_path: String,
}

impl HttpTransport {
    /// Builds a client trusting each party's configured CA certificate.
    pub fn new(parties: &[Party], base_path: impl Into<String>, timeout: Duration) -> Result<Self> {
        let certs: Vec<_> = parties.iter().filter_map(|p| p.tls_cert.clone()).collect();
        Ok(Self {
            http: build_client(&certs, timeout)?,
            base_path: base_path.into(),
        })
    }

    fn url(&self, party: &Party, path: &str) -> String {
        join_url(&party.endpoint, &self.base_path, path)
    }
}

#[async_trait]
impl PartyTransport for HttpTransport {
    async fn send_shares(&self, party: &Party, request: &SharesRequest) -> Result<()> {
        let url = self.url(party, "/shares");
        debug!("POST {} ({} shares)", url, request.shares.len());
        let resp = self
            .http
            .post(url)
            .header(SESSION_HEADER, request.session_id.as_str())
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("party {}: {e}", party.id)))?;
        expect_success(party, "shares", resp).await
    }

    async fn init_session(&self, party: &Party, request: &InitRequest) -> Result<()> {
        let url = self.url(party, "/mpc/init");
        debug!("POST {}", url);
        let resp = self
            .http
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("party {}: {e}", party.id)))?;
        expect_success(party, "session init", resp).await
    }

    async fn session_status(
        &self,
        party: &Party,
        session_id: &SessionId,
    ) -> Result<StatusResponse> {
        let url = self.url(party, &format!("/mpc/status/{session_id}"));
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("party {}: {e}", party.id)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Transport(format!(
                "party {} status request returned HTTP {status}",
                party.id
            )));
        }
        let body = resp
            .bytes()
            .await
            .map_err(|e| Error::Transport(format!("party {}: {e}", party.id)))?;
        serde_json::from_slice(&body).map_err(|e| {
            Error::Protocol(format!("party {} sent a malformed status: {e}", party.id))
        })
    }
}

/// Delegated proof generation over HTTP with bearer authentication.
#[derive(Debug, Clone)]
pub struct HttpProofService {
    http: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl HttpProofService {
    pub fn new(
        address: &str,
        base_path: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            http: build_client(&[], timeout)?,
            url: join_url(address, base_path, "/prove"),
            api_key,
        })
    }
}

#[async_trait]
impl ProofService for HttpProofService {
    async fn prove(&self, request: &ProveRequest) -> Result<ProofResult> {
        debug!("POST {} (session {})", self.url, request.session_id);
        let mut builder = self.http.post(&self.url).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let resp = builder
            .send()
            .await
            .map_err(|e| Error::Transport(format!("proof service: {e}")))?;

        if !resp.status().is_success() {
            let text = resp
                .text()
                .await
                .map_err(|e| Error::Transport(format!("proof service: {e}")))?;
            return Err(Error::Protocol(format!("proof service error: {text}")));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| Error::Transport(format!("proof service: {e}")))?;
        serde_json::from_slice(&body)
            .map_err(|e| Error::Protocol(format!("proof service returned a malformed proof: {e}")))
    }
}
