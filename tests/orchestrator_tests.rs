use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use zkp_mpc_vote::error::{Error, Result};
use zkp_mpc_vote::orchestrator::{Clock, PollPolicy, Strategy};
use zkp_mpc_vote::session::{SessionId, SessionState};
use zkp_mpc_vote::sharing::reconstruct_additive;
use zkp_mpc_vote::transport::{
    InitRequest, MpcState, PartyTransport, ProofService, ProveRequest, SharesRequest,
    StatusResponse,
};
use zkp_mpc_vote::types::{PublicInputs, Share};
use zkp_mpc_vote::{
    field::parse_field_element, CancelToken, CommitmentTree, FieldElement, Party, PoseidonHasher,
    ProofOrchestrator, ProofResult, Protocol, VoteWitness, VoterCredentials,
};

fn proof_result(tag: &str) -> ProofResult {
    serde_json::from_value(serde_json::json!({
        "proof": {
            "pi_a": [tag, "2", "1"],
            "pi_b": [["3", "4"], ["5", "6"], ["1", "0"]],
            "pi_c": ["7", "8", "1"],
            "protocol": "groth16",
            "curve": "bn128"
        },
        "publicSignals": ["11", "12"]
    }))
    .unwrap()
}

fn status(state: MpcState) -> Result<StatusResponse> {
    Ok(StatusResponse {
        state,
        result: None,
        error: None,
    })
}

/// Scripted party behaviour shared between the test and the orchestrator.
#[derive(Default)]
struct Script {
    statuses: VecDeque<Result<StatusResponse>>,
    fail_init_for: Option<u32>,
    cancel_on_poll: Option<(usize, CancelToken)>,
    shares: Vec<(u32, SharesRequest)>,
    inits: Vec<(u32, InitRequest)>,
    polls: Vec<(u32, SessionId)>,
}

#[derive(Clone, Default)]
struct StubTransport {
    script: Arc<Mutex<Script>>,
}

impl StubTransport {
    fn with_statuses(statuses: Vec<Result<StatusResponse>>) -> Self {
        let transport = Self::default();
        transport.script.lock().unwrap().statuses = statuses.into();
        transport
    }
}

#[async_trait]
impl PartyTransport for StubTransport {
    async fn send_shares(&self, party: &Party, request: &SharesRequest) -> Result<()> {
        self.script
            .lock()
            .unwrap()
            .shares
            .push((party.id, request.clone()));
        Ok(())
    }

    async fn init_session(&self, party: &Party, request: &InitRequest) -> Result<()> {
        let mut script = self.script.lock().unwrap();
        if script.fail_init_for == Some(party.id) {
            return Err(Error::Transport(format!("party {} refused init", party.id)));
        }
        script.inits.push((party.id, request.clone()));
        Ok(())
    }

    async fn session_status(&self, party: &Party, session_id: &SessionId) -> Result<StatusResponse> {
        let mut script = self.script.lock().unwrap();
        script.polls.push((party.id, session_id.clone()));
        if let Some((at, token)) = &script.cancel_on_poll {
            if script.polls.len() == *at {
                token.cancel();
            }
        }
        // an exhausted script keeps the session running forever
        script
            .statuses
            .pop_front()
            .unwrap_or_else(|| status(MpcState::Running))
    }
}

#[derive(Clone, Default)]
struct RecordingClock {
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

#[async_trait]
impl Clock for RecordingClock {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

struct StubProofService {
    response: Mutex<Option<Result<ProofResult>>>,
    requests: Arc<Mutex<Vec<ProveRequest>>>,
}

#[async_trait]
impl ProofService for StubProofService {
    async fn prove(&self, request: &ProveRequest) -> Result<ProofResult> {
        self.requests.lock().unwrap().push(request.clone());
        self.response
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Err(Error::Transport("no scripted response".into())))
    }
}

fn parties() -> Vec<Party> {
    (0..3)
        .map(|id| Party::new(id, format!("http://party{id}.test")))
        .collect()
}

fn private_inputs() -> BTreeMap<String, FieldElement> {
    let mut inputs = BTreeMap::new();
    inputs.insert("voterSecret".to_string(), FieldElement::from(12345u64));
    inputs.insert("voteChoice".to_string(), FieldElement::from(1u64));
    inputs
}

fn public_inputs() -> PublicInputs {
    PublicInputs {
        merkle_root: FieldElement::from(99u64),
        nullifier_hash: FieldElement::from(98u64),
    }
}

fn orchestrator(
    transport: StubTransport,
    clock: RecordingClock,
) -> ProofOrchestrator<StubTransport, RecordingClock> {
    ProofOrchestrator::new(transport, parties(), Protocol::Rep3)
        .unwrap()
        .with_clock(clock)
}

#[tokio::test]
async fn test_direct_completes_on_third_poll() {
    let expected = proof_result("1");
    let transport = StubTransport::with_statuses(vec![
        status(MpcState::Running),
        status(MpcState::Running),
        Ok(StatusResponse {
            state: MpcState::Completed,
            result: Some(expected.clone()),
            error: None,
        }),
    ]);
    let clock = RecordingClock::default();
    let orchestrator = orchestrator(transport.clone(), clock.clone());
    assert_eq!(orchestrator.strategy(), Strategy::Direct);

    let result = orchestrator
        .prove(&private_inputs(), public_inputs(), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(result, expected);
    let script = transport.script.lock().unwrap();
    assert_eq!(script.polls.len(), 3);
    assert!(script.polls.iter().all(|(party, _)| *party == 0));
    assert_eq!(
        *clock.sleeps.lock().unwrap(),
        vec![Duration::from_millis(1000); 2]
    );
}

#[tokio::test]
async fn test_direct_times_out_after_sixty_polls() {
    let transport = StubTransport::default();
    let clock = RecordingClock::default();
    let orchestrator = orchestrator(transport.clone(), clock.clone());

    let err = orchestrator
        .prove(&private_inputs(), public_inputs(), &CancelToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Timeout { attempts: 60 }));
    assert_eq!(transport.script.lock().unwrap().polls.len(), 60);
    assert_eq!(clock.sleeps.lock().unwrap().len(), 59);
}

#[tokio::test]
async fn test_direct_failure_carries_party_error() {
    let transport = StubTransport::with_statuses(vec![Ok(StatusResponse {
        state: MpcState::Failed,
        result: None,
        error: Some("party 2 aborted".into()),
    })]);
    let orchestrator = orchestrator(transport, RecordingClock::default());

    let err = orchestrator
        .prove(&private_inputs(), public_inputs(), &CancelToken::new())
        .await
        .unwrap_err();

    match err {
        Error::Protocol(msg) => assert!(msg.contains("party 2 aborted")),
        other => panic!("expected protocol error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_completed_without_result_is_protocol_error() {
    let transport = StubTransport::with_statuses(vec![status(MpcState::Completed)]);
    let orchestrator = orchestrator(transport, RecordingClock::default());

    let err = orchestrator
        .prove(&private_inputs(), public_inputs(), &CancelToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Protocol(_)));
}

#[tokio::test]
async fn test_transport_errors_while_polling_count_as_attempts() {
    let transport = StubTransport::with_statuses(vec![
        Err(Error::Transport("connection reset".into())),
        Ok(StatusResponse {
            state: MpcState::Completed,
            result: Some(proof_result("1")),
            error: None,
        }),
    ]);
    let orchestrator = orchestrator(transport.clone(), RecordingClock::default())
        .with_poll_policy(PollPolicy {
            interval: Duration::from_millis(10),
            max_attempts: 2,
        });

    orchestrator
        .prove(&private_inputs(), public_inputs(), &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(transport.script.lock().unwrap().polls.len(), 2);
}

#[tokio::test]
async fn test_malformed_status_aborts_polling() {
    let transport = StubTransport::with_statuses(vec![Err(Error::Protocol(
        "party 0 sent a malformed status".into(),
    ))]);
    let orchestrator = orchestrator(transport.clone(), RecordingClock::default());

    let err = orchestrator
        .prove(&private_inputs(), public_inputs(), &CancelToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Protocol(_)));
    assert_eq!(transport.script.lock().unwrap().polls.len(), 1);
}

#[tokio::test]
async fn test_direct_sends_shares_and_public_inits() {
    let transport = StubTransport::with_statuses(vec![Ok(StatusResponse {
        state: MpcState::Completed,
        result: Some(proof_result("1")),
        error: None,
    })]);
    let orchestrator = orchestrator(transport.clone(), RecordingClock::default());

    orchestrator
        .prove(&private_inputs(), public_inputs(), &CancelToken::new())
        .await
        .unwrap();

    let script = transport.script.lock().unwrap();
    assert_eq!(script.shares.len(), 3);
    assert_eq!(script.inits.len(), 3);

    let session_id = script.shares[0].1.session_id.clone();
    assert!(script.shares.iter().all(|(_, r)| r.session_id == session_id));
    assert!(script.inits.iter().all(|(_, r)| r.session_id == session_id));
    assert_eq!(script.polls[0].1, session_id);

    // shares reconstruct to the secret; init requests carry public inputs only
    let secret_shares: Vec<Share> = script
        .shares
        .iter()
        .map(|(party_id, r)| Share {
            party_id: *party_id,
            value: parse_field_element(&r.shares["voterSecret"]).unwrap(),
        })
        .collect();
    assert_eq!(
        reconstruct_additive(&secret_shares).unwrap(),
        FieldElement::from(12345u64)
    );
    let init = serde_json::to_value(&script.inits[0].1).unwrap();
    let mut keys: Vec<&String> = init.as_object().unwrap().keys().collect();
    keys.sort();
    assert_eq!(keys, ["circuit", "protocol", "publicInputs", "sessionId"]);
    assert_eq!(init["publicInputs"]["merkleRoot"], "99");
}

#[tokio::test]
async fn test_init_failure_aborts_before_polling() {
    let transport = StubTransport::default();
    transport.script.lock().unwrap().fail_init_for = Some(2);
    let orchestrator = orchestrator(transport.clone(), RecordingClock::default());

    let err = orchestrator
        .prove(&private_inputs(), public_inputs(), &CancelToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Transport(ref m) if m.contains("party 2")));
    assert!(transport.script.lock().unwrap().polls.is_empty());
}

#[tokio::test]
async fn test_each_attempt_uses_a_fresh_session() {
    let transport = StubTransport::default();
    let orchestrator = orchestrator(transport.clone(), RecordingClock::default())
        .with_poll_policy(PollPolicy {
            interval: Duration::from_millis(1),
            max_attempts: 1,
        });

    for _ in 0..2 {
        let _ = orchestrator
            .prove(&private_inputs(), public_inputs(), &CancelToken::new())
            .await;
    }

    let script = transport.script.lock().unwrap();
    assert_eq!(script.polls.len(), 2);
    assert_ne!(script.polls[0].1, script.polls[1].1);
}

#[tokio::test]
async fn test_session_state_after_timeout() {
    let orchestrator = orchestrator(StubTransport::default(), RecordingClock::default())
        .with_poll_policy(PollPolicy {
            interval: Duration::from_millis(1),
            max_attempts: 3,
        });
    let mut session = orchestrator.new_session();

    let err = orchestrator
        .run_session(
            &mut session,
            &private_inputs(),
            public_inputs(),
            &CancelToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout { attempts: 3 }));
    assert_eq!(session.state(), SessionState::TimedOut);

    // a spent session is never re-polled
    let again = orchestrator
        .run_session(
            &mut session,
            &private_inputs(),
            public_inputs(),
            &CancelToken::new(),
        )
        .await;
    assert!(matches!(again, Err(Error::Protocol(_))));
}

#[tokio::test]
async fn test_cancellation_stops_polling() {
    let cancel = CancelToken::new();
    let transport = StubTransport::default();
    transport.script.lock().unwrap().cancel_on_poll = Some((3, cancel.clone()));
    let orchestrator = orchestrator(transport.clone(), RecordingClock::default());
    let mut session = orchestrator.new_session();

    let err = orchestrator
        .run_session(&mut session, &private_inputs(), public_inputs(), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled));
    assert_eq!(session.state(), SessionState::Cancelled);
    assert_eq!(transport.script.lock().unwrap().polls.len(), 3);
}

#[tokio::test]
async fn test_cancelled_before_start_sends_nothing() {
    let cancel = CancelToken::new();
    cancel.cancel();
    let transport = StubTransport::default();
    let orchestrator = orchestrator(transport.clone(), RecordingClock::default());

    let err = orchestrator
        .prove(&private_inputs(), public_inputs(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert!(transport.script.lock().unwrap().shares.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_default_clock_waits_between_polls() {
    let transport = StubTransport::with_statuses(vec![
        status(MpcState::Running),
        Ok(StatusResponse {
            state: MpcState::Completed,
            result: Some(proof_result("1")),
            error: None,
        }),
    ]);
    let orchestrator = ProofOrchestrator::new(transport, parties(), Protocol::Rep3).unwrap();

    let start = tokio::time::Instant::now();
    orchestrator
        .prove(&private_inputs(), public_inputs(), &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(start.elapsed(), Duration::from_millis(1000));
}

#[tokio::test]
async fn test_delegated_returns_service_result() {
    let expected = proof_result("42");
    let requests = Arc::new(Mutex::new(Vec::new()));
    let transport = StubTransport::default();
    let orchestrator = orchestrator(transport.clone(), RecordingClock::default())
        .with_proof_service(StubProofService {
            response: Mutex::new(Some(Ok(expected.clone()))),
            requests: requests.clone(),
        });
    assert_eq!(orchestrator.strategy(), Strategy::Delegated);

    let result = orchestrator
        .prove(&private_inputs(), public_inputs(), &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(result, expected);

    let requests = requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].parties, vec![0, 1, 2]);
    assert_eq!(requests[0].circuit, "vote");

    let script = transport.script.lock().unwrap();
    assert_eq!(script.shares.len(), 3);
    assert_eq!(requests[0].session_id, script.shares[0].1.session_id);
    assert!(script.inits.is_empty());
    assert!(script.polls.is_empty());
}

#[tokio::test]
async fn test_delegated_service_error_is_protocol_error() {
    let orchestrator = orchestrator(StubTransport::default(), RecordingClock::default())
        .with_proof_service(StubProofService {
            response: Mutex::new(Some(Err(Error::Protocol(
                "proof service error: invalid witness".into(),
            )))),
            requests: Arc::default(),
        });

    let err = orchestrator
        .prove(&private_inputs(), public_inputs(), &CancelToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Protocol(ref m) if m.contains("invalid witness")));
}

#[tokio::test]
async fn test_generate_proof_from_vote_witness() {
    let hasher = PoseidonHasher::new().unwrap();
    let voter = VoterCredentials::random(&mut rand::rngs::OsRng);
    let mut tree = CommitmentTree::new(&hasher, 8).unwrap();
    let index = tree.add_leaf(voter.commitment(&hasher)).unwrap();
    let proof = tree.proof(index).unwrap();
    let witness = VoteWitness::build(&hasher, &voter, 1, &proof, tree.root()).unwrap();

    let transport = StubTransport::with_statuses(vec![Ok(StatusResponse {
        state: MpcState::Completed,
        result: Some(proof_result("1")),
        error: None,
    })]);
    let orchestrator = orchestrator(transport.clone(), RecordingClock::default());

    orchestrator
        .generate_proof(&witness, &CancelToken::new())
        .await
        .unwrap();

    let script = transport.script.lock().unwrap();
    // secret, nullifier, choice plus 8 path elements and 8 path bits
    assert_eq!(script.shares[0].1.shares.len(), 3 + 8 + 8);
    assert_eq!(script.inits[0].1.public_inputs, witness.public_inputs());
}
