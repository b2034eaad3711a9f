//! Collaborative proof generation for private votes.
//!
//! A voter's witness is secret-shared across a fixed set of MPC parties so no
//! single machine ever holds it, and the parties jointly produce a Groth16
//! proof. Membership in the voter registry is proven against a fixed-depth
//! Poseidon commitment tree maintained by the client.
//!
//! # Components
//!
//! - [`CommitmentTree`]: append-only Merkle tree over voter commitments
//! - [`sharing`]: additive (rep3) and Shamir secret sharing over BN254
//! - [`ProofOrchestrator`]: session lifecycle, share fan-out and proof retrieval
//! - [`VoteWitness`]: circuit witness built from credentials and a tree proof
//! - [`VoteCalldata`]: proof and public values in the verifier contract's layout
//!
//! # Example
//!
//! ```no_run
//! use zkp_mpc_vote::{CommitmentTree, PoseidonHasher, VoterCredentials, VoteWitness};
//!
//! let hasher = PoseidonHasher::new().unwrap();
//! let voter = VoterCredentials::random(&mut rand::rngs::OsRng);
//! let mut tree = CommitmentTree::new(&hasher, 20).unwrap();
//! let index = tree.add_leaf(voter.commitment(&hasher)).unwrap();
//! let proof = tree.proof(index).unwrap();
//! let witness = VoteWitness::build(&hasher, &voter, 1, &proof, tree.root()).unwrap();
//! ```

pub mod config;
pub mod distribution;
pub mod error;
pub mod field;
pub mod hash;
pub mod merkle;
pub mod orchestrator;
pub mod session;
pub mod sharing;
pub mod transport;
pub mod types;
pub mod vote;


pub use config::Config;
pub use error::{Error, Result};
pub use field::FieldElement;
pub use hash::{HashEngine, PoseidonHasher};
pub use merkle::{CommitmentTree, MerkleProof};
pub use orchestrator::{CancelToken, ProofOrchestrator};
pub use types::{Party, ProofResult, Protocol};
pub use vote::{VoteCalldata, VoteWitness, VoterCredentials};
