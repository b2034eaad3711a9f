use std::path::PathBuf;
use tempfile::TempDir;
use zkp_mpc_vote::config::{Config, ProofServiceConfig, PROOF_SERVICE_API_KEY_ENV};
use zkp_mpc_vote::{Party, ProofOrchestrator, Protocol};

fn sample_config() -> Config {
    Config {
        parties: (0..3)
            .map(|id| Party::new(id, format!("https://party{id}.example:50000")))
            .collect(),
        ..Config::default()
    }
}

#[test]
fn test_save_and_load_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("mpc.toml");

    let mut config = sample_config();
    config.mpc.protocol = Protocol::Shamir;
    config.tree.depth = 12;
    config.save_to_file(&path).unwrap();

    let loaded = Config::load_from_file(&path).unwrap();
    assert_eq!(loaded.parties, config.parties);
    assert_eq!(loaded.mpc.protocol, Protocol::Shamir);
    assert_eq!(loaded.tree.depth, 12);
    assert!(loaded.validate().is_ok());
}

#[test]
fn test_missing_file_falls_back_to_default() {
    let path = PathBuf::from("/nonexistent/mpc.toml");
    assert!(Config::load_from_file(&path).is_err());
    let config = Config::load_from_file_or_default(&path).unwrap();
    assert!(config.parties.is_empty());
    assert_eq!(config.polling.max_attempts, 60);
}

#[test]
fn test_broken_file_is_not_replaced_by_default() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mpc.toml");
    std::fs::write(&path, "[tree]\ndepth = 16\n[polling\n").unwrap();

    let err = Config::load_from_file_or_default(&path).unwrap_err();
    assert!(format!("{err:#}").contains("Failed to parse config file"));
}

#[test]
fn test_unparseable_file_reports_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "[mpc\nprotocol = ").unwrap();

    let err = Config::load_from_file(&path).unwrap_err();
    assert!(format!("{err:#}").contains("broken.toml"));
}

#[test]
fn test_unknown_protocol_rejected() {
    let toml = r#"
        [mpc]
        protocol = "spdz"
    "#;
    assert!(toml::from_str::<Config>(toml).is_err());
}

#[test]
fn test_orchestrator_from_config() {
    let mut config = sample_config();
    let direct = ProofOrchestrator::from_config(&config).unwrap();
    assert_eq!(direct.parties().len(), 3);
    assert_eq!(
        direct.strategy(),
        zkp_mpc_vote::orchestrator::Strategy::Direct
    );

    config.proof_service = Some(ProofServiceConfig {
        address: "https://prover.example".into(),
        api_key: Some("secret".into()),
    });
    let delegated = ProofOrchestrator::from_config(&config).unwrap();
    assert_eq!(
        delegated.strategy(),
        zkp_mpc_vote::orchestrator::Strategy::Delegated
    );

    config.parties.truncate(2);
    assert!(ProofOrchestrator::from_config(&config).is_err());
}

#[test]
fn test_api_key_from_environment() {
    let service = ProofServiceConfig {
        address: "https://prover.example".into(),
        api_key: None,
    };
    std::env::set_var(PROOF_SERVICE_API_KEY_ENV, "env-key");
    assert_eq!(service.resolve_api_key().as_deref(), Some("env-key"));
    std::env::remove_var(PROOF_SERVICE_API_KEY_ENV);
    assert_eq!(service.resolve_api_key(), None);
}
