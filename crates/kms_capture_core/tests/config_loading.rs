use kms_capture_core::{CaptureEngine, ConfigError, EngineConfig};
use std::path::PathBuf;

#[test]
fn load_reads_a_shared_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let vault = dir.path().join("vault");
    let config_path = dir.path().join("config.yaml");
    std::fs::write(
        &config_path,
        format!(
            "vault:\n  path: {}\n  capture_dir: inbox\n  media_dir: assets\nui:\n  theme: dark\n",
            vault.display()
        ),
    )
    .unwrap();

    let config = EngineConfig::load(&config_path).unwrap();
    assert_eq!(config.vault_path, vault);
    let engine = CaptureEngine::new(&config).unwrap();
    assert_eq!(engine.layout().capture_dir(), vault.join("inbox"));
    assert_eq!(engine.layout().media_link_base(), "../assets");
}

#[test]
fn missing_file_is_a_read_error() {
    let err = EngineConfig::load(&PathBuf::from("/definitely/not/here.yaml")).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}
