use std::time::Duration;

use assert_matches::assert_matches;

use memoreasy::config::{Config, ConfigLoader};
use memoreasy::error::MemorError;

#[test]
fn explicit_config_file_overrides_defaults() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("memoreasy.json");
    std::fs::write(
        &path,
        r#"{
            "input": "export/memories_history.html",
            "output_dir": "out",
            "max_attempts": 5,
            "retry_delay_ms": 10,
            "tools": { "exiftool": "/opt/exiftool/exiftool" }
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(resolved.source.as_deref(), Some(path.as_path()));
    assert_eq!(resolved.output_dir.to_str(), Some("out"));
    assert_eq!(resolved.policy.max_attempts, 5);
    assert_eq!(resolved.policy.retry_delay, Duration::from_millis(10));
    assert_eq!(resolved.policy.chunk_size, 8192);
    assert_eq!(
        resolved.tools.exiftool.as_deref().and_then(|p| p.to_str()),
        Some("/opt/exiftool/exiftool")
    );
    assert!(resolved.tools.ffmpeg.is_none());
}

#[test]
fn missing_explicit_config_is_a_read_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");
    let err = ConfigLoader::resolve(path.to_str()).unwrap_err();
    assert_matches!(err, MemorError::ConfigRead(_));
}

#[test]
fn malformed_config_is_a_parse_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("bad.json");
    std::fs::write(&path, "{ \"max_attempts\": \"many\" }").unwrap();
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(MemorError::ConfigParse(_))
    );

    std::fs::write(&path, "{ \"retries\": 3 }").unwrap();
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(MemorError::ConfigParse(_))
    );
}

#[test]
fn zero_attempts_are_rejected() {
    let config = Config {
        max_attempts: Some(0),
        ..Config::default()
    };
    assert_matches!(
        ConfigLoader::resolve_config(config),
        Err(MemorError::ConfigParse(_))
    );
}
