//! Log files and artifact indexes on disk.
//!
//! Run: cargo test -p mtekit-harness --test structured_log_test

use mtekit_harness::structured_log::{
    ArtifactIndex, LogEmitter, LogLevel, sha256_hex, validate_log_file,
};

fn temp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("mtekit-harness-{}-{name}", std::process::id()))
}

#[test]
fn file_emitter_output_validates() {
    let path = temp_path("emit.jsonl");
    {
        let mut emitter = LogEmitter::to_file(&path, "mtekit", "file").unwrap();
        emitter.emit(LogLevel::Info, "start").unwrap();
        emitter.emit(LogLevel::Warn, "slow").unwrap();
        emitter.flush().unwrap();
    }
    let (lines, errors) = validate_log_file(&path).unwrap();
    assert_eq!(lines, 2);
    assert!(errors.is_empty(), "{errors:?}");
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn validate_file_reports_bad_line_numbers() {
    let path = temp_path("bad.jsonl");
    let good = r#"{"timestamp":"t","trace_id":"a::b::001","level":"info","event":"ok"}"#;
    std::fs::write(&path, format!("{good}\n\nnot json\n{good}\n")).unwrap();
    let (lines, errors) = validate_log_file(&path).unwrap();
    assert_eq!(lines, 3);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].line_number, 3);
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn artifact_index_hashes_files() {
    let path = temp_path("artifact.txt");
    std::fs::write(&path, b"abc").unwrap();
    let mut index = ArtifactIndex::new("run-7", "mtekit");
    index.add_file(&path, "report").unwrap();
    let entry = &index.artifacts[0];
    assert_eq!(
        entry.sha256,
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
    assert_eq!(entry.sha256, sha256_hex(b"abc"));
    assert_eq!(entry.size_bytes, Some(3));
    assert_eq!(entry.kind, "report");
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn artifact_index_missing_file_is_error() {
    let mut index = ArtifactIndex::new("run-8", "mtekit");
    assert!(index.add_file(&temp_path("missing"), "log").is_err());
    assert!(index.artifacts.is_empty());
}
