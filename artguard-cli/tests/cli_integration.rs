//! CLI integration tests for artguard-cli.
//!
//! These run the actual binary and check outputs and exit codes. Gateway
//! commands are pointed at a closed local port so no server is needed.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Nothing listens on port 1.
const DEAD_GATEWAY: &str = "http://127.0.0.1:1";

/// Get a Command for the artguard binary.
fn artguard() -> Command {
    let mut cmd = Command::cargo_bin("artguard").unwrap();
    cmd.env_remove("ARTGUARD_URL");
    cmd
}

fn write_png(dir: &TempDir, name: &str) -> std::path::PathBuf {
    let img = image::RgbImage::from_fn(32, 32, |x, y| {
        image::Rgb([(x * 8) as u8, (y * 8) as u8, 128])
    });
    let path = dir.path().join(name);
    img.save(&path).unwrap();
    path
}

// ============================================================================
// Help and Version Tests
// ============================================================================

#[test]
fn test_help_displays_usage() {
    artguard()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("compare"))
        .stdout(predicate::str::contains("hash"))
        .stdout(predicate::str::contains("submit"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("health"));
}

#[test]
fn test_version_displays_version() {
    artguard()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("artguard"));
}

#[test]
fn test_help_shows_exit_codes() {
    artguard()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Exit codes:"))
        .stdout(predicate::str::contains("65"))
        .stdout(predicate::str::contains("69"));
}

#[test]
fn test_submit_help_shows_options() {
    artguard()
        .args(["submit", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--artist"))
        .stdout(predicate::str::contains("--title"))
        .stdout(predicate::str::contains("--precompute"))
        .stdout(predicate::str::contains("--gateway"));
}

#[test]
fn test_missing_subcommand_is_usage_error() {
    artguard().assert().code(2);
}

// ============================================================================
// Compare
// ============================================================================

#[test]
fn test_compare_identical_hashes() {
    artguard()
        .args(["compare", "ffffffff00000000", "ffffffff00000000", "-f", "average"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Distance:"))
        .stdout(predicate::str::contains("1.0000"));
}

#[test]
fn test_compare_json_output() {
    let output = artguard()
        .args([
            "--output",
            "json",
            "compare",
            "ffffffff00000000",
            "ffffffff0000000f",
            "--family",
            "difference",
            "--threshold",
            "0.9",
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let json: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(json["family"], "difference");
    assert_eq!(json["distance"], 4);
    assert_eq!(json["matches"], true);
}

#[test]
fn test_compare_invalid_hash_returns_data_error() {
    // Exit code 65 = EX_DATAERR
    artguard()
        .args(["compare", "not-hex", "00", "-f", "average"])
        .assert()
        .code(65)
        .stderr(predicate::str::contains("Invalid hash A"));
}

#[test]
fn test_compare_unknown_family_returns_data_error() {
    artguard()
        .args(["compare", "00", "00", "-f", "md5"])
        .assert()
        .code(65)
        .stderr(predicate::str::contains("Unknown hash family"));
}

// ============================================================================
// Hash
// ============================================================================

#[test]
fn test_hash_missing_file_returns_input_error() {
    // Exit code 66 = EX_NOINPUT
    artguard()
        .args(["hash", "nonexistent_file.png"])
        .assert()
        .code(66)
        .stderr(predicate::str::contains("Failed to read file"));
}

#[test]
fn test_hash_rejects_non_image() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("notes.txt");
    fs::write(&path, b"plain text, not pixels").unwrap();

    artguard()
        .args(["hash", path.to_str().unwrap()])
        .assert()
        .code(65)
        .stderr(predicate::str::contains("Unsupported image format"));
}

#[test]
fn test_hash_png_prints_families() {
    let temp = TempDir::new().unwrap();
    let path = write_png(&temp, "gradient.png");

    artguard()
        .args(["hash", path.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("perceptual:"))
        .stdout(predicate::str::contains("block16:"));
}

#[test]
fn test_hash_json_is_deterministic() {
    let temp = TempDir::new().unwrap();
    let path = write_png(&temp, "gradient.png");

    let run = || {
        artguard()
            .args(["--output", "json", "hash", path.to_str().unwrap()])
            .assert()
            .success()
            .get_output()
            .stdout
            .clone()
    };

    let first: serde_json::Value = serde_json::from_slice(&run()).unwrap();
    let second: serde_json::Value = serde_json::from_slice(&run()).unwrap();
    assert_eq!(first, second);
    assert!(first["average"].as_str().unwrap().len() == 16);
}

// ============================================================================
// Gateway commands
// ============================================================================

#[test]
fn test_submit_missing_file_returns_input_error() {
    artguard()
        .args([
            "submit",
            "nonexistent_file.png",
            "--artist",
            "Ada",
            "--title",
            "Dusk",
            "--gateway",
            DEAD_GATEWAY,
        ])
        .assert()
        .code(66);
}

#[test]
fn test_submit_rejects_non_object_metadata() {
    let temp = TempDir::new().unwrap();
    let path = write_png(&temp, "art.png");

    artguard()
        .args([
            "submit",
            path.to_str().unwrap(),
            "--artist",
            "Ada",
            "--title",
            "Dusk",
            "--metadata",
            "[1, 2]",
            "--gateway",
            DEAD_GATEWAY,
        ])
        .assert()
        .code(65)
        .stderr(predicate::str::contains("Invalid metadata"));
}

#[test]
fn test_status_unreachable_gateway_returns_unavailable() {
    // Exit code 69 = EX_UNAVAILABLE
    artguard()
        .args(["status", "some-job", "--gateway", DEAD_GATEWAY])
        .assert()
        .code(69)
        .stderr(predicate::str::contains("Gateway unreachable"));
}

#[test]
fn test_health_reads_gateway_from_env() {
    artguard()
        .env("ARTGUARD_URL", DEAD_GATEWAY)
        .arg("health")
        .assert()
        .code(69);
}
