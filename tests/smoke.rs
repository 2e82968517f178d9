//! Smoke tests -- verify the binary runs end to end.

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn dnspulse() -> Command {
    let mut cmd = Command::cargo_bin("dnspulse").unwrap();
    cmd.env_remove("DNSPULSE_CONFIG").env("RUST_LOG", "warn");
    cmd
}

/// Two days of steady traffic: four queries an hour over four domains.
fn write_steady(path: &Path) {
    let domains = ["a.com", "b.com", "c.com", "d.com"];
    let mut records = Vec::new();
    for day in 1..=2 {
        for hour in 0..24 {
            for q in 0..4 {
                records.push(serde_json::json!({
                    "timestamp": format!("2024-05-0{} {:02}:{:02}:00", day, hour, q * 10),
                    "domain": domains[q],
                    "client": format!("10.0.0.{}", q % 2 + 1),
                    "status": 2,
                }));
            }
        }
    }
    std::fs::write(path, serde_json::to_string(&records).unwrap()).unwrap();
}

fn write_suspicious(path: &Path) {
    let records: Vec<_> = (0..50)
        .map(|i| {
            serde_json::json!({
                "timestamp": format!("2024-05-03T10:{:02}:00Z", i),
                "domain": "suspicious.com",
                "client": "10.0.0.1",
                "status": "forwarded",
            })
        })
        .collect();
    std::fs::write(path, serde_json::to_string(&records).unwrap()).unwrap();
}

#[test]
fn test_cli_help() {
    dnspulse()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Anomaly detection and trend analysis"));
}

#[test]
fn test_cli_version() {
    dnspulse()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("dnspulse"));
}

#[test]
fn test_subcommands_exist() {
    for sub in ["analyze", "forecast", "config"] {
        dnspulse().args([sub, "--help"]).assert().success();
    }
}

#[test]
fn test_config_defaults() {
    dnspulse()
        .args(["config", "--defaults"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[anomaly_detection]"))
        .stdout(predicate::str::contains("smoothing_factor = 0.3"));
}

#[test]
fn test_analyze_json() {
    let dir = TempDir::new().unwrap();
    let train = dir.path().join("train.json");
    let input = dir.path().join("input.json");
    write_steady(&train);
    write_suspicious(&input);

    let output = dnspulse()
        .args(["analyze", "--json", "--train"])
        .arg(&train)
        .arg("--input")
        .arg(&input)
        .output()
        .unwrap();
    assert!(output.status.success());

    let results: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let anomalies = results["anomalies"].as_array().unwrap();
    assert!(anomalies
        .iter()
        .any(|a| a["type"] == "unusual-domain" && a["metadata"]["is_new"] == true));
    assert!(results["summary"]["health_score"].as_f64().unwrap() < 100.0);
    assert!(!results["summary"]["recommendations"].as_array().unwrap().is_empty());
}

#[test]
fn test_analyze_report() {
    let dir = TempDir::new().unwrap();
    let train = dir.path().join("train.json");
    let input = dir.path().join("input.json");
    write_steady(&train);
    write_suspicious(&input);

    dnspulse()
        .args(["analyze", "--train"])
        .arg(&train)
        .arg("--input")
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("Health score"))
        .stdout(predicate::str::contains("suspicious.com"));
}

#[test]
fn test_forecast_json() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("input.json");
    write_steady(&input);

    let output = dnspulse()
        .args(["forecast", "--hours", "3", "--json", "--input"])
        .arg(&input)
        .output()
        .unwrap();
    assert!(output.status.success());

    let prediction: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(prediction["method"], "exponential-smoothing");
    assert_eq!(prediction["predictions"].as_array().unwrap().len(), 3);
}

#[test]
fn test_too_little_training_data_fails() {
    let dir = TempDir::new().unwrap();
    let train = dir.path().join("train.json");
    std::fs::write(&train, "[]").unwrap();

    dnspulse()
        .args(["analyze", "--train"])
        .arg(&train)
        .arg("--input")
        .arg(&train)
        .assert()
        .failure()
        .stderr(predicate::str::contains("insufficient training data"));
}
