#![cfg(all(unix, feature = "cli"))]

use std::process::{Command, Output};

fn benchlink(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_benchlink"))
        .args(["--log-level", "error", "--format", "json"])
        .args(args)
        .output()
        .expect("benchlink should run")
}

fn stdout_json(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(stdout.trim()).expect("stdout should be one JSON document")
}

#[test]
fn simulated_read_reports_open_circuit() {
    let output = benchlink(&["load", "--simulate", "read"]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let json = stdout_json(&output);
    assert_eq!(json["input_on"], false);
    assert_eq!(json["current"], 0.0);
    let voltage = json["voltage"].as_f64().expect("voltage should be a number");
    assert!((voltage - 21.0).abs() < 0.01, "open-circuit voltage was {voltage}");
    assert_eq!(json["faults"].as_array().map(Vec::len), Some(0));
}

#[test]
fn simulated_info_reports_product() {
    let output = benchlink(&["load", "--simulate", "--address", "7", "info"]);
    assert!(output.status.success());

    let json = stdout_json(&output);
    assert_eq!(json["address"], 7);
    assert_eq!(json["model"], "8500");
    assert_eq!(json["serial_number"], "SIM0000001");
    assert_eq!(json["max_voltage"], 120.0);
}

#[test]
fn simulated_set_applies_constant_current() {
    let output = benchlink(&[
        "load",
        "--simulate",
        "set",
        "--mode",
        "cc",
        "--current",
        "2",
        "--input",
        "on",
    ]);
    assert!(output.status.success());

    let json = stdout_json(&output);
    assert_eq!(json["input_on"], true);
    assert_eq!(json["regulation"], "constant_current");
    let current = json["current"].as_f64().expect("current should be a number");
    assert!((current - 2.0).abs() < 0.001);
}

#[test]
fn simulated_sweep_is_ascending() {
    let output = benchlink(&[
        "load",
        "--simulate",
        "sweep",
        "--steps",
        "20",
        "--settle",
        "0ms",
    ]);
    assert!(output.status.success());

    let json = stdout_json(&output);
    let points = json.as_array().expect("sweep should print an array");
    assert_eq!(points.len(), 20);
    let voltages: Vec<f64> = points
        .iter()
        .map(|p| p["voltage"].as_f64().expect("voltage should be a number"))
        .collect();
    assert!(voltages.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn simulated_stats_count_every_exchange() {
    let output = benchlink(&["load", "--simulate", "stats", "--samples", "4"]);
    assert!(output.status.success());

    let json = stdout_json(&output);
    // remote on, load off, then four reads
    assert_eq!(json["messages_sent"], 6);
    assert_eq!(json["received_replies"], 6);
    assert_eq!(json["retries"], 0);
}

#[test]
fn zero_timeout_exits_with_usage() {
    let output = benchlink(&["load", "--simulate", "--timeout", "0s", "read"]);
    assert_eq!(output.status.code(), Some(64));
    assert!(String::from_utf8_lossy(&output.stderr).contains("timeout must be greater than zero"));
}

#[test]
fn rejected_setpoint_exits_with_data_invalid() {
    let output = benchlink(&["load", "--simulate", "set", "--voltage", "500"]);
    assert_eq!(output.status.code(), Some(60));
    assert!(String::from_utf8_lossy(&output.stderr).contains("rejected by device"));
}

#[test]
fn version_prints_package_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_benchlink"))
        .arg("version")
        .output()
        .expect("version should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("benchlink {}", env!("CARGO_PKG_VERSION")));
}
