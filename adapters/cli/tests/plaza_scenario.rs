use std::{path::Path, process::Command};

fn run(args: &[&str]) -> std::process::Output {
    let scenario = Path::new(env!("CARGO_MANIFEST_DIR")).join("scenarios/plaza.json");
    Command::new(env!("CARGO_BIN_EXE_crowd-field"))
        .arg(scenario)
        .args(args)
        .env("RUST_LOG", "off")
        .output()
        .expect("failed to run crowd-field")
}

#[test]
fn plaza_scenario_publishes_one_convergence_feature() {
    let output = run(&[]);
    assert!(output.status.success(), "{output:?}");

    let stdout = String::from_utf8(output.stdout).expect("utf-8 output");
    assert!(stdout.contains("frames:           5"), "{stdout}");
    assert!(stdout.contains("tiles:            2 accepted, 1 rejected"), "{stdout}");
    assert!(stdout.contains("hotspots:         1"), "{stdout}");

    let json = stdout
        .split_once("=== convergence ===")
        .map(|(_, json)| json)
        .expect("convergence section");
    let layer: serde_json::Value = serde_json::from_str(json).expect("valid JSON");
    assert_eq!(layer["type"], "FeatureCollection");
    assert_eq!(layer["viewer"], "viewer-1");
    assert_eq!(layer["features"][0]["id"], "CAS_1:1");
    assert_eq!(layer["features"][0]["properties"]["participants"], 6);
}

#[test]
fn low_zoom_override_publishes_nothing() {
    let output = run(&["--zoom", "8", "--frames", "2"]);
    assert!(output.status.success(), "{output:?}");

    let stdout = String::from_utf8(output.stdout).expect("utf-8 output");
    assert!(stdout.contains("frames:           2"), "{stdout}");
    assert!(stdout.contains("arrow:            0"), "{stdout}");
    assert!(stdout.contains("halo:             0"), "{stdout}");
}

#[test]
fn missing_scenario_fails() {
    let output = Command::new(env!("CARGO_BIN_EXE_crowd-field"))
        .arg("no-such-scenario.json")
        .env("RUST_LOG", "off")
        .output()
        .expect("failed to run crowd-field");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no-such-scenario.json"), "{stderr}");
}
