// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Tests of the gaincal binary.

use indoc::indoc;
use tempfile::TempDir;

use super::*;
use gaincal::CalibrationConfig;

#[test]
fn test_help_lists_subcommands() {
    let cmd = gaincal().arg("--help").ok();
    assert!(cmd.is_ok());
    let (stdout, stderr) = get_cmd_output(cmd);
    assert!(stderr.is_empty(), "stderr wasn't empty: {stderr}");
    for sub in ["estimate-memory", "device-info", "simulate"] {
        assert!(stdout.contains(sub), "'{sub}' isn't in the help:\n{stdout}");
    }
}

#[test]
fn test_estimate_memory() {
    let cmd = gaincal()
        .args([
            "estimate-memory",
            "--rows",
            "8128",
            "--antennas",
            "128",
            "--channels",
            "32",
            "--polarizations",
            "4",
        ])
        .ok();
    assert!(cmd.is_ok(), "{:?}", get_cmd_output(cmd));
    let (stdout, _) = get_cmd_output(cmd);
    assert!(stdout.contains("Applying gains"), "{stdout}");
    assert!(stdout.contains("Solving for gains"), "{stdout}");
}

#[test]
fn test_estimate_memory_needs_sizes() {
    let cmd = gaincal()
        .args(["estimate-memory", "--channels", "32", "-p", "4"])
        .ok();
    assert!(cmd.is_err());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.contains("--antennas"), "{stderr}");
}

#[test]
fn test_estimate_memory_sizes_from_config() {
    let tmp_dir = TempDir::new().unwrap();
    let config = make_file_in_dir(
        "sizes.toml",
        tmp_dir.path(),
        indoc! {r#"
            n_antennas = 8
            n_channels = 4
            n_polarizations = 2
        "#},
    );
    let cmd = gaincal()
        .args(["estimate-memory", "--config", &config.display().to_string()])
        .ok();
    assert!(cmd.is_ok(), "{:?}", get_cmd_output(cmd));
    let (stdout, _) = get_cmd_output(cmd);
    assert!(stdout.contains("8 antennas"), "{stdout}");
}

#[test]
fn test_device_info() {
    let cmd = gaincal().arg("device-info").ok();
    assert!(cmd.is_ok(), "{:?}", get_cmd_output(cmd));
    let (stdout, _) = get_cmd_output(cmd);
    assert!(stdout.contains("CPU: "), "{stdout}");
    assert!(stdout.contains("GPU"), "{stdout}");
}

#[test]
fn test_simulate() {
    let cmd = gaincal().args(["simulate", "--antennas", "8"]).ok();
    assert!(cmd.is_ok(), "{:?}", get_cmd_output(cmd));
    let (stdout, _) = get_cmd_output(cmd);
    assert!(stdout.contains("RMS residual"), "{stdout}");
    assert!(stdout.contains("gaincal simulate complete"), "{stdout}");
}

#[test]
fn test_simulate_interference_is_rejected_without_flagging() {
    let cmd = gaincal().args(["simulate", "--rfi", "0.05"]).ok();
    assert!(cmd.is_err());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.starts_with("Error: "), "{stderr}");
}

#[test]
fn test_simulate_interference_is_flagged() {
    let cmd = gaincal().args(["simulate", "--rfi", "0.05", "--flag"]).ok();
    assert!(cmd.is_ok(), "{:?}", get_cmd_output(cmd));
    let (stdout, _) = get_cmd_output(cmd);
    assert!(stdout.contains("Calibration accepted"), "{stdout}");
}

#[test]
fn test_simulate_rejects_bad_interference_fraction() {
    let cmd = gaincal().args(["simulate", "--rfi", "1.5"]).ok();
    assert!(cmd.is_err());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.contains("--rfi"), "{stderr}");
}

#[test]
#[cfg(not(feature = "cuda"))]
fn test_simulate_forced_gpu_without_cuda() {
    let tmp_dir = TempDir::new().unwrap();
    let config = make_file_in_dir("gpu.json", tmp_dir.path(), r#"{"use_gpu": true}"#);
    let cmd = gaincal()
        .args(["simulate", "-c", &config.display().to_string()])
        .ok();
    assert!(cmd.is_err());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.contains("GPU processing was requested"), "{stderr}");
}

#[test]
fn test_config_with_unknown_extension() {
    let tmp_dir = TempDir::new().unwrap();
    let config = make_file_in_dir("config.yaml", tmp_dir.path(), "gpu_id: 0\n");
    let cmd = gaincal()
        .args(["device-info", "--config", &config.display().to_string()])
        .ok();
    assert!(cmd.is_err());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.contains("recognised file extension"), "{stderr}");
}

#[test]
fn test_invalid_config_value() {
    let tmp_dir = TempDir::new().unwrap();
    let config = make_file_in_dir("config.toml", tmp_dir.path(), "chunk_size = 0\n");
    let cmd = gaincal()
        .args(["device-info", "--config", &config.display().to_string()])
        .ok();
    assert!(cmd.is_err());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.contains("chunk_size"), "{stderr}");
    assert!(stderr.contains("--save-toml"), "{stderr}");
}

#[test]
fn test_save_toml() {
    let tmp_dir = TempDir::new().unwrap();
    let config = make_file_in_dir(
        "config.json",
        tmp_dir.path(),
        r#"{"refant": 3, "interpolation": "linear", "max_attempts": 2}"#,
    );
    let saved = tmp_dir.path().join("saved.toml");
    let cmd = gaincal()
        .args([
            "device-info",
            "--config",
            &config.display().to_string(),
            "--save-toml",
            &saved.display().to_string(),
        ])
        .ok();
    assert!(cmd.is_ok(), "{:?}", get_cmd_output(cmd));

    let original = CalibrationConfig::from_file(&config).unwrap();
    let round_tripped = CalibrationConfig::from_file(&saved).unwrap();
    assert_eq!(original, round_tripped);
    assert_eq!(round_tripped.refant, 3);
    assert_eq!(round_tripped.max_attempts, Some(2));
}
