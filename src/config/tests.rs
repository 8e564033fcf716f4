// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::io::Write;

use approx::assert_abs_diff_eq;
use indoc::indoc;
use tempfile::Builder;

use super::*;
use crate::flagging::FlaggingBackend;

fn write_config(contents: &str, suffix: &str) -> tempfile::NamedTempFile {
    let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn defaults() {
    let config = CalibrationConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
    assert_eq!(config.max_iter, 100);
    assert_abs_diff_eq!(config.tol, 1e-6);
    assert_abs_diff_eq!(config.min_fraction, 0.01);
    assert_eq!(config.interpolation, Interpolation::Nearest);
    assert_eq!(config.solve_interval, SolveInterval::PerChannel);
    assert_eq!(config.use_gpu, None);
    assert_eq!(config.strategy_chain().unwrap(), StrategyChain::default());
    assert_eq!(config.adaptive_flagging().unwrap().max_attempts(), 3);
    assert_eq!(config.solve_params(), SolveParams::default());
    assert_eq!(config.apply_options(), ApplyOptions::default());
    assert_eq!(config.solve_options(), SolveOptions::default());
    assert_eq!(config.dispatcher_options(), DispatcherOptions::default());
}

#[test]
fn toml_config_is_read() {
    let file = write_config(
        indoc! {r#"
            gpu_id = 1
            chunk_size = 5000
            n_antennas = 128
            interpolation = "linear"
            max_iter = 50
            tol = 1e-8
            max_attempts = 2
            refant = 3
            use_gpu = false
            solve_interval = "combined"
            output_column = "MODEL_DATA"

            [[strategies]]
            name = "clip"
            backend = "sigma-clip"
            threshold_scale = 0.5

            [[strategies]]
            name = "casa"
            backend = "casa"
            aggressive = true
        "#},
        ".toml",
    );
    let config = CalibrationConfig::from_file(file.path()).unwrap();
    assert_eq!(config.gpu_id, 1);
    assert_eq!(config.chunk_size, 5000);
    assert_eq!(config.n_antennas, Some(128));
    assert_eq!(config.n_channels, None);
    assert_eq!(config.interpolation, Interpolation::Linear);
    assert_eq!(config.max_iter, 50);
    assert_abs_diff_eq!(config.tol, 1e-8);
    assert_eq!(config.refant, 3);
    assert_eq!(config.use_gpu, Some(false));
    assert_eq!(config.solve_interval, SolveInterval::Combined);
    assert_eq!(config.output_column, "MODEL_DATA");
    // Not given, so default.
    assert_eq!(config.data_column, "DATA");
    assert_abs_diff_eq!(config.min_fraction, DEFAULT_MIN_FRACTION);

    let flagging = config.adaptive_flagging().unwrap();
    assert_eq!(flagging.max_attempts(), 2);
    assert_eq!(flagging.chain().names(), ["clip", "casa"]);
    assert_eq!(flagging.chain()[0].backend, FlaggingBackend::SigmaClip);
    assert_abs_diff_eq!(flagging.chain()[0].threshold_scale, 0.5);
    assert!(flagging.chain()[1].aggressive);
    assert_abs_diff_eq!(flagging.chain()[1].threshold_scale, 1.0);
}

#[test]
fn json_config_is_read() {
    let file = write_config(
        r#"{"chunk_size": 10, "prefer_gpu_flagging": true, "memory_budget_gb": 2.5}"#,
        ".JSON",
    );
    let config = CalibrationConfig::from_file(file.path()).unwrap();
    assert_eq!(config.chunk_size, 10);
    assert_eq!(config.dispatcher_options().memory_budget_gb, Some(2.5));
    let chain = config.strategy_chain().unwrap();
    assert_eq!(chain[0].name, "gpu-aoflagger");
    assert_eq!(chain.len(), 4);
}

#[test]
fn config_round_trips_through_toml() {
    let config = CalibrationConfig {
        n_channels: Some(768),
        use_gpu: Some(true),
        interpolation: Interpolation::Linear,
        strategies: Some(StrategyChain::default().iter().cloned().collect()),
        ..Default::default()
    };
    let toml_string = config.to_toml_string().unwrap();
    let file = write_config(&toml_string, ".toml");
    assert_eq!(CalibrationConfig::from_file(file.path()).unwrap(), config);
}

#[test]
fn bad_files_are_rejected() {
    let file = write_config("chunk_size = 10", ".yaml");
    assert!(matches!(
        CalibrationConfig::from_file(file.path()),
        Err(ConfigError::UnknownExtension { .. })
    ));

    let file = write_config("chunk_size = 10\nnot_an_option = 1", ".toml");
    assert!(matches!(
        CalibrationConfig::from_file(file.path()),
        Err(ConfigError::Toml { .. })
    ));

    let file = write_config("{\"chunk_size\": }", ".json");
    assert!(matches!(
        CalibrationConfig::from_file(file.path()),
        Err(ConfigError::Json { .. })
    ));

    assert!(matches!(
        CalibrationConfig::from_file("/does/not/exist.toml"),
        Err(ConfigError::IO(_))
    ));
}

#[test]
fn invalid_values_are_rejected() {
    let bad_configs = [
        CalibrationConfig {
            chunk_size: 0,
            ..Default::default()
        },
        CalibrationConfig {
            max_iter: 0,
            ..Default::default()
        },
        CalibrationConfig {
            tol: -1.0,
            ..Default::default()
        },
        CalibrationConfig {
            min_fraction: 1.0,
            ..Default::default()
        },
        CalibrationConfig {
            min_fraction: -0.1,
            ..Default::default()
        },
        CalibrationConfig {
            max_attempts: Some(0),
            ..Default::default()
        },
        CalibrationConfig {
            n_antennas: Some(4),
            refant: 4,
            ..Default::default()
        },
        CalibrationConfig {
            strategies: Some(vec![]),
            ..Default::default()
        },
    ];
    for config in bad_configs {
        assert!(
            matches!(config.validate(), Err(ConfigError::Invalid { .. })),
            "{config:?}"
        );
    }

    let file = write_config("tol = 0.0", ".toml");
    let result = CalibrationConfig::from_file(file.path());
    match result {
        Err(e @ ConfigError::Invalid { .. }) => assert!(e.to_string().contains("tol")),
        _ => panic!("expected an invalid tolerance"),
    }
}

#[test]
fn enums_parse_from_strings() {
    assert_eq!("linear".parse::<Interpolation>().unwrap(), Interpolation::Linear);
    assert_eq!("per-channel".parse::<SolveInterval>().unwrap(), SolveInterval::PerChannel);
    assert_eq!(SolveInterval::Combined.to_string(), "combined");
    assert!("cubic".parse::<Interpolation>().is_err());
}
