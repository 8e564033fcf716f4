// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Library-level tests going from synthetic data to corrected data.

use std::{cell::RefCell, path::Path};

use approx::assert_abs_diff_eq;
use indoc::indoc;
use tempfile::TempDir;

use super::*;
use gaincal::{
    apply_calibration, simulate::*, solve_calibration, verify_output, AdaptiveFlagging,
    CalibrateFnError, CalibrationConfig, CalibrationFailure, Dispatcher, MeasurementStore,
    SigmaClipFlagger, SolveInterval, StrategyChain,
};

fn config_from_toml(contents: &str) -> CalibrationConfig {
    let tmp_dir = TempDir::new().unwrap();
    let file = make_file_in_dir("config.toml", tmp_dir.path(), contents);
    CalibrationConfig::from_file(file).unwrap()
}

#[test]
fn test_solved_gains_match_the_true_gains() {
    let dataset = SyntheticDataset::generate(&SyntheticParams {
        noise_fraction: 0.0,
        ..Default::default()
    })
    .unwrap();
    let true_gains = dataset.true_gains.clone();
    let store = dataset.into_store("e2e.ms").unwrap();

    let config = config_from_toml(indoc! {r#"
        use_gpu = false
        solve_interval = "combined"
        tol = 1e-10
        max_iter = 500
    "#});
    assert_eq!(config.solve_interval, SolveInterval::Combined);
    let dispatcher = Dispatcher::new(config.dispatcher_options());
    let solution = solve_calibration(&store, &config.solve_options(), &dispatcher).unwrap();
    assert_eq!(solution.num_failed(), 0);
    assert!(solution.flags.iter().all(|&f| !f));
    assert_eq!(solution.gains.dim(), true_gains.dim());
    // The reference antenna's gains are 1, so no phase ambiguity remains.
    for (solved, truth) in solution.gains.iter().zip(true_gains.iter()) {
        assert_abs_diff_eq!(*solved, *truth, epsilon = 1e-6);
    }
}

#[test]
fn test_calibrating_from_a_config() {
    let dataset = SyntheticDataset::generate(&SyntheticParams {
        num_antennas: 10,
        num_channels: 3,
        noise_fraction: 0.05,
        ..Default::default()
    })
    .unwrap();
    let uncalibrated = rms_residual(dataset.data.view(), dataset.model.view(), None).unwrap();
    let mut store = dataset.into_store("e2e.ms").unwrap();

    let config = config_from_toml(indoc! {r#"
        use_gpu = false
        chunk_size = 7
        output_column = "CORRECTED_DATA"
    "#});
    let dispatcher = Dispatcher::new(config.dispatcher_options());
    let solution = solve_calibration(&store, &config.solve_options(), &dispatcher).unwrap();
    // One solve per channel and polarisation.
    assert_eq!(solution.results.len(), 3 * 2);
    let result = apply_calibration(
        &mut store,
        &solution.into_caltable(),
        &config.apply_options(),
        &dispatcher,
    )
    .unwrap();
    assert!(result.success());
    assert_eq!(result.num_flagged, 0);
    // 90 rows in chunks of 7.
    assert_eq!(result.num_chunks, 13);

    let fraction = verify_output(&store, "CORRECTED_DATA", config.min_fraction).unwrap();
    assert_abs_diff_eq!(fraction, 1.0);
    let corrected = store.read_column("CORRECTED_DATA").unwrap();
    let model = store.read_column("MODEL_DATA").unwrap();
    let calibrated = rms_residual(corrected.view(), model.view(), None).unwrap();
    assert!(calibrated < 0.5 * uncalibrated, "{calibrated} vs. {uncalibrated}");
}

#[test]
fn test_adaptive_flagging_rescues_calibration() {
    let dataset = SyntheticDataset::generate(&SyntheticParams {
        rfi_fraction: 0.03,
        ..Default::default()
    })
    .unwrap();
    let store = RefCell::new(dataset.into_store("rfi.ms").unwrap());
    let path = store.borrow().path().to_path_buf();
    let config = CalibrationConfig {
        use_gpu: Some(false),
        ..Default::default()
    };
    let dispatcher = Dispatcher::new(config.dispatcher_options());
    let mut num_calls = 0;

    let calibrate = |p: &Path, refant: &str| -> Result<f64, CalibrateFnError> {
        num_calls += 1;
        assert_eq!(p, path.as_path());
        assert_eq!(refant, "0");
        let mut store = store.borrow_mut();
        let solution = solve_calibration(&*store, &config.solve_options(), &dispatcher)
            .map_err(CalibrateFnError::other)?;
        apply_calibration(
            &mut *store,
            &solution.into_caltable(),
            &config.apply_options(),
            &dispatcher,
        )
        .map_err(CalibrateFnError::other)?;
        let corrected = store.read_column("CORRECTED_DATA").unwrap();
        let model = store.read_column("MODEL_DATA").unwrap();
        let flags = store.read_flags().unwrap();
        let residual = rms_residual(corrected.view(), model.view(), Some(flags.view())).unwrap();
        if residual > 0.1 {
            return Err(CalibrationFailure::new(format!("residual {residual}")).into());
        }
        Ok(residual)
    };

    let flagging = AdaptiveFlagging::new(StrategyChain::default(), None);
    let mut flagger = SigmaClipFlagger::new(&store, "DATA");
    let outcome = flagging.run(&path, "0", &mut flagger, calibrate).unwrap();
    assert!(outcome.success, "{outcome:?}");
    assert_eq!(outcome.attempts, 1);
    assert_eq!(outcome.strategy, "aoflagger-default");
    assert!(outcome.flagged_fraction > 0.01, "{}", outcome.flagged_fraction);
    assert!(outcome.value.unwrap() < 0.1);
    assert_eq!(num_calls, 1);
}
