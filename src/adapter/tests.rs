// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use approx::assert_abs_diff_eq;
use ndarray::prelude::*;

use super::*;
use crate::backend::DispatcherOptions;

fn all_pairs(num_antennas: usize) -> (Vec<usize>, Vec<usize>) {
    (0..num_antennas)
        .flat_map(|a1| (a1 + 1..num_antennas).map(move |a2| (a1, a2)))
        .unzip()
}

fn true_gain(ant: usize, chan: usize, pol: usize, chan_dependent: bool) -> c64 {
    let chan_phase = if chan_dependent { 0.1 * chan as f64 } else { 0.0 };
    c64::from_polar(1.0 + 0.05 * ant as f64, 0.3 * ant as f64 + chan_phase - 0.2 * pol as f64)
}

/// A store with DATA = g[a1] * MODEL * conj(g[a2]).
fn synthetic_store(chan_dependent: bool) -> MemoryStore {
    let num_antennas = 5;
    let (ant1, ant2) = all_pairs(num_antennas);
    let model = Array3::from_shape_fn((ant1.len(), 3, 2), |(r, c, p)| {
        c64::new(1.0 + 0.1 * r as f64, 0.2 * c as f64 - 0.1 * p as f64)
    });
    let data = Array3::from_shape_fn(model.dim(), |(r, c, p)| {
        true_gain(ant1[r], c, p, chan_dependent)
            * model[(r, c, p)]
            * true_gain(ant2[r], c, p, chan_dependent).conj()
    });
    MemoryStore::new("synthetic.ms", data, ant1, ant2, num_antennas)
        .unwrap()
        .with_column("MODEL_DATA", model)
        .unwrap()
}

fn cpu() -> Dispatcher<'static> {
    Dispatcher::new(DispatcherOptions::default())
}

fn cpu_apply() -> ApplyOptions {
    ApplyOptions {
        use_gpu: Some(false),
        ..Default::default()
    }
}

fn cpu_solve(interval: SolveInterval) -> SolveOptions {
    SolveOptions {
        interval,
        use_gpu: Some(false),
        ..Default::default()
    }
}

#[test]
fn flagged_table_entries_become_identity() {
    let parameters = array![
        [[c64::new(2.0, 0.0)]],
        [[c64::new(3.0, 1.0)]],
        [[c64::new(f64::NAN, 0.0)]],
    ];
    let flags = array![[[false]], [[true]], [[false]]];
    // Antenna 3 isn't in the table; antenna 7 isn't in the data.
    let caltable = MemoryCalTable::with_antenna_ids(vec![0, 1, 7], parameters, flags).unwrap();
    let gains = read_gain_table(&caltable, 4, 1, Interpolation::Nearest).unwrap();
    let expected = array![
        [[c64::new(2.0, 0.0)]],
        [[IDENTITY]],
        [[IDENTITY]],
        [[IDENTITY]],
    ];
    assert_eq!(gains.view(), expected.view());

    let caltable = MemoryCalTable::with_antenna_ids(
        vec![0, 1, 2],
        array![[[c64::new(2.0, 0.0)]], [[c64::new(2.0, 0.0)]], [[c64::new(2.0, 0.0)]]],
        array![[[false]], [[false]], [[false]]],
    )
    .unwrap();
    let gains = read_gain_table(&caltable, 4, 1, Interpolation::Nearest).unwrap();
    assert_eq!(gains.view()[(2, 0, 0)], c64::new(2.0, 0.0));
    assert_eq!(gains.view()[(3, 0, 0)], IDENTITY);
}

#[test]
fn gain_channels_are_interpolated_onto_data_channels() {
    let a = c64::new(1.0, 1.0);
    let b = c64::new(3.0, -1.0);
    let caltable = MemoryCalTable::unflagged(array![[[a], [b]]]);

    let nearest = read_gain_table(&caltable, 1, 4, Interpolation::Nearest).unwrap();
    assert_eq!(nearest.view().slice(s![0, .., 0]), array![a, a, b, b]);

    let linear = read_gain_table(&caltable, 1, 4, Interpolation::Linear).unwrap();
    let expected = array![a, a * 0.75 + b * 0.25, a * 0.25 + b * 0.75, b];
    assert_abs_diff_eq!(linear.view().slice(s![0, .., 0]).to_owned(), expected, epsilon = 1e-12);

    // Matching or single channels are left alone.
    let same = read_gain_table(&caltable, 1, 2, Interpolation::Linear).unwrap();
    assert_eq!(same.view().dim(), (1, 2, 1));
    let single = MemoryCalTable::unflagged(array![[[a]]]);
    let single = read_gain_table(&single, 1, 4, Interpolation::Linear).unwrap();
    assert_eq!(single.view().dim(), (1, 1, 1));
}

#[test]
fn linear_interpolation_skips_flagged_channels() {
    let a = c64::new(1.0, 1.0);
    let b = c64::new(3.0, -1.0);
    let caltable = MemoryCalTable::new(array![[[a], [b]]], array![[[false], [true]]]).unwrap();
    let gains = read_gain_table(&caltable, 1, 4, Interpolation::Linear).unwrap();
    assert_eq!(gains.view().slice(s![0, .., 0]), array![a, a, a, a]);
}

#[test]
fn tables_without_channels_or_polarisations_are_input_errors() {
    for dim in [(2, 0, 1), (2, 3, 0)] {
        let caltable = MemoryCalTable::unflagged(Array3::zeros(dim));
        for interpolation in [Interpolation::Nearest, Interpolation::Linear] {
            let result = read_gain_table(&caltable, 2, 4, interpolation);
            assert!(
                matches!(
                    result,
                    Err(GainCalError::Input(InputError::BadShape { actual: 0, .. }))
                ),
                "{dim:?}: {result:?}"
            );
        }
    }

    let mut store = synthetic_store(false);
    let caltable = MemoryCalTable::unflagged(Array3::zeros((5, 0, 2)));
    let result = apply_calibration(&mut store, &caltable, &cpu_apply(), &cpu());
    assert!(matches!(result, Err(GainCalError::Input(_))));
    assert!(!store.has_column("CORRECTED_DATA"));
}

#[test]
fn apply_writes_corrected_data_and_flags() {
    let (ant1, ant2) = all_pairs(4);
    let g = [
        c64::new(1.0, 0.0),
        c64::new(0.0, 2.0),
        c64::new(1.5, -0.5),
        c64::new(0.0, 0.0),
    ];
    let model = c64::new(2.0, 1.0);
    let data = Array3::from_shape_fn((ant1.len(), 2, 1), |(r, _, _)| {
        g[ant1[r]] * model * g[ant2[r]].conj()
    });
    let mut store = MemoryStore::new("apply.ms", data, ant1.clone(), ant2.clone(), 4).unwrap();
    assert!(!store.has_column("CORRECTED_DATA"));

    let caltable = MemoryCalTable::unflagged(Array3::from_shape_fn((4, 1, 1), |(a, _, _)| g[a]));
    let result = apply_calibration(&mut store, &caltable, &cpu_apply(), &cpu()).unwrap();
    assert!(result.success());
    assert_eq!(result.num_processed, 12);
    // Antenna 3 is in 3 of the 6 baselines.
    assert_eq!(result.num_flagged, 6);
    assert_eq!(result.num_calibrated, 6);

    let corrected = store.column("CORRECTED_DATA").unwrap();
    for (r, (&a1, &a2)) in ant1.iter().zip(ant2.iter()).enumerate() {
        for c in 0..2 {
            if a1 == 3 || a2 == 3 {
                assert!(corrected[(r, c, 0)].is_nan());
                assert!(store.flags()[(r, c, 0)]);
            } else {
                assert_abs_diff_eq!(corrected[(r, c, 0)], model, epsilon = 1e-12);
                assert!(!store.flags()[(r, c, 0)]);
            }
        }
    }

    let fraction = verify_output(&store, "CORRECTED_DATA", 0.01).unwrap();
    assert_abs_diff_eq!(fraction, 0.5);
}

#[test]
fn illegal_output_column_is_an_input_error() {
    let mut store = synthetic_store(false);
    let caltable = MemoryCalTable::unflagged(Array3::from_elem((5, 1, 1), IDENTITY));
    let opts = ApplyOptions {
        output_column: "NOT_A_COLUMN".to_string(),
        ..cpu_apply()
    };
    let result = apply_calibration(&mut store, &caltable, &opts, &cpu());
    assert!(matches!(
        result,
        Err(GainCalError::Input(InputError::IllegalColumn { .. }))
    ));
    assert!(!store.has_column("NOT_A_COLUMN"));
}

#[test]
fn missing_columns_and_empty_stores_are_input_errors() {
    let mut store = synthetic_store(false);
    let caltable = MemoryCalTable::unflagged(Array3::from_elem((5, 1, 1), IDENTITY));
    let opts = ApplyOptions {
        data_column: "CORRECTED_DATA".to_string(),
        ..cpu_apply()
    };
    let result = apply_calibration(&mut store, &caltable, &opts, &cpu());
    assert!(matches!(
        result,
        Err(GainCalError::Input(InputError::MissingColumn { .. }))
    ));

    let mut empty =
        MemoryStore::new("empty.ms", Array3::zeros((0, 2, 1)), vec![], vec![], 2).unwrap();
    let result = apply_calibration(&mut empty, &caltable, &cpu_apply(), &cpu());
    assert!(matches!(
        result,
        Err(GainCalError::Input(InputError::EmptyStore { .. }))
    ));
    let result = verify_output(&empty, "DATA", 0.01);
    assert!(matches!(
        result,
        Err(GainCalError::Input(InputError::EmptyStore { .. }))
    ));
}

#[test]
fn degenerate_output_is_rejected() {
    let store = synthetic_store(false);
    let dim = store.dim();

    let flagged = store.clone().with_flags(Array3::from_elem(dim, true)).unwrap();
    let result = verify_output(&flagged, "DATA", 0.01);
    assert!(matches!(
        result,
        Err(GainCalError::NumericDegeneracy(NumericDegeneracy::AllFlagged { .. }))
    ));

    let zeros = store.with_column("CORRECTED_DATA", Array3::zeros(dim)).unwrap();
    let result = verify_output(&zeros, "CORRECTED_DATA", 0.01);
    assert!(matches!(
        result,
        Err(GainCalError::NumericDegeneracy(NumericDegeneracy::Unpopulated { .. }))
    ));
    assert_abs_diff_eq!(verify_output(&zeros, "DATA", 0.01).unwrap(), 1.0);
}

#[test]
fn solving_then_applying_recovers_the_model() {
    for (interval, chan_dependent, gain_chans) in [
        (SolveInterval::PerChannel, true, 3),
        (SolveInterval::Combined, false, 1),
    ] {
        let mut store = synthetic_store(chan_dependent);
        let solution = solve_calibration(&store, &cpu_solve(interval), &cpu()).unwrap();
        assert_eq!(solution.gains.dim(), (5, gain_chans, 2));
        assert_eq!(solution.results.len(), gain_chans * 2);
        assert_eq!(solution.num_failed(), 0);
        assert!(solution.results.iter().all(|r| r.success(true)));
        assert!(solution.flags.iter().all(|f| !f));
        // The reference antenna has no phase.
        for g in solution.gains.slice(s![0, .., ..]) {
            assert_abs_diff_eq!(g.im, 0.0);
        }

        let caltable = solution.into_caltable();
        apply_calibration(&mut store, &caltable, &cpu_apply(), &cpu()).unwrap();
        let corrected = store.column("CORRECTED_DATA").unwrap();
        let model = store.column("MODEL_DATA").unwrap();
        assert_abs_diff_eq!(corrected.to_owned(), model.to_owned(), epsilon = 1e-4);
    }
}

#[test]
fn flagged_samples_get_no_weight() {
    let store = synthetic_store(false);
    let mut data = store.column("DATA").unwrap().to_owned();
    let mut flags = Array3::from_elem(data.dim(), false);
    // Corrupt, then flag, every sample of one baseline; poison another sample
    // with a NaN.
    data.slice_mut(s![2, .., ..]).fill(c64::new(1e6, -1e6));
    flags.slice_mut(s![2, .., ..]).fill(true);
    data[(5, 1, 0)] = c64::new(f64::NAN, 0.0);
    let store = store
        .with_column("DATA", data)
        .unwrap()
        .with_flags(flags)
        .unwrap();

    let solution = solve_calibration(&store, &cpu_solve(SolveInterval::Combined), &cpu()).unwrap();
    assert_eq!(solution.num_failed(), 0);
    let gains = solution.gain_table();
    for pol in 0..2 {
        for (a1, a2) in [(0, 1), (2, 4), (3, 4)] {
            let solved = gains.view()[(a1, 0, pol)] * gains.view()[(a2, 0, pol)].conj();
            let expected = true_gain(a1, 0, pol, false) * true_gain(a2, 0, pol, false).conj();
            assert_abs_diff_eq!(solved, expected, epsilon = 1e-4);
        }
    }
}

#[test]
fn antennas_without_baselines_are_flagged_in_the_solution() {
    let store = synthetic_store(false);
    let mut flags = Array3::from_elem(store.dim(), false);
    // Rows 0..4 are every baseline with antenna 0.
    flags.slice_mut(s![0..4, .., ..]).fill(true);
    let store = store.with_flags(flags).unwrap();

    let opts = SolveOptions {
        params: SolveParams {
            refant: 1,
            ..Default::default()
        },
        ..cpu_solve(SolveInterval::Combined)
    };
    let solution = solve_calibration(&store, &opts, &cpu()).unwrap();
    assert!(solution.flags.slice(s![0, .., ..]).iter().all(|&f| f));
    assert!(solution.flags.slice(s![1.., .., ..]).iter().all(|&f| !f));
    assert!(solution.results.iter().all(|r| r.num_unconstrained == 1));
    assert_eq!(solution.gain_table().view()[(0, 0, 0)], IDENTITY);
}
