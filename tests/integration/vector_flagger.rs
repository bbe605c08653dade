// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{cell::RefCell, rc::Rc};

use approx::assert_abs_diff_eq;
use ndarray::{array, Array1, Ix1, IxDyn};

use viewflagger::{
    FlaggerInputs, FlaggingError, NewVectorFlagger, SummaryRequest, Termination, VectorFlagger,
    VectorRuleConfig, VectorView, ViewAxis, ViewCollection, ViewScope,
};

use super::storage::{reader, MockStorage, StorageFlagSetter, Table};

const MS: &str = "uid___A002_X2.ms";

fn scope(antenna: Option<usize>) -> ViewScope {
    ViewScope {
        filename: MS.to_string(),
        spw: Some(17),
        pol: Some("XX".to_string()),
        antenna,
        ..Default::default()
    }
}

fn outlier_rules() -> VectorRuleConfig {
    VectorRuleConfig {
        flag_hilo: true,
        fhl_limit: 3.0,
        fhl_minsample: 3,
        ..Default::default()
    }
}

#[test]
fn test_single_outlier_is_flagged_once() {
    let data = array![1.0, 1.0, 1.0, 1.0, 100.0, 1.0, 1.0, 1.0, 1.0];
    let storage = MockStorage::new(vec![Table::new(
        scope(None),
        vec![ViewAxis::channels(data.len())],
        data,
    )]);

    let inputs = FlaggerInputs::new(MS, outlier_rules().rules())
        .with_niter(5)
        .with_iter_datatask(true);
    let mut flagger = VectorFlagger::new(
        inputs,
        reader(&storage),
        StorageFlagSetter(Rc::clone(&storage)),
    );
    let result = flagger.execute().unwrap();

    assert_eq!(result.iterations, 2);
    assert_eq!(result.termination, Termination::Converged);
    let flagcmds = result.flagcmds();
    assert_eq!(flagcmds.len(), 1);
    assert_eq!(flagcmds[0].channels(), Some(vec![4]));
    assert_eq!(flagcmds[0].rule_name, "outlier");
    assert_eq!(
        storage.borrow().tables[0].flag.iter().copied().collect::<Vec<_>>(),
        vec![false, false, false, false, true, false, false, false, false]
    );
    assert_eq!(result.before().flagged(), 0);
    assert_eq!(result.after().flagged(), 1);

    // a second run over the flagged storage raises nothing
    let inputs = FlaggerInputs::new(MS, outlier_rules().rules())
        .with_niter(5)
        .with_iter_datatask(true);
    let mut flagger = VectorFlagger::new(
        inputs,
        reader(&storage),
        StorageFlagSetter(Rc::clone(&storage)),
    );
    let result = flagger.execute().unwrap();
    assert_eq!(result.iterations, 1);
    assert!(result.flagcmds().is_empty());
    assert_eq!(result.before().counts, result.after().counts);
    assert_eq!(result.after().flagged(), 1);
}

#[test]
fn test_niter_bounds_the_loop() {
    let storage = MockStorage::new(vec![Table::new(
        scope(None),
        vec![ViewAxis::channels(20)],
        Array1::from_elem(20, 1.0),
    )]);
    // Every read finds a fresh spike, so the flagger never converges.
    let spiking = Rc::clone(&storage);
    let datatask = move || -> Result<ViewCollection<Ix1>, FlaggingError> {
        let mut storage = spiking.borrow_mut();
        let chan = storage.reads;
        storage.tables[0].data[IxDyn(&[chan])] = 100.0;
        storage.views()
    };

    let inputs = FlaggerInputs::new(MS, outlier_rules().rules())
        .with_niter(3)
        .with_iter_datatask(true);
    let mut flagger = VectorFlagger::new(inputs, datatask, StorageFlagSetter(Rc::clone(&storage)));
    let result = flagger.execute().unwrap();

    assert_eq!(result.iterations, 3);
    assert_eq!(result.termination, Termination::MaxIterReached);
    let storage = storage.borrow();
    // the third iteration's flags are applied too
    assert_eq!(storage.applied.len(), 3);
    assert_eq!(
        storage.calls,
        vec![
            SummaryRequest::BEFORE,
            SummaryRequest::NONE,
            SummaryRequest::AFTER
        ]
    );
    assert_eq!(storage.reads, 4);
    assert_eq!(storage.num_flagged(), 3);
    assert_eq!(result.after().flagged(), 3);

    let description = &result.descriptions()[0];
    let counts: Vec<usize> = result
        .views()
        .snapshots(description)
        .iter()
        .map(VectorView::num_flagged)
        .collect();
    assert_eq!(counts, vec![0, 1, 2, 3]);
}

/// "Raw" spectra as read from storage: one (scope, amplitude, flag) per
/// antenna.
type RawSpectra = Vec<(ViewScope, Vec<f64>, Vec<bool>)>;

fn frequencies(nchan: usize) -> Vec<f64> {
    (0..nchan).map(|i| 100e9 + i as f64 * 1e6).collect()
}

#[test]
fn test_separate_view_task_on_frequency_axis() {
    let nchan = 16;
    let axis = ViewAxis::frequencies(&frequencies(nchan), 1e6);
    let mut spiky = Array1::from_elem(nchan, 2.0);
    spiky[5] = 40.0;
    let storage = MockStorage::new(vec![
        Table::new(scope(Some(0)), vec![axis.clone()], spiky),
        Table::new(scope(Some(1)), vec![axis], Array1::from_elem(nchan, 2.0)),
    ]);

    let raw_storage = Rc::clone(&storage);
    let datatask = move || -> Result<RawSpectra, FlaggingError> {
        let mut storage = raw_storage.borrow_mut();
        storage.reads += 1;
        let raw = storage
            .tables
            .iter()
            .map(|t| {
                (
                    t.scope.clone(),
                    t.data.iter().copied().collect(),
                    t.flag.iter().copied().collect(),
                )
            })
            .collect();
        Ok(raw)
    };
    let viewtask = |raw: &RawSpectra| -> Result<ViewCollection<Ix1>, FlaggingError> {
        raw.iter()
            .map(|(scope, data, flag)| {
                let nchan = data.len();
                VectorView::new(
                    Array1::from(data.clone()),
                    Array1::from(flag.clone()),
                    Array1::from_elem(nchan, false),
                    vec![ViewAxis::frequencies(&frequencies(nchan), 1e6)],
                    scope.clone(),
                )
            })
            .collect()
    };

    let inputs = FlaggerInputs::new(MS, outlier_rules().rules()).with_niter(3);
    let mut flagger = NewVectorFlagger::with_viewtask(
        inputs,
        datatask,
        viewtask,
        StorageFlagSetter(Rc::clone(&storage)),
    );
    let result = flagger.execute().unwrap();

    assert_eq!(result.termination, Termination::Converged);
    assert_eq!(result.descriptions().len(), 2);
    let flagcmds = result.flagcmds();
    assert_eq!(flagcmds.len(), 1);
    let cmd = &flagcmds[0];
    assert_eq!(cmd.antenna, Some(0));
    assert_eq!(cmd.channels(), Some(vec![5]));
    let ranges = cmd.frequency_ranges();
    assert_eq!(ranges.len(), 1);
    assert_abs_diff_eq!(ranges[0].0, 100e9 + 4.5e6, epsilon = 1e-3);
    assert_abs_diff_eq!(ranges[0].1, 100e9 + 5.5e6, epsilon = 1e-3);

    // only antenna 0 was touched
    let (_, _, _, setter) = flagger.into_parts();
    let storage = setter.0.borrow();
    assert_eq!(storage.calls, vec![SummaryRequest::BOTH]);
    assert_eq!(storage.tables[0].num_flagged(), 1);
    assert_eq!(storage.tables[1].num_flagged(), 0);
    assert_eq!(storage.reads, 2);
}
