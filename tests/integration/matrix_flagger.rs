// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{cell::RefCell, rc::Rc};

use ndarray::{Array2, Ix2, IxDyn};

use viewflagger::{
    flagger::AntennaInfo, Coord, FlagReason, FlaggerInputs, FlaggingError, MatrixFlagger,
    MatrixRuleConfig, MatrixView, MeasurementSetInfo, NewMatrixFlagger, SummaryRequest,
    Termination, ViewAxis, ViewCollection, ViewScope,
};

use super::storage::{reader, MockStorage, StorageFlagSetter, Table};

const MS: &str = "uid___A002_X1.ms";

fn scope(spw: usize) -> ViewScope {
    ViewScope {
        filename: MS.to_string(),
        spw: Some(spw),
        pol: Some("XX".to_string()),
        ..Default::default()
    }
}

fn axes(nant: usize, ntime: usize) -> Vec<ViewAxis> {
    vec![
        ViewAxis::new("Antenna1", "id", (0..nant).map(Coord::from).collect()),
        ViewAxis::new(
            "Time",
            "s",
            (0..ntime).map(|t| Coord::Float(4.8e9 + 10.0 * t as f64)).collect(),
        ),
    ]
}

/// 4 antennas x 10 times of constant amplitude.
fn amplitudes() -> Array2<f64> {
    Array2::from_elem((4, 10), 10.0)
}

fn table(spw: usize, data: Array2<f64>) -> Table {
    let (nant, ntime) = data.dim();
    Table::new(scope(spw), axes(nant, ntime), data)
}

/// spw 17 has a dead antenna 2; spw 19 has a single spike.
fn storage() -> Rc<RefCell<MockStorage>> {
    let mut spw17 = amplitudes();
    spw17.row_mut(2).fill(2.0);
    let mut spw19 = amplitudes();
    spw19[(0, 3)] = 50.0;
    MockStorage::new(vec![table(17, spw17), table(19, spw19)])
}

fn rules() -> MatrixRuleConfig {
    MatrixRuleConfig {
        flag_bad_antenna: true,
        flag_hilo: true,
        ..Default::default()
    }
}

fn description(spw: usize) -> String {
    format!("{MS} spw:{spw} pol:XX [Antenna1 vs Time]")
}

fn assert_monotonic(result: &viewflagger::FlaggerResult<Ix2, ViewCollection<Ix2>>) {
    for description in result.descriptions() {
        let counts: Vec<usize> = result
            .views()
            .snapshots(&description)
            .iter()
            .map(|v| v.num_flagged())
            .collect();
        assert!(
            counts.windows(2).all(|w| w[0] <= w[1]),
            "{description}: {counts:?}"
        );
    }
}

#[test]
fn test_iterated_matrix_flagging() {
    let storage = storage();
    let inputs = FlaggerInputs::new(MS, rules().rules())
        .with_niter(5)
        .with_iter_datatask(true);
    let mut flagger = MatrixFlagger::new(
        inputs,
        reader(&storage),
        StorageFlagSetter(Rc::clone(&storage)),
    );
    let result = flagger.execute().unwrap();

    assert_eq!(result.iterations, 2);
    assert_eq!(result.termination, Termination::Converged);
    assert_eq!(result.descriptions(), vec![description(17), description(19)]);

    let flagcmds = result.flagcmds();
    assert_eq!(flagcmds.len(), 2);
    let bad_antenna = flagcmds
        .iter()
        .find(|c| c.rule_name == "bad antenna")
        .unwrap();
    assert_eq!(bad_antenna.antenna, Some(2));
    assert_eq!(bad_antenna.spw, vec![17]);
    let outlier = flagcmds.iter().find(|c| c.rule_name == "outlier").unwrap();
    assert_eq!(outlier.spw, vec![19]);

    // storage: all of antenna 2 in spw 17 and the spike in spw 19
    let storage = storage.borrow();
    assert_eq!(storage.num_flagged(), 11);
    assert!(storage.tables[1].flag[IxDyn(&[0, 3])]);
    assert_eq!(
        storage.calls,
        vec![SummaryRequest::BEFORE, SummaryRequest::AFTER]
    );
    assert_eq!(storage.reads, 2);

    assert_eq!(result.before().flagged(), 0);
    assert_eq!(result.after().flagged(), 11);
    assert_eq!(result.after().breakdown["spw"]["17"].flagged, 10);
    assert!(result.after().flagged() >= result.before().flagged());

    let plane = result.flag_reason_plane(&description(17)).unwrap();
    assert!(plane
        .row(2)
        .iter()
        .all(|&r| r == FlagReason::LowOutlier.code()));
    assert_eq!(plane.row(0).iter().filter(|&&r| r > 0).count(), 0);
    assert_eq!(
        result.flag_reason_key().get(&plane[(2, 0)]),
        Some(&FlagReason::LowOutlier)
    );

    assert_eq!(result.last(&description(17)).unwrap().num_flagged(), 10);
    assert_monotonic(&result);
}

#[test]
fn test_reused_matrix_views() {
    let storage = storage();
    let inputs = FlaggerInputs::new(MS, rules().rules()).with_niter(5);
    let mut flagger = MatrixFlagger::new(
        inputs,
        reader(&storage),
        StorageFlagSetter(Rc::clone(&storage)),
    );
    let result = flagger.execute().unwrap();

    assert_eq!(result.iterations, 2);
    assert_eq!(result.termination, Termination::Converged);
    assert_eq!(result.flagcmds().len(), 2);
    // two iterations and the post-flagging views
    assert_eq!(result.views().num_snapshots(&description(17)), 3);
    assert_eq!(result.last(&description(19)).unwrap().num_flagged(), 1);
    assert_eq!(result.viewresult.len(), 2);
    assert!(result.dataresult.is_some());

    let storage = storage.borrow();
    assert_eq!(storage.calls, vec![SummaryRequest::BOTH]);
    assert_eq!(storage.reads, 2);
    assert_eq!(result.before().flagged(), 0);
    assert_eq!(result.after().flagged(), 11);
    assert_monotonic(&result);
}

#[test]
fn test_single_iteration_still_applies_flags() {
    let storage = storage();
    let inputs = FlaggerInputs::new(MS, rules().rules())
        .with_niter(1)
        .with_iter_datatask(true);
    let mut flagger = MatrixFlagger::new(
        inputs,
        reader(&storage),
        StorageFlagSetter(Rc::clone(&storage)),
    );
    let result = flagger.execute().unwrap();

    assert_eq!(result.iterations, 1);
    assert_eq!(result.termination, Termination::MaxIterReached);
    let storage = storage.borrow();
    assert_eq!(storage.num_flagged(), 11);
    assert_eq!(storage.calls, vec![SummaryRequest::BOTH]);
    // the initial read and the post-flagging read
    assert_eq!(storage.reads, 2);
    assert_eq!(result.after().flagged(), 11);
    assert_eq!(result.last(&description(17)).unwrap().num_flagged(), 10);
}

#[test]
fn test_clean_data_raises_nothing() {
    let storage = MockStorage::new(vec![table(17, amplitudes()), table(19, amplitudes())]);
    let inputs = FlaggerInputs::new(MS, rules().rules())
        .with_niter(5)
        .with_iter_datatask(true);
    let mut flagger = MatrixFlagger::new(
        inputs,
        reader(&storage),
        StorageFlagSetter(Rc::clone(&storage)),
    );
    let result = flagger.execute().unwrap();

    assert_eq!(result.iterations, 1);
    assert_eq!(result.termination, Termination::Converged);
    assert!(result.flagcmds().is_empty());
    assert_eq!(result.before().counts, result.after().counts);
    assert_eq!(result.before().total(), 80);
    assert_eq!(storage.borrow().calls, vec![SummaryRequest::BEFORE]);
}

#[test]
fn test_antenna_names_and_baseband_extension() {
    let storage = storage();
    let ms_info = MeasurementSetInfo {
        antennas: ["DA41", "DA42", "DV03", "DV04"]
            .iter()
            .enumerate()
            .map(|(id, name)| AntennaInfo {
                id,
                name: name.to_string(),
            })
            .collect(),
        spw_basebands: [(17, 1), (19, 1), (21, 2)].into_iter().collect(),
    };
    let config = MatrixRuleConfig {
        flag_bad_antenna: true,
        ..Default::default()
    };
    let inputs = FlaggerInputs::new(MS, config.rules())
        .with_niter(5)
        .with_iter_datatask(true)
        .with_extend_baseband(true)
        .with_ms_info(ms_info);
    let mut flagger = MatrixFlagger::new(
        inputs,
        reader(&storage),
        StorageFlagSetter(Rc::clone(&storage)),
    );
    let result = flagger.execute().unwrap();

    let flagcmds = result.flagcmds();
    assert_eq!(flagcmds.len(), 1);
    assert_eq!(flagcmds[0].spw, vec![17, 19]);
    assert!(flagcmds[0].extend_baseband);
    assert_eq!(
        flagcmds[0].flagcmd(),
        "mode='manual' antenna='DV03' spw='17,19' correlation='XX' reason='bad antenna'"
    );

    // the command reached antenna 2 of spw 19 as well
    let storage = storage.borrow();
    assert_eq!(storage.tables[1].num_flagged(), 10);
    assert_eq!(result.after().flagged(), 20);
    assert_eq!(result.termination, Termination::Converged);
}

/// "Raw" data as read from storage: one (scope, amplitude, flag) per spw.
type RawData = Vec<(ViewScope, Array2<f64>, Array2<bool>)>;

#[test]
fn test_separate_view_task() {
    let storage = storage();
    let raw_storage = Rc::clone(&storage);
    let datatask = move || -> Result<RawData, FlaggingError> {
        let mut storage = raw_storage.borrow_mut();
        storage.reads += 1;
        let raw = storage
            .tables
            .iter()
            .map(|t| -> Result<_, FlaggingError> {
                let to_task_error = |e: ndarray::ShapeError| FlaggingError::Task {
                    task: "datatask".to_string(),
                    message: e.to_string(),
                };
                Ok((
                    t.scope.clone(),
                    t.data.clone().into_dimensionality::<Ix2>().map_err(to_task_error)?,
                    t.flag.clone().into_dimensionality::<Ix2>().map_err(to_task_error)?,
                ))
            })
            .collect();
        raw
    };
    let viewtask = |raw: &RawData| -> Result<ViewCollection<Ix2>, FlaggingError> {
        raw.iter()
            .map(|(scope, data, flag)| {
                let (nant, ntime) = data.dim();
                MatrixView::new(
                    data.mapv(|d| d * d),
                    flag.clone(),
                    Array2::from_elem((nant, ntime), false),
                    axes(nant, ntime),
                    scope.clone(),
                )
                .map(|v| {
                    v.with_datatype("power")
                        .with_description(format!("power spw {}", scope.spw.unwrap_or(0)))
                })
            })
            .collect()
    };
    let inputs = FlaggerInputs::new(MS, rules().rules())
        .with_niter(5)
        .with_iter_datatask(true)
        .with_prepend("flagging power: ");
    let mut flagger = NewMatrixFlagger::with_viewtask(
        inputs,
        datatask,
        viewtask,
        StorageFlagSetter(Rc::clone(&storage)),
    );
    let result = flagger.execute().unwrap();

    assert_eq!(result.descriptions(), vec!["power spw 17", "power spw 19"]);
    assert_eq!(result.termination, Termination::Converged);
    assert_eq!(result.flagcmds().len(), 2);
    assert_eq!(result.dataresult.as_ref().map(Vec::len), Some(2));
    assert_eq!(result.first("power spw 19").unwrap().datatype(), "power");
    assert_eq!(storage.borrow().num_flagged(), 11);
}
