// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Iterative, rule-based flagging of radio-astronomy data views.
//!
//! A *view* is a 1-D or 2-D snapshot of some measurement (e.g. an amplitude
//! per antenna and time, or a spectrum) with a flag mask. Rules decide which
//! samples of a view are bad and raise [`FlagCommand`]s describing them in
//! terms of the underlying measurement set or caltable. A flagger controller
//! repeats "fetch views, evaluate rules, apply commands" until no new commands
//! are raised, and reports the views, commands and before/after summaries.

pub mod command;
pub mod constants;
pub mod error;
pub mod flagger;
pub mod math;
pub mod results;
pub mod rules;
pub mod summary;
pub mod view;

// Re-exports.
pub use command::{consolidate_channels, dedup_commands, AntennaNames, AxisSelection, FlagCommand};
pub use constants::FlagReason;
pub use error::FlaggingError;
pub use flagger::{
    DataTask, FlagSetterTask, Flagger, FlaggerInputs, MatrixFlagger, MeasurementSetInfo,
    NewMatrixFlagger, NewVectorFlagger, PassThroughView, VectorFlagger, ViewTask,
};
pub use results::{FlaggableViewResults, FlaggerResult, Termination};
pub use rules::{
    generate_matrix_flags, generate_vector_flags, MatrixRule, MatrixRuleConfig, Rule,
    RuleContext, RuleOutcome, VectorRule, VectorRuleConfig,
};
pub use summary::{FlagCounts, FlagSummary, SetterResult, SummaryRequest};
pub use view::{
    AxisKind, Coord, FlaggableView, MatrixView, VectorView, ViewAxis, ViewCollection, ViewScope,
};

pub use hifitime;
pub use ndarray;
pub use rayon;

cfg_if::cfg_if! {
    if #[cfg(feature = "serde")] {
        pub use serde;
    }
}

#[cfg(test)]
#[test]
fn hifitime_renders_mjd_seconds() {
    use hifitime::Epoch;

    // 2016-03-09 00:00:00 UTC
    let mjd_s = 57456.0 * constants::DAYSEC;
    let epoch = Epoch::from_mjd_utc(mjd_s / constants::DAYSEC);
    approx::assert_abs_diff_eq!(epoch.to_mjd_utc_days(), 57456.0, epsilon = 1e-9);
    let (y, m, d, ..) = epoch.to_gregorian_utc();
    assert_eq!((y, m, d), (2016, 3, 9));
}
