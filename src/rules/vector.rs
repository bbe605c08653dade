// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The rule engine for 1-D views (spectra).
//!
//! Every rule raises at most one command per view, selecting the list of
//! channels it flagged; the list is consolidated into ranges at the end.

use log::{info, trace, warn};
use ndarray::{Array1, Ix1};

use super::{DiffMadLimits, RuleContext, RuleOutcome, TmfLimits, VectorRule};
use crate::{
    command::{consolidate_channels, AxisSelection, FlagCommand},
    constants::FlagReason,
    error::FlaggingError,
    math::{median, median_and_mad, true_runs},
    view::{AxisKind, VectorView},
};

/// Apply `rules` in order to a 1-D view.
///
/// # Errors
///
/// [`FlaggingError::InvalidRuleParameter`] if a rule's limits are invalid.
pub fn generate_vector_flags(
    view: &VectorView,
    rules: &[VectorRule],
    ctx: &RuleContext,
) -> Result<RuleOutcome<Ix1>, FlaggingError> {
    for rule in rules {
        rule.validate()?;
    }

    if view.all_flagged() {
        return Ok(RuleOutcome::unchanged(view));
    }
    let valid = view.valid_data();
    let Some((data_median, data_mad)) = median_and_mad(&valid) else {
        return Ok(RuleOutcome::unchanged(view));
    };

    let mut engine = VectorEngine {
        view,
        ctx,
        data: view.data().to_vec(),
        flag: view.flag().to_vec(),
        flag_reason: vec![0; view.len()],
        commands: vec![],
    };

    for rule in rules {
        if engine.flag.iter().all(|&f| f) {
            break;
        }
        let before = engine.commands.len();
        match rule {
            VectorRule::Edges(l) => engine.edges(l.limit),
            VectorRule::MinAbs(l) => engine.flag_where(rule.reason(), |d| d.abs() < l.limit),
            VectorRule::NMedian(l) => {
                let (lo, hi) = (l.lo_limit * data_median, l.hi_limit * data_median);
                engine.flag_where(rule.reason(), |d| d > hi || d < lo)
            }
            VectorRule::Outlier(l) => {
                if valid.len() < l.minsample {
                    info!(
                        "{}: skipping rule '{}', {} unflagged samples is fewer than minsample {}",
                        view.description(),
                        rule,
                        valid.len(),
                        l.minsample
                    );
                } else {
                    let threshold = l.limit * data_mad;
                    engine.flag_where(rule.reason(), |d| (d - data_median).abs() > threshold);
                }
            }
            VectorRule::Sharps(l) => engine.sharps(l.limit),
            VectorRule::DiffMad(l) => engine.diffmad(l),
            VectorRule::Tmf(l) => engine.tmf(l),
        }
        trace!(
            "{}: rule '{}' raised {} flagging commands",
            view.description(),
            rule,
            engine.commands.len() - before
        );
    }

    Ok(RuleOutcome {
        commands: consolidate_channels(engine.commands),
        flag: Array1::from(engine.flag),
        flag_reason: Array1::from(engine.flag_reason),
    })
}

struct VectorEngine<'a> {
    view: &'a VectorView,
    ctx: &'a RuleContext,
    data: Vec<f64>,
    flag: Vec<bool>,
    flag_reason: Vec<u8>,
    commands: Vec<FlagCommand>,
}

impl<'a> VectorEngine<'a> {
    /// Flag the given channel indices (skipping any already flagged) and
    /// raise one command for them.
    fn flag_indices(&mut self, reason: FlagReason, indices: impl IntoIterator<Item = usize>) {
        let view = self.view;
        let axis = &view.axes()[0];
        let mut channels = vec![];
        for i in indices {
            if !self.flag[i] {
                self.flag[i] = true;
                self.flag_reason[i] = reason.code();
                channels.push(axis.channel_at(i));
            }
        }
        if channels.is_empty() {
            return;
        }
        let axis_name = if axis.kind() == AxisKind::Channel {
            axis.name.clone()
        } else {
            "channels".to_string()
        };
        let cmd = self
            .ctx
            .command(reason, view.scope())
            .with_selection(vec![axis_name], vec![AxisSelection::Channels(channels)])
            .with_channel_axis(Some(axis.clone()));
        self.commands.push(cmd);
    }

    fn flag_where<F: Fn(f64) -> bool>(&mut self, reason: FlagReason, predicate: F) {
        let indices: Vec<usize> = (0..self.data.len())
            .filter(|&i| !self.flag[i] && predicate(self.data[i]))
            .collect();
        self.flag_indices(reason, indices);
    }

    /// Flag everything outside the first channel (from each end) where the
    /// channel-to-channel difference settles.
    fn edges(&mut self, limit: f64) {
        let n = self.data.len();
        let description = self.view.description();
        let left_edge = find_small_diff(&self.data, &self.flag, limit, description);
        let reversed_data: Vec<f64> = self.data.iter().rev().copied().collect();
        let reversed_flag: Vec<bool> = self.flag.iter().rev().copied().collect();
        let right_edge = find_small_diff(&reversed_data, &reversed_flag, limit, description);

        let indices: Vec<usize> = (0..n)
            .filter(|&i| i < left_edge || (right_edge > 0 && i + right_edge >= n))
            .collect();
        self.flag_indices(FlagReason::Edges, indices);
    }

    /// The channel-to-channel differences and which of them involve a flagged
    /// channel.
    fn diffs(&self) -> (Vec<f64>, Vec<bool>) {
        let diff = self.data.windows(2).map(|w| w[1] - w[0]).collect();
        let diff_flag = self.flag.windows(2).map(|w| w[0] || w[1]).collect();
        (diff, diff_flag)
    }

    /// Flag both channels of every flagged difference.
    fn flag_diffs(&mut self, reason: FlagReason, newflag: &[bool]) {
        let indices: Vec<usize> = (0..self.data.len())
            .filter(|&i| newflag.get(i) == Some(&true) || (i > 0 && newflag[i - 1]))
            .collect();
        self.flag_indices(reason, indices);
    }

    /// Flag sharp features: channel differences above `limit`, broadened to
    /// the block of differences above twice the median quiet difference that
    /// contains them.
    fn sharps(&mut self, limit: f64) {
        if self.data.len() < 2 {
            return;
        }
        let (diff, diff_flag) = self.diffs();
        let diff: Vec<f64> = diff.into_iter().map(f64::abs).collect();
        let mut newflag: Vec<bool> = diff
            .iter()
            .zip(&diff_flag)
            .map(|(&d, &f)| d > limit && !f)
            .collect();

        let quiet: Vec<f64> = diff
            .iter()
            .zip(diff_flag.iter().zip(&newflag))
            .filter_map(|(&d, (&f, &n))| (!f && !n).then_some(d))
            .collect();
        let median_flag: Vec<bool> = match median(&quiet) {
            Some(median_diff) => diff
                .iter()
                .zip(&diff_flag)
                .map(|(&d, &f)| d > 2.0 * median_diff && !f)
                .collect(),
            None => newflag.clone(),
        };

        for block in true_runs(&median_flag) {
            if newflag[block.clone()].iter().any(|&f| f) {
                newflag[block].iter_mut().for_each(|f| *f = true);
            }
        }
        self.flag_diffs(FlagReason::Sharps, &newflag);
    }

    /// A MAD filter on the channel differences. If at least `nchan_limit`
    /// differences are outliers, the whole vector is flagged.
    fn diffmad(&mut self, limits: &DiffMadLimits) {
        if self.data.len() < 2 {
            return;
        }
        let (diff, diff_flag) = self.diffs();
        let valid: Vec<f64> = diff
            .iter()
            .zip(&diff_flag)
            .filter_map(|(&d, &f)| (!f).then_some(d))
            .collect();
        let Some((median_diff, mad)) = median_and_mad(&valid) else {
            return;
        };
        let mut newflag: Vec<bool> = diff
            .iter()
            .zip(&diff_flag)
            .map(|(&d, &f)| (d - median_diff).abs() > limits.limit * mad && !f)
            .collect();
        if newflag.iter().filter(|&&f| f).count() >= limits.nchan_limit {
            newflag.iter_mut().for_each(|f| *f = true);
        }
        self.flag_diffs(FlagReason::DiffMad, &newflag);
    }

    /// Flag the rest of the vector when too much of it is flagged already.
    fn tmf(&mut self, limits: &TmfLimits) {
        let n = self.flag.len();
        let nflagged = self.flag.iter().filter(|&&f| f).count();
        if nflagged as f64 / n as f64 >= limits.frac_limit || nflagged >= limits.nchan_limit {
            self.flag_indices(FlagReason::Tmf, 0..n);
        }
    }
}

/// The index in the first quarter of `data` where the difference between
/// consecutive unflagged samples first falls below `limit` times their median
/// difference. Falls back to 1, with a warning, if there is no such index.
fn find_small_diff(data: &[f64], flag: &[bool], limit: f64, description: &str) -> usize {
    let quarter = data.len() / 4;
    let (good_index, good_data): (Vec<usize>, Vec<f64>) = (0..quarter)
        .filter(|&i| !flag[i])
        .map(|i| (i, data[i]))
        .unzip();
    let good_diff: Vec<f64> = good_data.windows(2).map(|w| (w[1] - w[0]).abs()).collect();

    // The last two good samples are never an edge.
    let num_candidates = good_index.len().saturating_sub(2);
    let edge = median(&good_diff).and_then(|median_diff| {
        good_diff
            .iter()
            .take(num_candidates)
            .position(|&d| d < limit * median_diff)
            .map(|i| good_index[i])
    });
    match edge {
        Some(edge) => edge,
        None => {
            warn!("edge finder failed for:{description}");
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;
    use crate::{
        rules::{AbsLimit, NMedianLimits, OutlierLimits},
        view::{ViewAxis, ViewScope},
    };

    fn scope() -> ViewScope {
        ViewScope {
            filename: "uid___A002_X1.ms".to_string(),
            spw: Some(17),
            pol: Some("XX".to_string()),
            antenna: Some(3),
            ..Default::default()
        }
    }

    fn spectrum(data: Array1<f64>) -> VectorView {
        let n = data.len();
        VectorView::unflagged(data, vec![ViewAxis::channels(n)], scope()).unwrap()
    }

    fn flagged_spectrum(data: Array1<f64>, flag: Array1<bool>) -> VectorView {
        let n = data.len();
        VectorView::new(
            data,
            flag,
            Array1::from_elem(n, false),
            vec![ViewAxis::channels(n)],
            scope(),
        )
        .unwrap()
    }

    fn run(view: &VectorView, rules: &[VectorRule]) -> RuleOutcome<Ix1> {
        generate_vector_flags(view, rules, &RuleContext::default()).unwrap()
    }

    #[test]
    fn test_single_outlier_end_to_end() {
        let view = spectrum(array![1.0, 1.0, 1.0, 1.0, 100.0, 1.0, 1.0, 1.0, 1.0]);
        let rules = [VectorRule::Outlier(OutlierLimits {
            limit: 3.0,
            minsample: 3,
        })];
        let outcome = run(&view, &rules);
        assert_eq!(outcome.commands.len(), 1);
        assert_eq!(outcome.commands[0].channels(), Some(vec![4]));
        assert_eq!(outcome.commands[0].antenna, Some(3));
        assert_eq!(
            outcome.flag,
            array![false, false, false, false, true, false, false, false, false]
        );
        assert_eq!(outcome.flag_reason[4], FlagReason::Outlier.code());

        // a second pass over the flagged data raises nothing
        let second = view.with_flags_unioned(&outcome.flag).unwrap();
        let outcome = run(&second, &rules);
        assert!(outcome.commands.is_empty());
        assert_eq!(outcome.num_new_flags(), 0);
    }

    #[test]
    fn test_outlier_needs_minsample() {
        let view = spectrum(array![1.0, 1.0, 1000.0]);
        let rules = [VectorRule::Outlier(OutlierLimits {
            limit: 3.0,
            minsample: 10,
        })];
        assert!(run(&view, &rules).commands.is_empty());
    }

    #[test]
    fn test_min_abs_and_nmedian() {
        let view = spectrum(array![0.0, 1.0, 1.0, 2.0, 1.0, 0.5]);
        let rules = [
            VectorRule::MinAbs(AbsLimit { limit: 0.1 }),
            VectorRule::NMedian(NMedianLimits {
                lo_limit: 0.7,
                hi_limit: 1.3,
            }),
        ];
        let outcome = run(&view, &rules);
        assert_eq!(outcome.flag_reason, array![2u8, 0, 0, 3, 0, 3]);
        assert_eq!(outcome.commands.len(), 3);
        assert_eq!(outcome.commands[0].rule_name, "min abs");
        assert_eq!(outcome.commands[0].channels(), Some(vec![0]));
        // channels 3 and 5 are not contiguous
        assert_eq!(outcome.commands[1].channels(), Some(vec![3]));
        assert_eq!(outcome.commands[2].channels(), Some(vec![5]));
    }

    #[test]
    fn test_edges() {
        // steep roll-off over the first and last two channels
        let mut data = vec![0.0, 5.0];
        data.extend((0..28).map(|i| 10.0 + 0.1 * (i % 2) as f64));
        data.extend([5.0, 0.0]);
        let view = spectrum(Array1::from(data));
        let outcome = run(&view, &[VectorRule::Edges(AbsLimit { limit: 2.0 })]);
        let flagged: Vec<usize> = outcome
            .flag
            .iter()
            .enumerate()
            .filter_map(|(i, &f)| f.then_some(i))
            .collect();
        assert_eq!(flagged, vec![0, 1, 30, 31]);
        assert_eq!(outcome.commands.len(), 2);
        assert_eq!(outcome.commands[0].channels(), Some(vec![0, 1]));
        assert_eq!(outcome.commands[1].channels(), Some(vec![30, 31]));
        assert!(outcome
            .flag_reason
            .iter()
            .all(|&r| r == 0 || r == FlagReason::Edges.code()));
    }

    #[test]
    fn test_edge_finder_fallback() {
        // a flat first quarter has no difference below limit * 0
        assert_eq!(find_small_diff(&[1.0; 16], &[false; 16], 2.0, "flat"), 1);
        // too short to have any difference
        assert_eq!(find_small_diff(&[1.0, 2.0, 3.0], &[false; 3], 2.0, "short"), 1);
    }

    #[test]
    fn test_edge_finder_skips_flagged() {
        let mut data = vec![0.0; 32];
        data[..8].copy_from_slice(&[0.0, 9.0, 20.0, 10.0, 10.1, 10.0, 10.1, 10.2]);
        let mut flag = vec![false; 32];
        flag[2] = true;
        assert_eq!(find_small_diff(&data, &flag, 2.0, "skip"), 3);
    }

    #[test]
    fn test_sharps_broadens_to_wings() {
        // a spike at channel 8 with wings at 7 and 9
        let mut data: Vec<f64> = (0..16).map(|i| 1.0 + 0.001 * (i % 2) as f64).collect();
        data[7] = 1.03;
        data[8] = 1.5;
        data[9] = 1.03;
        let view = spectrum(Array1::from(data));
        let outcome = run(&view, &[VectorRule::Sharps(AbsLimit { limit: 0.05 })]);
        let flagged: Vec<usize> = outcome
            .flag
            .iter()
            .enumerate()
            .filter_map(|(i, &f)| f.then_some(i))
            .collect();
        assert_eq!(flagged, vec![6, 7, 8, 9, 10]);
        assert_eq!(outcome.commands.len(), 1);
        assert_eq!(outcome.commands[0].channels(), Some(vec![6, 7, 8, 9, 10]));
    }

    #[test]
    fn test_diffmad_escalates() {
        let mut data: Vec<f64> = (0..20).map(|i| if i % 2 == 0 { 1.0 } else { 1.1 }).collect();
        data[5] = 50.0;
        let rule = |nchan_limit| {
            [VectorRule::DiffMad(DiffMadLimits {
                limit: 10.0,
                nchan_limit,
            })]
        };
        let view = spectrum(Array1::from(data));

        // the spike makes two outlying differences, flagging channels 4-6
        let outcome = run(&view, &rule(4));
        let flagged: Vec<usize> = outcome
            .flag
            .iter()
            .enumerate()
            .filter_map(|(i, &f)| f.then_some(i))
            .collect();
        assert_eq!(flagged, vec![4, 5, 6]);

        // with a lower limit the whole vector goes
        let outcome = run(&view, &rule(2));
        assert!(outcome.flag.iter().all(|&f| f));
        assert_eq!(outcome.commands.len(), 1);
        assert_eq!(outcome.commands[0].channels(), Some((0..20).collect()));
    }

    #[test]
    fn test_tmf() {
        let mut flag = Array1::from_elem(20, false);
        flag[0] = true;
        let view = flagged_spectrum(Array1::from_elem(20, 1.0), flag);
        let rule = |frac_limit, nchan_limit| {
            [VectorRule::Tmf(TmfLimits {
                frac_limit,
                nchan_limit,
            })]
        };
        assert!(run(&view, &rule(0.1, 4)).commands.is_empty());
        let outcome = run(&view, &rule(0.05, 4));
        assert!(outcome.flag.iter().all(|&f| f));
        assert_eq!(outcome.num_new_flags(), 19);
        assert_eq!(outcome.commands[0].channels(), Some((1..20).collect()));
        let outcome = run(&view, &rule(0.5, 1));
        assert_eq!(outcome.num_new_flags(), 19);
    }

    #[test]
    fn test_all_flagged_is_idempotent() {
        let view = flagged_spectrum(array![1.0, 100.0, 0.0], array![true, true, true]);
        let rules = crate::rules::VectorRuleConfig {
            flag_edges: true,
            flag_minabs: true,
            flag_nmedian: true,
            flag_hilo: true,
            flag_sharps: true,
            flag_diffmad: true,
            flag_tmf: true,
            ..Default::default()
        }
        .rules();
        let outcome = run(&view, &rules);
        assert!(outcome.commands.is_empty());
        assert_eq!(outcome.flag_reason, array![0u8, 0, 0]);
    }
}
