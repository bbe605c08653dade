// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The rule engine for 2-D views.

use log::{debug, info, trace};
use ndarray::{Array2, Ix2, Zip};

use super::{
    BadAntennaLimits, BadQuadrantLimits, EntirelyFlaggedLimits, MatrixRule, RuleContext,
    RuleOutcome, TooManyFlagsLimits,
};
use crate::{
    command::{consolidate_channels, AxisSelection, FlagCommand},
    constants::{FlagReason, NUM_QUADRANTS},
    error::FlaggingError,
    math::{
        median, median_and_mad, num_ants_from_num_ordered_baselines, ordered_baselines_for_ant,
        partition_bounds,
    },
    view::{AxisKind, Coord, MatrixView},
};

/// Apply `rules` in order to a 2-D view.
///
/// The median and MAD of the unflagged samples are computed once, before any
/// rule runs, and shared by every statistical rule. Each rule only considers
/// samples left unflagged by the rules before it, so a sample's reason code
/// is that of the first rule to flag it.
///
/// # Errors
///
/// [`FlaggingError::InvalidRuleParameter`] if a rule's limits are invalid.
pub fn generate_matrix_flags(
    view: &MatrixView,
    rules: &[MatrixRule],
    ctx: &RuleContext,
) -> Result<RuleOutcome<Ix2>, FlaggingError> {
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

    let mut engine = MatrixEngine {
        view,
        ctx,
        flag: view.flag().clone(),
        flag_reason: Array2::zeros(view.flag().raw_dim()),
        commands: vec![],
        data_median,
        data_mad,
        num_valid: valid.len(),
    };

    for rule in rules {
        if engine.flag.iter().all(|&f| f) {
            break;
        }
        let before = engine.commands.len();
        match rule {
            MatrixRule::Outlier(l) => {
                if engine.enough_samples(rule, l.minsample) {
                    let threshold = l.limit * data_mad;
                    engine.flag_where(rule.reason(), false, |d| (d - data_median).abs() > threshold);
                }
            }
            MatrixRule::HighOutlier(l) => {
                if engine.enough_samples(rule, l.minsample) {
                    let threshold = l.limit * data_mad;
                    engine.flag_where(rule.reason(), false, |d| d - data_median > threshold);
                }
            }
            MatrixRule::LowOutlier(l) => {
                if engine.enough_samples(rule, l.minsample) {
                    let threshold = l.limit * data_mad;
                    engine.flag_where(rule.reason(), false, |d| data_median - d > threshold);
                }
            }
            MatrixRule::MinAbs(l) => engine.flag_where(rule.reason(), false, |d| d.abs() < l.limit),
            MatrixRule::MaxAbs(l) => engine.flag_where(rule.reason(), true, |d| d.abs() > l.limit),
            MatrixRule::NMedian(l) => {
                let (lo, hi) = (l.lo_limit * data_median, l.hi_limit * data_median);
                engine.flag_where(rule.reason(), true, |d| d > hi || d < lo)
            }
            MatrixRule::TooManyFlags(l) => engine.too_many_flags(l),
            MatrixRule::TooManyEntirelyFlagged(l) => engine.too_many_entirely_flagged(l),
            MatrixRule::BadAntenna(l) => engine.bad_antenna(l),
            MatrixRule::BadQuadrant(l) => engine.bad_quadrant(l),
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
        flag: engine.flag,
        flag_reason: engine.flag_reason,
    })
}

/// The working state of one evaluation.
struct MatrixEngine<'a> {
    view: &'a MatrixView,
    ctx: &'a RuleContext,
    flag: Array2<bool>,
    flag_reason: Array2<u8>,
    commands: Vec<FlagCommand>,
    data_median: f64,
    data_mad: f64,
    num_valid: usize,
}

/// A position along one of the two view axes.
#[derive(Clone, Copy)]
enum Along {
    X,
    Y,
}

impl Along {
    fn index(self) -> usize {
        match self {
            Along::X => 0,
            Along::Y => 1,
        }
    }

    /// The (x, y) index of element `n` of lane `lane`, where lanes run along
    /// `self`.
    fn at(self, n: usize, lane: usize) -> (usize, usize) {
        match self {
            Along::X => (n, lane),
            Along::Y => (lane, n),
        }
    }
}

impl<'a> MatrixEngine<'a> {
    fn enough_samples(&self, rule: &MatrixRule, minsample: usize) -> bool {
        if self.num_valid < minsample {
            info!(
                "{}: skipping rule '{}', {} unflagged samples is fewer than minsample {}",
                self.view.description(),
                rule,
                self.num_valid,
                minsample
            );
            false
        } else {
            true
        }
    }

    /// The selection of sample `idx` along axis `axis`. Channel axes select
    /// by channel number so that commands can be consolidated into ranges.
    fn selection(&self, axis: usize, idx: usize) -> AxisSelection {
        let view_axis = &self.view.axes()[axis];
        match view_axis.kind() {
            AxisKind::Channel => AxisSelection::channel(view_axis.channel_at(idx)),
            _ => AxisSelection::Value(view_axis.data[idx].clone()),
        }
    }

    fn channel_axis(&self) -> Option<usize> {
        self.view
            .axes()
            .iter()
            .position(|a| a.kind() == AxisKind::Channel)
    }

    fn base_command(&self, reason: FlagReason, extend: bool) -> FlagCommand {
        let scope = self.view.scope();
        let cmd = if extend {
            self.ctx.extended_command(reason, scope)
        } else {
            self.ctx.command(reason, scope)
        };
        cmd.with_channel_axis(self.channel_axis().map(|c| self.view.axes()[c].clone()))
    }

    /// A command for the single sample at (i, j).
    fn sample_command(&self, reason: FlagReason, extend: bool, (i, j): (usize, usize)) -> FlagCommand {
        let names = self.view.axes().iter().map(|a| a.name.clone()).collect();
        self.base_command(reason, extend)
            .with_selection(names, vec![self.selection(0, i), self.selection(1, j)])
    }

    /// Flag every unflagged sample satisfying `predicate`, with one command
    /// per sample.
    fn flag_where<F: Fn(f64) -> bool>(&mut self, reason: FlagReason, extend: bool, predicate: F) {
        let mut mask = Array2::from_elem(self.flag.raw_dim(), false);
        Zip::from(&mut mask)
            .and(self.view.data())
            .and(&self.flag)
            .for_each(|m, &d, &f| *m = !f && predicate(d));
        let indices: Vec<(usize, usize)> = mask
            .indexed_iter()
            .filter_map(|(ij, &m)| m.then_some(ij))
            .collect();
        self.flag_samples(reason, extend, &indices);
    }

    /// Flag the given samples (skipping any already flagged), with one
    /// command per sample.
    fn flag_samples(&mut self, reason: FlagReason, extend: bool, indices: &[(usize, usize)]) {
        for &ij in indices {
            if self.flag[ij] {
                continue;
            }
            let cmd = self.sample_command(reason, extend, ij);
            self.commands.push(cmd);
            self.flag[ij] = true;
            self.flag_reason[ij] = reason.code();
        }
    }

    /// Which axis a rule's axis name refers to.
    fn resolve_axis(&self, rule: FlagReason, axis: &str) -> Option<Along> {
        let axes = self.view.axes();
        if axes[0].is_named(axis) {
            Some(Along::X)
        } else if axes[1].is_named(axis) {
            Some(Along::Y)
        } else {
            debug!(
                "{}: rule '{}' axis '{}' is not an axis of this view; skipping",
                self.view.description(),
                rule,
                axis
            );
            None
        }
    }

    /// For each lane along the rule axis, flag the rest of the lane when too
    /// much of it is flagged already.
    fn too_many_flags(&mut self, limits: &TooManyFlagsLimits) {
        let reason = FlagReason::TooManyFlags;
        let Some(along) = self.resolve_axis(reason, &limits.axis) else {
            return;
        };
        let len_data = self.flag.shape()[along.index()];
        let num_lanes = self.flag.shape()[1 - along.index()];

        let num_flagged: Vec<f64> = (0..num_lanes)
            .map(|lane| {
                (0..len_data)
                    .filter(|&n| self.flag[along.at(n, lane)])
                    .count() as f64
            })
            .collect();
        let Some(median_num_flagged) = median(&num_flagged) else {
            return;
        };

        for lane in 0..num_lanes {
            let cells: Vec<(usize, usize)> = (0..len_data).map(|n| along.at(n, lane)).collect();
            let len_flagged = cells.iter().filter(|&&ij| self.flag[ij]).count();
            if len_flagged == len_data {
                continue;
            }
            let len_no_data = cells.iter().filter(|&&ij| self.view.no_data()[ij]).count();
            if len_data == len_no_data {
                continue;
            }
            let fraction_flagged =
                (len_flagged as f64 - len_no_data as f64) / (len_data - len_no_data) as f64;
            if fraction_flagged > limits.limit
                || len_flagged as f64 > median_num_flagged + limits.excess_limit as f64
            {
                self.flag_samples(reason, false, &cells);
            }
        }
    }

    /// Flag everything when too many elements of the rule axis are entirely
    /// flagged.
    fn too_many_entirely_flagged(&mut self, limits: &EntirelyFlaggedLimits) {
        let reason = FlagReason::TooManyEntirelyFlagged;
        let Some(along) = self.resolve_axis(reason, &limits.axis) else {
            return;
        };
        // Elements of the rule axis; each spans the other axis.
        let num_elements = self.flag.shape()[along.index()];
        let span = self.flag.shape()[1 - along.index()];
        let num_entirely_flagged = (0..num_elements)
            .filter(|&e| (0..span).all(|s| self.flag[along.at(e, s)]))
            .count();
        if num_elements == 0 {
            return;
        }
        let frac = num_entirely_flagged as f64 / num_elements as f64;
        if frac > limits.limit {
            let cells: Vec<(usize, usize)> = self
                .flag
                .indexed_iter()
                .filter_map(|(ij, &f)| (!f).then_some(ij))
                .collect();
            self.flag_samples(reason, false, &cells);
        }
    }

    /// Flag whole antennas with too many low outliers, relative to the
    /// statistics of the whole view. Each bad antenna gets a single command.
    ///
    /// Only a first-antenna axis ("ANTENNA", "ANTENNA1") is considered. The
    /// command's antenna id comes from the axis coordinate; a label is mapped
    /// back to an id through the antenna name table and is left as `None`
    /// when no table knows it. The selection always carries the coordinate.
    fn bad_antenna(&mut self, limits: &BadAntennaLimits) {
        let Some(ant_axis) = self
            .view
            .axes()
            .iter()
            .position(|a| a.kind().is_antenna())
        else {
            debug!(
                "{}: no antenna axis for rule 'bad antenna'; skipping",
                self.view.description()
            );
            return;
        };
        let along = if ant_axis == 0 { Along::Y } else { Along::X };
        let num_ants = self.flag.shape()[ant_axis];
        let row_len = self.flag.shape()[1 - ant_axis];
        let threshold = limits.lo_limit * self.data_mad;

        for iant in 0..num_ants {
            let cells: Vec<(usize, usize)> = (0..row_len).map(|n| along.at(n, iant)).collect();
            let num_valid = cells.iter().filter(|&&ij| !self.flag[ij]).count();
            if num_valid < limits.minsample {
                info!(
                    "{}: skipping antenna index {} for rule 'bad antenna', {} unflagged samples is fewer than minsample {}",
                    self.view.description(),
                    iant,
                    num_valid,
                    limits.minsample
                );
                continue;
            }

            let low: Vec<(usize, usize)> = cells
                .iter()
                .copied()
                .filter(|&ij| !self.flag[ij] && self.data_median - self.view.data()[ij] > threshold)
                .collect();
            let nflags = low.len();
            if nflags == 0 {
                continue;
            }
            let flagsfrac = nflags as f64 / row_len as f64;
            if nflags < limits.number_limit && flagsfrac <= limits.frac_limit {
                continue;
            }

            for &ij in &low {
                self.flag[ij] = true;
                self.flag_reason[ij] = FlagReason::LowOutlier.code();
            }
            for &ij in &cells {
                if !self.flag[ij] {
                    self.flag[ij] = true;
                    self.flag_reason[ij] = FlagReason::BadAntenna.code();
                }
            }

            let axis = &self.view.axes()[ant_axis];
            let coord = axis.data[iant].clone();
            let cmd = self
                .base_command(FlagReason::BadAntenna, false)
                .with_antenna(self.antenna_id(&coord))
                .with_selection(vec![axis.name.clone()], vec![AxisSelection::Value(coord)]);
            self.commands.push(cmd);
        }
    }

    fn antenna_id(&self, coord: &Coord) -> Option<usize> {
        match coord {
            Coord::Label(label) => self
                .ctx
                .antenna_id_to_name
                .as_ref()
                .and_then(|names| names.iter().find(|(_, name)| *name == label))
                .map(|(&id, _)| id),
            _ => coord.as_index(),
        }
    }

    /// Flag antenna (and failing that, baseline) quadrants of the channel
    /// axis where too many new outliers are found.
    fn bad_quadrant(&mut self, limits: &BadQuadrantLimits) {
        let Some(chan_axis) = self.channel_axis() else {
            debug!(
                "{}: no channel axis for rule 'bad quadrant'; skipping",
                self.view.description()
            );
            return;
        };
        let bl_axis = 1 - chan_axis;
        // (channel, baseline) -> (x, y)
        let at = |chan: usize, bl: usize| if chan_axis == 0 { (chan, bl) } else { (bl, chan) };

        let threshold = limits.hilo_limit * self.data_mad;
        let flag_on_entry = self.flag.clone();
        let mut flag_copy = self.flag.clone();
        let mut reason_copy = self.flag_reason.clone();
        Zip::from(&mut flag_copy)
            .and(&mut reason_copy)
            .and(self.view.data())
            .for_each(|f, r, &d| {
                if !*f && (d - self.data_median).abs() > threshold {
                    *f = true;
                    *r = FlagReason::Outlier.code();
                }
            });

        let nchan = self.flag.shape()[chan_axis];
        let nbaseline = self.flag.shape()[bl_axis];
        let nant = num_ants_from_num_ordered_baselines(nbaseline);
        let quadrants = partition_bounds(nchan, NUM_QUADRANTS);
        let chan_view_axis = self.view.axes()[chan_axis].clone();
        let bl_view_axis = self.view.axes()[bl_axis].clone();

        let new_fraction = |working: &Array2<bool>, cells: &[(usize, usize)]| {
            let ninvalid = cells.iter().filter(|&&ij| working[ij]).count();
            let ninvalid_on_entry = cells.iter().filter(|&&ij| flag_on_entry[ij]).count();
            let nvalid_on_entry = cells.len() - ninvalid_on_entry;
            if nvalid_on_entry > 0 {
                (ninvalid as f64 - ninvalid_on_entry as f64) / nvalid_on_entry as f64
            } else {
                0.0
            }
        };

        for ant in 0..nant {
            let mut working = flag_copy.clone();
            let mut working_reason = reason_copy.clone();
            let baselines = ordered_baselines_for_ant(nbaseline, nant, ant);

            for quadrant in quadrants.iter().filter(|q| !q.is_empty()) {
                let channels = ChannelBlock {
                    start: chan_view_axis.channel_at(quadrant.start),
                    end: chan_view_axis.channel_at(quadrant.end - 1),
                };

                let block: Vec<(usize, usize)> = quadrant
                    .clone()
                    .flat_map(|chan| baselines.iter().map(move |&bl| (chan, bl)))
                    .map(|(chan, bl)| at(chan, bl))
                    .collect();
                if new_fraction(&working, &block) > limits.frac_limit {
                    self.copy_back(&mut working, &mut working_reason, &block);
                    let cmd = self
                        .base_command(FlagReason::BadQuadrant, true)
                        .with_antenna(Some(ant))
                        .with_selection(vec![chan_view_axis.name.clone()], vec![channels.selection()]);
                    self.commands.push(cmd);
                    continue;
                }

                for &bl in &baselines {
                    let cells: Vec<(usize, usize)> =
                        quadrant.clone().map(|chan| at(chan, bl)).collect();
                    if new_fraction(&working, &cells) > limits.baseline_frac_limit {
                        self.copy_back(&mut working, &mut working_reason, &cells);
                        let mut names = vec![chan_view_axis.name.clone(), bl_view_axis.name.clone()];
                        let mut selections = vec![
                            channels.selection(),
                            AxisSelection::Value(bl_view_axis.data[bl].clone()),
                        ];
                        if chan_axis == 1 {
                            names.reverse();
                            selections.reverse();
                        }
                        let cmd = self
                            .base_command(FlagReason::BadQuadrant, true)
                            .with_selection(names, selections);
                        self.commands.push(cmd);
                    }
                }
            }
        }
    }

    /// Flag a block in the working copy, then copy the block's flags and
    /// reasons into the evaluation state. Provisional outliers inside the
    /// block keep the "outlier" reason.
    fn copy_back(
        &mut self,
        working: &mut Array2<bool>,
        working_reason: &mut Array2<u8>,
        cells: &[(usize, usize)],
    ) {
        for &ij in cells {
            if !working[ij] {
                working[ij] = true;
                working_reason[ij] = FlagReason::BadQuadrant.code();
            }
            self.flag[ij] = working[ij];
            self.flag_reason[ij] = working_reason[ij];
        }
    }
}

#[derive(Clone, Copy)]
struct ChannelBlock {
    start: usize,
    end: usize,
}

impl ChannelBlock {
    fn selection(self) -> AxisSelection {
        AxisSelection::ChannelRange {
            start: self.start.min(self.end),
            end: self.start.max(self.end),
        }
    }
}
