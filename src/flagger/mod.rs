// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The flagger controllers: iterate "fetch views, evaluate rules, apply flag
//! commands" until no new commands are raised or `niter` iterations have run.
//!
//! The controllers talk to storage only through three collaborators:
//! - a [`DataTask`] reads the current data;
//! - a [`ViewTask`] turns that data into flaggable views;
//! - a [`FlagSetterTask`] applies flag commands and summarises the flags in
//!   storage.
//!
//! [`MatrixFlagger`] and [`VectorFlagger`] take a data task that produces the
//! views directly; [`NewMatrixFlagger`] and [`NewVectorFlagger`] separate the
//! (expensive) data fetch from the (cheap) view computation.

mod inputs;

pub use inputs::{AntennaInfo, FlaggerInputs, MeasurementSetInfo};

use std::{collections::BTreeMap, path::Path};

use log::{debug, info, warn};
use ndarray::Array;
use rayon::prelude::*;

use crate::{
    command::{dedup_commands, FlagCommand},
    constants::{SUMMARY_AFTER, SUMMARY_BEFORE},
    error::FlaggingError,
    results::{FlaggableViewResults, FlaggerResult, Termination},
    rules::{MatrixRule, Rule, RuleContext, VectorRule},
    summary::{FlagCounts, FlagSummary, SetterResult, SummaryRequest},
    view::{FlaggableView, ViewCollection},
};

/// Reads the current state of storage. Must reflect flags applied by the flag
/// setter since the previous call.
pub trait DataTask {
    type Output;

    fn execute(&mut self) -> Result<Self::Output, FlaggingError>;
}

impl<T, F> DataTask for F
where
    F: FnMut() -> Result<T, FlaggingError>,
{
    type Output = T;

    fn execute(&mut self) -> Result<T, FlaggingError> {
        self()
    }
}

/// Computes flaggable views from the output of a [`DataTask`].
pub trait ViewTask<T, D: ndarray::Dimension> {
    fn execute(&mut self, data: &T) -> Result<ViewCollection<D>, FlaggingError>;
}

impl<T, D, F> ViewTask<T, D> for F
where
    D: ndarray::Dimension,
    F: FnMut(&T) -> Result<ViewCollection<D>, FlaggingError>,
{
    fn execute(&mut self, data: &T) -> Result<ViewCollection<D>, FlaggingError> {
        self(data)
    }
}

/// The view task of controllers whose data task already produces views.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassThroughView;

impl<D: ndarray::Dimension> ViewTask<ViewCollection<D>, D> for PassThroughView {
    fn execute(&mut self, data: &ViewCollection<D>) -> Result<ViewCollection<D>, FlaggingError> {
        Ok(data.clone())
    }
}

/// Applies flag commands to storage.
pub trait FlagSetterTask {
    /// Apply `commands` (possibly none). When requested, summarise the flags
    /// in storage before and/or after applying them; setters that can't
    /// summarise may return `None` summaries.
    fn set_flags(
        &mut self,
        commands: &[FlagCommand],
        summaries: SummaryRequest,
    ) -> Result<SetterResult, FlaggingError>;
}

/// A flagger controller.
///
/// `R` is the rule kind (and so the view dimensionality), `DT` the data task,
/// `VT` the view task turning the data task's output into views and `FS` the
/// flag setter.
pub struct Flagger<R, DT, VT, FS> {
    inputs: FlaggerInputs<R>,
    datatask: DT,
    viewtask: VT,
    flagsetter: FS,
}

/// A controller for 2-D views produced directly by the data task.
pub type MatrixFlagger<DT, FS> = Flagger<MatrixRule, DT, PassThroughView, FS>;
/// A controller for 1-D views produced directly by the data task.
pub type VectorFlagger<DT, FS> = Flagger<VectorRule, DT, PassThroughView, FS>;
/// A controller for 2-D views computed by a separate view task.
pub type NewMatrixFlagger<DT, VT, FS> = Flagger<MatrixRule, DT, VT, FS>;
/// A controller for 1-D views computed by a separate view task.
pub type NewVectorFlagger<DT, VT, FS> = Flagger<VectorRule, DT, VT, FS>;

impl<R, DT, FS> Flagger<R, DT, PassThroughView, FS>
where
    R: Rule,
    DT: DataTask<Output = ViewCollection<R::Dim>>,
{
    pub fn new(inputs: FlaggerInputs<R>, datatask: DT, flagsetter: FS) -> Self {
        Flagger {
            inputs,
            datatask,
            viewtask: PassThroughView,
            flagsetter,
        }
    }
}

/// The commands, reason planes and post-rule masks of one evaluation of every
/// view.
struct Evaluation<D: ndarray::Dimension> {
    commands: Vec<FlagCommand>,
    reason_planes: BTreeMap<String, Array<u8, D>>,
    masks: BTreeMap<String, Array<bool, D>>,
}

impl<R, DT, VT, FS> Flagger<R, DT, VT, FS>
where
    R: Rule,
    DT: DataTask,
    VT: ViewTask<DT::Output, R::Dim>,
    FS: FlagSetterTask,
{
    pub fn with_viewtask(
        inputs: FlaggerInputs<R>,
        datatask: DT,
        viewtask: VT,
        flagsetter: FS,
    ) -> Self {
        Flagger {
            inputs,
            datatask,
            viewtask,
            flagsetter,
        }
    }

    pub fn inputs(&self) -> &FlaggerInputs<R> {
        &self.inputs
    }

    /// Give back the collaborators, e.g. to inspect the storage a flag setter
    /// wrote to.
    pub fn into_parts(self) -> (FlaggerInputs<R>, DT, VT, FS) {
        (self.inputs, self.datatask, self.viewtask, self.flagsetter)
    }

    /// Run the flagging loop and finalise the flags in storage.
    ///
    /// # Errors
    ///
    /// Invalid inputs are reported before anything runs. Errors from the
    /// collaborators are returned as they are; nothing is retried.
    pub fn execute(&mut self) -> Result<FlaggerResult<R::Dim, DT::Output>, FlaggingError> {
        let Flagger {
            inputs,
            datatask,
            viewtask,
            flagsetter,
        } = self;
        inputs.validate()?;

        if !inputs.extend_fields.is_empty() {
            info!(
                "{} flagcmds will be extended by removing selection in following fields: {}",
                inputs.prepend,
                inputs.extend_fields.join(", ")
            );
        }
        if inputs.extend_baseband {
            info!(
                "{} flagcmds will be extended to include all spws within baseband.",
                inputs.prepend
            );
        }

        let ctx = inputs.rule_context();
        let basename = Path::new(&inputs.table)
            .file_name()
            .map_or_else(|| inputs.table.clone(), |n| n.to_string_lossy().into_owned());

        let mut results = FlaggableViewResults::new();
        let mut flags = vec![];
        let mut newflags: Vec<FlagCommand> = vec![];
        let mut masks = BTreeMap::new();
        let mut include_before = true;
        let mut before = None;
        let mut after = None;
        let mut iterations = 0;
        let mut termination = Termination::MaxIterReached;

        let mut data = datatask.execute()?;
        let mut viewresult = ViewCollection::new();

        for counter in 1..=inputs.niter {
            if counter > 1 && inputs.iter_datatask {
                // Storage must hold the last iteration's flags before the next
                // fetch.
                let request = SummaryRequest {
                    before: include_before,
                    after: false,
                };
                let stats = flagsetter.set_flags(&newflags, request)?;
                if include_before {
                    before = stats.before;
                    include_before = false;
                }
                newflags.clear();
                data = datatask.execute()?;
            }

            viewresult = viewtask.execute(&data)?;
            if counter > 1 && !inputs.iter_datatask {
                viewresult = carry_flags(viewresult, &masks)?;
            }

            if viewresult.is_empty() {
                warn!("No flagging view was created!");
                termination = Termination::NoView;
                break;
            }
            iterations = counter;
            results.importfrom(&viewresult);

            let evaluation = flag_view(&viewresult, &inputs.rules, &ctx)?;
            newflags = evaluation.commands;
            if newflags.is_empty() {
                info!(
                    "{}{basename} iteration {counter} raised {} flagging commands",
                    inputs.prepend,
                    newflags.len()
                );
                termination = Termination::Converged;
                break;
            }
            warn!(
                "{}{basename} iteration {counter} raised {} flagging commands",
                inputs.prepend,
                newflags.len()
            );

            flags.extend(newflags.iter().cloned());
            results.add_flag_reason_plane(evaluation.reason_planes)?;
            masks = evaluation.masks;
        }

        let flags = dedup_commands(flags);
        if flags.is_empty() {
            // One summary serves as both "before" and "after".
            let stats = flagsetter.set_flags(&[], SummaryRequest::BEFORE)?;
            before = stats.before;
            after = before.clone().map(|mut s| {
                s.name = SUMMARY_AFTER.to_string();
                s
            });
        } else {
            let refresh = if inputs.iter_datatask {
                if newflags.is_empty() {
                    // Every flag is in storage already and the last views
                    // were fetched after applying them.
                    let stats = flagsetter.set_flags(&[], SummaryRequest::AFTER)?;
                    after = stats.after;
                    false
                } else {
                    let request = SummaryRequest {
                        before: include_before,
                        after: true,
                    };
                    let stats = flagsetter.set_flags(&newflags, request)?;
                    if include_before {
                        before = stats.before;
                    }
                    after = stats.after;
                    true
                }
            } else {
                // Nothing has been applied yet.
                let stats = flagsetter.set_flags(&flags, SummaryRequest::BOTH)?;
                before = stats.before;
                after = stats.after;
                true
            };

            if refresh {
                debug!("{}{basename}: computing the post-flagging views", inputs.prepend);
                data = datatask.execute()?;
                viewresult = viewtask.execute(&data)?;
                results.importfrom(&viewresult);
            }
            results.addflags(flags);
        }

        let before = before.unwrap_or_else(|| FlagSummary::new(SUMMARY_BEFORE, FlagCounts::default()));
        let after = after.unwrap_or_else(|| FlagSummary::new(SUMMARY_AFTER, FlagCounts::default()));
        let mut result = FlaggerResult::new(inputs.table.clone(), results, (before, after));
        result.dataresult = Some(data);
        result.viewresult = viewresult;
        result.iterations = iterations;
        result.termination = termination;
        result.sort_flagcmds();
        Ok(result)
    }
}

/// Evaluate the rules against every view. Views are independent, so they are
/// evaluated in parallel; the results are reassembled in description order.
fn flag_view<R: Rule>(
    views: &ViewCollection<R::Dim>,
    rules: &[R],
    ctx: &RuleContext,
) -> Result<Evaluation<R::Dim>, FlaggingError> {
    let entries: Vec<(&String, &FlaggableView<R::Dim>)> = views.iter().collect();
    let outcomes = entries
        .into_par_iter()
        .map(|(description, view)| {
            R::generate_flags(rules, view, ctx).map(|outcome| (description.clone(), outcome))
        })
        .collect::<Result<Vec<_>, FlaggingError>>()?;

    let mut evaluation = Evaluation {
        commands: vec![],
        reason_planes: BTreeMap::new(),
        masks: BTreeMap::new(),
    };
    for (description, outcome) in outcomes {
        evaluation.commands.extend(outcome.commands);
        evaluation
            .reason_planes
            .insert(description.clone(), outcome.flag_reason);
        evaluation.masks.insert(description, outcome.flag);
    }
    Ok(evaluation)
}

/// Fold the post-rule masks of the previous iteration into views recomputed
/// from data that hasn't been re-read.
fn carry_flags<D: ndarray::Dimension>(
    views: ViewCollection<D>,
    masks: &BTreeMap<String, Array<bool, D>>,
) -> Result<ViewCollection<D>, FlaggingError> {
    views
        .into_iter()
        .map(|(description, view)| match masks.get(&description) {
            Some(mask) => view.with_flags_unioned(mask),
            None => Ok(view),
        })
        .collect()
}
