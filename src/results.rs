// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Accumulated views, flag commands and reason planes of a flagging run.
//!
//! [`FlaggableViewResults`] is the bookkeeping shared by every controller.
//! [`FlaggerResult`] is what a controller returns: it contains a
//! `FlaggableViewResults` and adds the target table, summaries and the
//! outputs of the last data and view tasks.

use std::collections::BTreeMap;

use ndarray::{Array, Dimension, Zip};

use crate::{
    command::{dedup_commands, sort_flagcmds, FlagCommand},
    constants::{FlagReason, FLAG_REASON_KEY},
    error::FlaggingError,
    summary::FlagSummary,
    view::{FlaggableView, ViewCollection},
};

/// Views, flag commands and reason planes keyed by view description.
///
/// Snapshots are only ever appended. Accessors hand out clones, so nothing a
/// caller does to a returned view can change the accumulator.
#[derive(Clone, Debug, PartialEq)]
pub struct FlaggableViewResults<D: Dimension> {
    views: BTreeMap<String, Vec<FlaggableView<D>>>,
    flagcmds: Vec<FlagCommand>,
    flag_reason_plane: BTreeMap<String, Array<u8, D>>,
}

impl<D: Dimension> Default for FlaggableViewResults<D> {
    fn default() -> Self {
        Self {
            views: BTreeMap::new(),
            flagcmds: vec![],
            flag_reason_plane: BTreeMap::new(),
        }
    }
}

impl<D: Dimension> FlaggableViewResults<D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The snapshot sequence for a description, created empty if this is a
    /// new description.
    pub fn get_or_create(&mut self, description: &str) -> &mut Vec<FlaggableView<D>> {
        self.views.entry(description.to_string()).or_default()
    }

    /// Append a snapshot under its own description.
    pub fn addview(&mut self, view: FlaggableView<D>) {
        let description = view.description().to_string();
        self.get_or_create(&description).push(view);
    }

    /// Append a snapshot of every view in a collection.
    pub fn importfrom(&mut self, collection: &ViewCollection<D>) {
        for view in collection.views() {
            self.addview(view.clone());
        }
    }

    /// The sorted descriptions that have at least one snapshot.
    pub fn descriptions(&self) -> Vec<String> {
        self.views.keys().cloned().collect()
    }

    /// The first snapshot for a description.
    pub fn first(&self, description: &str) -> Option<FlaggableView<D>> {
        self.views.get(description)?.first().cloned()
    }

    /// The most recent snapshot for a description.
    pub fn last(&self, description: &str) -> Option<FlaggableView<D>> {
        self.views.get(description)?.last().cloned()
    }

    /// Every snapshot for a description, oldest first.
    pub fn snapshots(&self, description: &str) -> &[FlaggableView<D>] {
        self.views.get(description).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The number of snapshots stored for a description.
    pub fn num_snapshots(&self, description: &str) -> usize {
        self.views.get(description).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    pub fn addflags(&mut self, flagcmds: impl IntoIterator<Item = FlagCommand>) {
        self.flagcmds.extend(flagcmds);
    }

    /// Every flag command added so far, without duplicates.
    pub fn flagcmds(&self) -> Vec<FlagCommand> {
        dedup_commands(self.flagcmds.clone())
    }

    pub fn sort_flagcmds(&mut self) {
        self.flagcmds = dedup_commands(std::mem::take(&mut self.flagcmds));
        sort_flagcmds(&mut self.flagcmds);
    }

    /// Merge reason planes into the stored ones. Non-zero codes in a new
    /// plane overwrite the stored codes; zeros leave them alone.
    ///
    /// # Errors
    ///
    /// [`FlaggingError::BadArrayShape`] if a new plane doesn't have the shape
    /// of the plane already stored for its description.
    pub fn add_flag_reason_plane(
        &mut self,
        planes: BTreeMap<String, Array<u8, D>>,
    ) -> Result<(), FlaggingError> {
        for (description, plane) in planes {
            match self.flag_reason_plane.get_mut(&description) {
                Some(existing) => {
                    if existing.shape() != plane.shape() {
                        return Err(FlaggingError::BadArrayShape {
                            argument: format!("planes[{description}]"),
                            function: "FlaggableViewResults::add_flag_reason_plane".to_string(),
                            expected: format!("{:?}", existing.shape()),
                            received: format!("{:?}", plane.shape()),
                        });
                    }
                    Zip::from(existing).and(&plane).for_each(|e, &n| {
                        if n > 0 {
                            *e = n;
                        }
                    });
                }
                None => {
                    self.flag_reason_plane.insert(description, plane);
                }
            }
        }
        Ok(())
    }

    pub fn flag_reason_plane(&self, description: &str) -> Option<&Array<u8, D>> {
        self.flag_reason_plane.get(description)
    }

    pub fn flag_reason_planes(&self) -> &BTreeMap<String, Array<u8, D>> {
        &self.flag_reason_plane
    }

    /// The table translating reason-plane codes into reasons.
    pub fn flag_reason_key(&self) -> &'static BTreeMap<u8, FlagReason> {
        &FLAG_REASON_KEY
    }
}

/// How the iteration loop of a controller ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Termination {
    /// An iteration raised no new flag commands.
    Converged,
    /// `niter` iterations ran and the last one still raised commands.
    MaxIterReached,
    /// The data or view task produced no views.
    NoView,
}

/// The result of running a flagger controller.
///
/// `T` is the type produced by the data task.
#[derive(Clone, Debug)]
pub struct FlaggerResult<D: Dimension, T> {
    /// The measurement set or caltable the commands apply to.
    pub table: String,
    /// The output of the last data task run.
    pub dataresult: Option<T>,
    /// The views produced from `dataresult`.
    pub viewresult: ViewCollection<D>,
    /// The number of iterations run.
    pub iterations: usize,
    pub termination: Termination,
    before: FlagSummary,
    after: FlagSummary,
    views: FlaggableViewResults<D>,
}

impl<D: Dimension, T> FlaggerResult<D, T> {
    pub(crate) fn new(
        table: String,
        views: FlaggableViewResults<D>,
        summaries: (FlagSummary, FlagSummary),
    ) -> Self {
        let (before, after) = summaries;
        FlaggerResult {
            table,
            dataresult: None,
            viewresult: ViewCollection::new(),
            iterations: 0,
            termination: Termination::Converged,
            before,
            after,
            views,
        }
    }

    /// The accumulated views, commands and reason planes.
    pub fn views(&self) -> &FlaggableViewResults<D> {
        &self.views
    }

    pub fn descriptions(&self) -> Vec<String> {
        self.views.descriptions()
    }

    pub fn first(&self, description: &str) -> Option<FlaggableView<D>> {
        self.views.first(description)
    }

    pub fn last(&self, description: &str) -> Option<FlaggableView<D>> {
        self.views.last(description)
    }

    pub fn flagcmds(&self) -> Vec<FlagCommand> {
        self.views.flagcmds()
    }

    pub fn flag_reason_plane(&self, description: &str) -> Option<&Array<u8, D>> {
        self.views.flag_reason_plane(description)
    }

    pub fn flag_reason_key(&self) -> &'static BTreeMap<u8, FlagReason> {
        self.views.flag_reason_key()
    }

    /// The "before" and "after" summaries.
    pub fn summaries(&self) -> [&FlagSummary; 2] {
        [&self.before, &self.after]
    }

    pub fn before(&self) -> &FlagSummary {
        &self.before
    }

    pub fn after(&self) -> &FlagSummary {
        &self.after
    }

    /// Did the controller produce no views at all?
    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    pub fn sort_flagcmds(&mut self) {
        self.views.sort_flagcmds();
    }
}
