// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Settings for a flagger controller.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use log::info;

use crate::{command::AntennaNames, error::FlaggingError, rules::Rule, rules::RuleContext};

/// An antenna of the measurement set being flagged.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AntennaInfo {
    pub id: usize,
    pub name: String,
}

/// What the controllers need to know about the measurement set beyond the
/// views themselves.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MeasurementSetInfo {
    pub antennas: Vec<AntennaInfo>,
    /// spw id -> baseband number.
    pub spw_basebands: BTreeMap<usize, usize>,
}

impl MeasurementSetInfo {
    /// An antenna id -> name table. `None` unless every antenna has a unique,
    /// non-empty name, in which case commands fall back to antenna ids.
    pub fn antenna_id_to_name(&self) -> Option<AntennaNames> {
        let names: BTreeMap<usize, String> = self
            .antennas
            .iter()
            .filter(|ant| !ant.name.trim().is_empty())
            .map(|ant| (ant.id, ant.name.clone()))
            .collect();
        let unique_names: BTreeSet<&String> = names.values().collect();
        if unique_names.len() != self.antennas.len() {
            info!("No unique name available for each antenna ID: flagging by antenna ID instead of by name.");
            return None;
        }
        Some(Arc::new(names))
    }

    /// spw -> every spw in the same baseband (including itself).
    pub fn baseband_spws(&self) -> BTreeMap<usize, Vec<usize>> {
        self.spw_basebands
            .iter()
            .map(|(&spw, &baseband)| {
                let members = self
                    .spw_basebands
                    .iter()
                    .filter(|(_, &b)| b == baseband)
                    .map(|(&s, _)| s)
                    .collect();
                (spw, members)
            })
            .collect()
    }
}

/// The inputs of a flagger controller.
#[derive(Clone, Debug)]
pub struct FlaggerInputs<R> {
    /// The measurement set or caltable that commands apply to.
    pub table: String,
    /// The rules, applied in order to every view.
    pub rules: Vec<R>,
    /// The maximum number of iterations.
    pub niter: usize,
    /// Apply each iteration's commands and re-run the data task before the
    /// next iteration, rather than reusing the first data task output.
    pub iter_datatask: bool,
    /// Selection keys dropped from "max abs", "nmedian" and "bad quadrant"
    /// commands, e.g. "field", "timerange".
    pub extend_fields: Vec<String>,
    /// Widen the spw of every command to its whole baseband. Needs `ms_info`.
    pub extend_baseband: bool,
    /// Render antennas by name when `ms_info` has unique names.
    pub use_antenna_names: bool,
    /// Prefixed to log messages.
    pub prepend: String,
    pub ms_info: Option<MeasurementSetInfo>,
}

impl<R: Rule> FlaggerInputs<R> {
    /// Inputs running `rules` once over `table`.
    pub fn new<S: Into<String>>(table: S, rules: Vec<R>) -> Self {
        FlaggerInputs {
            table: table.into(),
            rules,
            niter: 1,
            iter_datatask: false,
            extend_fields: vec![],
            extend_baseband: false,
            use_antenna_names: true,
            prepend: String::new(),
            ms_info: None,
        }
    }

    pub fn with_niter(mut self, niter: usize) -> Self {
        self.niter = niter;
        self
    }

    pub fn with_iter_datatask(mut self, iter_datatask: bool) -> Self {
        self.iter_datatask = iter_datatask;
        self
    }

    pub fn with_extend_fields(mut self, fields: Vec<String>) -> Self {
        self.extend_fields = fields;
        self
    }

    pub fn with_extend_baseband(mut self, extend_baseband: bool) -> Self {
        self.extend_baseband = extend_baseband;
        self
    }

    pub fn with_antenna_names(mut self, use_antenna_names: bool) -> Self {
        self.use_antenna_names = use_antenna_names;
        self
    }

    pub fn with_prepend<S: Into<String>>(mut self, prepend: S) -> Self {
        self.prepend = prepend.into();
        self
    }

    pub fn with_ms_info(mut self, ms_info: MeasurementSetInfo) -> Self {
        self.ms_info = Some(ms_info);
        self
    }

    /// Check the iteration limit, every rule and that baseband extension has
    /// the spw information it needs.
    ///
    /// # Errors
    ///
    /// [`FlaggingError::InvalidRuleParameter`] naming the bad setting.
    pub fn validate(&self) -> Result<(), FlaggingError> {
        if self.niter == 0 {
            return Err(FlaggingError::invalid_parameter(
                "flagger",
                "niter",
                "at least one iteration is needed",
            ));
        }
        if self.extend_baseband && self.ms_info.is_none() {
            return Err(FlaggingError::invalid_parameter(
                "flagger",
                "extend_baseband",
                "extending to basebands needs the spw baseband table of the measurement set",
            ));
        }
        for rule in &self.rules {
            rule.validate()?;
        }
        Ok(())
    }

    pub(crate) fn rule_context(&self) -> RuleContext {
        let antenna_id_to_name = if self.use_antenna_names {
            self.ms_info
                .as_ref()
                .and_then(MeasurementSetInfo::antenna_id_to_name)
        } else {
            None
        };
        let baseband_spws = if self.extend_baseband {
            self.ms_info
                .as_ref()
                .map(|info| Arc::new(info.baseband_spws()))
        } else {
            None
        };
        RuleContext {
            antenna_id_to_name,
            extend_fields: self.extend_fields.clone(),
            baseband_spws,
        }
    }
}
