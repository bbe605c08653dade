// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Flagging rules and the engines that evaluate them against a view.
//!
//! Rules are closed enums ([`MatrixRule`] for 2-D views, [`VectorRule`] for
//! 1-D views), each variant carrying its own typed limits. An engine applies
//! an ordered list of rules to one view snapshot, each rule seeing the flags
//! raised by the rules before it, and returns the new flag commands, the
//! resulting mask and a reason plane. Engines do no I/O.
//!
//! With the `serde` feature, rules (de)serialise tagged by name:
//!
//! ```text
//! {"name": "max abs", "limit": 0.1}
//! {"name": "too many flags", "axis": "TIME", "limit": 1.0, "excess limit": 10000000}
//! ```

mod matrix;
mod vector;

pub use matrix::generate_matrix_flags;
pub use vector::generate_vector_flags;

use std::{collections::BTreeMap, fmt, sync::Arc};

use ndarray::{Array, Dimension, Ix1, Ix2};

use crate::{
    command::{AntennaNames, FlagCommand},
    constants::FlagReason,
    error::FlaggingError,
    view::{FlaggableView, ViewScope},
};

/// A limit on `|value - median|` (or one tail of it) in units of the MAD.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OutlierLimits {
    pub limit: f64,
    /// The rule is skipped when fewer unflagged samples than this remain.
    pub minsample: usize,
}

/// A fixed limit on `|value|`.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AbsLimit {
    pub limit: f64,
}

/// Samples outside `[lo_limit * median, hi_limit * median]` are flagged.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NMedianLimits {
    pub lo_limit: f64,
    pub hi_limit: f64,
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TooManyFlagsLimits {
    /// The view axis to look along, e.g. "TIME".
    pub axis: String,
    /// The flagged fraction above which the rest of a row or column is
    /// flagged.
    pub limit: f64,
    /// The number of flags in excess of the median count across rows or
    /// columns above which the rest of a row or column is flagged.
    #[cfg_attr(feature = "serde", serde(rename = "excess limit"))]
    pub excess_limit: usize,
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EntirelyFlaggedLimits {
    /// The view axis whose elements are tested for being entirely flagged.
    pub axis: String,
    pub limit: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BadAntennaLimits {
    /// Low outliers are `median - value > lo_limit * MAD`.
    pub lo_limit: f64,
    /// An antenna is bad if more than this fraction of its samples are new
    /// low outliers ...
    pub frac_limit: f64,
    /// ... or at least this many of them are.
    pub number_limit: usize,
    /// Antennas with fewer unflagged samples than this are skipped.
    pub minsample: usize,
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BadQuadrantLimits {
    /// Provisional outliers are `|value - median| > hilo_limit * MAD`.
    pub hilo_limit: f64,
    /// The newly-invalid fraction of an antenna's baselines in a quadrant
    /// above which the whole antenna quadrant is flagged.
    pub frac_limit: f64,
    /// The same, for a single baseline in a quadrant.
    pub baseline_frac_limit: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiffMadLimits {
    pub limit: f64,
    /// When at least this many channel differences are outliers, the whole
    /// vector is flagged.
    pub nchan_limit: usize,
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TmfLimits {
    pub frac_limit: f64,
    pub nchan_limit: usize,
}

/// A rule for 2-D views.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "name"))]
pub enum MatrixRule {
    #[cfg_attr(feature = "serde", serde(rename = "outlier"))]
    Outlier(OutlierLimits),
    #[cfg_attr(feature = "serde", serde(rename = "high outlier"))]
    HighOutlier(OutlierLimits),
    #[cfg_attr(feature = "serde", serde(rename = "low outlier"))]
    LowOutlier(OutlierLimits),
    #[cfg_attr(feature = "serde", serde(rename = "min abs"))]
    MinAbs(AbsLimit),
    #[cfg_attr(feature = "serde", serde(rename = "max abs"))]
    MaxAbs(AbsLimit),
    #[cfg_attr(feature = "serde", serde(rename = "nmedian"))]
    NMedian(NMedianLimits),
    #[cfg_attr(feature = "serde", serde(rename = "too many flags"))]
    TooManyFlags(TooManyFlagsLimits),
    #[cfg_attr(feature = "serde", serde(rename = "too many entirely flagged"))]
    TooManyEntirelyFlagged(EntirelyFlaggedLimits),
    #[cfg_attr(feature = "serde", serde(rename = "bad antenna"))]
    BadAntenna(BadAntennaLimits),
    #[cfg_attr(feature = "serde", serde(rename = "bad quadrant"))]
    BadQuadrant(BadQuadrantLimits),
}

/// A rule for 1-D views.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "name"))]
pub enum VectorRule {
    #[cfg_attr(feature = "serde", serde(rename = "edges"))]
    Edges(AbsLimit),
    #[cfg_attr(feature = "serde", serde(rename = "min abs"))]
    MinAbs(AbsLimit),
    #[cfg_attr(feature = "serde", serde(rename = "nmedian"))]
    NMedian(NMedianLimits),
    #[cfg_attr(feature = "serde", serde(rename = "outlier"))]
    Outlier(OutlierLimits),
    #[cfg_attr(feature = "serde", serde(rename = "sharps"))]
    Sharps(AbsLimit),
    #[cfg_attr(feature = "serde", serde(rename = "diffmad"))]
    DiffMad(DiffMadLimits),
    #[cfg_attr(feature = "serde", serde(rename = "tmf"))]
    Tmf(TmfLimits),
}

fn check_non_negative(rule: FlagReason, parameter: &str, value: f64) -> Result<(), FlaggingError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(FlaggingError::invalid_parameter(
            rule.name(),
            parameter,
            format!("expected a finite, non-negative number, got {value}"),
        ))
    }
}

fn check_axis(rule: FlagReason, axis: &str) -> Result<(), FlaggingError> {
    if axis.trim().is_empty() {
        Err(FlaggingError::invalid_parameter(
            rule.name(),
            "axis",
            "the axis name is empty",
        ))
    } else {
        Ok(())
    }
}

fn check_nmedian(rule: FlagReason, l: &NMedianLimits) -> Result<(), FlaggingError> {
    if !l.lo_limit.is_finite() || !l.hi_limit.is_finite() || l.lo_limit > l.hi_limit {
        return Err(FlaggingError::invalid_parameter(
            rule.name(),
            "lo_limit",
            format!(
                "expected finite limits with lo_limit <= hi_limit, got {} and {}",
                l.lo_limit, l.hi_limit
            ),
        ));
    }
    Ok(())
}

impl MatrixRule {
    /// The reason recorded for samples this rule flags.
    pub fn reason(&self) -> FlagReason {
        match self {
            MatrixRule::Outlier(_) => FlagReason::Outlier,
            MatrixRule::HighOutlier(_) => FlagReason::HighOutlier,
            MatrixRule::LowOutlier(_) => FlagReason::LowOutlier,
            MatrixRule::MinAbs(_) => FlagReason::MinAbs,
            MatrixRule::MaxAbs(_) => FlagReason::MaxAbs,
            MatrixRule::NMedian(_) => FlagReason::NMedian,
            MatrixRule::TooManyFlags(_) => FlagReason::TooManyFlags,
            MatrixRule::TooManyEntirelyFlagged(_) => FlagReason::TooManyEntirelyFlagged,
            MatrixRule::BadAntenna(_) => FlagReason::BadAntenna,
            MatrixRule::BadQuadrant(_) => FlagReason::BadQuadrant,
        }
    }

    pub fn name(&self) -> &'static str {
        self.reason().name()
    }

    /// Check that the limits are in their domains.
    pub fn validate(&self) -> Result<(), FlaggingError> {
        let reason = self.reason();
        match self {
            MatrixRule::Outlier(l) | MatrixRule::HighOutlier(l) | MatrixRule::LowOutlier(l) => {
                check_non_negative(reason, "limit", l.limit)
            }
            MatrixRule::MinAbs(l) | MatrixRule::MaxAbs(l) => {
                check_non_negative(reason, "limit", l.limit)
            }
            MatrixRule::NMedian(l) => check_nmedian(reason, l),
            MatrixRule::TooManyFlags(l) => {
                check_axis(reason, &l.axis)?;
                check_non_negative(reason, "limit", l.limit)
            }
            MatrixRule::TooManyEntirelyFlagged(l) => {
                check_axis(reason, &l.axis)?;
                check_non_negative(reason, "limit", l.limit)
            }
            MatrixRule::BadAntenna(l) => {
                check_non_negative(reason, "lo_limit", l.lo_limit)?;
                check_non_negative(reason, "frac_limit", l.frac_limit)
            }
            MatrixRule::BadQuadrant(l) => {
                check_non_negative(reason, "hilo_limit", l.hilo_limit)?;
                check_non_negative(reason, "frac_limit", l.frac_limit)?;
                check_non_negative(reason, "baseline_frac_limit", l.baseline_frac_limit)
            }
        }
    }
}

impl VectorRule {
    pub fn reason(&self) -> FlagReason {
        match self {
            VectorRule::Edges(_) => FlagReason::Edges,
            VectorRule::MinAbs(_) => FlagReason::MinAbs,
            VectorRule::NMedian(_) => FlagReason::NMedian,
            VectorRule::Outlier(_) => FlagReason::Outlier,
            VectorRule::Sharps(_) => FlagReason::Sharps,
            VectorRule::DiffMad(_) => FlagReason::DiffMad,
            VectorRule::Tmf(_) => FlagReason::Tmf,
        }
    }

    pub fn name(&self) -> &'static str {
        self.reason().name()
    }

    pub fn validate(&self) -> Result<(), FlaggingError> {
        let reason = self.reason();
        match self {
            VectorRule::Edges(l) | VectorRule::MinAbs(l) | VectorRule::Sharps(l) => {
                check_non_negative(reason, "limit", l.limit)
            }
            VectorRule::NMedian(l) => check_nmedian(reason, l),
            VectorRule::Outlier(l) => check_non_negative(reason, "limit", l.limit),
            VectorRule::DiffMad(l) => check_non_negative(reason, "limit", l.limit),
            VectorRule::Tmf(l) => check_non_negative(reason, "frac_limit", l.frac_limit),
        }
    }
}

impl fmt::Display for MatrixRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl fmt::Display for VectorRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Settings that shape the commands an engine raises but not which samples
/// it flags.
#[derive(Clone, Debug, Default)]
pub struct RuleContext {
    /// Render antennas by name.
    pub antenna_id_to_name: Option<AntennaNames>,
    /// Selection keys dropped from "max abs", "nmedian" and "bad quadrant"
    /// commands.
    pub extend_fields: Vec<String>,
    /// When extending commands to whole basebands: spw -> every spw in its
    /// baseband.
    pub baseband_spws: Option<Arc<BTreeMap<usize, Vec<usize>>>>,
}

impl RuleContext {
    /// A command for the given scope, with no axis selection.
    pub(crate) fn command(&self, reason: FlagReason, scope: &ViewScope) -> FlagCommand {
        let cmd = FlagCommand::new(reason, scope).with_antenna_names(self.antenna_id_to_name.clone());
        match (&self.baseband_spws, scope.spw) {
            (Some(basebands), Some(spw)) => {
                let spws = basebands.get(&spw).cloned().unwrap_or_else(|| vec![spw]);
                cmd.with_spws(spws, true)
            }
            _ => cmd,
        }
    }

    /// As [`RuleContext::command`], also carrying the extend fields.
    pub(crate) fn extended_command(&self, reason: FlagReason, scope: &ViewScope) -> FlagCommand {
        self.command(reason, scope)
            .with_extend_fields(self.extend_fields.clone())
    }
}

/// What an engine produces for one view.
#[derive(Clone, Debug, PartialEq)]
pub struct RuleOutcome<D: Dimension> {
    /// New commands, with channel selections consolidated into ranges.
    pub commands: Vec<FlagCommand>,
    /// The view's flags after every rule ran.
    pub flag: Array<bool, D>,
    /// Per sample, the code of the rule that flagged it in this pass, or 0.
    pub flag_reason: Array<u8, D>,
}

impl<D: Dimension> RuleOutcome<D> {
    /// An outcome raising nothing.
    pub(crate) fn unchanged(view: &FlaggableView<D>) -> Self {
        RuleOutcome {
            commands: vec![],
            flag: view.flag().clone(),
            flag_reason: Array::zeros(view.flag().raw_dim()),
        }
    }

    /// The number of samples flagged in this pass.
    pub fn num_new_flags(&self) -> usize {
        self.flag_reason.iter().filter(|&&r| r > 0).count()
    }
}

/// A kind of rule, evaluated against views of one dimensionality.
pub trait Rule: Clone + fmt::Debug + Send + Sync {
    type Dim: Dimension;

    fn validate(&self) -> Result<(), FlaggingError>;

    /// Apply `rules` in order to a view.
    fn generate_flags(
        rules: &[Self],
        view: &FlaggableView<Self::Dim>,
        ctx: &RuleContext,
    ) -> Result<RuleOutcome<Self::Dim>, FlaggingError>;
}

impl Rule for MatrixRule {
    type Dim = Ix2;

    fn validate(&self) -> Result<(), FlaggingError> {
        MatrixRule::validate(self)
    }

    fn generate_flags(
        rules: &[Self],
        view: &FlaggableView<Ix2>,
        ctx: &RuleContext,
    ) -> Result<RuleOutcome<Ix2>, FlaggingError> {
        generate_matrix_flags(view, rules, ctx)
    }
}

impl Rule for VectorRule {
    type Dim = Ix1;

    fn validate(&self) -> Result<(), FlaggingError> {
        VectorRule::validate(self)
    }

    fn generate_flags(
        rules: &[Self],
        view: &FlaggableView<Ix1>,
        ctx: &RuleContext,
    ) -> Result<RuleOutcome<Ix1>, FlaggingError> {
        generate_vector_flags(view, rules, ctx)
    }
}

/// Which matrix rules to run and their limits. [`MatrixRuleConfig::rules`]
/// emits the enabled rules in a fixed order: rules that depend on the flag
/// state on entry ("bad quadrant", "bad antenna") first and the
/// "too many flags" family last.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MatrixRuleConfig {
    pub flag_hilo: bool,
    pub fhl_limit: f64,
    pub fhl_minsample: usize,
    pub flag_hi: bool,
    pub fhi_limit: f64,
    pub fhi_minsample: usize,
    pub flag_lo: bool,
    pub flo_limit: f64,
    pub flo_minsample: usize,
    pub flag_tmf1: bool,
    pub tmf1_axis: String,
    pub tmf1_limit: f64,
    pub tmf1_excess_limit: usize,
    pub flag_tmf2: bool,
    pub tmf2_axis: String,
    pub tmf2_limit: f64,
    pub tmf2_excess_limit: usize,
    pub flag_tmef1: bool,
    pub tmef1_axis: String,
    pub tmef1_limit: f64,
    pub flag_nmedian: bool,
    pub fnm_lo_limit: f64,
    pub fnm_hi_limit: f64,
    pub flag_maxabs: bool,
    pub fmax_limit: f64,
    pub flag_minabs: bool,
    pub fmin_limit: f64,
    pub flag_bad_quadrant: bool,
    pub fbq_hilo_limit: f64,
    pub fbq_antenna_frac_limit: f64,
    pub fbq_baseline_frac_limit: f64,
    pub flag_bad_antenna: bool,
    pub fba_lo_limit: f64,
    pub fba_frac_limit: f64,
    pub fba_number_limit: usize,
    pub fba_minsample: usize,
}

impl Default for MatrixRuleConfig {
    fn default() -> Self {
        MatrixRuleConfig {
            flag_hilo: false,
            fhl_limit: 5.0,
            fhl_minsample: 5,
            flag_hi: false,
            fhi_limit: 5.0,
            fhi_minsample: 5,
            flag_lo: false,
            flo_limit: 5.0,
            flo_minsample: 5,
            flag_tmf1: false,
            tmf1_axis: "Time".to_string(),
            tmf1_limit: 1.0,
            tmf1_excess_limit: 10_000_000,
            flag_tmf2: false,
            tmf2_axis: "Time".to_string(),
            tmf2_limit: 1.0,
            tmf2_excess_limit: 10_000_000,
            flag_tmef1: false,
            tmef1_axis: "Antenna1".to_string(),
            tmef1_limit: 1.0,
            flag_nmedian: false,
            fnm_lo_limit: 0.7,
            fnm_hi_limit: 1.3,
            flag_maxabs: false,
            fmax_limit: 0.1,
            flag_minabs: false,
            fmin_limit: 0.0,
            flag_bad_quadrant: false,
            fbq_hilo_limit: 7.0,
            fbq_antenna_frac_limit: 0.5,
            fbq_baseline_frac_limit: 0.5,
            flag_bad_antenna: false,
            fba_lo_limit: 7.0,
            fba_frac_limit: 0.05,
            fba_number_limit: 3,
            fba_minsample: 5,
        }
    }
}

impl MatrixRuleConfig {
    pub fn rules(&self) -> Vec<MatrixRule> {
        let mut rules = vec![];
        if self.flag_bad_quadrant {
            rules.push(MatrixRule::BadQuadrant(BadQuadrantLimits {
                hilo_limit: self.fbq_hilo_limit,
                frac_limit: self.fbq_antenna_frac_limit,
                baseline_frac_limit: self.fbq_baseline_frac_limit,
            }));
        }
        if self.flag_bad_antenna {
            rules.push(MatrixRule::BadAntenna(BadAntennaLimits {
                lo_limit: self.fba_lo_limit,
                frac_limit: self.fba_frac_limit,
                number_limit: self.fba_number_limit,
                minsample: self.fba_minsample,
            }));
        }
        if self.flag_maxabs {
            rules.push(MatrixRule::MaxAbs(AbsLimit {
                limit: self.fmax_limit,
            }));
        }
        if self.flag_minabs {
            rules.push(MatrixRule::MinAbs(AbsLimit {
                limit: self.fmin_limit,
            }));
        }
        if self.flag_nmedian {
            rules.push(MatrixRule::NMedian(NMedianLimits {
                lo_limit: self.fnm_lo_limit,
                hi_limit: self.fnm_hi_limit,
            }));
        }
        if self.flag_hilo {
            rules.push(MatrixRule::Outlier(OutlierLimits {
                limit: self.fhl_limit,
                minsample: self.fhl_minsample,
            }));
        }
        if self.flag_hi {
            rules.push(MatrixRule::HighOutlier(OutlierLimits {
                limit: self.fhi_limit,
                minsample: self.fhi_minsample,
            }));
        }
        if self.flag_lo {
            rules.push(MatrixRule::LowOutlier(OutlierLimits {
                limit: self.flo_limit,
                minsample: self.flo_minsample,
            }));
        }
        if self.flag_tmf1 {
            rules.push(MatrixRule::TooManyFlags(TooManyFlagsLimits {
                axis: self.tmf1_axis.to_uppercase(),
                limit: self.tmf1_limit,
                excess_limit: self.tmf1_excess_limit,
            }));
        }
        if self.flag_tmf2 {
            rules.push(MatrixRule::TooManyFlags(TooManyFlagsLimits {
                axis: self.tmf2_axis.to_uppercase(),
                limit: self.tmf2_limit,
                excess_limit: self.tmf2_excess_limit,
            }));
        }
        if self.flag_tmef1 {
            rules.push(MatrixRule::TooManyEntirelyFlagged(EntirelyFlaggedLimits {
                axis: self.tmef1_axis.to_uppercase(),
                limit: self.tmef1_limit,
            }));
        }
        rules
    }
}

/// Which vector rules to run and their limits, emitted by
/// [`VectorRuleConfig::rules`] in the order edges, min abs, nmedian, outlier,
/// sharps, diffmad, tmf.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct VectorRuleConfig {
    pub flag_edges: bool,
    pub edge_limit: f64,
    pub flag_minabs: bool,
    pub fmin_limit: f64,
    pub flag_nmedian: bool,
    pub fnm_lo_limit: f64,
    pub fnm_hi_limit: f64,
    pub flag_hilo: bool,
    pub fhl_limit: f64,
    pub fhl_minsample: usize,
    pub flag_sharps: bool,
    pub sharps_limit: f64,
    pub flag_diffmad: bool,
    pub diffmad_limit: f64,
    pub diffmad_nchan_limit: usize,
    pub flag_tmf: bool,
    pub tmf_frac_limit: f64,
    pub tmf_nchan_limit: usize,
}

impl Default for VectorRuleConfig {
    fn default() -> Self {
        VectorRuleConfig {
            flag_edges: false,
            edge_limit: 2.0,
            flag_minabs: false,
            fmin_limit: 0.0,
            flag_nmedian: false,
            fnm_lo_limit: 0.7,
            fnm_hi_limit: 1.3,
            flag_hilo: false,
            fhl_limit: 5.0,
            fhl_minsample: 5,
            flag_sharps: false,
            sharps_limit: 0.05,
            flag_diffmad: false,
            diffmad_limit: 10.0,
            diffmad_nchan_limit: 4,
            flag_tmf: false,
            tmf_frac_limit: 0.1,
            tmf_nchan_limit: 4,
        }
    }
}

impl VectorRuleConfig {
    pub fn rules(&self) -> Vec<VectorRule> {
        let mut rules = vec![];
        if self.flag_edges {
            rules.push(VectorRule::Edges(AbsLimit {
                limit: self.edge_limit,
            }));
        }
        if self.flag_minabs {
            rules.push(VectorRule::MinAbs(AbsLimit {
                limit: self.fmin_limit,
            }));
        }
        if self.flag_nmedian {
            rules.push(VectorRule::NMedian(NMedianLimits {
                lo_limit: self.fnm_lo_limit,
                hi_limit: self.fnm_hi_limit,
            }));
        }
        if self.flag_hilo {
            rules.push(VectorRule::Outlier(OutlierLimits {
                limit: self.fhl_limit,
                minsample: self.fhl_minsample,
            }));
        }
        if self.flag_sharps {
            rules.push(VectorRule::Sharps(AbsLimit {
                limit: self.sharps_limit,
            }));
        }
        if self.flag_diffmad {
            rules.push(VectorRule::DiffMad(DiffMadLimits {
                limit: self.diffmad_limit,
                nchan_limit: self.diffmad_nchan_limit,
            }));
        }
        if self.flag_tmf {
            rules.push(VectorRule::Tmf(TmfLimits {
                frac_limit: self.tmf_frac_limit,
                nchan_limit: self.tmf_nchan_limit,
            }));
        }
        rules
    }
}
