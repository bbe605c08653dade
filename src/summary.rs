// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Before/after flagging summaries returned by a flag setter.

use std::{
    collections::BTreeMap,
    ops::{Add, AddAssign, Sub},
};

/// Flagged and total sample counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlagCounts {
    pub flagged: u64,
    pub total: u64,
}

impl FlagCounts {
    pub fn new(flagged: u64, total: u64) -> FlagCounts {
        FlagCounts { flagged, total }
    }

    /// The flagged fraction, or 0 when there are no samples.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.flagged as f64 / self.total as f64
        }
    }
}

impl Add for FlagCounts {
    type Output = FlagCounts;

    fn add(self, rhs: FlagCounts) -> FlagCounts {
        FlagCounts {
            flagged: self.flagged + rhs.flagged,
            total: self.total + rhs.total,
        }
    }
}

impl AddAssign for FlagCounts {
    fn add_assign(&mut self, rhs: FlagCounts) {
        *self = *self + rhs;
    }
}

// Saturates, so a difference is never negative.
impl Sub for FlagCounts {
    type Output = FlagCounts;

    fn sub(self, rhs: FlagCounts) -> FlagCounts {
        FlagCounts {
            flagged: self.flagged.saturating_sub(rhs.flagged),
            total: self.total.saturating_sub(rhs.total),
        }
    }
}

/// A named flagging summary of some storage, e.g. "before" or "after".
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlagSummary {
    pub name: String,
    /// Counts over the whole target.
    pub counts: FlagCounts,
    /// Counts broken down by a category ("scan", "spw", "field") and then by
    /// the value within that category.
    #[cfg_attr(feature = "serde", serde(default))]
    pub breakdown: BTreeMap<String, BTreeMap<String, FlagCounts>>,
}

impl FlagSummary {
    pub fn new<S: Into<String>>(name: S, counts: FlagCounts) -> FlagSummary {
        FlagSummary {
            name: name.into(),
            counts,
            breakdown: BTreeMap::new(),
        }
    }

    /// Add counts for one value of a breakdown category, also adding them to
    /// the overall counts.
    pub fn add_to_category(&mut self, category: &str, value: &str, counts: FlagCounts) {
        self.counts += counts;
        *self
            .breakdown
            .entry(category.to_string())
            .or_default()
            .entry(value.to_string())
            .or_default() += counts;
    }

    pub fn flagged(&self) -> u64 {
        self.counts.flagged
    }

    pub fn total(&self) -> u64 {
        self.counts.total
    }

    /// Is this an empty placeholder (the flag setter produced no summary)?
    pub fn is_empty(&self) -> bool {
        self.counts == FlagCounts::default() && self.breakdown.is_empty()
    }

    /// The per-count difference `self - earlier`, named `name`.
    pub fn difference<S: Into<String>>(&self, earlier: &FlagSummary, name: S) -> FlagSummary {
        let mut diff = FlagSummary::new(name, self.counts - earlier.counts);
        for (category, values) in &self.breakdown {
            for (value, counts) in values {
                let before = earlier
                    .breakdown
                    .get(category)
                    .and_then(|v| v.get(value))
                    .copied()
                    .unwrap_or_default();
                diff.breakdown
                    .entry(category.clone())
                    .or_default()
                    .insert(value.clone(), *counts - before);
            }
        }
        diff
    }
}

/// Which summaries a flag setter should take around the commands it applies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SummaryRequest {
    /// Summarise before applying the commands.
    pub before: bool,
    /// Summarise after applying the commands.
    pub after: bool,
}

impl SummaryRequest {
    pub const NONE: SummaryRequest = SummaryRequest {
        before: false,
        after: false,
    };
    pub const BEFORE: SummaryRequest = SummaryRequest {
        before: true,
        after: false,
    };
    pub const AFTER: SummaryRequest = SummaryRequest {
        before: false,
        after: true,
    };
    pub const BOTH: SummaryRequest = SummaryRequest {
        before: true,
        after: true,
    };
}

/// What a flag setter returns. Setters that can't summarise their target
/// return `None` for both summaries.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SetterResult {
    pub before: Option<FlagSummary>,
    pub after: Option<FlagSummary>,
}
