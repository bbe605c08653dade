// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Useful constants, and the table of flag reasons shared by the rule engines
//! and the flagger controllers.

use std::{collections::BTreeMap, fmt, str::FromStr};

use lazy_static::lazy_static;

use crate::error::FlaggingError;

/// The name the flag setter gives to the summary taken before any commands are
/// applied.
pub const SUMMARY_BEFORE: &str = "before";
/// The name the flag setter gives to the summary taken after all commands are
/// applied.
pub const SUMMARY_AFTER: &str = "after";

/// Half-width of the time range flagged around a single time coordinate
/// \[seconds\].
pub const TIME_FLAG_HALF_WIDTH_S: f64 = 0.5;

/// Seconds per day (86400)
pub const DAYSEC: f64 = 86400.0;

/// The number of quadrants the channel axis is split into by the bad quadrant
/// rule.
pub const NUM_QUADRANTS: usize = 4;

/// Why a sample was flagged. The discriminant is the integer code stored in a
/// reason plane; 0 is reserved for "not flagged in this pass".
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum FlagReason {
    #[cfg_attr(feature = "serde", serde(rename = "max abs"))]
    MaxAbs = 1,
    #[cfg_attr(feature = "serde", serde(rename = "min abs"))]
    MinAbs = 2,
    #[cfg_attr(feature = "serde", serde(rename = "nmedian"))]
    NMedian = 3,
    #[cfg_attr(feature = "serde", serde(rename = "outlier"))]
    Outlier = 4,
    #[cfg_attr(feature = "serde", serde(rename = "high outlier"))]
    HighOutlier = 5,
    #[cfg_attr(feature = "serde", serde(rename = "low outlier"))]
    LowOutlier = 6,
    #[cfg_attr(feature = "serde", serde(rename = "too many flags"))]
    TooManyFlags = 7,
    #[cfg_attr(feature = "serde", serde(rename = "bad quadrant"))]
    BadQuadrant = 8,
    #[cfg_attr(feature = "serde", serde(rename = "bad antenna"))]
    BadAntenna = 9,
    #[cfg_attr(feature = "serde", serde(rename = "too many entirely flagged"))]
    TooManyEntirelyFlagged = 10,
    #[cfg_attr(feature = "serde", serde(rename = "edges"))]
    Edges = 11,
    #[cfg_attr(feature = "serde", serde(rename = "sharps"))]
    Sharps = 12,
    #[cfg_attr(feature = "serde", serde(rename = "diffmad"))]
    DiffMad = 13,
    #[cfg_attr(feature = "serde", serde(rename = "tmf"))]
    Tmf = 14,
}

impl FlagReason {
    /// Every reason, in code order.
    pub const ALL: [FlagReason; 14] = [
        FlagReason::MaxAbs,
        FlagReason::MinAbs,
        FlagReason::NMedian,
        FlagReason::Outlier,
        FlagReason::HighOutlier,
        FlagReason::LowOutlier,
        FlagReason::TooManyFlags,
        FlagReason::BadQuadrant,
        FlagReason::BadAntenna,
        FlagReason::TooManyEntirelyFlagged,
        FlagReason::Edges,
        FlagReason::Sharps,
        FlagReason::DiffMad,
        FlagReason::Tmf,
    ];

    /// The code written into reason planes.
    #[inline]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// The rule name, as it appears in configuration and flag commands.
    pub const fn name(self) -> &'static str {
        match self {
            FlagReason::MaxAbs => "max abs",
            FlagReason::MinAbs => "min abs",
            FlagReason::NMedian => "nmedian",
            FlagReason::Outlier => "outlier",
            FlagReason::HighOutlier => "high outlier",
            FlagReason::LowOutlier => "low outlier",
            FlagReason::TooManyFlags => "too many flags",
            FlagReason::BadQuadrant => "bad quadrant",
            FlagReason::BadAntenna => "bad antenna",
            FlagReason::TooManyEntirelyFlagged => "too many entirely flagged",
            FlagReason::Edges => "edges",
            FlagReason::Sharps => "sharps",
            FlagReason::DiffMad => "diffmad",
            FlagReason::Tmf => "tmf",
        }
    }

    /// The free-text reason attached to flag commands raised for this rule.
    pub const fn command_reason(self) -> &'static str {
        match self {
            FlagReason::MaxAbs => "max_abs",
            FlagReason::MinAbs => "min_abs",
            FlagReason::NMedian => "nmedian",
            FlagReason::Outlier => "outlier",
            FlagReason::HighOutlier => "high_outlier",
            FlagReason::LowOutlier => "low_outlier",
            FlagReason::TooManyFlags | FlagReason::TooManyEntirelyFlagged => "too_many_flags",
            FlagReason::BadQuadrant => "bad quadrant",
            FlagReason::BadAntenna => "bad antenna",
            FlagReason::Edges => "edges",
            FlagReason::Sharps => "sharps",
            FlagReason::DiffMad => "diffmad",
            FlagReason::Tmf => "tmf",
        }
    }

    /// Look up a reason from its reason-plane code.
    pub fn from_code(code: u8) -> Result<FlagReason, FlaggingError> {
        FLAG_REASON_KEY
            .get(&code)
            .copied()
            .ok_or(FlaggingError::UnknownFlagReason(code))
    }
}

impl fmt::Display for FlagReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for FlagReason {
    type Err = FlaggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FLAG_REASON_INDEX
            .get(s.trim())
            .copied()
            .ok_or_else(|| FlaggingError::UnknownRule(s.to_string()))
    }
}

lazy_static! {
    /// Rule name -> reason.
    pub static ref FLAG_REASON_INDEX: BTreeMap<&'static str, FlagReason> =
        FlagReason::ALL.iter().map(|&r| (r.name(), r)).collect();

    /// Reason-plane code -> reason.
    pub static ref FLAG_REASON_KEY: BTreeMap<u8, FlagReason> =
        FlagReason::ALL.iter().map(|&r| (r.code(), r)).collect();
}
