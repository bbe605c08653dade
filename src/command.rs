// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Flag commands: replayable descriptions of a selection of storage to flag.
//!
//! A [`FlagCommand`] is raised by a rule engine for the samples of one view,
//! handed once to a flag setter, and otherwise only ever rewritten by
//! [`consolidate_channels`], which merges per-channel commands into channel
//! ranges.
//!
//! # Examples
//!
//! ```rust
//! use viewflagger::{consolidate_channels, AxisSelection, FlagCommand, FlagReason, ViewScope};
//!
//! let scope = ViewScope {
//!     filename: "uid___A002_X1.ms".to_string(),
//!     spw: Some(17),
//!     ..Default::default()
//! };
//! let commands: Vec<FlagCommand> = [10, 11, 12, 20]
//!     .into_iter()
//!     .map(|chan| {
//!         FlagCommand::new(FlagReason::Outlier, &scope)
//!             .with_selection(vec!["channels".to_string()], vec![AxisSelection::channel(chan)])
//!     })
//!     .collect();
//!
//! let consolidated = consolidate_channels(commands);
//! assert_eq!(consolidated.len(), 2);
//! assert_eq!(consolidated[0].flagcmd(), "mode='manual' spw='17:10~12' reason='outlier'");
//! ```

use std::{
    cmp::Ordering,
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

use hifitime::{Duration, Epoch};
use itertools::Itertools;

use crate::{
    constants::{FlagReason, DAYSEC, TIME_FLAG_HALF_WIDTH_S},
    view::{AxisKind, Coord, ViewAxis, ViewScope},
};

/// Antenna id -> antenna name.
pub type AntennaNames = Arc<BTreeMap<usize, String>>;

/// What a flag command selects along one axis.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum AxisSelection {
    /// A single coordinate.
    Value(Coord),
    /// An explicit list of channel numbers.
    Channels(Vec<usize>),
    /// An inclusive channel range.
    ChannelRange { start: usize, end: usize },
}

impl AxisSelection {
    /// Select a single channel.
    pub fn channel(chan: usize) -> AxisSelection {
        AxisSelection::Value(Coord::from(chan))
    }

    /// The channel numbers this selection covers, if it can be read as a
    /// channel selection.
    pub fn channels(&self) -> Option<Vec<usize>> {
        match self {
            AxisSelection::Value(c) => c.as_index().map(|c| vec![c]),
            AxisSelection::Channels(chans) => Some(chans.clone()),
            AxisSelection::ChannelRange { start, end } => Some((*start..=*end).collect()),
        }
    }

    /// Render this selection as a CASA channel selection ("10~12;20").
    fn channel_string(&self) -> Option<String> {
        let chans = self.channels()?;
        let sorted: Vec<usize> = chans.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        Some(
            crate::math::contiguous_runs(&sorted)
                .into_iter()
                .map(|r| format!("{}~{}", r.start(), r.end()))
                .join(";"),
        )
    }
}

impl fmt::Display for AxisSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AxisSelection::Value(c) => write!(f, "{c}"),
            AxisSelection::Channels(chans) => write!(f, "[{}]", chans.iter().join(",")),
            AxisSelection::ChannelRange { start, end } => write!(f, "{start}~{end}"),
        }
    }
}

/// One flagging action.
///
/// Equality, hashing and ordering only consider the fields that define what
/// gets flagged: the filename, rule, spws, antenna, polarisation and the axis
/// selection. Two commands that compare equal are duplicates.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlagCommand {
    /// Free-text reason, e.g. "outlier", "bad antenna".
    pub reason: String,
    /// The measurement set or caltable to flag.
    pub filename: String,
    /// The rule that raised this command.
    pub rule_name: String,
    /// The spws to flag; empty means all.
    pub spw: Vec<usize>,
    pub antenna: Option<usize>,
    pub polarization: Option<String>,
    pub intent: Option<String>,
    /// The names of the axes in `selections`, in the same order.
    pub axis_names: Vec<String>,
    /// One selection per named axis.
    pub selections: Vec<AxisSelection>,
    /// The channel axis of the view that raised this command, for converting
    /// channels into frequencies.
    #[cfg_attr(feature = "serde", serde(default))]
    pub channel_axis: Option<ViewAxis>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub antenna_id_to_name: Option<AntennaNames>,
    /// Selection keys ("field", "timerange", ...) to drop before applying.
    #[cfg_attr(feature = "serde", serde(default))]
    pub extend_fields: Vec<String>,
    /// Was `spw` widened to every spw in the baseband?
    #[cfg_attr(feature = "serde", serde(default))]
    pub extend_baseband: bool,
}

impl FlagCommand {
    /// A command raised by `rule` for the given view scope, with no axis
    /// selection (i.e. the whole scope).
    pub fn new(rule: FlagReason, scope: &ViewScope) -> FlagCommand {
        FlagCommand {
            reason: rule.command_reason().to_string(),
            filename: scope.filename.clone(),
            rule_name: rule.name().to_string(),
            spw: scope.spw.into_iter().collect(),
            antenna: scope.antenna,
            polarization: scope.pol.clone(),
            intent: scope.intent.clone(),
            axis_names: vec![],
            selections: vec![],
            channel_axis: None,
            antenna_id_to_name: None,
            extend_fields: vec![],
            extend_baseband: false,
        }
    }

    pub fn with_selection(mut self, axis_names: Vec<String>, selections: Vec<AxisSelection>) -> Self {
        self.axis_names = axis_names;
        self.selections = selections;
        self
    }

    pub fn with_reason<S: Into<String>>(mut self, reason: S) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_antenna(mut self, antenna: Option<usize>) -> Self {
        self.antenna = antenna;
        self
    }

    pub fn with_spws(mut self, spws: Vec<usize>, extend_baseband: bool) -> Self {
        self.spw = spws;
        self.extend_baseband = extend_baseband;
        self
    }

    pub fn with_channel_axis(mut self, axis: Option<ViewAxis>) -> Self {
        self.channel_axis = axis;
        self
    }

    pub fn with_antenna_names(mut self, names: Option<AntennaNames>) -> Self {
        self.antenna_id_to_name = names;
        self
    }

    pub fn with_extend_fields(mut self, fields: Vec<String>) -> Self {
        self.extend_fields = fields;
        self
    }

    /// The position of the channel axis among `axis_names`.
    pub fn channel_axis_index(&self) -> Option<usize> {
        self.axis_names
            .iter()
            .position(|n| AxisKind::from_name(n) == AxisKind::Channel)
    }

    /// The channels this command selects, if it has a channel selection.
    pub fn channels(&self) -> Option<Vec<usize>> {
        let i = self.channel_axis_index()?;
        self.selections.get(i)?.channels()
    }

    /// Split a channel-selecting command into one command per channel. This
    /// is the inverse of [`consolidate_channels`].
    pub fn expand_channels(&self) -> Vec<FlagCommand> {
        match (self.channel_axis_index(), self.channels()) {
            (Some(i), Some(chans)) => chans
                .into_iter()
                .map(|chan| {
                    let mut cmd = self.clone();
                    cmd.selections[i] = AxisSelection::channel(chan);
                    cmd
                })
                .collect(),
            _ => vec![self.clone()],
        }
    }

    /// The frequency ranges \[Hz\] covered by this command's channel selection,
    /// using the channel axis it was raised against. Empty if either is
    /// missing or the axis doesn't carry frequencies.
    pub fn frequency_ranges(&self) -> Vec<(f64, f64)> {
        let (Some(axis), Some(chans)) = (&self.channel_axis, self.channels()) else {
            return vec![];
        };
        let half_width = axis.channel_width.map(|w| w.0.abs() / 2.0).unwrap_or(0.0);
        let sorted: Vec<usize> = chans.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        crate::math::contiguous_runs(&sorted)
            .into_iter()
            .filter_map(|run| {
                let f0 = axis.data.get(*run.start())?.as_f64()?;
                let f1 = axis.data.get(*run.end())?.as_f64()?;
                Some((f0.min(f1) - half_width, f0.max(f1) + half_width))
            })
            .collect()
    }

    fn antenna_label(&self, id: usize) -> String {
        self.antenna_id_to_name
            .as_ref()
            .and_then(|names| names.get(&id).cloned())
            .unwrap_or_else(|| id.to_string())
    }

    fn coord_antenna_label(&self, coord: &Coord) -> String {
        match coord.as_index() {
            Some(id) => self.antenna_label(id),
            None => coord.to_string(),
        }
    }

    /// The flagdata selection as ordered `(key, value)` pairs, before
    /// `extend_fields` are removed.
    fn selection_pairs(&self) -> Vec<(&'static str, String)> {
        let mut antenna = self.antenna.map(|id| self.antenna_label(id));
        let mut antenna2 = None;
        let mut chan_sel = None;
        let mut timerange = None;
        let mut scan = None;
        let mut field = None;

        for (name, sel) in self.axis_names.iter().zip(self.selections.iter()) {
            match (AxisKind::from_name(name), sel) {
                (AxisKind::Antenna, AxisSelection::Value(c)) => {
                    antenna = Some(self.coord_antenna_label(c))
                }
                (AxisKind::Antenna2, AxisSelection::Value(c)) => {
                    antenna2 = Some(self.coord_antenna_label(c))
                }
                (AxisKind::Baseline, AxisSelection::Value(c)) => antenna = Some(c.to_string()),
                (AxisKind::Channel, AxisSelection::Value(Coord::Float(f))) => {
                    chan_sel = Some(match self.channel_axis.as_ref().and_then(|a| a.channel_width) {
                        Some(w) => format!("{}~{}Hz", f - w.0.abs() / 2.0, f + w.0.abs() / 2.0),
                        None => format!("{f}Hz"),
                    })
                }
                (AxisKind::Channel, sel) => chan_sel = sel.channel_string(),
                (AxisKind::Time, AxisSelection::Value(c)) => {
                    timerange = c.as_f64().map(render_timerange)
                }
                (AxisKind::Scan, AxisSelection::Value(c)) => scan = Some(c.to_string()),
                (AxisKind::Field, AxisSelection::Value(c)) => field = Some(c.to_string()),
                _ => (),
            }
        }

        let antenna = match (antenna, antenna2) {
            (Some(a1), Some(a2)) => Some(format!("{a1}&{a2}")),
            (a1, None) => a1,
            (None, Some(a2)) => Some(format!("*&{a2}")),
        };
        let spw = match (self.spw.is_empty(), chan_sel) {
            (true, None) => None,
            (true, Some(chans)) => Some(format!("*:{chans}")),
            (false, None) => Some(self.spw.iter().join(",")),
            (false, Some(chans)) => Some(self.spw.iter().map(|s| format!("{s}:{chans}")).join(",")),
        };

        let mut pairs = vec![];
        let candidates = [
            ("antenna", antenna),
            ("spw", spw),
            ("timerange", timerange),
            ("scan", scan),
            ("field", field),
            ("correlation", self.polarization.clone()),
            ("intent", self.intent.clone()),
        ];
        for (key, value) in candidates {
            if let Some(value) = value {
                pairs.push((key, value));
            }
        }
        pairs
    }

    /// Render this command as a CASA flagdata command string, e.g.
    /// `mode='manual' antenna='DV01' spw='17:10~12' reason='outlier'`.
    pub fn flagcmd(&self) -> String {
        let mut s = "mode='manual'".to_string();
        for (key, value) in self.selection_pairs() {
            if self.extend_fields.iter().any(|f| f.trim() == key) {
                continue;
            }
            s.push_str(&format!(" {key}='{value}'"));
        }
        s.push_str(&format!(" reason='{}'", self.reason));
        s
    }

    fn key(&self) -> CommandKey {
        (
            &self.filename,
            &self.rule_name,
            &self.spw,
            &self.antenna,
            &self.polarization,
            &self.axis_names,
            &self.selections,
        )
    }
}

type CommandKey<'a> = (
    &'a String,
    &'a String,
    &'a Vec<usize>,
    &'a Option<usize>,
    &'a Option<String>,
    &'a Vec<String>,
    &'a Vec<AxisSelection>,
);

impl PartialEq for FlagCommand {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for FlagCommand {}

impl Hash for FlagCommand {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl PartialOrd for FlagCommand {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FlagCommand {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl fmt::Display for FlagCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.flagcmd())
    }
}

/// Render a time (MJD seconds) as a flagdata time range around it.
fn render_timerange(mjd_s: f64) -> String {
    format!(
        "{}~{}",
        render_time(mjd_s - TIME_FLAG_HALF_WIDTH_S),
        render_time(mjd_s + TIME_FLAG_HALF_WIDTH_S)
    )
}

fn render_time(mjd_s: f64) -> String {
    let epoch = Epoch::from_mjd_utc(mjd_s / DAYSEC).round(Duration::from_milliseconds(1.0));
    let (y, mo, d, h, mi, s, ns) = epoch.to_gregorian_utc();
    format!(
        "{y:04}/{mo:02}/{d:02}/{h:02}:{mi:02}:{s:02}.{:03}",
        ns / 1_000_000
    )
}

/// Merge commands that select individual channels (or channel lists) of the
/// same logical selection into one command per contiguous channel range.
/// Commands without an index-valued channel selection pass through unchanged.
/// The output preserves the order in which selections first appear.
pub fn consolidate_channels(commands: Vec<FlagCommand>) -> Vec<FlagCommand> {
    enum Slot {
        Passthrough(FlagCommand),
        Group(usize),
    }

    let mut slots = vec![];
    let mut groups: Vec<(FlagCommand, BTreeSet<usize>)> = vec![];
    let mut group_index: HashMap<FlagCommand, usize> = HashMap::new();

    for cmd in commands {
        let (Some(i), Some(chans)) = (cmd.channel_axis_index(), cmd.channels()) else {
            slots.push(Slot::Passthrough(cmd));
            continue;
        };
        let mut key = cmd;
        key.selections[i] = AxisSelection::Channels(vec![]);
        match group_index.get(&key) {
            Some(&g) => groups[g].1.extend(chans),
            None => {
                group_index.insert(key.clone(), groups.len());
                slots.push(Slot::Group(groups.len()));
                groups.push((key, chans.into_iter().collect()));
            }
        }
    }

    let mut consolidated = vec![];
    for slot in slots {
        match slot {
            Slot::Passthrough(cmd) => consolidated.push(cmd),
            Slot::Group(g) => {
                let (key, chans) = &groups[g];
                let Some(i) = key.channel_axis_index() else {
                    continue;
                };
                let sorted: Vec<usize> = chans.iter().copied().collect();
                for run in crate::math::contiguous_runs(&sorted) {
                    let mut cmd = key.clone();
                    cmd.selections[i] = AxisSelection::ChannelRange {
                        start: *run.start(),
                        end: *run.end(),
                    };
                    consolidated.push(cmd);
                }
            }
        }
    }
    consolidated
}

/// Remove duplicate commands, keeping the first of each.
pub fn dedup_commands(commands: Vec<FlagCommand>) -> Vec<FlagCommand> {
    commands.into_iter().unique().collect()
}

/// Sort commands by filename, rule, spw, antenna, polarisation and selection.
pub fn sort_flagcmds(commands: &mut [FlagCommand]) {
    commands.sort();
}
