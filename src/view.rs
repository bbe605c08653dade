// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Flaggable views: 1-D or 2-D snapshots of calibration or visibility data,
//! together with their flags and the axes that give each sample its meaning.
//!
//! Views are produced by a data or view task, evaluated by the rule engines
//! and stored as snapshots in [`crate::FlaggableViewResults`]. The engines
//! never mutate a view; the flags they raise are folded into a new view with
//! [`FlaggableView::with_flags_unioned`].

use std::{
    cmp::Ordering,
    collections::BTreeMap,
    fmt,
    hash::{Hash, Hasher},
};

use ndarray::{Array, Dimension, Ix1, Ix2, Zip};

use crate::error::FlaggingError;

/// A single coordinate value along a view axis.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum Coord {
    /// An index-like value (channel number, antenna id, scan number).
    Int(i64),
    /// A continuous value (time in MJD seconds, frequency in Hz).
    Float(f64),
    /// A label (antenna name, baseline "DV01&DV02").
    Label(String),
}

impl Coord {
    /// The coordinate as a non-negative index, if it is one.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Coord::Int(i) => usize::try_from(*i).ok(),
            _ => None,
        }
    }

    /// The coordinate as a float, if it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Coord::Int(i) => Some(*i as f64),
            Coord::Float(f) => Some(*f),
            Coord::Label(_) => None,
        }
    }

    fn variant_rank(&self) -> u8 {
        match self {
            Coord::Int(_) => 0,
            Coord::Float(_) => 1,
            Coord::Label(_) => 2,
        }
    }
}

// Floats compare by bit pattern so that coordinates can key maps and be
// de-duplicated; two coordinates produced from the same axis value always
// compare equal.
impl PartialEq for Coord {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Coord {}

impl Hash for Coord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.variant_rank().hash(state);
        match self {
            Coord::Int(i) => i.hash(state),
            Coord::Float(f) => f.to_bits().hash(state),
            Coord::Label(s) => s.hash(state),
        }
    }
}

impl PartialOrd for Coord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Coord {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Coord::Int(a), Coord::Int(b)) => a.cmp(b),
            (Coord::Float(a), Coord::Float(b)) => a.total_cmp(b),
            (Coord::Label(a), Coord::Label(b)) => a.cmp(b),
            _ => self.variant_rank().cmp(&other.variant_rank()),
        }
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Coord::Int(i) => write!(f, "{i}"),
            Coord::Float(x) => write!(f, "{x}"),
            Coord::Label(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for Coord {
    fn from(i: i64) -> Self {
        Coord::Int(i)
    }
}

impl From<usize> for Coord {
    fn from(i: usize) -> Self {
        Coord::Int(i as i64)
    }
}

impl From<f64> for Coord {
    fn from(x: f64) -> Self {
        Coord::Float(x)
    }
}

impl From<&str> for Coord {
    fn from(s: &str) -> Self {
        Coord::Label(s.to_string())
    }
}

impl From<String> for Coord {
    fn from(s: String) -> Self {
        Coord::Label(s)
    }
}

/// What an axis measures, inferred from its (case-insensitive) name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AxisKind {
    /// "Antenna", "ANTENNA1"
    Antenna,
    /// "ANTENNA2"; the second antenna of a baseline.
    Antenna2,
    /// "Baseline"
    Baseline,
    /// "channels", "Channel"
    Channel,
    /// "Time"
    Time,
    /// "Scan"
    Scan,
    /// "Field"
    Field,
    Other,
}

impl AxisKind {
    pub fn from_name(name: &str) -> AxisKind {
        let name = name.trim().to_uppercase();
        if name.contains("ANTENNA2") {
            AxisKind::Antenna2
        } else if name.contains("ANTENNA") {
            AxisKind::Antenna
        } else if name.contains("BASELINE") {
            AxisKind::Baseline
        } else if name.starts_with("CHAN") {
            AxisKind::Channel
        } else if name.contains("TIME") {
            AxisKind::Time
        } else if name.contains("SCAN") {
            AxisKind::Scan
        } else if name.contains("FIELD") {
            AxisKind::Field
        } else {
            AxisKind::Other
        }
    }

    /// Does this axis enumerate first antennas? Second-antenna axes
    /// ("ANTENNA2") don't count.
    pub fn is_antenna(self) -> bool {
        self == AxisKind::Antenna
    }
}

/// A labelled axis of a view.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ViewAxis {
    /// The axis name, e.g. "Time", "Antenna1", "channels".
    pub name: String,
    /// The units of the coordinate values.
    pub units: String,
    /// One coordinate per sample along this axis.
    pub data: Vec<Coord>,
    /// For a channel axis carrying frequencies, the channel width \[Hz\].
    #[cfg_attr(feature = "serde", serde(default))]
    pub channel_width: Option<ChannelWidth>,
}

/// A channel width \[Hz\]. Wrapped so that axes can be hashed.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct ChannelWidth(pub f64);

impl PartialEq for ChannelWidth {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for ChannelWidth {}

impl Hash for ChannelWidth {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl ViewAxis {
    pub fn new<S: Into<String>, U: Into<String>>(name: S, units: U, data: Vec<Coord>) -> ViewAxis {
        ViewAxis {
            name: name.into(),
            units: units.into(),
            data,
            channel_width: None,
        }
    }

    /// A channel axis numbered `0..num_chans`.
    pub fn channels(num_chans: usize) -> ViewAxis {
        ViewAxis::new("channels", "", (0..num_chans).map(Coord::from).collect())
    }

    /// A channel axis carrying channel-centre frequencies \[Hz\].
    pub fn frequencies(freqs_hz: &[f64], channel_width_hz: f64) -> ViewAxis {
        ViewAxis {
            name: "channels".to_string(),
            units: "Hz".to_string(),
            data: freqs_hz.iter().copied().map(Coord::from).collect(),
            channel_width: Some(ChannelWidth(channel_width_hz)),
        }
    }

    pub fn kind(&self) -> AxisKind {
        AxisKind::from_name(&self.name)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Does this axis have the given name (case- and whitespace-insensitive)?
    pub fn is_named(&self, name: &str) -> bool {
        self.name.trim().eq_ignore_ascii_case(name.trim())
    }

    /// The channel number for a sample index along this axis. Index-valued
    /// coordinates are used directly; otherwise the sample index is the
    /// channel.
    pub fn channel_at(&self, idx: usize) -> usize {
        self.data.get(idx).and_then(Coord::as_index).unwrap_or(idx)
    }
}

/// The slice of storage a view was computed from.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ViewScope {
    /// The measurement set or caltable the data came from.
    pub filename: String,
    pub spw: Option<usize>,
    pub pol: Option<String>,
    pub antenna: Option<usize>,
    pub antenna_name: Option<String>,
    pub intent: Option<String>,
}

impl ViewScope {
    /// A description string unique to this scope and the given axes.
    pub fn describe(&self, axes: &[ViewAxis]) -> String {
        let mut s = self.filename.clone();
        if let Some(spw) = self.spw {
            s.push_str(&format!(" spw:{spw}"));
        }
        if let Some(pol) = &self.pol {
            s.push_str(&format!(" pol:{pol}"));
        }
        match (&self.antenna_name, self.antenna) {
            (Some(name), _) => s.push_str(&format!(" ant:{name}")),
            (None, Some(ant)) => s.push_str(&format!(" ant:{ant}")),
            (None, None) => (),
        }
        if let Some(intent) = &self.intent {
            s.push_str(&format!(" intent:{intent}"));
        }
        let names: Vec<&str> = axes.iter().map(|a| a.name.as_str()).collect();
        s.push_str(&format!(" [{}]", names.join(" vs ")));
        s
    }
}

/// A 1-D or 2-D view over some measurement data.
///
/// The data, flag and no-data arrays always share a shape, and there is one
/// axis per array dimension whose length matches that dimension.
#[derive(Clone, Debug, PartialEq)]
pub struct FlaggableView<D: Dimension> {
    data: Array<f64, D>,
    flag: Array<bool, D>,
    no_data: Array<bool, D>,
    axes: Vec<ViewAxis>,
    datatype: String,
    scope: ViewScope,
    description: String,
}

/// A 2-D view, e.g. Time vs Antenna1 or channels vs Baseline.
pub type MatrixView = FlaggableView<Ix2>;
/// A 1-D view, e.g. a spectrum.
pub type VectorView = FlaggableView<Ix1>;

impl<D: Dimension> FlaggableView<D> {
    /// Make a new view, checking the shape contracts. The description is
    /// derived from the scope and axes; use
    /// [`FlaggableView::with_description`] to override it.
    ///
    /// # Errors
    ///
    /// [`FlaggingError::BadArrayShape`] if `flag` or `no_data` don't match
    /// the shape of `data`, or an axis length doesn't match its dimension;
    /// [`FlaggingError::BadAxisCount`] if there isn't one axis per dimension.
    pub fn new(
        data: Array<f64, D>,
        flag: Array<bool, D>,
        no_data: Array<bool, D>,
        axes: Vec<ViewAxis>,
        scope: ViewScope,
    ) -> Result<Self, FlaggingError> {
        if flag.shape() != data.shape() {
            return Err(FlaggingError::BadArrayShape {
                argument: "flag".to_string(),
                function: "FlaggableView::new".to_string(),
                expected: format!("{:?}", data.shape()),
                received: format!("{:?}", flag.shape()),
            });
        }
        if no_data.shape() != data.shape() {
            return Err(FlaggingError::BadArrayShape {
                argument: "no_data".to_string(),
                function: "FlaggableView::new".to_string(),
                expected: format!("{:?}", data.shape()),
                received: format!("{:?}", no_data.shape()),
            });
        }
        if axes.len() != data.ndim() {
            return Err(FlaggingError::BadAxisCount {
                expected: data.ndim(),
                received: axes.len(),
            });
        }
        for (i, (axis, &dim)) in axes.iter().zip(data.shape()).enumerate() {
            if axis.len() != dim {
                return Err(FlaggingError::BadArrayShape {
                    argument: format!("axes[{i}] ({})", axis.name),
                    function: "FlaggableView::new".to_string(),
                    expected: format!("{dim}"),
                    received: format!("{}", axis.len()),
                });
            }
        }

        let description = scope.describe(&axes);
        Ok(Self {
            data,
            flag,
            no_data,
            axes,
            datatype: String::new(),
            scope,
            description,
        })
    }

    /// Make a new view with nothing flagged and no missing samples.
    pub fn unflagged(
        data: Array<f64, D>,
        axes: Vec<ViewAxis>,
        scope: ViewScope,
    ) -> Result<Self, FlaggingError> {
        let flag = Array::from_elem(data.raw_dim(), false);
        let no_data = Array::from_elem(data.raw_dim(), false);
        Self::new(data, flag, no_data, axes, scope)
    }

    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_datatype<S: Into<String>>(mut self, datatype: S) -> Self {
        self.datatype = datatype.into();
        self
    }

    pub fn data(&self) -> &Array<f64, D> {
        &self.data
    }

    pub fn flag(&self) -> &Array<bool, D> {
        &self.flag
    }

    pub fn no_data(&self) -> &Array<bool, D> {
        &self.no_data
    }

    pub fn axes(&self) -> &[ViewAxis] {
        &self.axes
    }

    pub fn axis(&self, i: usize) -> Option<&ViewAxis> {
        self.axes.get(i)
    }

    pub fn datatype(&self) -> &str {
        &self.datatype
    }

    pub fn scope(&self) -> &ViewScope {
        &self.scope
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// The number of flagged samples.
    pub fn num_flagged(&self) -> usize {
        self.flag.iter().filter(|&&f| f).count()
    }

    /// The number of samples.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Is every sample flagged?
    pub fn all_flagged(&self) -> bool {
        self.flag.iter().all(|&f| f)
    }

    /// The values of every unflagged sample, in logical order.
    pub fn valid_data(&self) -> Vec<f64> {
        Zip::from(&self.data)
            .and(&self.flag)
            .fold(vec![], |mut acc, &d, &f| {
                if !f {
                    acc.push(d);
                }
                acc
            })
    }

    /// A copy of this view whose flags are the union of its own and `mask`.
    ///
    /// # Errors
    ///
    /// [`FlaggingError::BadArrayShape`] if `mask` doesn't match the view.
    pub fn with_flags_unioned(&self, mask: &Array<bool, D>) -> Result<Self, FlaggingError> {
        if mask.shape() != self.flag.shape() {
            return Err(FlaggingError::BadArrayShape {
                argument: "mask".to_string(),
                function: "FlaggableView::with_flags_unioned".to_string(),
                expected: format!("{:?}", self.flag.shape()),
                received: format!("{:?}", mask.shape()),
            });
        }
        let mut view = self.clone();
        Zip::from(&mut view.flag).and(mask).for_each(|f, &m| *f |= m);
        Ok(view)
    }
}

/// The views produced by one run of a data or view task, keyed by
/// description. Iteration is in lexicographic description order.
#[derive(Clone, Debug, PartialEq)]
pub struct ViewCollection<D: Dimension> {
    views: BTreeMap<String, FlaggableView<D>>,
}

impl<D: Dimension> Default for ViewCollection<D> {
    fn default() -> Self {
        Self {
            views: BTreeMap::new(),
        }
    }
}

impl<D: Dimension> ViewCollection<D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a view, replacing any previous view with the same description.
    pub fn insert(&mut self, view: FlaggableView<D>) -> Option<FlaggableView<D>> {
        self.views.insert(view.description.clone(), view)
    }

    /// The sorted view descriptions.
    pub fn descriptions(&self) -> Vec<String> {
        self.views.keys().cloned().collect()
    }

    pub fn get(&self, description: &str) -> Option<&FlaggableView<D>> {
        self.views.get(description)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FlaggableView<D>)> {
        self.views.iter()
    }

    pub fn views(&self) -> impl Iterator<Item = &FlaggableView<D>> {
        self.views.values()
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}

impl<D: Dimension> FromIterator<FlaggableView<D>> for ViewCollection<D> {
    fn from_iter<T: IntoIterator<Item = FlaggableView<D>>>(iter: T) -> Self {
        let mut collection = Self::new();
        for view in iter {
            collection.insert(view);
        }
        collection
    }
}

impl<D: Dimension> IntoIterator for ViewCollection<D> {
    type Item = (String, FlaggableView<D>);
    type IntoIter = std::collections::btree_map::IntoIter<String, FlaggableView<D>>;

    fn into_iter(self) -> Self::IntoIter {
        self.views.into_iter()
    }
}
