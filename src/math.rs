// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Some helper mathematics: robust statistics and index bookkeeping.

use std::ops::RangeInclusive;

/// The median of some values. NaNs are ordered after every other value, so
/// they only influence the result when they make up at least half the sample.
/// Returns `None` for an empty sample.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    if n % 2 == 1 {
        Some(sorted[n / 2])
    } else {
        Some(0.5 * (sorted[n / 2 - 1] + sorted[n / 2]))
    }
}

/// The median and the median absolute deviation from the median (MAD) of some
/// values. The MAD is *not* scaled to a Gaussian sigma.
pub fn median_and_mad(values: &[f64]) -> Option<(f64, f64)> {
    let med = median(values)?;
    let deviations: Vec<f64> = values.iter().map(|v| (v - med).abs()).collect();
    let mad = median(&deviations)?;
    Some((med, mad))
}

/// Split sorted, de-duplicated indices into inclusive runs of consecutive
/// values, e.g. `[10, 11, 12, 20]` -> `[10..=12, 20..=20]`.
pub fn contiguous_runs(sorted_indices: &[usize]) -> Vec<RangeInclusive<usize>> {
    let mut runs = vec![];
    let mut iter = sorted_indices.iter().copied();
    let Some(first) = iter.next() else {
        return runs;
    };
    let (mut start, mut end) = (first, first);
    for idx in iter {
        if idx == end + 1 {
            end = idx;
        } else {
            runs.push(start..=end);
            start = idx;
            end = idx;
        }
    }
    runs.push(start..=end);
    runs
}

/// The inclusive runs of `true` values in a boolean mask.
pub fn true_runs(mask: &[bool]) -> Vec<RangeInclusive<usize>> {
    let indices: Vec<usize> = mask
        .iter()
        .enumerate()
        .filter_map(|(i, &m)| m.then_some(i))
        .collect();
    contiguous_runs(&indices)
}

/// Split `n` channels into `num_parts` contiguous partitions, using integer
/// division for the boundaries. Partitions may be empty when `n < num_parts`.
pub fn partition_bounds(n: usize, num_parts: usize) -> Vec<std::ops::Range<usize>> {
    (0..num_parts)
        .map(|i| (n * i / num_parts)..(n * (i + 1) / num_parts))
        .collect()
}

/// The number of antennas in a baseline axis that enumerates every ordered
/// antenna pair (including autocorrelations), i.e. `nbaseline = nant^2`.
#[inline]
pub fn num_ants_from_num_ordered_baselines(num_baselines: usize) -> usize {
    (num_baselines as f64).sqrt().floor() as usize
}

/// The indices of the baselines involving `ant` on a baseline axis laid out as
/// `baseline = ant1 * nant + ant2`.
pub fn ordered_baselines_for_ant(num_baselines: usize, nant: usize, ant: usize) -> Vec<usize> {
    (0..num_baselines)
        .filter(|&bl| (ant * nant <= bl && bl < (ant + 1) * nant) || bl % nant == ant)
        .collect()
}
