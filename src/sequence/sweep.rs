//! Parameter sweeps over a base sequence.

use super::{FieldValue, PulseField, Sequence};
use crate::error::{AppResult, NmrError};
use std::collections::BTreeSet;
use std::ops::Range;

/// Pulse positions selected for a sweep.
///
/// Built from a single index or any collection of indices, so callers can
/// write `make_sweep(&seq, 1usize, ...)` as well as `make_sweep(&seq, vec![0usize, 2], ...)`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IndexSelection(BTreeSet<usize>);

impl IndexSelection {
    pub fn contains(&self, index: usize) -> bool {
        self.0.contains(&index)
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }
}

impl From<usize> for IndexSelection {
    fn from(value: usize) -> Self {
        IndexSelection(BTreeSet::from([value]))
    }
}

impl From<Vec<usize>> for IndexSelection {
    fn from(value: Vec<usize>) -> Self {
        IndexSelection(value.into_iter().collect())
    }
}

impl From<&[usize]> for IndexSelection {
    fn from(value: &[usize]) -> Self {
        IndexSelection(value.iter().copied().collect())
    }
}

impl<const N: usize> From<[usize; N]> for IndexSelection {
    fn from(value: [usize; N]) -> Self {
        IndexSelection(value.into_iter().collect())
    }
}

impl From<BTreeSet<usize>> for IndexSelection {
    fn from(value: BTreeSet<usize>) -> Self {
        IndexSelection(value)
    }
}

impl From<Range<usize>> for IndexSelection {
    fn from(value: Range<usize>) -> Self {
        IndexSelection(value.collect())
    }
}

impl FromIterator<usize> for IndexSelection {
    fn from_iter<T: IntoIterator<Item = usize>>(iter: T) -> Self {
        IndexSelection(iter.into_iter().collect())
    }
}

/// Generate one sequence per value, each a copy of `base` with `field`
/// overwritten on the selected pulses.
///
/// All selected indices must exist in `base` and every value must match the
/// field's kind; either mistake fails before any sequence is produced.
pub fn make_sweep(
    base: &Sequence,
    indices: impl Into<IndexSelection>,
    field: PulseField,
    values: &[FieldValue],
) -> AppResult<Vec<Sequence>> {
    let indices = indices.into();
    if let Some(index) = indices.iter().find(|&i| i >= base.len()) {
        return Err(NmrError::SweepIndexOutOfRange {
            index,
            len: base.len(),
        });
    }

    values
        .iter()
        .map(|value| {
            base.iter()
                .enumerate()
                .map(|(i, pulse)| {
                    if indices.contains(i) {
                        pulse.with_field(field, value)
                    } else {
                        Ok(pulse.clone())
                    }
                })
                .collect::<AppResult<Sequence>>()
        })
        .collect()
}

/// `n` values from `start` to `end` (inclusive), equally spaced in log space.
pub fn log_durations(start: f64, end: f64, n: usize) -> AppResult<Vec<f64>> {
    if start <= 0.0 || end <= 0.0 || !start.is_finite() || !end.is_finite() {
        return Err(NmrError::Configuration(format!(
            "log-spaced durations need positive bounds (got {start} .. {end})"
        )));
    }
    match n {
        0 => Ok(Vec::new()),
        1 => Ok(vec![start]),
        _ => {
            let (ls, le) = (start.ln(), end.ln());
            let steps = (n - 1) as f64;
            Ok((0..n)
                .map(|i| (ls + (le - ls) * i as f64 / steps).exp())
                .collect())
        }
    }
}
