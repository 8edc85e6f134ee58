use std::fmt::Display;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::Float;

/// An ordered table of cumulative weighted yields after each selection step.
///
/// Entries are keyed `"{:02}_{description}"` in the order they were recorded,
/// so the table reads top to bottom as the selection tightens.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CutFlow {
    entries: IndexMap<String, Float>,
}

impl CutFlow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the cumulative weighted yield after the cut described by `desc`.
    ///
    /// Returns the ordinal-prefixed label the entry was stored under.
    pub fn record(&mut self, desc: &str, weighted_yield: Float) -> String {
        let label = format!("{:02}_{}", self.entries.len(), desc);
        self.entries.insert(label.clone(), weighted_yield);
        label
    }

    /// The recorded labels, in insertion order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }

    /// The yield recorded under the given label, if any.
    pub fn get(&self, label: &str) -> Option<Float> {
        self.entries.get(label).copied()
    }

    /// The yield after the last recorded cut, if any cut has been recorded.
    pub fn last(&self) -> Option<Float> {
        self.entries.values().last().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the yields are monotonically non-increasing down the table.
    ///
    /// Cuts only ever remove events, so a violation indicates a bookkeeping
    /// bug or a negative-weight pathology worth investigating.
    pub fn is_monotonic(&self) -> bool {
        self.entries
            .values()
            .zip(self.entries.values().skip(1))
            .all(|(a, b)| b <= a)
    }

    /// The efficiency of the full selection relative to the first entry.
    pub fn efficiency(&self) -> Option<Float> {
        let first = *self.entries.values().next()?;
        let last = self.last()?;
        if first == 0.0 {
            return None;
        }
        Some(last / first)
    }
}

impl Display for CutFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let width = self
            .entries
            .keys()
            .map(|k| k.len())
            .max()
            .unwrap_or(8)
            .max(8);
        writeln!(f, "{:<width$}  {:>14}", "cut", "yield")?;
        for (label, y) in &self.entries {
            writeln!(f, "{label:<width$}  {y:>14.4}")?;
        }
        Ok(())
    }
}
