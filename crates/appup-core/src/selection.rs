use std::collections::{HashMap, HashSet};

use crate::models::{BatchTarget, UpgradeCandidate};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SelectionCount {
    pub total: usize,
    pub selected: usize,
}

impl SelectionCount {
    pub fn summary(&self) -> String {
        format!("{} apps found \u{2022} {} selected", self.total, self.selected)
    }
}

/// Selected flag per candidate identifier. Only identifiers handed to
/// [`SelectionStore::reset`] are tracked; everything else is ignored.
#[derive(Clone, Debug, Default)]
pub struct SelectionStore {
    order: Vec<String>,
    selected: HashMap<String, bool>,
}

impl SelectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the tracked identifiers, all unselected. Prior selections are
    /// dropped even when an identifier reappears.
    pub fn reset<I, S>(&mut self, identifiers: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.order.clear();
        self.selected.clear();
        for identifier in identifiers {
            let identifier = identifier.into();
            if self.selected.insert(identifier.clone(), false).is_none() {
                self.order.push(identifier);
            }
        }
    }

    pub fn toggle(&mut self, identifier: &str) {
        if let Some(flag) = self.selected.get_mut(identifier) {
            *flag = !*flag;
        }
    }

    /// Selects every tracked identifier.
    pub fn select_all(&mut self) {
        self.selected.values_mut().for_each(|flag| *flag = true);
    }

    /// Selects the given identifiers that are tracked, leaving others as they are.
    pub fn select_many<'a>(&mut self, identifiers: impl IntoIterator<Item = &'a str>) {
        for identifier in identifiers {
            if let Some(flag) = self.selected.get_mut(identifier) {
                *flag = true;
            }
        }
    }

    pub fn select_none(&mut self) {
        self.selected.values_mut().for_each(|flag| *flag = false);
    }

    pub fn is_selected(&self, identifier: &str) -> bool {
        self.selected.get(identifier).copied().unwrap_or(false)
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.selected.contains_key(identifier)
    }

    pub fn count(&self) -> SelectionCount {
        SelectionCount {
            total: self.order.len(),
            selected: self.selected.values().filter(|flag| **flag).count(),
        }
    }

    /// Selected identifiers in the order they were tracked.
    pub fn selected_identifiers(&self) -> impl Iterator<Item = &str> + '_ {
        self.order
            .iter()
            .filter(|identifier| self.is_selected(identifier))
            .map(String::as_str)
    }
}

/// The candidate list currently on display together with its selection.
///
/// The two are only ever replaced together so a selection can never refer to
/// a candidate from an earlier discovery run.
#[derive(Clone, Debug, Default)]
pub struct CandidateBoard {
    candidates: Vec<UpgradeCandidate>,
    selection: SelectionStore,
}

impl CandidateBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swaps in a fresh discovery result, sorted by display name, with nothing
    /// selected. Only the first candidate for each identifier is kept.
    pub fn replace(&mut self, mut candidates: Vec<UpgradeCandidate>) {
        let mut seen = HashSet::new();
        candidates.retain(|candidate| seen.insert(candidate.identifier.clone()));
        candidates.sort_by_cached_key(|candidate| candidate.display_name.to_lowercase());
        self.selection.reset(
            candidates
                .iter()
                .map(|candidate| candidate.identifier.clone()),
        );
        self.candidates = candidates;
    }

    pub fn candidates(&self) -> &[UpgradeCandidate] {
        &self.candidates
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn selection(&self) -> &SelectionStore {
        &self.selection
    }

    pub fn selection_mut(&mut self) -> &mut SelectionStore {
        &mut self.selection
    }

    pub fn count(&self) -> SelectionCount {
        self.selection.count()
    }

    /// Selected candidates as batch targets, in display order.
    pub fn selected_targets(&self) -> Vec<BatchTarget> {
        self.candidates
            .iter()
            .filter(|candidate| self.selection.is_selected(&candidate.identifier))
            .map(BatchTarget::from)
            .collect()
    }
}
