//! Per-event highlight flags shared by the map and table views.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::errors::UnknownEvent;
use crate::models::SearchResult;

/// Highlight flag for every event of the current result.
///
/// Keys always match the ids of the result the state was built from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SelectionState {
    flags: BTreeMap<String, bool>,
}

impl SelectionState {
    /// Fresh state for `result` with every event unselected.
    #[must_use]
    pub fn for_result(result: &SearchResult) -> Self {
        Self {
            flags: result.ids().map(|id| (id.to_string(), false)).collect(),
        }
    }

    /// Flip the flag for `id` and return its new value.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownEvent`] if `id` is not part of the current result.
    pub fn toggle(&mut self, id: &str) -> Result<bool, UnknownEvent> {
        let flag = self
            .flags
            .get_mut(id)
            .ok_or_else(|| UnknownEvent(id.to_string()))?;
        *flag = !*flag;
        Ok(*flag)
    }

    #[must_use]
    pub fn is_selected(&self, id: &str) -> bool {
        self.flags.get(id).copied().unwrap_or(false)
    }

    /// Ids currently highlighted, in id order.
    pub fn selected(&self) -> impl Iterator<Item = &str> {
        self.flags
            .iter()
            .filter(|(_, on)| **on)
            .map(|(id, _)| id.as_str())
    }
}

#[cfg(test)]
impl SelectionState {
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.flags.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.flags.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}
