use crate::models::HistoryRecord;

/// Default number of records kept in the history.
pub const DEFAULT_MAX_ENTRIES: usize = 50;

/// Caps the history at a fixed number of records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityGovernor {
    max_entries: usize,
}

impl Default for CapacityGovernor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl CapacityGovernor {
    pub fn new(max_entries: usize) -> Self {
        Self { max_entries }
    }

    /// The records that must go, given a list ordered newest first.
    pub fn overflow<'a>(&self, ordered: &'a [HistoryRecord]) -> &'a [HistoryRecord] {
        if ordered.len() > self.max_entries {
            &ordered[self.max_entries..]
        } else {
            &[]
        }
    }
}

/// Sort records newest first, breaking timestamp ties by identity.
pub fn sort_by_recency(records: &mut [HistoryRecord]) {
    records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
}
