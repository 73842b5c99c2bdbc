//! Dedup ledger of handled connection requests

use std::collections::BTreeSet;

use crate::feed::LogEntry;

/// Request sequence numbers that already completed a handshake
///
/// Grows monotonically for the lifetime of the process; ids are never removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessedSet {
    ids: BTreeSet<u64>,
}

impl ProcessedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold confirmation entries into the set
    ///
    /// Every confirmation counts, including ones published by another actor.
    /// Returns how many ids were newly added.
    pub fn mark_confirmed(&mut self, entries: &[LogEntry]) -> usize {
        entries
            .iter()
            .filter_map(|entry| entry.operation.confirmed_request())
            .filter(|id| self.ids.insert(*id))
            .count()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.ids.contains(&id)
    }

    /// Record a handled request; returns false if it was already present
    pub fn add(&mut self, id: u64) -> bool {
        self.ids.insert(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Ids in ascending order
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.ids.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn confirmation(seq: u64, request_id: u64) -> LogEntry {
        LogEntry::from_payload(
            seq,
            format!(
                r#"{{"p":"hcs-10","op":"connection_created","connection_id":{}}}"#,
                request_id
            ),
            Utc::now(),
        )
    }

    #[test]
    fn test_mark_confirmed_extracts_referenced_ids() {
        let mut set = ProcessedSet::new();
        let entries = vec![
            LogEntry::from_payload(1, "noise", Utc::now()),
            confirmation(2, 5),
            confirmation(3, 9),
        ];

        assert_eq!(set.mark_confirmed(&entries), 2);
        assert!(set.contains(5));
        assert!(set.contains(9));
        assert!(!set.contains(2));

        // Folding the same log again changes nothing.
        assert_eq!(set.mark_confirmed(&entries), 0);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut set = ProcessedSet::new();
        assert!(set.is_empty());
        assert!(set.add(3));
        assert!(!set.add(3));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![3]);
    }
}
