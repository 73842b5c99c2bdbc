//! Request reconciliation
//!
//! Compares a feed snapshot against the watermark and the processed set to
//! find connection requests that still need a handshake.

use crate::feed::{LogEntry, Operation};
use crate::ledger::ProcessedSet;

/// Result of reconciling one feed snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Unhandled requests above the watermark, oldest first
    pub pending: Vec<LogEntry>,

    /// Highest sequence number scanned; never lower than the input watermark
    pub watermark: u64,

    /// Requests above the watermark that were already handled
    pub already_processed: Vec<u64>,

    /// Malformed request/confirmation entries above the watermark
    pub malformed: Vec<(u64, String)>,
}

/// Find unhandled requests newer than `watermark`
///
/// `entries` may arrive in any order; pending requests are returned in
/// ascending sequence order so older requests are served first.
pub fn reconcile(entries: &[LogEntry], watermark: u64, processed: &ProcessedSet) -> Reconciliation {
    let mut fresh: Vec<&LogEntry> = entries
        .iter()
        .filter(|entry| entry.sequence_number > watermark)
        .collect();
    fresh.sort_by_key(|entry| entry.sequence_number);

    let mut result = Reconciliation {
        watermark,
        ..Default::default()
    };

    for entry in fresh {
        let seq = entry.sequence_number;
        result.watermark = result.watermark.max(seq);

        match &entry.operation {
            Operation::Request(_) if processed.contains(seq) => result.already_processed.push(seq),
            Operation::Request(_) => result.pending.push(entry.clone()),
            Operation::Malformed { op, reason } => {
                result.malformed.push((seq, format!("{}: {}", op, reason)))
            }
            Operation::Confirmation { .. }
            | Operation::Other { .. }
            | Operation::Unrecognized { .. } => {}
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn request(seq: u64) -> LogEntry {
        LogEntry::from_payload(
            seq,
            r#"{"p":"hcs-10","op":"connection_request","operator_id":"0.0.100@0.0.200"}"#,
            Utc::now(),
        )
    }

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

    fn seqs(entries: &[LogEntry]) -> Vec<u64> {
        entries.iter().map(|e| e.sequence_number).collect()
    }

    #[test]
    fn test_empty_input_is_noop() {
        let processed = ProcessedSet::new();
        let result = reconcile(&[], 4, &processed);

        assert!(result.pending.is_empty());
        assert_eq!(result.watermark, 4);
        assert!(processed.is_empty());
    }

    #[test]
    fn test_returns_unprocessed_requests_above_watermark_in_order() {
        let mut processed = ProcessedSet::new();
        processed.add(3);
        let entries = vec![request(4), request(1), request(3), request(2)];

        let result = reconcile(&entries, 1, &processed);
        assert_eq!(seqs(&result.pending), vec![2, 4]);
        assert_eq!(result.already_processed, vec![3]);
        assert_eq!(result.watermark, 4);
    }

    #[test]
    fn test_watermark_advances_when_everything_was_handled() {
        let mut processed = ProcessedSet::new();
        processed.add(1);
        processed.add(2);

        let result = reconcile(&[request(1), request(2)], 0, &processed);
        assert!(result.pending.is_empty());
        assert_eq!(result.watermark, 2);
    }

    #[test]
    fn test_watermark_covers_non_request_entries() {
        let processed = ProcessedSet::new();
        let result = reconcile(&[request(1), confirmation(2, 1)], 1, &processed);

        assert!(result.pending.is_empty());
        assert_eq!(result.watermark, 2);
    }

    #[test]
    fn test_watermark_never_decreases() {
        let processed = ProcessedSet::new();
        let result = reconcile(&[request(2)], 9, &processed);

        assert!(result.pending.is_empty());
        assert_eq!(result.watermark, 9);
    }

    #[test]
    fn test_malformed_entries_are_reported_not_pending() {
        let processed = ProcessedSet::new();
        let broken = LogEntry::from_payload(
            5,
            r#"{"p":"hcs-10","op":"connection_request"}"#,
            Utc::now(),
        );

        let result = reconcile(&[broken, request(6)], 0, &processed);
        assert_eq!(seqs(&result.pending), vec![6]);
        assert_eq!(result.malformed.len(), 1);
        assert_eq!(result.malformed[0].0, 5);
        assert!(processed.is_empty());
    }
}
