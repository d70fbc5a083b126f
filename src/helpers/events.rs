use crate::types::{EventFilter, event::EventLog};

// Event id as block_txhash_logindex
pub fn event_id(block_number: u64, transaction_hash: &str, log_index: u64) -> String {
    format!("{}_{}_{}", block_number, transaction_hash, log_index)
}

// Checks an event against a positional filter. Positions past the end of
// the filter, and `None` entries, match anything.
pub fn matches_filter(log: &EventLog, filter: &EventFilter) -> bool {
    filter
        .values
        .iter()
        .enumerate()
        .all(|(position, expected)| match expected {
            None => true,
            Some(expected) => log.values.get(position) == Some(expected),
        })
}
