use serde::{Deserialize, Serialize};

use super::Token;

/// A contract event as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLog {
    pub event_id: String,
    pub event: String,
    pub contract_address: String,
    pub block_number: u64,
    pub transaction_hash: String,
    pub log_index: u64,
    // Values in the order of the event's ABI inputs
    pub values: Vec<Token>,
}

/// Entry of the diagnostic channel fed by event listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    Event(EventLog),
    Error(String),
}
