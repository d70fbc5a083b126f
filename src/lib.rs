pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod helpers;
pub mod output;
pub mod sequencer;
pub mod types;

pub use config::SequencerConfig;
pub use error::SequenceError;
pub use sequencer::{ActionSequencer, SequenceReport, SequenceState, Session};
