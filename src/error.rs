use thiserror::Error;

/// Failures surfaced by the action sequence.
///
/// `Configuration`, `ProviderUnavailable`, `Connect`, `DescriptorLoad` and
/// `Bind` abort the run. The other variants are reported at the step that
/// produced them and the run carries on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SequenceError {
    #[error("{0}")]
    Configuration(String),

    #[error("{0}")]
    ProviderUnavailable(String),

    #[error("Failed to connect wallet: {0}")]
    Connect(String),

    #[error("Failed to load contract descriptor: {0}")]
    DescriptorLoad(String),

    #[error("Failed to bind contract: {0}")]
    Bind(String),

    #[error("{0}")]
    NativeBalance(String),

    #[error("{0}")]
    Call(String),

    #[error("{0}")]
    Send(String),

    #[error("{0}")]
    Subscription(String),

    #[error("A sequence is already running for this session")]
    AlreadyRunning,
}

impl SequenceError {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SequenceError::Configuration(_)
                | SequenceError::ProviderUnavailable(_)
                | SequenceError::Connect(_)
                | SequenceError::DescriptorLoad(_)
                | SequenceError::Bind(_)
                | SequenceError::AlreadyRunning
        )
    }

    /// Line appended to the output sink for this error.
    pub fn output_line(&self) -> String {
        match self {
            SequenceError::Configuration(msg) | SequenceError::ProviderUnavailable(msg) => {
                msg.clone()
            }
            other => format!("Error: {}", other),
        }
    }
}

// Innermost message of a provider error, the part a user can act on.
pub(crate) fn root_message(err: &anyhow::Error) -> String {
    err.root_cause().to_string()
}
