use crate::constants::{DEFAULT_TRANSFER_AMOUNT, EnvVar};

/// Settings of one action sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencerConfig {
    pub contract_address: String,
    // Filesystem path or http(s) URL of the descriptor document
    pub descriptor_path: String,
    // Display unit, e.g. "1"
    pub transfer_amount: String,
    // Defaults to the contract address when unset
    pub transfer_to: Option<String>,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            contract_address: String::new(),
            descriptor_path: String::new(),
            transfer_amount: DEFAULT_TRANSFER_AMOUNT.to_string(),
            transfer_to: None,
        }
    }
}

impl SequencerConfig {
    pub fn new(contract_address: &str, descriptor_path: &str) -> Self {
        Self {
            contract_address: contract_address.to_string(),
            descriptor_path: descriptor_path.to_string(),
            ..Default::default()
        }
    }

    /// Reads the configuration from the environment, loading `.env` first.
    ///
    /// Missing address or descriptor path stay empty, the sequence reports
    /// them when it runs.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let value = |var: EnvVar| lookup(var.key()).map(|v| v.trim().to_string());

        Self {
            contract_address: value(EnvVar::ContractAddress).unwrap_or_default(),
            descriptor_path: value(EnvVar::ContractDescriptor).unwrap_or_default(),
            transfer_amount: value(EnvVar::TransferAmount)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_TRANSFER_AMOUNT.to_string()),
            transfer_to: value(EnvVar::TransferTo).filter(|v| !v.is_empty()),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.contract_address.trim().is_empty() && !self.descriptor_path.trim().is_empty()
    }

    pub fn transfer_target(&self) -> &str {
        self.transfer_to.as_deref().unwrap_or(&self.contract_address)
    }
}
