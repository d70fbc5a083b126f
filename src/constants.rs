pub const BALANCE_OF_METHOD: &str = "balanceOf";
pub const TRANSFER_METHOD: &str = "transfer";
pub const TRANSFER_EVENT: &str = "Transfer";

// Amount transferred when none is configured, in display unit
pub const DEFAULT_TRANSFER_AMOUNT: &str = "1";

// Decimals between the base unit and the display unit
pub const DISPLAY_UNIT_DECIMALS: u8 = 18;

pub const READABLE_PREFIX_LEN: usize = 5;
pub const READABLE_SUFFIX_LEN: usize = 4;

// Buffer of the local chain event broadcast. Slow subscribers that fall
// further behind than this receive a lag error instead of the missed events.
pub const EVENT_CHANNEL_CAPACITY: usize = 128;

pub const DIAGNOSTICS_TARGET: &str = "diagnostics";

pub const CONFIGURATION_MESSAGE: &str = "Make sure to set the contract address and the contract descriptor path first.";
pub const PROVIDER_UNAVAILABLE_MESSAGE: &str = "Wallet provider not connected. Make sure you have a wallet installed, you are logged in to your account, and the page is served from a server or localhost.";

pub enum EnvVar {
    ContractAddress,
    ContractDescriptor,
    TransferAmount,
    TransferTo,
}

impl EnvVar {
    pub fn key(&self) -> &'static str {
        match self {
            EnvVar::ContractAddress => "CONTRACT_ADDRESS",
            EnvVar::ContractDescriptor => "CONTRACT_DESCRIPTOR",
            EnvVar::TransferAmount => "TRANSFER_AMOUNT",
            EnvVar::TransferTo => "TRANSFER_TO",
        }
    }
}
