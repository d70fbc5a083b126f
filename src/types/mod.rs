pub mod descriptor;
pub mod event;

use std::fmt;

use alloy_dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::U256;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Wallet address as reported by the wallet provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Account(String);

impl Account {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Account {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

// Addresses compare case-insensitively on chain, so do tokens.
fn same_address(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Value passed to or returned from a contract method.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Token {
    Address(String),
    Uint(U256),
    Bool(bool),
    String(String),
}

impl Token {
    pub fn into_uint(self) -> Option<U256> {
        match self {
            Token::Uint(value) => Some(value),
            _ => None,
        }
    }

    /// Converts the token into a value of the ABI type `ty`.
    pub fn coerce(&self, ty: &DynSolType) -> Result<DynSolValue> {
        ty.coerce_str(&self.to_string())
            .with_context(|| format!("Expected {} but got {}", ty.sol_type_name(), self))
    }
}

impl TryFrom<DynSolValue> for Token {
    type Error = anyhow::Error;

    fn try_from(value: DynSolValue) -> Result<Self> {
        match value {
            DynSolValue::Address(address) => Ok(Token::Address(address.to_string())),
            DynSolValue::Uint(value, _) => Ok(Token::Uint(value)),
            DynSolValue::Bool(value) => Ok(Token::Bool(value)),
            DynSolValue::String(value) => Ok(Token::String(value)),
            other => bail!("Unsupported return value: {:?}", other),
        }
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Token::Address(a), Token::Address(b)) => same_address(a, b),
            (Token::Uint(a), Token::Uint(b)) => a == b,
            (Token::Bool(a), Token::Bool(b)) => a == b,
            (Token::String(a), Token::String(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Token {}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Address(address) => f.write_str(address),
            Token::Uint(value) => write!(f, "{}", value),
            Token::Bool(value) => write!(f, "{}", value),
            Token::String(value) => f.write_str(value),
        }
    }
}

impl From<&Account> for Token {
    fn from(account: &Account) -> Self {
        Token::Address(account.as_str().to_string())
    }
}

impl From<U256> for Token {
    fn from(value: U256) -> Self {
        Token::Uint(value)
    }
}

/// Options of a state-changing invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOptions {
    pub from: Account,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub transaction_hash: String,
    pub block_number: u64,
    pub status: bool,
}

/// Positional event filter. `None` matches any value at that position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub values: Vec<Option<Token>>,
}

impl EventFilter {
    pub fn new(values: Vec<Option<Token>>) -> Self {
        Self { values }
    }

    pub fn any() -> Self {
        Self::default()
    }
}
