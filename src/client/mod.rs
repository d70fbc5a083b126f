pub mod contract;
pub mod loader;
pub mod local_chain;
pub mod subscription;

use std::pin::Pin;

use alloy_primitives::U256;
use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;

use crate::{
    helpers::units,
    types::{
        Account, EventFilter, SendOptions, Token, TransactionReceipt,
        descriptor::{Capabilities, ContractDescriptor},
        event::EventLog,
    },
};

pub type EventStream = Pin<Box<dyn Stream<Item = Result<EventLog>> + Send>>;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Asks the user to authorize the page and returns the exposed accounts.
    async fn request_accounts(&self) -> Result<Vec<Account>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Native-currency balance in base unit.
    async fn get_native_balance(&self, account: &Account) -> Result<U256>;

    /// Builds a binding for the contract at `address`. Does not touch the network.
    fn bind_contract(
        &self,
        descriptor: &ContractDescriptor,
        address: &str,
    ) -> Result<Box<dyn ContractBinding>>;

    fn to_display_unit(&self, amount: U256) -> String {
        units::to_display_unit(amount)
    }

    fn to_base_unit(&self, amount: &str) -> Result<U256> {
        units::to_base_unit(amount)
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContractBinding: Send + Sync {
    fn address(&self) -> String;

    fn capabilities(&self) -> Capabilities;

    /// Read-only invocation: no fee, no signature, no state change.
    async fn call(&self, method: &str, args: &[Token]) -> Result<Token>;

    /// State-changing invocation signed by `options.from`.
    async fn send(
        &self,
        method: &str,
        args: &[Token],
        options: SendOptions,
    ) -> Result<TransactionReceipt>;

    /// Standing subscription to `event`, restricted to logs matching `filter`.
    async fn subscribe_event(&self, event: &str, filter: EventFilter) -> Result<EventStream>;
}
