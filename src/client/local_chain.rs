use std::{collections::HashMap, sync::Arc};

use alloy_dyn_abi::DynSolValue;
use alloy_primitives::{Address, U256, keccak256};
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use futures::{StreamExt, future};
use tokio::sync::{Mutex, broadcast};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info};

use super::{
    ChainClient, ContractBinding, EventStream, WalletProvider,
    contract::{ContractBackend, ContractHandle},
};
use crate::{
    constants::{BALANCE_OF_METHOD, EVENT_CHANNEL_CAPACITY, TRANSFER_EVENT, TRANSFER_METHOD},
    helpers::events::event_id,
    types::{
        Account, Token, TransactionReceipt, descriptor::ContractDescriptor, event::EventLog,
    },
};

fn key(address: &str) -> String {
    address.to_ascii_lowercase()
}

#[derive(Debug, Default)]
struct LedgerState {
    block_number: u64,
    nonce: u64,
    native: HashMap<String, U256>,
    // contract -> holder -> balance
    tokens: HashMap<String, HashMap<String, U256>>,
}

#[derive(Debug)]
struct Ledger {
    state: Mutex<LedgerState>,
    events: broadcast::Sender<EventLog>,
}

impl Ledger {
    async fn transfer(
        &self,
        contract: &str,
        from: &Account,
        to: &str,
        amount: U256,
    ) -> Result<TransactionReceipt> {
        let mut state = self.state.lock().await;

        let holders = state
            .tokens
            .get_mut(&key(contract))
            .with_context(|| format!("No contract deployed at {}", contract))?;

        let from_balance = holders.get(&key(from.as_str())).copied().unwrap_or_default();
        if from_balance < amount {
            bail!("execution reverted: transfer amount exceeds balance");
        }

        let remaining = from_balance - amount;
        let to_balance = if key(to) == key(from.as_str()) {
            remaining
        } else {
            holders.get(&key(to)).copied().unwrap_or_default()
        };
        let credited = to_balance
            .checked_add(amount)
            .context("execution reverted: balance overflow")?;

        holders.insert(key(from.as_str()), remaining);
        holders.insert(key(to), credited);

        state.nonce += 1;
        state.block_number += 1;

        let hash = keccak256(format!("{}:{}:{}:{}:{}", contract, from, to, amount, state.nonce));
        let transaction_hash = hash.to_string();
        let block_number = state.block_number;
        drop(state);

        let log = EventLog {
            event_id: event_id(block_number, &transaction_hash, 0),
            event: TRANSFER_EVENT.to_string(),
            contract_address: contract.to_string(),
            block_number,
            transaction_hash: transaction_hash.clone(),
            log_index: 0,
            values: vec![
                Token::from(from),
                Token::Address(to.to_string()),
                Token::Uint(amount),
            ],
        };

        // No subscriber is fine.
        let _ = self.events.send(log);

        info!(%contract, %from, %to, %amount, block_number, "token transfer");

        Ok(TransactionReceipt {
            transaction_hash,
            block_number,
            status: true,
        })
    }
}

fn address_arg(args: &[DynSolValue], position: usize, method: &str) -> Result<Address> {
    args.get(position)
        .and_then(DynSolValue::as_address)
        .ok_or_else(|| anyhow!("Parameter {} of {} must be an address", position, method))
}

fn uint_arg(args: &[DynSolValue], position: usize, method: &str) -> Result<U256> {
    args.get(position)
        .and_then(DynSolValue::as_uint)
        .map(|(value, _)| value)
        .ok_or_else(|| anyhow!("Parameter {} of {} must be an unsigned integer", position, method))
}

#[async_trait]
impl ContractBackend for Ledger {
    async fn execute_call(
        &self,
        address: &str,
        method: &str,
        args: &[DynSolValue],
    ) -> Result<DynSolValue> {
        match method {
            BALANCE_OF_METHOD => {
                let holder = address_arg(args, 0, method)?.to_string();
                let state = self.state.lock().await;
                let holders = state
                    .tokens
                    .get(&key(address))
                    .with_context(|| format!("No contract deployed at {}", address))?;

                let balance = holders.get(&key(&holder)).copied().unwrap_or_default();
                Ok(DynSolValue::Uint(balance, 256))
            }
            other => bail!("Method {} is not supported by the local chain", other),
        }
    }

    async fn execute_send(
        &self,
        address: &str,
        method: &str,
        args: &[DynSolValue],
        from: &Account,
    ) -> Result<TransactionReceipt> {
        match method {
            TRANSFER_METHOD => {
                let to = address_arg(args, 0, method)?.to_string();
                let amount = uint_arg(args, 1, method)?;
                self.transfer(address, from, &to, amount).await
            }
            other => bail!("Method {} is not supported by the local chain", other),
        }
    }

    async fn event_source(&self, address: &str, event: &str) -> Result<EventStream> {
        let contract = key(address);
        let event = event.to_string();

        let stream = BroadcastStream::new(self.events.subscribe()).filter_map(move |item| {
            future::ready(match item {
                Ok(log) if key(&log.contract_address) == contract && log.event == event => {
                    Some(Ok(log))
                }
                Ok(_) => None,
                Err(e) => Some(Err(anyhow!(e).context("Event subscription lagged"))),
            })
        });

        Ok(Box::pin(stream))
    }
}

/// Chain client over an in-memory ledger. Clones share the same ledger.
#[derive(Debug, Clone)]
pub struct LocalChain {
    ledger: Arc<Ledger>,
}

impl Default for LocalChain {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalChain {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            ledger: Arc::new(Ledger {
                state: Mutex::new(LedgerState::default()),
                events,
            }),
        }
    }

    pub async fn fund(&self, account: &Account, amount: U256) -> Result<()> {
        let mut state = self.ledger.state.lock().await;
        let balance = state.native.entry(key(account.as_str())).or_default();
        *balance = balance
            .checked_add(amount)
            .with_context(|| format!("Native balance of {} would overflow", account))?;

        Ok(())
    }

    /// Registers a token contract whose whole supply belongs to `holder`.
    pub async fn deploy_token(&self, address: &str, holder: &Account, supply: U256) {
        let mut state = self.ledger.state.lock().await;
        let holders = state.tokens.entry(key(address)).or_default();
        holders.insert(key(holder.as_str()), supply);

        debug!(address, %holder, %supply, "token deployed");
    }

    pub async fn token_balance(&self, contract: &str, holder: &str) -> U256 {
        let state = self.ledger.state.lock().await;
        state
            .tokens
            .get(&key(contract))
            .and_then(|holders| holders.get(&key(holder)))
            .copied()
            .unwrap_or_default()
    }

    /// Moves tokens outside of any binding, e.g. another user's transaction.
    pub async fn transfer_tokens(
        &self,
        contract: &str,
        from: &Account,
        to: &str,
        amount: U256,
    ) -> Result<TransactionReceipt> {
        self.ledger.transfer(contract, from, to, amount).await
    }
}

#[async_trait]
impl ChainClient for LocalChain {
    async fn get_native_balance(&self, account: &Account) -> Result<U256> {
        let state = self.ledger.state.lock().await;
        Ok(state
            .native
            .get(&key(account.as_str()))
            .copied()
            .unwrap_or_default())
    }

    fn bind_contract(
        &self,
        descriptor: &ContractDescriptor,
        address: &str,
    ) -> Result<Box<dyn ContractBinding>> {
        if address.trim().is_empty() {
            bail!("Contract address is empty");
        }

        Ok(Box::new(ContractHandle::new(
            descriptor,
            address,
            self.ledger.clone(),
        )))
    }
}

/// Wallet exposing a fixed list of accounts.
#[derive(Debug, Clone)]
pub struct LocalWallet {
    accounts: Vec<Account>,
    rejects: bool,
}

impl LocalWallet {
    pub fn new(accounts: Vec<Account>) -> Self {
        Self {
            accounts,
            rejects: false,
        }
    }

    /// Wallet whose user declines every authorization request.
    pub fn rejecting() -> Self {
        Self {
            accounts: Vec::new(),
            rejects: true,
        }
    }
}

#[async_trait]
impl WalletProvider for LocalWallet {
    async fn request_accounts(&self) -> Result<Vec<Account>> {
        if self.rejects {
            bail!("User rejected the request.");
        }

        Ok(self.accounts.clone())
    }
}
