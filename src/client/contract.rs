use std::sync::Arc;

use alloy_dyn_abi::{DynSolType, DynSolValue};
use alloy_json_abi::Function;
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use futures::{StreamExt, future};
use tracing::debug;

use super::{ContractBinding, EventStream};
use crate::{
    helpers::events::matches_filter,
    types::{
        Account, EventFilter, SendOptions, Token, TransactionReceipt,
        descriptor::{Capabilities, ContractDescriptor, is_read_only},
    },
};

/// Raw execution layer behind a [`ContractHandle`].
///
/// Receives only invocations already checked against the contract
/// interface, with arguments converted to their ABI types.
#[async_trait]
pub trait ContractBackend: Send + Sync {
    async fn execute_call(
        &self,
        address: &str,
        method: &str,
        args: &[DynSolValue],
    ) -> Result<DynSolValue>;

    async fn execute_send(
        &self,
        address: &str,
        method: &str,
        args: &[DynSolValue],
        from: &Account,
    ) -> Result<TransactionReceipt>;

    /// Every log of `event` emitted by the contract from now on.
    async fn event_source(&self, address: &str, event: &str) -> Result<EventStream>;
}

fn coerce_args(function: &Function, args: &[Token]) -> Result<Vec<DynSolValue>> {
    function
        .inputs
        .iter()
        .zip(args)
        .enumerate()
        .map(|(position, (param, arg))| {
            let ty = DynSolType::parse(&param.selector_type())?;
            arg.coerce(&ty).with_context(|| {
                format!("Invalid parameter {} of method {}", position, function.name)
            })
        })
        .collect()
}

/// Binding that checks invocations against the descriptor before handing
/// them to its backend.
pub struct ContractHandle<B> {
    descriptor: ContractDescriptor,
    address: String,
    capabilities: Capabilities,
    backend: Arc<B>,
}

impl<B: ContractBackend> ContractHandle<B> {
    pub fn new(descriptor: &ContractDescriptor, address: &str, backend: Arc<B>) -> Self {
        Self {
            descriptor: descriptor.clone(),
            address: address.to_string(),
            capabilities: descriptor.capabilities(),
            backend,
        }
    }

    // Picks the first overload whose inputs accept `args`, then checks its
    // mutability.
    fn resolve(&self, method: &str, args: &[Token], read_only: bool) -> Result<Vec<DynSolValue>> {
        if !self.capabilities.has_method(method) {
            bail!("Method {} is not part of the contract interface", method);
        }

        let overloads = self.descriptor.abi.function(method).into_iter().flatten();
        let mut mismatch = None;

        for function in overloads.filter(|f| f.inputs.len() == args.len()) {
            let values = match coerce_args(function, args) {
                Ok(values) => values,
                Err(e) => {
                    mismatch = Some(e);
                    continue;
                }
            };

            return match (read_only, is_read_only(function.state_mutability)) {
                (true, false) => bail!("Method {} changes state and must be sent", method),
                (false, true) => bail!("Method {} is read-only and must be called", method),
                _ => Ok(values),
            };
        }

        Err(mismatch.unwrap_or_else(|| {
            anyhow!(
                "Invalid number of parameters for method {}: got {}",
                method,
                args.len()
            )
        }))
    }
}

#[async_trait]
impl<B: ContractBackend + 'static> ContractBinding for ContractHandle<B> {
    fn address(&self) -> String {
        self.address.clone()
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities.clone()
    }

    async fn call(&self, method: &str, args: &[Token]) -> Result<Token> {
        let values = self.resolve(method, args, true)?;
        debug!(address = %self.address, method, "call");

        let result = self.backend.execute_call(&self.address, method, &values).await?;
        Token::try_from(result)
    }

    async fn send(
        &self,
        method: &str,
        args: &[Token],
        options: SendOptions,
    ) -> Result<TransactionReceipt> {
        let values = self.resolve(method, args, false)?;
        debug!(address = %self.address, method, from = %options.from, "send");

        self.backend
            .execute_send(&self.address, method, &values, &options.from)
            .await
    }

    async fn subscribe_event(&self, event: &str, filter: EventFilter) -> Result<EventStream> {
        let abi_event = self
            .descriptor
            .abi
            .event(event)
            .and_then(|events| events.first())
            .filter(|_| self.capabilities.has_event(event));
        let Some(abi_event) = abi_event else {
            bail!("Event {} is not part of the contract interface", event);
        };

        if filter.values.len() > abi_event.inputs.len() {
            bail!(
                "Event {} has {} inputs but the filter has {} values",
                event,
                abi_event.inputs.len(),
                filter.values.len()
            );
        }

        let source = self.backend.event_source(&self.address, event).await?;

        // Errors are passed through so the subscriber can report them.
        let filtered = source.filter(move |item| {
            future::ready(match item {
                Ok(log) => matches_filter(log, &filter),
                Err(_) => true,
            })
        });

        Ok(Box::pin(filtered))
    }
}
