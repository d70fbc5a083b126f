use std::{borrow::Cow, collections::BTreeSet};

use alloy_dyn_abi::DynSolType;
use alloy_json_abi::{JsonAbi, StateMutability};
use anyhow::{Context, Result, ensure};
use serde::Deserialize;

pub fn is_read_only(mutability: StateMutability) -> bool {
    matches!(mutability, StateMutability::Pure | StateMutability::View)
}

// Every entry needs a name and every input a type the ABI coder understands.
fn check_entry<'a>(
    kind: &str,
    name: &str,
    input_types: impl Iterator<Item = Cow<'a, str>>,
) -> Result<()> {
    ensure!(!name.trim().is_empty(), "{} entry has an empty name", kind);

    for (position, ty) in input_types.enumerate() {
        ensure!(
            !ty.trim().is_empty(),
            "{} {} input {} has an empty type",
            kind,
            name,
            position
        );
        DynSolType::parse(&ty).with_context(|| {
            format!("{} {} input {} has an invalid type '{}'", kind, name, position, ty)
        })?;
    }

    Ok(())
}

fn validate(abi: &JsonAbi) -> Result<()> {
    ensure!(!abi.is_empty(), "abi has no entries");

    for function in abi.functions() {
        let types = function.inputs.iter().map(|p| p.selector_type());
        check_entry("function", &function.name, types)?;
    }
    for event in abi.events() {
        let types = event.inputs.iter().map(|p| p.selector_type());
        check_entry("event", &event.name, types)?;
    }
    for error in abi.errors() {
        let types = error.inputs.iter().map(|p| p.selector_type());
        check_entry("error", &error.name, types)?;
    }

    Ok(())
}

#[derive(Deserialize)]
struct DescriptorDocument {
    abi: JsonAbi,
}

/// Names a binding can invoke or subscribe to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub methods: BTreeSet<String>,
    pub events: BTreeSet<String>,
}

impl Capabilities {
    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains(name)
    }

    pub fn has_event(&self, name: &str) -> bool {
        self.events.contains(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractDescriptor {
    pub address: String,
    pub abi: JsonAbi,
}

impl ContractDescriptor {
    /// Parses and validates a descriptor document. Legacy entries using
    /// `constant`/`payable` instead of `stateMutability` are accepted.
    pub fn from_json(address: &str, document: &str) -> Result<Self> {
        let parsed: DescriptorDocument =
            serde_json::from_str(document).context("Invalid descriptor document")?;

        validate(&parsed.abi).context("Invalid contract interface")?;

        Ok(Self {
            address: address.to_string(),
            abi: parsed.abi,
        })
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            methods: self.abi.functions().map(|f| f.name.clone()).collect(),
            events: self.abi.events().map(|e| e.name.clone()).collect(),
        }
    }
}
