use alloy_primitives::{
    U256,
    utils::{format_units, parse_units},
};
use anyhow::{Context, Result, bail};

use crate::constants::DISPLAY_UNIT_DECIMALS;

/// Formats a base-unit amount in display unit, without trailing zeros.
pub fn to_display_unit(amount: U256) -> String {
    // 18 decimals is always a valid unit
    let formatted =
        format_units(amount, DISPLAY_UNIT_DECIMALS).unwrap_or_else(|_| amount.to_string());

    if formatted.contains('.') {
        formatted
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_string()
    } else {
        formatted
    }
}

/// Parses a display-unit amount such as "1" or "0.25" into base unit.
pub fn to_base_unit(amount: &str) -> Result<U256> {
    let amount = amount.trim();

    if amount.is_empty() || amount.starts_with('-') {
        bail!("Invalid amount: '{}'", amount);
    }

    let parsed = parse_units(amount, DISPLAY_UNIT_DECIMALS)
        .with_context(|| format!("Invalid amount: '{}'", amount))?;

    Ok(parsed.into())
}
