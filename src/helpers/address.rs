use crate::constants::{READABLE_PREFIX_LEN, READABLE_SUFFIX_LEN};

// Shortens an address to its first and last characters, e.g. 0xABC...7890
pub fn readable_address(address: &str) -> String {
    let chars: Vec<char> = address.chars().collect();

    // Prefix and suffix would overlap.
    if chars.len() < READABLE_PREFIX_LEN + READABLE_SUFFIX_LEN {
        return address.to_string();
    }

    let prefix: String = chars[..READABLE_PREFIX_LEN].iter().collect();
    let suffix: String = chars[chars.len() - READABLE_SUFFIX_LEN..].iter().collect();

    format!("{}...{}", prefix, suffix)
}
