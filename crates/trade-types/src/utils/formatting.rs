//! String formatting for identifiers and addresses.

/// Shortens an identifier for log output: first 8 characters followed by "..".
pub fn truncate_id(id: &str) -> String {
	match id.char_indices().nth(8) {
		Some((idx, _)) => format!("{}..", &id[..idx]),
		None => id.to_string(),
	}
}

/// Adds a "0x" prefix if missing.
pub fn with_0x_prefix(hex_str: &str) -> String {
	if hex_str.starts_with("0x") || hex_str.starts_with("0X") {
		hex_str.to_string()
	} else {
		format!("0x{}", hex_str)
	}
}

/// Strips a "0x" or "0X" prefix if present.
pub fn without_0x_prefix(hex_str: &str) -> &str {
	hex_str
		.strip_prefix("0x")
		.or_else(|| hex_str.strip_prefix("0X"))
		.unwrap_or(hex_str)
}

/// Canonical address form: trimmed, lower-case, `0x`-prefixed.
///
/// Addresses are compared as strings everywhere, so every address entering
/// the record store goes through here first.
pub fn normalize_address(address: &str) -> String {
	let trimmed = address.trim();
	if trimmed.is_empty() {
		return String::new();
	}
	format!("0x{}", without_0x_prefix(trimmed).to_lowercase())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_truncate_id() {
		assert_eq!(truncate_id("12345678"), "12345678");
		assert_eq!(truncate_id("123456789"), "12345678..");
		assert_eq!(truncate_id("0x1234567890abcdef"), "0x123456..");
	}

	#[test]
	fn test_prefix_helpers() {
		assert_eq!(with_0x_prefix("abcd"), "0xabcd");
		assert_eq!(with_0x_prefix("0xabcd"), "0xabcd");
		assert_eq!(without_0x_prefix("0Xabcd"), "abcd");
		assert_eq!(without_0x_prefix("abcd"), "abcd");
	}

	#[test]
	fn test_normalize_address() {
		assert_eq!(
			normalize_address(" 0X5FbDB2315678afecb367f032d93F642f64180aa3 "),
			"0x5fbdb2315678afecb367f032d93f642f64180aa3"
		);
		assert_eq!(
			normalize_address("5FBDB2315678AFECB367F032D93F642F64180AA3"),
			"0x5fbdb2315678afecb367f032d93f642f64180aa3"
		);
		assert_eq!(normalize_address(""), "");
	}
}
