//! Escrow contract ABI surface used by the driver.

use crate::DeliveryError;
use alloy_primitives::U256;
use alloy_sol_types::{sol, SolCall};
use trade_types::{without_0x_prefix, EscrowOperation};

sol! {
	interface IP2PEscrow {
		function requestCancel(uint256 orderId) external;
		function markPaymentSent(uint256 orderId) external;
		function confirmPaymentAndRelease(uint256 orderId) external;
	}
}

/// Parses a public order id, decimal or `0x` hex, into the contract's `uint256`.
pub fn parse_order_id(order_id: &str) -> Result<U256, DeliveryError> {
	let trimmed = order_id.trim();
	let parsed = if trimmed.starts_with("0x") || trimmed.starts_with("0X") {
		U256::from_str_radix(without_0x_prefix(trimmed), 16)
	} else {
		U256::from_str_radix(trimmed, 10)
	};
	parsed.map_err(|e| DeliveryError::InvalidOrderId(format!("'{}': {}", order_id, e)))
}

/// ABI-encodes the call for `operation` on `order_id`.
pub fn encode_call(operation: EscrowOperation, order_id: &str) -> Result<Vec<u8>, DeliveryError> {
	let order_id = parse_order_id(order_id)?;
	Ok(match operation {
		EscrowOperation::RequestCancel => {
			IP2PEscrow::requestCancelCall { orderId: order_id }.abi_encode()
		},
		EscrowOperation::MarkPaymentSent => {
			IP2PEscrow::markPaymentSentCall { orderId: order_id }.abi_encode()
		},
		EscrowOperation::ConfirmPaymentAndRelease => {
			IP2PEscrow::confirmPaymentAndReleaseCall { orderId: order_id }.abi_encode()
		},
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_order_id_decimal_and_hex() {
		assert_eq!(parse_order_id("42").unwrap(), U256::from(42));
		assert_eq!(parse_order_id("0x2a").unwrap(), U256::from(42));
		assert!(matches!(
			parse_order_id("order-42"),
			Err(DeliveryError::InvalidOrderId(_))
		));
	}

	#[test]
	fn test_encode_call_selects_function() {
		let data = encode_call(EscrowOperation::MarkPaymentSent, "7").unwrap();
		assert_eq!(&data[..4], IP2PEscrow::markPaymentSentCall::SELECTOR.as_slice());
		assert_eq!(data.len(), 4 + 32);
		assert_eq!(data[35], 7);

		let release = encode_call(EscrowOperation::ConfirmPaymentAndRelease, "7").unwrap();
		assert_ne!(&release[..4], &data[..4]);
	}
}
