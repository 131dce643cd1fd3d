//! The cached order row and the vocabulary of its lifecycle.
//!
//! The escrow contract is the system of record; [`Order`] is the record
//! store's cached copy of it, keyed externally by the chain-assigned
//! `order_id`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of an order.
///
/// Happy path is `open -> payment_sent -> completed`; cancellation runs
/// `open -> cancel_requested -> cancelled`, and `payment_sent -> cancel_requested`
/// is the disputed edge. `completed` and `cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
	Open,
	PaymentSent,
	CancelRequested,
	Completed,
	Cancelled,
}

impl OrderStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			OrderStatus::Open => "open",
			OrderStatus::PaymentSent => "payment_sent",
			OrderStatus::CancelRequested => "cancel_requested",
			OrderStatus::Completed => "completed",
			OrderStatus::Cancelled => "cancelled",
		}
	}

	/// Returns true for states with no outgoing transitions.
	pub fn is_terminal(&self) -> bool {
		matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
	}
}

impl fmt::Display for OrderStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for OrderStatus {
	type Err = String;

	/// Accepts the canonical snake_case form as well as camelCase and
	/// upper-case spellings seen on the wire.
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let normalized: String = s
			.chars()
			.filter(|c| *c != '_' && *c != '-')
			.flat_map(char::to_lowercase)
			.collect();
		match normalized.as_str() {
			"open" => Ok(OrderStatus::Open),
			"paymentsent" => Ok(OrderStatus::PaymentSent),
			"cancelrequested" => Ok(OrderStatus::CancelRequested),
			"completed" => Ok(OrderStatus::Completed),
			"cancelled" | "canceled" => Ok(OrderStatus::Cancelled),
			_ => Err(format!("unknown order status '{}'", s)),
		}
	}
}

/// State-changing escrow operations this coordinator submits.
///
/// `open` is not part of this set; it originates upstream on offer acceptance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowOperation {
	RequestCancel,
	MarkPaymentSent,
	ConfirmPaymentAndRelease,
}

impl EscrowOperation {
	/// Status the order is in once this operation is confirmed on chain.
	pub fn target_status(&self) -> OrderStatus {
		match self {
			EscrowOperation::RequestCancel => OrderStatus::CancelRequested,
			EscrowOperation::MarkPaymentSent => OrderStatus::PaymentSent,
			EscrowOperation::ConfirmPaymentAndRelease => OrderStatus::Completed,
		}
	}

	/// Contract function name.
	pub fn function_name(&self) -> &'static str {
		match self {
			EscrowOperation::RequestCancel => "requestCancel",
			EscrowOperation::MarkPaymentSent => "markPaymentSent",
			EscrowOperation::ConfirmPaymentAndRelease => "confirmPaymentAndRelease",
		}
	}
}

impl fmt::Display for EscrowOperation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.function_name())
	}
}

/// Cached order row.
///
/// Timestamps are Unix seconds. Monetary fields are decimals and travel as
/// decimal strings. Addresses are lower-cased with a `0x` prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
	/// Internal surrogate key.
	pub id: String,
	/// Chain-assigned public identifier. Unique, never reused.
	pub order_id: String,

	pub maker_id: String,
	pub taker_id: String,
	pub maker_address: String,
	pub taker_address: String,

	pub from_token: String,
	pub from_amount: Decimal,
	pub price: Decimal,
	pub agreed_fee: Decimal,
	pub fiat_currency: String,
	pub chain_id: u64,

	pub status: OrderStatus,
	#[serde(default)]
	pub opened_at: Option<u64>,
	#[serde(default)]
	pub payment_deadline: Option<u64>,
	#[serde(default)]
	pub confirm_deadline: Option<u64>,
	#[serde(default)]
	pub payment_sent_at: Option<u64>,
	#[serde(default)]
	pub cancel_requested_at: Option<u64>,
	/// Hash of the transaction that opened the escrow.
	#[serde(default)]
	pub tx_hash: Option<String>,

	#[serde(default)]
	pub selected_payment_account_id: Option<String>,
	#[serde(default)]
	pub payment_method: Option<String>,
	/// Payment details captured at creation. Never refreshed afterwards.
	#[serde(default)]
	pub payment_details_snapshot: Option<serde_json::Value>,
	#[serde(default)]
	pub payment_instructions: Option<String>,
	#[serde(default)]
	pub payment_reference: Option<String>,

	pub created_at: u64,
	pub updated_at: u64,
}

impl Order {
	/// Builds the `open` row for an escrow that was opened upstream.
	pub fn open(new: NewOrder, now: u64) -> Self {
		Self {
			id: uuid::Uuid::new_v4().to_string(),
			order_id: new.order_id,
			maker_id: new.maker_id,
			taker_id: new.taker_id,
			maker_address: crate::normalize_address(&new.maker_address),
			taker_address: crate::normalize_address(&new.taker_address),
			from_token: crate::normalize_address(&new.from_token),
			from_amount: new.from_amount,
			price: new.price,
			agreed_fee: new.agreed_fee,
			fiat_currency: new.fiat_currency.to_uppercase(),
			chain_id: new.chain_id,
			status: OrderStatus::Open,
			opened_at: Some(new.opened_at.unwrap_or(now)),
			payment_deadline: new.payment_deadline,
			confirm_deadline: None,
			payment_sent_at: None,
			cancel_requested_at: None,
			tx_hash: new.tx_hash,
			selected_payment_account_id: new.selected_payment_account_id,
			payment_method: new.payment_method,
			payment_details_snapshot: new.payment_details_snapshot,
			payment_instructions: new.payment_instructions,
			payment_reference: new.payment_reference,
			created_at: now,
			updated_at: now,
		}
	}

	/// Returns the chain address of the given record-store user if they are a party.
	pub fn party_address(&self, user_id: &str) -> Option<&str> {
		if self.maker_id == user_id {
			Some(&self.maker_address)
		} else if self.taker_id == user_id {
			Some(&self.taker_address)
		} else {
			None
		}
	}
}

/// An order opened on chain upstream, as submitted for mirroring.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
	pub order_id: String,
	pub maker_id: String,
	pub taker_id: String,
	pub maker_address: String,
	pub taker_address: String,
	pub from_token: String,
	pub from_amount: Decimal,
	pub price: Decimal,
	pub agreed_fee: Decimal,
	pub fiat_currency: String,
	pub chain_id: u64,
	#[serde(default)]
	pub opened_at: Option<u64>,
	#[serde(default)]
	pub payment_deadline: Option<u64>,
	#[serde(default)]
	pub tx_hash: Option<String>,
	#[serde(default)]
	pub selected_payment_account_id: Option<String>,
	#[serde(default)]
	pub payment_method: Option<String>,
	#[serde(default)]
	pub payment_details_snapshot: Option<serde_json::Value>,
	#[serde(default)]
	pub payment_instructions: Option<String>,
	#[serde(default)]
	pub payment_reference: Option<String>,
}

#[cfg(test)]
mod tests {
	use super::*;

	fn dec(s: &str) -> Decimal {
		Decimal::from_str(s).unwrap()
	}

	fn new_order() -> NewOrder {
		NewOrder {
			order_id: "42".to_string(),
			maker_id: "maker".to_string(),
			taker_id: "taker".to_string(),
			maker_address: "0xABCDEF0000000000000000000000000000000001".to_string(),
			taker_address: "ABCDEF0000000000000000000000000000000002".to_string(),
			from_token: "0x00000000000000000000000000000000000000Aa".to_string(),
			from_amount: dec("100.50"),
			price: dec("1.0001"),
			agreed_fee: dec("0.25"),
			fiat_currency: "eur".to_string(),
			chain_id: 8453,
			opened_at: None,
			payment_deadline: Some(2_000),
			tx_hash: Some("0xopen".to_string()),
			selected_payment_account_id: None,
			payment_method: Some("sepa".to_string()),
			payment_details_snapshot: Some(serde_json::json!({"iban": "DE00"})),
			payment_instructions: None,
			payment_reference: None,
		}
	}

	#[test]
	fn test_open_normalizes_addresses() {
		let order = Order::open(new_order(), 1_000);
		assert_eq!(order.status, OrderStatus::Open);
		assert_eq!(
			order.maker_address,
			"0xabcdef0000000000000000000000000000000001"
		);
		assert_eq!(
			order.taker_address,
			"0xabcdef0000000000000000000000000000000002"
		);
		assert_eq!(order.fiat_currency, "EUR");
		assert_eq!(order.opened_at, Some(1_000));
		assert!(order.payment_sent_at.is_none());
	}

	#[test]
	fn test_decimals_serialize_as_strings() {
		let order = Order::open(new_order(), 1_000);
		let json = serde_json::to_value(&order).unwrap();
		assert_eq!(json["from_amount"], "100.50");
		assert_eq!(json["price"], "1.0001");
		assert_eq!(json["status"], "open");
	}

	#[test]
	fn test_status_parsing_accepts_wire_spellings() {
		assert_eq!(
			"payment_sent".parse::<OrderStatus>().unwrap(),
			OrderStatus::PaymentSent
		);
		assert_eq!(
			"paymentSent".parse::<OrderStatus>().unwrap(),
			OrderStatus::PaymentSent
		);
		assert_eq!(
			"CANCEL_REQUESTED".parse::<OrderStatus>().unwrap(),
			OrderStatus::CancelRequested
		);
		assert!("refunded".parse::<OrderStatus>().is_err());
	}

	#[test]
	fn test_party_address() {
		let order = Order::open(new_order(), 1_000);
		assert_eq!(
			order.party_address("taker"),
			Some("0xabcdef0000000000000000000000000000000002")
		);
		assert_eq!(order.party_address("stranger"), None);
	}
}
