//! Order rows as they travel on the change feed.
//!
//! The record store emits rows in its own shape: column names may be
//! snake_case or camelCase, timestamps RFC 3339 strings or epoch numbers
//! (seconds or milliseconds), decimals strings or numbers. [`decode`] turns
//! any of those into the canonical [`Order`]; [`encode`] produces the row the
//! store itself emits.

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;
use trade_types::{format_timestamp, normalize_address, parse_timestamp, Order, OrderStatus};

#[derive(Debug, Deserialize)]
struct WireOrderRow {
	#[serde(default)]
	id: Option<Value>,
	#[serde(default, alias = "orderId")]
	order_id: Option<Value>,
	#[serde(default, alias = "makerId")]
	maker_id: Option<Value>,
	#[serde(default, alias = "takerId")]
	taker_id: Option<Value>,
	#[serde(default, alias = "makerAddress")]
	maker_address: Option<String>,
	#[serde(default, alias = "takerAddress")]
	taker_address: Option<String>,
	#[serde(default, alias = "fromToken")]
	from_token: Option<String>,
	#[serde(default, alias = "fromAmount")]
	from_amount: Option<Value>,
	#[serde(default)]
	price: Option<Value>,
	#[serde(default, alias = "agreedFee")]
	agreed_fee: Option<Value>,
	#[serde(default, alias = "fiatCurrency")]
	fiat_currency: Option<String>,
	#[serde(default, alias = "chainId")]
	chain_id: Option<Value>,
	#[serde(default)]
	status: Option<String>,
	#[serde(default, alias = "openedAt")]
	opened_at: Option<Value>,
	#[serde(default, alias = "paymentDeadline")]
	payment_deadline: Option<Value>,
	#[serde(default, alias = "confirmDeadline")]
	confirm_deadline: Option<Value>,
	#[serde(default, alias = "paymentSentAt")]
	payment_sent_at: Option<Value>,
	#[serde(default, alias = "cancelRequestedAt")]
	cancel_requested_at: Option<Value>,
	#[serde(default, alias = "txHash")]
	tx_hash: Option<String>,
	#[serde(default, alias = "selectedPaymentAccountId")]
	selected_payment_account_id: Option<Value>,
	#[serde(default, alias = "paymentMethod")]
	payment_method: Option<String>,
	#[serde(default, alias = "paymentDetailsSnapshot")]
	payment_details_snapshot: Option<Value>,
	#[serde(default, alias = "paymentInstructions")]
	payment_instructions: Option<String>,
	#[serde(default, alias = "paymentReference")]
	payment_reference: Option<String>,
	#[serde(default, alias = "createdAt")]
	created_at: Option<Value>,
	#[serde(default, alias = "updatedAt")]
	updated_at: Option<Value>,
}

const TIMESTAMP_FIELDS: [&str; 7] = [
	"opened_at",
	"payment_deadline",
	"confirm_deadline",
	"payment_sent_at",
	"cancel_requested_at",
	"created_at",
	"updated_at",
];

/// Ids arrive as strings or bare numbers.
fn scalar(value: Option<Value>) -> Option<String> {
	match value? {
		Value::String(s) => Some(s),
		Value::Number(n) => Some(n.to_string()),
		_ => None,
	}
}

fn decimal(field: &str, value: Option<Value>) -> Result<Decimal, String> {
	let text = match value {
		None | Some(Value::Null) => return Ok(Decimal::ZERO),
		Some(Value::String(s)) => s,
		Some(Value::Number(n)) => n.to_string(),
		Some(other) => return Err(format!("{}: expected decimal, got {}", field, other)),
	};
	Decimal::from_str(text.trim())
		.or_else(|_| Decimal::from_scientific(text.trim()))
		.map_err(|e| format!("{}: invalid decimal '{}': {}", field, text, e))
}

fn timestamp(field: &str, value: Option<Value>) -> Result<Option<u64>, String> {
	match value {
		None => Ok(None),
		Some(v) => parse_timestamp(&v).map_err(|e| format!("{}: {}", field, e)),
	}
}

fn chain_id(value: Option<Value>) -> Result<u64, String> {
	match value {
		None | Some(Value::Null) => Ok(0),
		Some(Value::Number(n)) => n
			.as_u64()
			.ok_or_else(|| format!("chain_id: invalid number {}", n)),
		Some(Value::String(s)) => s
			.trim()
			.parse()
			.map_err(|e| format!("chain_id: invalid value '{}': {}", s, e)),
		Some(other) => Err(format!("chain_id: expected integer, got {}", other)),
	}
}

/// Normalizes a raw wire row into an [`Order`].
///
/// A missing `order_id` decodes to an empty string; callers decide whether
/// such a row is worth forwarding.
pub fn decode(record: &Value) -> Result<Order, String> {
	let row: WireOrderRow =
		serde_json::from_value(record.clone()).map_err(|e| format!("malformed row: {}", e))?;

	let status = row
		.status
		.as_deref()
		.ok_or_else(|| "status: missing".to_string())?
		.parse::<OrderStatus>()?;

	Ok(Order {
		id: scalar(row.id).unwrap_or_default(),
		order_id: scalar(row.order_id).unwrap_or_default(),
		maker_id: scalar(row.maker_id).unwrap_or_default(),
		taker_id: scalar(row.taker_id).unwrap_or_default(),
		maker_address: normalize_address(row.maker_address.as_deref().unwrap_or_default()),
		taker_address: normalize_address(row.taker_address.as_deref().unwrap_or_default()),
		from_token: row.from_token.unwrap_or_default(),
		from_amount: decimal("from_amount", row.from_amount)?,
		price: decimal("price", row.price)?,
		agreed_fee: decimal("agreed_fee", row.agreed_fee)?,
		fiat_currency: row.fiat_currency.unwrap_or_default(),
		chain_id: chain_id(row.chain_id)?,
		status,
		opened_at: timestamp("opened_at", row.opened_at)?,
		payment_deadline: timestamp("payment_deadline", row.payment_deadline)?,
		confirm_deadline: timestamp("confirm_deadline", row.confirm_deadline)?,
		payment_sent_at: timestamp("payment_sent_at", row.payment_sent_at)?,
		cancel_requested_at: timestamp("cancel_requested_at", row.cancel_requested_at)?,
		tx_hash: row.tx_hash,
		selected_payment_account_id: scalar(row.selected_payment_account_id),
		payment_method: row.payment_method,
		payment_details_snapshot: row.payment_details_snapshot.filter(|v| !v.is_null()),
		payment_instructions: row.payment_instructions,
		payment_reference: row.payment_reference,
		created_at: timestamp("created_at", row.created_at)?.unwrap_or_default(),
		updated_at: timestamp("updated_at", row.updated_at)?.unwrap_or_default(),
	})
}

/// The store's row for `order`: snake_case columns, RFC 3339 timestamps,
/// decimal strings.
pub fn encode(order: &Order) -> Value {
	let mut row = serde_json::to_value(order).unwrap_or(Value::Null);
	if let Some(map) = row.as_object_mut() {
		for field in TIMESTAMP_FIELDS {
			if let Some(secs) = map.get(field).and_then(Value::as_u64) {
				map.insert(field.to_string(), Value::String(format_timestamp(secs)));
			}
		}
	}
	row
}
