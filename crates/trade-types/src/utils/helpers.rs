//! Time helpers.

use chrono::{DateTime, Utc};

/// Current Unix timestamp in seconds, or 0 if the clock is before the epoch.
pub fn current_timestamp() -> u64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.map(|d| d.as_secs())
		.unwrap_or(0)
}

/// Values at or above this are taken to be milliseconds rather than seconds.
const MILLIS_THRESHOLD: u64 = 100_000_000_000;

/// Parses a wire timestamp into Unix seconds.
///
/// Accepts RFC 3339 strings, integer seconds, integer milliseconds, and
/// numeric strings of either.
pub fn parse_timestamp(value: &serde_json::Value) -> Result<Option<u64>, String> {
	match value {
		serde_json::Value::Null => Ok(None),
		serde_json::Value::Number(n) => n
			.as_u64()
			.or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
			.map(|n| Some(from_epoch_number(n)))
			.ok_or_else(|| format!("invalid timestamp {}", n)),
		serde_json::Value::String(s) if s.trim().is_empty() => Ok(None),
		serde_json::Value::String(s) => {
			let s = s.trim();
			if let Ok(n) = s.parse::<u64>() {
				return Ok(Some(from_epoch_number(n)));
			}
			DateTime::parse_from_rfc3339(s)
				.map(|dt| Some(dt.with_timezone(&Utc).timestamp().max(0) as u64))
				.map_err(|e| format!("invalid timestamp '{}': {}", s, e))
		},
		other => Err(format!("invalid timestamp {}", other)),
	}
}

fn from_epoch_number(n: u64) -> u64 {
	if n >= MILLIS_THRESHOLD {
		n / 1000
	} else {
		n
	}
}

/// Formats Unix seconds as an RFC 3339 UTC string.
pub fn format_timestamp(secs: u64) -> String {
	DateTime::<Utc>::from_timestamp(secs as i64, 0)
		.unwrap_or_default()
		.to_rfc3339()
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn test_parse_timestamp_encodings() {
		assert_eq!(parse_timestamp(&json!(1_700_000_000)), Ok(Some(1_700_000_000)));
		assert_eq!(
			parse_timestamp(&json!(1_700_000_000_123u64)),
			Ok(Some(1_700_000_000))
		);
		assert_eq!(parse_timestamp(&json!("1700000000")), Ok(Some(1_700_000_000)));
		assert_eq!(
			parse_timestamp(&json!("2023-11-14T22:13:20Z")),
			Ok(Some(1_700_000_000))
		);
		assert_eq!(
			parse_timestamp(&json!("2023-11-14T23:13:20+01:00")),
			Ok(Some(1_700_000_000))
		);
		assert_eq!(parse_timestamp(&json!(null)), Ok(None));
		assert!(parse_timestamp(&json!("yesterday")).is_err());
	}

	#[test]
	fn test_format_timestamp() {
		assert_eq!(format_timestamp(1_700_000_000), "2023-11-14T22:13:20+00:00");
	}
}
