//! Gateway request/response types and normalization helpers.

use crate::domain::PaymentStatus;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Charge submission sent to the aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeRequest {
    /// Phone number in the gateway's national format (233XXXXXXXXX)
    pub phone: String,
    /// Network channel code (see `Network::channel_code`)
    pub channel: String,
    pub amount: f64,
    pub description: String,
    /// Webhook URL embedding the correlation reference
    pub callback_url: String,
    /// Client-chosen correlation reference
    pub client_reference: String,
}

/// Accepted charge response.
#[derive(Debug, Clone)]
pub struct ChargeAccepted {
    pub gateway_reference: Option<String>,
    pub raw: serde_json::Value,
}

/// Status-query outcome. Present for every HTTP response the gateway
/// returns, even unparseable ones; `status_text` is `None` when the body
/// carried no recognizable status.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub status_text: Option<String>,
    pub trans_status: Option<String>,
    pub raw: serde_json::Value,
}

/// Map the gateway's settlement vocabulary onto the domain status.
///
/// Returns `None` when the reported status (or its absence) does not
/// settle the payment, which leaves it `pending` for the next poll.
pub fn map_gateway_status(reported: &str) -> Option<PaymentStatus> {
    match reported.trim().to_ascii_lowercase().as_str() {
        "paid" | "success" | "successful" => Some(PaymentStatus::Successful),
        "failed" | "declined" | "cancelled" | "canceled" | "expired" => {
            Some(PaymentStatus::Failed)
        }
        _ => None,
    }
}

fn digits_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+$").expect("static regex"))
}

/// Normalize a subscriber number to the gateway's national format
/// (`233XXXXXXXXX`). Accepts local `0XXXXXXXXX`, bare nine-digit, and
/// already-international forms with or without a leading `+`.
pub fn normalize_msisdn(phone: &str) -> Result<String, String> {
    let cleaned: String = phone.chars().filter(|c| !c.is_whitespace() && *c != '-').collect();
    let cleaned = cleaned.strip_prefix('+').unwrap_or(&cleaned);

    if !digits_re().is_match(cleaned) {
        return Err(format!("phone number contains non-digits: {}", phone));
    }

    match cleaned.len() {
        12 if cleaned.starts_with("233") => Ok(cleaned.to_string()),
        10 if cleaned.starts_with('0') => Ok(format!("233{}", &cleaned[1..])),
        9 => Ok(format!("233{}", cleaned)),
        _ => Err(format!("unrecognized phone number format: {}", phone)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msisdn_local_format() {
        assert_eq!(normalize_msisdn("0241234567").unwrap(), "233241234567");
    }

    #[test]
    fn msisdn_international_forms() {
        assert_eq!(normalize_msisdn("+233241234567").unwrap(), "233241234567");
        assert_eq!(normalize_msisdn("233241234567").unwrap(), "233241234567");
        assert_eq!(normalize_msisdn("241234567").unwrap(), "233241234567");
    }

    #[test]
    fn msisdn_tolerates_spacing() {
        assert_eq!(normalize_msisdn("024 123 4567").unwrap(), "233241234567");
        assert_eq!(normalize_msisdn("024-123-4567").unwrap(), "233241234567");
    }

    #[test]
    fn msisdn_rejects_garbage() {
        assert!(normalize_msisdn("abc").is_err());
        assert!(normalize_msisdn("02412").is_err());
        assert!(normalize_msisdn("").is_err());
    }

    #[test]
    fn settled_statuses_map_to_terminal() {
        assert_eq!(map_gateway_status("Paid"), Some(PaymentStatus::Successful));
        assert_eq!(map_gateway_status("SUCCESS"), Some(PaymentStatus::Successful));
        assert_eq!(map_gateway_status("failed"), Some(PaymentStatus::Failed));
        assert_eq!(map_gateway_status("Declined"), Some(PaymentStatus::Failed));
        assert_eq!(map_gateway_status("expired"), Some(PaymentStatus::Failed));
    }

    #[test]
    fn unknown_or_empty_status_stays_pending() {
        assert_eq!(map_gateway_status("processing"), None);
        assert_eq!(map_gateway_status(""), None);
        assert_eq!(map_gateway_status("awaiting approval"), None);
    }
}
