//! Mobile-money aggregator client
//!
//! HTTP adapter for the aggregator's charge-submission and status-query
//! endpoints. Stateless: all payment state lives in the database.

use crate::config::GatewayConfig;
use crate::error::{AppError, AppResult};
use crate::payments::traits::MomoGateway;
use crate::payments::types::{ChargeAccepted, ChargeRequest, StatusReport};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct MomoClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl MomoClientConfig {
    /// Build from the application gateway section. Fails when the API key
    /// is absent; live-mode credential checks happen at startup, not
    /// silently at call time.
    pub fn from_gateway(config: &GatewayConfig) -> Result<Self, AppError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| AppError::Config("MOMO_API_KEY is required in live mode".to_string()))?;

        Ok(Self {
            base_url: config.base_url.clone(),
            api_key,
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
        })
    }
}

/// Aggregator HTTP client.
pub struct MomoClient {
    config: MomoClientConfig,
    client: Client,
}

// Charge accept body
#[derive(Debug, Deserialize)]
struct SubmitChargeBody {
    #[serde(default)]
    transaction_id: Option<String>,
}

// Status query body; the aggregator reports the settlement outcome either
// flat or nested under `data`.
#[derive(Debug, Deserialize)]
struct StatusQueryBody {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    trans_status: Option<String>,
    #[serde(default)]
    data: Option<StatusQueryData>,
}

#[derive(Debug, Deserialize)]
struct StatusQueryData {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    trans_status: Option<String>,
}

impl MomoClient {
    pub fn new(config: MomoClientConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// POST a JSON body, retrying on 429 and 5xx with exponential backoff.
    /// Returns the final HTTP status and raw body text.
    async fn post_with_retry(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> AppResult<(reqwest::StatusCode, String)> {
        let url = format!("{}{}", self.config.base_url, endpoint);

        let mut last_error: Option<reqwest::Error> = None;
        for attempt in 0..=self.config.max_retries {
            let request = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.config.api_key))
                .json(body);

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();

                    let retryable = status == reqwest::StatusCode::TOO_MANY_REQUESTS
                        || status.is_server_error();
                    if retryable && attempt < self.config.max_retries {
                        let backoff = 2_u64.pow(attempt);
                        warn!(
                            "Gateway returned {}, retrying after {}s (attempt {})",
                            status,
                            backoff,
                            attempt + 1
                        );
                        tokio::time::sleep(Duration::from_secs(backoff)).await;
                        continue;
                    }

                    return Ok((status, text));
                }
                Err(e) => {
                    if attempt < self.config.max_retries {
                        let backoff = 2_u64.pow(attempt);
                        warn!(
                            "Gateway request error, retrying after {}s (attempt {}): {}",
                            backoff,
                            attempt + 1,
                            e
                        );
                        last_error = Some(e);
                        tokio::time::sleep(Duration::from_secs(backoff)).await;
                        continue;
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(AppError::gateway(
            format!(
                "request to {} failed after {} retries: {}",
                endpoint,
                self.config.max_retries,
                last_error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown error".to_string())
            ),
            true,
        ))
    }
}

/// Constant-time HMAC-SHA512 comparison over the raw webhook body.
pub fn validate_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    use hmac::{Hmac, Mac};
    use sha2::Sha512;

    type HmacSha512 = Hmac<Sha512>;

    let mut mac = match HmacSha512::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };

    mac.update(payload);
    let computed = hex::encode(mac.finalize().into_bytes());
    let provided = signature.trim();

    if computed.len() != provided.len() {
        return false;
    }

    computed
        .as_bytes()
        .iter()
        .zip(provided.as_bytes().iter())
        .fold(0, |acc, (a, b)| acc | (a ^ b))
        == 0
}

fn raw_value(text: &str) -> serde_json::Value {
    serde_json::from_str(text)
        .unwrap_or_else(|_| serde_json::Value::String(text.to_string()))
}

#[async_trait]
impl MomoGateway for MomoClient {
    async fn submit_charge(&self, request: &ChargeRequest) -> AppResult<ChargeAccepted> {
        info!(
            reference = %request.client_reference,
            channel = %request.channel,
            amount = request.amount,
            "Submitting charge to gateway"
        );

        let payload = serde_json::json!({
            "phone": request.phone,
            "channel": request.channel,
            "amount": request.amount,
            "description": request.description,
            "callback_url": request.callback_url,
            "client_reference": request.client_reference,
        });

        let (status, text) = self.post_with_retry("/v1/charges", &payload).await?;
        let raw = raw_value(&text);

        if !status.is_success() {
            error!(
                reference = %request.client_reference,
                http_status = %status,
                "Gateway rejected charge submission"
            );
            return Err(AppError::gateway(
                format!("charge submission failed: HTTP {}: {}", status, text),
                status.is_server_error(),
            ));
        }

        let gateway_reference = serde_json::from_value::<SubmitChargeBody>(raw.clone())
            .ok()
            .and_then(|body| body.transaction_id);

        info!(
            reference = %request.client_reference,
            gateway_reference = ?gateway_reference,
            "Charge accepted by gateway"
        );

        Ok(ChargeAccepted { gateway_reference, raw })
    }

    async fn query_status(&self, correlation_reference: &str) -> AppResult<StatusReport> {
        let payload = serde_json::json!({ "client_reference": correlation_reference });

        let (status, text) = self.post_with_retry("/v1/charges/status", &payload).await?;
        let raw = raw_value(&text);

        if !status.is_success() {
            // Protocol error: surface the raw body so the caller can audit
            // it, but report no settlement outcome.
            warn!(
                reference = %correlation_reference,
                http_status = %status,
                "Gateway status query returned non-success"
            );
            return Ok(StatusReport { status_text: None, trans_status: None, raw });
        }

        let parsed = serde_json::from_value::<StatusQueryBody>(raw.clone()).ok();
        let (status_text, trans_status) = match parsed {
            Some(body) => {
                let nested = body.data;
                let status_text = body
                    .status
                    .or_else(|| nested.as_ref().and_then(|d| d.status.clone()));
                let trans_status = body
                    .trans_status
                    .or_else(|| nested.and_then(|d| d.trans_status));
                (status_text, trans_status)
            }
            None => (None, None),
        };

        Ok(StatusReport { status_text, trans_status, raw })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_validation_rejects_wrong_signature() {
        assert!(!validate_signature("secret", b"payload", "deadbeef"));
    }

    #[test]
    fn signature_validation_accepts_matching_signature() {
        use hmac::{Hmac, Mac};
        use sha2::Sha512;

        let mut mac = Hmac::<Sha512>::new_from_slice(b"secret").unwrap();
        mac.update(b"payload");
        let signature = hex::encode(mac.finalize().into_bytes());

        assert!(validate_signature("secret", b"payload", &signature));
    }

    #[test]
    fn missing_api_key_is_a_config_error() {
        let gateway = crate::config::GatewayConfig {
            mode: crate::config::GatewayMode::Live,
            base_url: "https://gateway.example.org".to_string(),
            api_key: None,
            callback_base_url: "https://api.example.org".to_string(),
            timeout_secs: 30,
            max_retries: 3,
        };
        assert!(MomoClientConfig::from_gateway(&gateway).is_err());
    }

    #[test]
    fn raw_value_falls_back_to_string_for_non_json() {
        assert_eq!(
            raw_value("<html>gateway busy</html>"),
            serde_json::Value::String("<html>gateway busy</html>".to_string())
        );
        assert_eq!(raw_value("{\"ok\":true}"), serde_json::json!({"ok": true}));
    }
}
