//! Payment HTTP handlers: initiation, status polling by clients, and the
//! inbound gateway webhook.

use crate::domain::{Network, PaymentStatus};
use crate::error::{AppError, AppResult};
use crate::payments::providers::momo::validate_signature;
use crate::services::initiator::{InitiateRequest, PaymentTarget};
use crate::services::settlement::{apply_gateway_report, SettlementOutcome};
use crate::AppState;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

const SIGNATURE_HEADER: &str = "x-momo-signature";

#[derive(Debug, Deserialize)]
pub struct InitiatePaymentBody {
    pub school_id: Uuid,
    pub amount: f64,
    pub network: String,
    pub phone: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub bill_id: Option<Uuid>,
    #[serde(default)]
    pub registration_id: Option<Uuid>,
    #[serde(default)]
    pub event: Option<EventTargetBody>,
}

#[derive(Debug, Deserialize)]
pub struct EventTargetBody {
    pub event_code: String,
    pub attendees: i32,
    pub contact_phone: String,
}

#[derive(Debug, Serialize)]
pub struct InitiatePaymentResponse {
    pub payment_id: Uuid,
    pub status: PaymentStatus,
    pub deduplicated: bool,
    pub message: String,
}

pub async fn initiate_payment(
    State(state): State<AppState>,
    Json(body): Json<InitiatePaymentBody>,
) -> AppResult<Json<InitiatePaymentResponse>> {
    let network: Network = body
        .network
        .parse()
        .map_err(AppError::validation)?;

    let target = match (body.bill_id, body.registration_id, body.event) {
        (Some(bill_id), None, None) => PaymentTarget::Bill { bill_id },
        (None, Some(registration_id), None) => PaymentTarget::Registration { registration_id },
        (None, None, Some(event)) => PaymentTarget::Event {
            event_code: event.event_code,
            attendees: event.attendees,
            contact_phone: event.contact_phone,
        },
        _ => {
            return Err(AppError::validation(
                "exactly one of bill_id, registration_id or event must be provided",
            ))
        }
    };

    let outcome = state
        .initiator
        .initiate(InitiateRequest {
            school_id: body.school_id,
            amount: body.amount,
            network,
            phone: body.phone,
            description: body.description.unwrap_or_else(|| "MoMo payment".to_string()),
            target,
        })
        .await?;

    Ok(Json(InitiatePaymentResponse {
        payment_id: outcome.payment_id,
        status: outcome.status,
        deduplicated: outcome.deduplicated,
        message: "Payment pending. Please approve the prompt on your phone.".to_string(),
    }))
}

#[derive(Debug, Serialize)]
pub struct PaymentStatusResponse {
    pub payment_id: Uuid,
    pub status: PaymentStatus,
    pub bank_status: Option<String>,
    pub trans_status: Option<String>,
    pub retries: i32,
    pub amount: f64,
    pub network: Network,
}

pub async fn payment_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<PaymentStatusResponse>> {
    let payment = state
        .payments
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound { entity: "payment", id: id.to_string() })?;

    Ok(Json(PaymentStatusResponse {
        payment_id: payment.id,
        status: payment.status,
        bank_status: payment.bank_status,
        trans_status: payment.trans_status,
        retries: payment.retries,
        amount: payment.amount,
        network: payment.network,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CallbackResponse {
    pub handled: bool,
}

/// Inbound settlement webhook. The gateway delivers either a GET with
/// query parameters or a POST with a JSON body; the settlement status may
/// be flat or nested under `data`. Unknown references and terminal
/// payments are acknowledged as no-ops so the gateway stops retrying.
pub async fn gateway_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<(StatusCode, Json<CallbackResponse>)> {
    if let (Some(secret), Some(signature)) = (
        state.webhook_secret.as_deref(),
        headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()),
    ) {
        if !validate_signature(secret, &body, signature) {
            warn!(action = ?params.action, "Webhook signature validation failed");
            return Ok((StatusCode::UNAUTHORIZED, Json(CallbackResponse { handled: false })));
        }
    }

    let payload: Option<serde_json::Value> = if body.is_empty() {
        None
    } else {
        serde_json::from_slice(&body).ok()
    };

    let reference = params
        .reference
        .clone()
        .or_else(|| json_str(&payload, &["reference"]))
        .or_else(|| json_str(&payload, &["client_reference"]));

    let reference = match reference {
        Some(reference) => reference,
        None => {
            warn!(action = ?params.action, "Webhook carried no correlation reference");
            return Ok((StatusCode::OK, Json(CallbackResponse { handled: false })));
        }
    };

    let reported_status = params
        .status
        .clone()
        .or_else(|| json_str(&payload, &["status"]))
        .or_else(|| json_str(&payload, &["data", "status"]));
    let trans_status = json_str(&payload, &["trans_status"])
        .or_else(|| json_str(&payload, &["data", "trans_status"]));

    let payment = match state.payments.find_by_correlation_reference(&reference).await? {
        Some(payment) => payment,
        None => {
            warn!(reference = %reference, "Webhook reference does not resolve to a payment");
            return Ok((StatusCode::OK, Json(CallbackResponse { handled: false })));
        }
    };

    info!(
        payment_id = %payment.id,
        reference = %reference,
        action = ?params.action,
        reported = ?reported_status,
        "Processing gateway webhook"
    );

    let outcome = apply_gateway_report(
        &state.payments,
        &state.finalizer,
        &payment,
        reported_status.as_deref(),
        trans_status.as_deref(),
    )
    .await?;

    let handled = !matches!(outcome, SettlementOutcome::StillPending);
    Ok((StatusCode::OK, Json(CallbackResponse { handled })))
}

/// Pull a string field out of an optional JSON payload by path.
fn json_str(payload: &Option<serde_json::Value>, path: &[&str]) -> Option<String> {
    let mut value = payload.as_ref()?;
    for key in path {
        value = value.get(key)?;
    }
    value.as_str().map(str::to_string)
}
