//! HTTP-level tests for the gateway callback endpoint, driven through the
//! full router with `tower::ServiceExt::oneshot`.

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use common::{
    sample_new_payment, test_config, MemoryBillStore, MemoryFinanceStore, MemoryPaymentStore,
    MemoryRegistrationStore, StaticOwnership,
};
use schoolpay_backend::database::stores::{
    BillStore, FinanceStore, OwnershipResolver, PaymentStore, RegistrationStore,
};
use schoolpay_backend::domain::{Payee, PaymentStatus};
use schoolpay_backend::services::finalizer::Finalizer;
use schoolpay_backend::services::initiator::PaymentInitiator;
use schoolpay_backend::{api, AppState};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

fn app_state(payments: Arc<MemoryPaymentStore>, webhook_secret: Option<String>) -> AppState {
    let payment_store: Arc<dyn PaymentStore> = payments;
    let registrations: Arc<dyn RegistrationStore> = Arc::new(MemoryRegistrationStore::new());
    let bills: Arc<dyn BillStore> = Arc::new(MemoryBillStore::new());
    let finances: Arc<dyn FinanceStore> = Arc::new(MemoryFinanceStore::new());
    let ownership: Arc<dyn OwnershipResolver> = Arc::new(StaticOwnership::default());

    let config = test_config();
    // Lazy pool; webhook handling never touches the database pool.
    let pool = PgPoolOptions::new().connect_lazy(&config.database.url).unwrap();

    AppState {
        config,
        pool,
        payments: payment_store.clone(),
        initiator: Arc::new(PaymentInitiator::new(payment_store.clone(), ownership)),
        finalizer: Arc::new(Finalizer::new(payment_store, registrations, bills, finances)),
        webhook_secret,
    }
}

async fn response_json(response: axum::response::Response) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn hmac_sha512_hex(secret: &str, payload: &[u8]) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha512;

    let mut mac = Hmac::<Sha512>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

#[tokio::test]
async fn unknown_reference_is_acknowledged_as_noop() {
    let payments = Arc::new(MemoryPaymentStore::new());
    let app = api::router(app_state(payments, None));

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/api/payments/callback?action=momo&reference=no-such-reference&status=paid")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = response_json(response).await;
    assert_eq!(json["handled"], serde_json::json!(false));
}

#[tokio::test]
async fn bad_signature_is_rejected_when_secret_is_configured() {
    let payments = Arc::new(MemoryPaymentStore::new());
    let payment = payments
        .create(sample_new_payment(Payee::bill(Uuid::new_v4()), Uuid::new_v4()))
        .await
        .unwrap();
    payments.mark_submitted(payment.id, None, None).await.unwrap();

    let app = api::router(app_state(payments.clone(), Some("secret".to_string())));
    let body = serde_json::json!({
        "reference": payment.correlation_reference,
        "status": "paid",
    })
    .to_string();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/payments/callback?action=momo")
                .header("content-type", "application/json")
                .header("x-momo-signature", "deadbeef")
                .body(Body::from(body.clone()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    // The forged callback did not settle the payment.
    assert_eq!(payments.get(payment.id).unwrap().status, PaymentStatus::Pending);

    // The same body with a valid signature goes through.
    let signature = hmac_sha512_hex("secret", body.as_bytes());
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/payments/callback?action=momo")
                .header("content-type", "application/json")
                .header("x-momo-signature", signature)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(payments.get(payment.id).unwrap().status, PaymentStatus::Successful);
}

#[tokio::test]
async fn nested_status_body_settles_pending_payment() {
    let payments = Arc::new(MemoryPaymentStore::new());
    let payment = payments
        .create(sample_new_payment(Payee::bill(Uuid::new_v4()), Uuid::new_v4()))
        .await
        .unwrap();
    payments.mark_submitted(payment.id, None, None).await.unwrap();

    let app = api::router(app_state(payments.clone(), None));
    let body = serde_json::json!({
        "reference": payment.correlation_reference,
        "data": { "status": "paid", "trans_status": "000" },
    })
    .to_string();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/payments/callback?action=momo")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = response_json(response).await;
    assert_eq!(json["handled"], serde_json::json!(true));

    let settled = payments.get(payment.id).unwrap();
    assert_eq!(settled.status, PaymentStatus::Successful);
    assert_eq!(settled.trans_status.as_deref(), Some("000"));
    assert_eq!(settled.finance_transaction_ids.len(), 1);
}
