use schoolpay_backend::config::{Config, GatewayMode};
use schoolpay_backend::database::bill_repository::BillRepository;
use schoolpay_backend::database::finance_transaction_repository::FinanceTransactionRepository;
use schoolpay_backend::database::ownership_resolver::PgOwnershipResolver;
use schoolpay_backend::database::payment_repository::PaymentRepository;
use schoolpay_backend::database::registration_repository::RegistrationRepository;
use schoolpay_backend::database::stores::{
    BillStore, FinanceStore, OwnershipResolver, PaymentStore, RegistrationStore,
};
use schoolpay_backend::database::{init_pool, PoolConfig};
use schoolpay_backend::payments::providers::momo::{MomoClient, MomoClientConfig};
use schoolpay_backend::payments::traits::MomoGateway;
use schoolpay_backend::services::finalizer::Finalizer;
use schoolpay_backend::services::initiator::PaymentInitiator;
use schoolpay_backend::workers::poller::{PollerConfig, PollerMode, StatusPoller};
use schoolpay_backend::workers::submission::{SubmissionMode, SubmissionWorker};
use schoolpay_backend::{api, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt::init();

    // Load configuration
    let config = Config::from_env()?;

    tracing::info!("Starting SchoolPay Backend");
    tracing::info!("Environment: {}", config.server.environment);
    tracing::info!("Gateway mode: {:?}", config.gateway.mode);

    // Database pool
    let pool = init_pool(
        &config.database.url,
        Some(PoolConfig {
            max_connections: config.database.max_connections,
            ..PoolConfig::default()
        }),
    )
    .await?;

    // Repositories behind their store seams
    let payments: Arc<dyn PaymentStore> = Arc::new(PaymentRepository::new(pool.clone()));
    let registrations: Arc<dyn RegistrationStore> =
        Arc::new(RegistrationRepository::new(pool.clone()));
    let bills: Arc<dyn BillStore> = Arc::new(BillRepository::new(pool.clone()));
    let finances: Arc<dyn FinanceStore> =
        Arc::new(FinanceTransactionRepository::new(pool.clone()));
    let ownership: Arc<dyn OwnershipResolver> = Arc::new(PgOwnershipResolver::new(pool.clone()));

    // Gateway wiring. Live mode fails at startup on missing credentials;
    // sandbox mode is an explicit opt-in that never touches the gateway.
    let (submission_mode, poller_mode) = match config.gateway.mode {
        GatewayMode::Live => {
            let client_config = MomoClientConfig::from_gateway(&config.gateway)?;
            let gateway: Arc<dyn MomoGateway> = Arc::new(MomoClient::new(client_config)?);
            (
                SubmissionMode::Live(Arc::clone(&gateway)),
                PollerMode::Live(gateway),
            )
        }
        GatewayMode::Sandbox => {
            tracing::warn!("Running in sandbox mode; no gateway calls will be made");
            (SubmissionMode::Sandbox, PollerMode::Sandbox)
        }
    };

    let initiator = Arc::new(PaymentInitiator::new(
        Arc::clone(&payments),
        Arc::clone(&ownership),
    ));
    let finalizer = Arc::new(Finalizer::new(
        Arc::clone(&payments),
        Arc::clone(&registrations),
        Arc::clone(&bills),
        Arc::clone(&finances),
    ));

    // Background workers with a shared shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let submission_worker = Arc::new(SubmissionWorker::new(
        Arc::clone(&payments),
        submission_mode,
        config.worker.submission_interval_secs,
        config.gateway.callback_base_url.clone(),
    ));
    let submission_handle = tokio::spawn(submission_worker.run(shutdown_rx.clone()));

    let poller = Arc::new(StatusPoller::new(
        Arc::clone(&payments),
        Arc::clone(&finalizer),
        poller_mode,
        PollerConfig {
            interval_secs: config.worker.poll_interval_secs,
            timeout_mins: config.worker.poll_timeout_mins,
            max_retries: config.worker.max_poll_retries,
            concurrency: config.worker.poll_concurrency,
        },
    ));
    let poller_handle = tokio::spawn(poller.run(shutdown_rx));

    // HTTP server
    let state = AppState {
        webhook_secret: config.gateway.api_key.clone(),
        config: config.clone(),
        pool,
        payments,
        initiator,
        finalizer,
    };
    let app = api::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested");
        })
        .await?;

    // Stop the workers and wait for their loops to drain
    let _ = shutdown_tx.send(true);
    let _ = submission_handle.await;
    let _ = poller_handle.await;

    tracing::info!("SchoolPay Backend stopped");
    Ok(())
}
