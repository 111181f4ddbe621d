pub mod config;
pub mod dtos;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;
pub mod workers;

use axum::middleware::from_fn;
use axum::{
    routing::{get, post},
    Router,
};
use secrecy::ExposeSecret;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use config::Config;
use error::AppError;
use middleware::request_id_middleware;
use services::{
    HttpNotifier, LedgerStore, MemoryLedgerStore, PaymentGateway, PaymobClient, PgLedgerStore,
    Reconciler,
};
use workers::InstallmentScheduler;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn LedgerStore>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub reconciler: Arc<Reconciler>,
}

pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
    scheduler: InstallmentScheduler,
    state: AppState,
}

impl Application {
    pub async fn build(config: Config) -> Result<Self, AppError> {
        let store: Arc<dyn LedgerStore> = match &config.database.url {
            Some(url) => {
                let store = PgLedgerStore::new(
                    url.expose_secret(),
                    config.database.max_connections,
                    config.database.min_connections,
                )
                .await?;
                store.run_migrations().await?;
                Arc::new(store)
            }
            None => {
                tracing::warn!(
                    "No database configured - using the in-memory ledger store (non-durable)"
                );
                Arc::new(MemoryLedgerStore::new())
            }
        };

        let paymob = PaymobClient::new(config.paymob.clone());
        if paymob.is_configured() {
            tracing::info!("Paymob client initialized");
        } else {
            tracing::warn!("Paymob credentials not configured - payment features will be limited");
        }
        let gateway: Arc<dyn PaymentGateway> = Arc::new(paymob);

        let notifier = Arc::new(HttpNotifier::new(&config.notifier));
        let reconciler = Arc::new(Reconciler::new(store.clone(), notifier));

        let state = AppState {
            config: config.clone(),
            store: store.clone(),
            gateway: gateway.clone(),
            reconciler,
        };

        let scheduler = InstallmentScheduler::new(
            store,
            gateway,
            config.scheduler.clone(),
            config.paymob.currency.clone(),
        );

        let router = Router::new()
            .route("/health", get(handlers::health_check))
            .route("/metrics", get(handlers::metrics))
            .route("/payments/intentions", post(handlers::intentions::create_intention))
            .route(
                "/payments/emi/intentions",
                post(handlers::intentions::create_emi_intention),
            )
            .route("/webhooks/paymob", post(handlers::webhooks::paymob_webhook))
            .route(
                "/users/:user_id/transactions",
                get(handlers::transactions::list_user_transactions),
            )
            .layer(from_fn(request_id_middleware))
            .layer(
                TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                    let request_id = request
                        .headers()
                        .get("x-request-id")
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or("-");

                    tracing::info_span!(
                        "http_request",
                        request_id = %request_id,
                        method = %request.method(),
                        uri = %request.uri(),
                    )
                }),
            )
            .with_state(state.clone());

        // Port 0 asks the OS for a free port (used by the test suite).
        let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
        let listener = TcpListener::bind(addr).await?;
        let port = listener.local_addr()?.port();

        Ok(Self {
            port,
            listener,
            router,
            scheduler,
            state,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Application state handle, shared with tests and tooling.
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    pub async fn run_until_stopped(self) -> Result<(), AppError> {
        tracing::info!("Listening on port {}", self.port);

        tokio::spawn(self.scheduler.run());

        axum::serve(self.listener, self.router)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("HTTP server error: {}", e)))?;

        Ok(())
    }
}
