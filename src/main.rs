use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use recoup::config::Config;
use recoup::db::{create_pool, init_db, queries, AppState};
use recoup::engine::Engine;
use recoup::gateways::{Gateway, GatewayRegistry};
use recoup::handlers;
use recoup::models::CreateLocalTransaction;
use recoup::workflow::InFlightRefunds;

#[derive(Parser, Debug)]
#[command(name = "recoup")]
#[command(about = "Refund reconciliation service")]
struct Cli {
    /// Seed the payment ledger with dev transactions to refund against
    #[arg(long)]
    seed: bool,
}

/// Seeds the local payment ledger with a transaction per gateway so the
/// refund flow can be exercised end to end against sandbox gateways.
/// Only runs in dev mode and when the ledger is empty.
fn seed_dev_data(state: &AppState) {
    let conn = state.db.get().expect("Failed to get db connection for seeding");

    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))
        .expect("Failed to count transactions");
    if count > 0 {
        tracing::info!("Payment ledger already has data, skipping seed");
        return;
    }

    let paypal = queries::insert_transaction(
        &conn,
        &CreateLocalTransaction {
            gateway: Gateway::Paypal,
            provider_ref: "8XY12345AB678901C".to_string(),
            amount_minor: 1250,
            currency: "usd".to_string(),
            customer_email: Some("buyer@example.com".to_string()),
        },
    )
    .expect("Failed to seed PayPal transaction");

    let razorpay = queries::insert_transaction(
        &conn,
        &CreateLocalTransaction {
            gateway: Gateway::Razorpay,
            provider_ref: "pay_ABC123".to_string(),
            amount_minor: 150000,
            currency: "inr".to_string(),
            customer_email: Some("buyer@example.in".to_string()),
        },
    )
    .expect("Failed to seed Razorpay transaction");

    tracing::info!("Seeded dev transactions:");
    tracing::info!("  {} ({} / {})", paypal.id, paypal.gateway, paypal.provider_ref);
    tracing::info!("  {} ({} / {})", razorpay.id, razorpay.gateway, razorpay.provider_ref);
}

/// Spawns the background drift-correction sweep: periodically re-polls the
/// gateway for every non-terminal refund that has a gateway refund ref.
fn spawn_sync_sweep(state: AppState, interval_secs: u64) {
    if interval_secs == 0 {
        tracing::info!("Sync sweep disabled (SYNC_SWEEP_INTERVAL_SECS=0)");
        return;
    }

    tokio::spawn(async move {
        let interval = Duration::from_secs(interval_secs);

        loop {
            tokio::time::sleep(interval).await;

            match state.engine.run_sync_sweep(100).await {
                Ok(corrected) => {
                    if corrected > 0 {
                        tracing::info!("Sync sweep corrected {} refund(s)", corrected);
                    }
                }
                Err(e) => {
                    tracing::warn!("Sync sweep failed: {}", e);
                }
            }
        }
    });

    tracing::info!("Background sync sweep started (runs every {}s)", interval_secs);
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "recoup=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    // Create database connection pool and initialize schema
    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }

    // Gateway adapters and the reconciliation engine
    let gateways = GatewayRegistry::from_config(&config).expect("Failed to build gateway clients");
    let engine = Arc::new(Engine::new(db_pool.clone(), gateways));

    let state = AppState {
        db: db_pool,
        engine,
        in_flight: InFlightRefunds::new(),
    };

    // Seed dev data if --seed flag is passed (only in dev mode)
    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set RECOUP_ENV=dev)");
        } else {
            seed_dev_data(&state);
        }
    }

    // Start the background drift-correction sweep
    spawn_sync_sweep(state.clone(), config.sync_sweep_interval_secs);

    // Build the application router
    let app = Router::new()
        .merge(handlers::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start the server
    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("recoup server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Failed to start server");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
