use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use std::time::Duration;

use beatvault::config::Config;
use beatvault::contracts::ContractClient;
use beatvault::db::{create_pool, init_db, migrations, queries, AppState};
use beatvault::email::EmailService;
use beatvault::handlers;
use beatvault::models::{CreateAccount, CreateLicense, CreateTrack};
use beatvault::payments::StripeClient;

#[derive(Parser, Debug)]
#[command(name = "beatvault")]
#[command(about = "Payment backend for the Beatvault audio licensing marketplace")]
struct Cli {
    /// Seed the database with dev data (license catalog, producer, buyer, track)
    #[arg(long)]
    seed: bool,
}

/// Seeds the database with dev data for testing.
/// Only runs in dev mode and when the catalog is empty.
fn seed_dev_data(state: &AppState) {
    let conn = state.db.get().expect("Failed to get db connection for seeding");

    let existing = queries::list_licenses(&conn).expect("Failed to list licenses");
    if !existing.is_empty() {
        tracing::info!("Database already has a license catalog, skipping seed");
        return;
    }

    tracing::info!("============================================");
    tracing::info!("SEEDING DEV DATA");
    tracing::info!("============================================");

    for input in [
        CreateLicense {
            name: "standard".to_string(),
            price_cents: 2999,
            exclusive_allowed: false,
            max_streams: Some(100_000),
            max_copies: Some(2_000),
        },
        CreateLicense {
            name: "premium".to_string(),
            price_cents: 9999,
            exclusive_allowed: true,
            max_streams: Some(1_000_000),
            max_copies: None,
        },
        CreateLicense {
            name: "exclusive".to_string(),
            price_cents: 49999,
            exclusive_allowed: true,
            max_streams: None,
            max_copies: None,
        },
    ] {
        let license = queries::create_license(&conn, &input).expect("Failed to seed license");
        tracing::info!("License: {} (id: {})", license.name, license.id);
    }

    let producer = queries::create_account(
        &conn,
        &CreateAccount {
            email: "producer@beatvault.local".to_string(),
            display_name: "Dev Producer".to_string(),
            stripe_customer_id: None,
            stripe_subscription_id: None,
        },
    )
    .expect("Failed to seed producer");
    tracing::info!("Producer: {} (id: {})", producer.email, producer.id);

    let buyer = queries::create_account(
        &conn,
        &CreateAccount {
            email: "buyer@beatvault.local".to_string(),
            display_name: "Dev Buyer".to_string(),
            stripe_customer_id: None,
            stripe_subscription_id: None,
        },
    )
    .expect("Failed to seed buyer");
    tracing::info!("Buyer: {} (id: {})", buyer.email, buyer.id);

    let track = queries::create_track(
        &conn,
        &CreateTrack {
            producer_id: producer.id.clone(),
            title: "Midnight Drive".to_string(),
            exclusive: true,
            price_cents: 79999,
        },
    )
    .expect("Failed to seed track");
    tracing::info!("Track: {} (id: {})", track.title, track.id);

    tracing::info!("============================================");
    tracing::info!("DEV DATA SEEDED SUCCESSFULLY");
    tracing::info!("============================================");
}

/// Spawns a background task that periodically sweeps abandoned track locks.
/// Completed purchases release their lock synchronously; the sweep only
/// reaps checkouts that never finished.
fn spawn_lock_sweeper(state: AppState, max_age_secs: i64) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(5 * 60); // 5 minutes

        loop {
            tokio::time::sleep(interval).await;

            match state.db.get() {
                Ok(conn) => match queries::sweep_expired_track_locks(&conn, max_age_secs) {
                    Ok(count) => {
                        if count > 0 {
                            tracing::info!("Swept {} abandoned track locks", count);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to sweep track locks: {}", e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to get db connection for lock sweep: {}", e);
                }
            }
        }
    });

    tracing::info!(
        "Track lock sweeper started (runs every 5 minutes, max age {}s)",
        max_age_secs
    );
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "beatvault=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");

    // Migrations first so user_version reflects reality, then the
    // idempotent schema init.
    {
        let mut conn = db_pool.get().expect("Failed to get connection");
        migrations::run_migrations(&mut conn).expect("Failed to run migrations");
        init_db(&conn).expect("Failed to initialize database");
    }

    let contracts = match (&config.contract_service_url, &config.contract_service_token) {
        (Some(url), Some(token)) => Some(ContractClient::new(url, token)),
        _ => {
            tracing::warn!("Contract service not configured, notifications disabled");
            None
        }
    };

    let state = AppState {
        db: db_pool,
        stripe: StripeClient::new(&config.stripe_secret_key, &config.stripe_webhook_secret),
        contracts,
        email: EmailService::new(config.resend_api_key.clone(), config.email_from.clone()),
        base_url: config.base_url.clone(),
        contract_callback_token: config.contract_callback_token.clone(),
        event_lease_timeout_secs: config.event_lease_timeout_secs,
        email_lease_timeout_secs: config.email_lease_timeout_secs,
    };

    // Purge old processed ledger rows on startup (0 = never purge)
    if config.event_retention_days > 0 {
        let conn = state.db.get().expect("Failed to get connection for purge");
        match queries::purge_processed_events(&conn, config.event_retention_days) {
            Ok(count) if count > 0 => {
                tracing::info!(
                    "Purged {} processed events older than {} days",
                    count,
                    config.event_retention_days
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("Failed to purge old events: {}", e);
            }
        }
    }

    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set BEATVAULT_ENV=dev)");
        } else {
            seed_dev_data(&state);
        }
    }

    spawn_lock_sweeper(state.clone(), config.lock_max_age_secs);

    let app = Router::new()
        .merge(handlers::checkout::router())
        .merge(handlers::webhooks::router())
        .merge(handlers::contracts::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Beatvault server listening on {}", addr);

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
