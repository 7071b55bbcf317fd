//! HTTP API: shared state, router assembly and server lifecycle.

pub mod agents;
pub mod auth;
pub mod categories;
pub mod tasks;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, middleware, response::Json, routing::get, routing::post, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::aggregator::Aggregator;
use crate::categories::CategoryStore;
use crate::client::{ClientFactory, NativeClientFactory};
use crate::commands::CommandRouter;
use crate::config::Config;
use crate::crypto::{self, SecretBox};
use crate::health::{HealthBoard, SharedHealthBoard};
use crate::prober::Prober;
use crate::ratelimit::LoginRateLimiter;
use crate::registry::AgentStore;
use crate::sessions::SessionStore;
use crate::users::UserStore;

use types::HealthResponse;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub registry: Arc<AgentStore>,
    pub health: SharedHealthBoard,
    pub categories: Arc<CategoryStore>,
    pub users: Arc<UserStore>,
    pub sessions: Arc<SessionStore>,
    pub rate_limiter: LoginRateLimiter,
    pub factory: Arc<dyn ClientFactory>,
    pub aggregator: Aggregator,
    pub commands: CommandRouter,
    pub prober: Arc<Prober>,
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let key = crypto::load_or_create_key(&config.data_dir)?;
    let secrets = SecretBox::new(key);

    let registry = Arc::new(
        AgentStore::new(config.data_dir.join("agents.json"), secrets.clone()).await,
    );
    let health_board: SharedHealthBoard = Arc::new(HealthBoard::new());
    let categories = Arc::new(CategoryStore::new(config.data_dir.join("categories.json")).await);
    let users = Arc::new(UserStore::new(config.data_dir.join("users.json")).await);
    let sessions = Arc::new(SessionStore::new(config.data_dir.join("sessions.json")).await);

    let factory: Arc<dyn ClientFactory> =
        Arc::new(NativeClientFactory::new(secrets, config.probe_timeout));

    let aggregator = Aggregator::new(
        Arc::clone(&registry),
        Arc::clone(&health_board),
        Arc::clone(&factory),
        config.aggregation_timeout,
    );
    let commands = CommandRouter::new(
        Arc::clone(&registry),
        Arc::clone(&health_board),
        Arc::clone(&factory),
        Arc::clone(&categories),
        config.aggregation_timeout,
    );

    // One probe loop per registered agent.
    let prober = Prober::new(
        Arc::clone(&registry),
        Arc::clone(&health_board),
        Arc::clone(&factory),
        config.probe_interval,
    );
    prober.start().await;

    // Hourly sweep of expired sessions.
    {
        let sessions = Arc::clone(&sessions);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(3600));
            loop {
                interval.tick().await;
                sessions.cleanup_expired().await;
            }
        });
    }

    let state = Arc::new(AppState {
        config: config.clone(),
        registry,
        health: health_board,
        categories,
        users,
        sessions,
        rate_limiter: LoginRateLimiter::default(),
        factory,
        aggregator,
        commands,
        prober,
    });

    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login));

    let protected_routes = Router::new()
        .merge(agents::routes())
        .merge(tasks::routes())
        .merge(categories::routes())
        .merge(auth::protected_routes())
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::require_session,
        ));

    let app = Router::new()
        .nest("/v1", public_routes.merge(protected_routes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::clone(&state));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Wait for SIGINT/SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        dev_mode: state.config.dev_mode,
    })
}
