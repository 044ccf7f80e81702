//! services/api/src/bin/api.rs

use axum::http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    HeaderValue, Method,
};
use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use greenbot_api::{
    adapters::{db::DbAdapter, local_store::LocalStore},
    config::Config,
    error::ApiError,
    web::{
        auth::{login_handler, logout_handler, signup_handler},
        middleware::require_auth,
        relay::relay_handler,
        rest::{
            best_score_handler, delete_conversation_handler, get_conversation_handler,
            get_credentials_handler, list_conversations_handler, quiz_history_handler,
            save_credentials_handler, save_quiz_result_handler, ApiDoc,
        },
        state::AppState,
        ws_handler::ws_handler,
    },
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool.clone()));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Open the Local Mirror for Anonymous Sessions ---
    let local_store = match &config.local_store_path {
        Some(path) => LocalStore::open_at(path)?,
        None => LocalStore::open_default()?,
    };
    let local_store = Arc::new(local_store);

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState::new(config.clone(), db_adapter, local_store));

    let cors = CorsLayer::new()
        .allow_origin(
            config
                .allowed_origin
                .parse::<HeaderValue>()
                .map_err(|e| ApiError::Internal(format!("invalid ALLOWED_ORIGIN: {e}")))?,
        )
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // --- 5. Create the Web Router ---
    // Public routes (no auth required; the chat socket resolves identity itself)
    let public_routes = Router::new()
        .route("/auth/signup", post(signup_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/logout", post(logout_handler))
        .route("/ws", get(ws_handler));

    // Protected routes (bearer token required)
    let protected_routes = Router::new()
        .route("/ai-chat", post(relay_handler))
        .route("/conversations", get(list_conversations_handler))
        .route(
            "/conversations/{id}",
            get(get_conversation_handler).delete(delete_conversation_handler),
        )
        .route(
            "/credentials",
            get(get_credentials_handler).put(save_credentials_handler),
        )
        .route(
            "/quiz/results",
            post(save_quiz_result_handler).get(quiz_history_handler),
        )
        .route("/quiz/results/best", get(best_score_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    // Combine API routes
    let api_router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
