//! Router setup with all API routes and middleware.
//!
//! Configures the axum Router with CORS, tracing, compression, the
//! api-key and bearer-token layers, and all endpoint handlers.

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use dante_core::config::DanteConfig;
use dante_core::error::DanteError;

use crate::handlers;
use crate::rate_limit::RateLimiter;
use crate::state::AppState;

/// Create the axum Router with all routes and middleware.
///
/// Layout:
/// - public: `/health`, avatar downloads
/// - api key: sign-up, confirmation, sign-in, recovery, password update
/// - api key + bearer: sign-out, functions, profile, avatar upload
pub fn create_router(state: AppState) -> Router {
    let server = &state.config.server;

    let origins: Vec<HeaderValue> = [server.public_url.trim_end_matches('/').to_string()]
        .into_iter()
        .chain([
            format!("http://127.0.0.1:{}", server.port),
            format!("http://localhost:{}", server.port),
        ])
        .filter_map(|o| HeaderValue::from_str(&o).ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            HeaderName::from_static("apikey"),
        ]);

    // Routes that need no key at all.
    let public_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/storage/v1/avatar/{user_id}", get(handlers::get_avatar));

    // Signed-in routes.
    let user_routes = Router::new()
        .route("/auth/v1/logout", post(handlers::logout))
        .route(
            "/functions/v1/create-session-on-login",
            post(handlers::create_session_on_login),
        )
        .route("/functions/v1/load-user-data", post(handlers::load_user_data))
        .route("/functions/v1/save-exchange", post(handlers::save_exchange))
        .route("/functions/v1/rename-session", post(handlers::rename_session))
        .route("/functions/v1/delete-session", post(handlers::delete_session))
        .route(
            "/rest/v1/profile",
            get(handlers::get_profile).patch(handlers::update_profile),
        )
        .route(
            "/storage/v1/avatar",
            put(handlers::put_avatar)
                .layer(DefaultBodyLimit::max(server.max_avatar_bytes.saturating_mul(2))),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::auth::require_user,
        ));

    let limiter = RateLimiter::new(server.rate_limit_per_sec);

    // Everything a client calls carries the public key.
    let keyed_routes = Router::new()
        .route("/auth/v1/signup", post(handlers::signup))
        .route("/auth/v1/confirm", get(handlers::confirm))
        .route("/auth/v1/token", post(handlers::token))
        .route("/auth/v1/recover", post(handlers::recover))
        .route("/auth/v1/user", put(handlers::update_user))
        .merge(user_routes)
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::auth::require_api_key,
        ))
        .layer(axum::middleware::from_fn(
            crate::rate_limit::rate_limit_middleware,
        ))
        .layer(axum::Extension(limiter));

    public_routes
        .merge(keyed_routes)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server on `server.host:server.port` and serve until
/// ctrl-c.
pub async fn start_server(config: &DanteConfig, state: AppState) -> Result<(), DanteError> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let router = create_router(state);

    tracing::info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}
