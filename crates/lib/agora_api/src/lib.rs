//! # agora_api
//!
//! HTTP API library for Agora.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use std::sync::Arc;

use agora_core::auth::session::SessionService;
use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};

use crate::handlers::{auth, health};

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Credential and session lifecycle.
    pub sessions: Arc<SessionService>,
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Public routes (no auth required)
    let public = Router::new()
        .route(routes::GET_API_HEALTH, get(health::health))
        .route(routes::POST_AUTH_REGISTER, post(auth::register_handler))
        .route(routes::POST_AUTH_LOGIN, post(auth::login_handler))
        .route(routes::POST_AUTH_REFRESH, post(auth::refresh_handler))
        .route(routes::POST_AUTH_LOGOUT, post(auth::logout_handler))
        .route(
            routes::POST_AUTH_REQUEST_PASSWORD_RESET,
            post(auth::request_password_reset_handler),
        )
        .route(
            routes::POST_AUTH_VERIFY_RESET_CODE,
            post(auth::verify_reset_code_handler),
        )
        .route(
            routes::POST_AUTH_CONFIRM_PASSWORD_RESET,
            post(auth::confirm_password_reset_handler),
        );

    // Protected routes (require auth)
    let protected = Router::new()
        .route(routes::GET_AUTH_ME, get(auth::me_handler))
        .route(routes::POST_AUTH_LOGOUT_ALL, post(auth::logout_all_handler))
        .route(
            routes::POST_AUTH_RESET_PASSWORD,
            post(auth::reset_password_handler),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_auth,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(cors)
        .with_state(state)
}
