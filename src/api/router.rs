//! Router configuration.

use std::sync::Arc;

use axum::{
    Json, Router,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;

use crate::app::AppState;

use super::handlers::{
    ApiDoc, balance_handler, health_check_handler, list_orders_handler,
    list_withdrawals_handler, register_handler, submit_order_handler, withdraw_handler,
};

/// Build the application router
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let user_routes = Router::new()
        .route("/register", post(register_handler))
        .route("/orders", post(submit_order_handler).get(list_orders_handler))
        .route("/balance", get(balance_handler))
        .route("/balance/withdraw", post(withdraw_handler))
        .route("/withdrawals", get(list_withdrawals_handler));

    Router::new()
        .nest("/api/user", user_routes)
        .route("/health", get(health_check_handler))
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}
