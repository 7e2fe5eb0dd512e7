use crate::application::handlers::{
    auth_handler, contract_handler, health, interest_handler, product_handler, user_handler,
};
use crate::application::state::AppState;
use crate::auth::require_auth;
use crate::rate_limit::{create_rate_limiter, rate_limit_middleware, RateLimiterConfig};
use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

/// The full HTTP API. Everything except health, registration and login
/// requires a bearer session.
pub fn build_router(state: AppState) -> Router {
    let limiter = create_rate_limiter(RateLimiterConfig {
        requests_per_minute: state.config.rate_limit_per_minute,
    });

    let public = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth_handler::register))
        .route("/auth/login", post(auth_handler::login));

    let protected = Router::new()
        .route("/auth/logout", post(auth_handler::logout))
        .route("/auth/change-password", post(auth_handler::change_password))
        .route("/users/me", get(user_handler::me).patch(user_handler::update_me))
        .route(
            "/admin/users",
            get(user_handler::list_users).post(user_handler::create_user),
        )
        .route("/admin/users/:id", patch(user_handler::update_user))
        .route("/admin/users/:id/kyc", post(user_handler::decide_kyc))
        .route("/admin/users/:id/status", post(user_handler::set_account_status))
        .route(
            "/products",
            get(product_handler::list_products).post(product_handler::create_product),
        )
        .route(
            "/products/:id",
            get(product_handler::get_product)
                .patch(product_handler::update_product)
                .delete(product_handler::delete_product),
        )
        .route("/products/:id/toggle", post(product_handler::toggle_product))
        .route("/products/:id/stock", post(product_handler::update_stock))
        .route(
            "/products/:id/interests",
            get(interest_handler::list_product_interests).post(interest_handler::express_interest),
        )
        .route(
            "/products/:id/interests/:iid/accept",
            post(interest_handler::accept_interest),
        )
        .route(
            "/products/:id/interests/:iid/reject",
            post(interest_handler::reject_interest),
        )
        .route(
            "/products/:id/interests/:iid/cancel",
            post(interest_handler::cancel_interest),
        )
        .route(
            "/products/:id/interests/:iid/confirm",
            post(interest_handler::confirm_deal),
        )
        .route("/offers", get(interest_handler::list_offers))
        .route("/contracts", get(contract_handler::list_contracts))
        .route("/contracts/export.csv", get(contract_handler::export_contracts))
        .route(
            "/contracts/:id",
            get(contract_handler::get_contract).patch(contract_handler::update_contract),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    public
        .merge(protected)
        .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware))
        .layer(RequestBodyLimitLayer::new(state.config.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
