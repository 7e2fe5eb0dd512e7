//! End-to-end tests driving the HTTP router in-process.
//!
//! Covers the full deal path: sign-up, KYC review, listing, offer,
//! seller acceptance, admin confirmation and the resulting contract.

use agro_broker::application::router::build_router;
use agro_broker::application::services::accounts;
use agro_broker::application::state::AppState;
use agro_broker::config::{AppConfig, BootstrapAdmin};
use agro_broker::persistence::{init_database, DatabaseConfig};
use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use zeroize::Zeroizing;

async fn test_app() -> Router {
    let mut config = AppConfig::with_pepper("e2e-pepper-0123456789");
    config.database = DatabaseConfig::in_memory();
    config.password_hash_iterations = 1_000;
    config.bootstrap_admin = Some(BootstrapAdmin {
        username: "root".into(),
        email: "root@example.com".into(),
        mobile: "9000000000".into(),
        password: Zeroizing::new("root-password".into()),
    });

    let pool = init_database(&config.database).await.unwrap();
    let state = AppState::new(pool, config);
    accounts::bootstrap_super_admin(&state).await.unwrap();
    build_router(state)
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, HeaderMap, bytes::Bytes) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, headers, bytes)
}

async fn send_raw(app: &Router, method: Method, uri: &str, token: &str, body: &'static str) -> StatusCode {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap();
    app.clone().oneshot(request).await.unwrap().status()
}

async fn call(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let (status, _, bytes) = send(app, method, uri, token, body).await;
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

async fn register(app: &Router, username: &str, mobile: &str, role: &str) -> i64 {
    let (status, body) = call(
        app,
        Method::POST,
        "/auth/register",
        None,
        Some(json!({
            "username": username,
            "email": format!("{}@example.com", username),
            "mobile": mobile,
            "password": "s3cret-pass",
            "role": role,
            "company_name": format!("{} Traders", username),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    body["user"]["id"].as_i64().unwrap()
}

async fn login(app: &Router, login: &str, password: &str) -> String {
    let (status, body) = call(
        app,
        Method::POST,
        "/auth/login",
        None,
        Some(json!({ "login": login, "password": password })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    body["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_is_public() {
    let app = test_app().await;
    let (status, body) = call(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
}

#[tokio::test]
async fn test_protected_routes_require_session() {
    let app = test_app().await;

    let (status, body) = call(&app, Method::GET, "/products", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);

    let (status, _) = call(&app, Method::GET, "/products", Some("not-a-token"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let app = test_app().await;
    let (status, _, bytes) = send(&app, Method::POST, "/auth/login", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_logout_revokes_session() {
    let app = test_app().await;
    register(&app, "ravi", "9811111111", "buyer").await;
    let token = login(&app, "9811111111", "s3cret-pass").await;

    let (status, body) = call(&app, Method::GET, "/users/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["username"], "ravi");
    assert_eq!(body["user"]["kyc_status"], "pending");

    let (status, _) = call(&app, Method::POST, "/auth/logout", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&app, Method::GET, "/users/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_full_deal_flow() {
    let app = test_app().await;
    let admin = login(&app, "root", "root-password").await;

    let seller_id = register(&app, "suresh", "9822222222", "seller").await;
    let buyer_id = register(&app, "ravi", "9833333333", "buyer").await;
    let seller = login(&app, "suresh", "s3cret-pass").await;
    let buyer = login(&app, "ravi", "s3cret-pass").await;

    let listing = json!({
        "title": "Chana",
        "category": "Pulses",
        "amount": "100",
        "amount_unit": "kg",
        "quantity": "100",
        "quantity_unit": "kg",
        "loading_from": "2025-03-01",
        "loading_to": "2025-03-10",
    });

    // Pending KYC blocks trading.
    let (status, body) = call(&app, Method::POST, "/products", Some(&seller), Some(listing.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["message"].as_str().unwrap().contains("KYC is pending"));

    for id in [seller_id, buyer_id] {
        let (status, body) = call(
            &app,
            Method::POST,
            &format!("/admin/users/{}/kyc", id),
            Some(&admin),
            Some(json!({ "status": "approved" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["user"]["kyc_status"], "approved");
    }

    let (status, body) = call(&app, Method::POST, "/products", Some(&seller), Some(listing)).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let product_id = body["product"]["id"].as_i64().unwrap();

    let (status, body) = call(&app, Method::GET, "/products", Some(&buyer), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["products"][0]["seller_display_id"], format!("SELLER-{:04}", seller_id));

    let (status, body) = call(
        &app,
        Method::POST,
        &format!("/products/{}/interests", product_id),
        Some(&buyer),
        Some(json!({
            "buyer_offered_amount": "95",
            "buyer_required_quantity": "40",
            "delivery_date": "2025-03-15",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let interest_id = body["interest"]["id"].as_i64().unwrap();
    assert!(body["interest"]["transaction_id"].as_str().unwrap().starts_with("INT-"));

    let (status, body) = call(
        &app,
        Method::GET,
        &format!("/products/{}/interests", product_id),
        Some(&seller),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    let offer = &body["interests"][0];
    assert!(offer.get("buyer_id").is_none());
    assert!(offer["buyer_display_id"].as_str().unwrap().starts_with("BUY-"));
    assert_eq!(offer["offer_arrow"], "down");

    // Only the admin confirms.
    let confirm_uri = format!("/products/{}/interests/{}/confirm", product_id, interest_id);
    let (status, _) = call(&app, Method::POST, &confirm_uri, Some(&seller), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // A remark body is optional but must be valid JSON when sent.
    let accept_uri = format!("/products/{}/interests/{}/accept", product_id, interest_id);
    let status = send_raw(&app, Method::POST, &accept_uri, &seller, r#"{"remark": "#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(
        &app,
        Method::POST,
        &accept_uri,
        Some(&seller),
        Some(json!({ "remark": "Ready to load" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["interest"]["status"], "seller_confirmed");

    let (status, body) = call(
        &app,
        Method::POST,
        &confirm_uri,
        Some(&admin),
        Some(json!({ "remark": "Payment terms agreed" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["remaining_quantity"], "60.00");
    let contract_code = body["contract"]["contract_id"].as_str().unwrap().to_string();
    assert!(contract_code.starts_with("CNT-"));

    // Confirming twice returns the same contract.
    let (status, body) = call(&app, Method::POST, &confirm_uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["contract"]["contract_id"], contract_code.as_str());
    assert_eq!(body["remaining_quantity"], "60.00");

    let (status, body) = call(&app, Method::GET, "/contracts", Some(&buyer), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["contracts"][0]["contract_id"], contract_code.as_str());
    assert!(body["contracts"][0].get("seller_id").is_none());

    let (status, body) = call(&app, Method::GET, "/offers?status=deal_confirmed", Some(&buyer), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);

    let (status, _, _) = send(&app, Method::GET, "/contracts/export.csv", Some(&buyer), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, headers, bytes) =
        send(&app, Method::GET, "/contracts/export.csv", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers[header::CONTENT_TYPE].to_str().unwrap().starts_with("text/csv"));
    assert!(headers[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .starts_with("attachment;"));
    let csv = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(csv.starts_with("Contract ID,Product,Buyer,Seller"));
    assert!(csv.contains(&contract_code));
    assert!(csv.contains("suresh Traders"));
}

#[tokio::test]
async fn test_suspended_account_cannot_log_in() {
    let app = test_app().await;
    let admin = login(&app, "root", "root-password").await;
    let buyer_id = register(&app, "ravi", "9844444444", "buyer").await;
    let buyer = login(&app, "ravi", "s3cret-pass").await;

    let (status, body) = call(
        &app,
        Method::POST,
        &format!("/admin/users/{}/status", buyer_id),
        Some(&admin),
        Some(json!({ "status": "suspended", "reason": "Payment default" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["user"]["account_status"], "suspended");

    let (status, _) = call(&app, Method::GET, "/users/me", Some(&buyer), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = call(
        &app,
        Method::POST,
        "/auth/login",
        None,
        Some(json!({ "login": "ravi", "password": "s3cret-pass" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["message"].as_str().unwrap().contains("Payment default"));
}

#[tokio::test]
async fn test_account_self_service_and_admin_edits() {
    let app = test_app().await;
    let admin = login(&app, "root", "root-password").await;
    let ravi_id = register(&app, "ravi", "9855555555", "buyer").await;
    register(&app, "kiran", "9866666666", "seller").await;
    let current = login(&app, "ravi", "s3cret-pass").await;
    let elsewhere = login(&app, "ravi", "s3cret-pass").await;

    let (status, body) = call(
        &app,
        Method::PATCH,
        "/users/me",
        Some(&current),
        Some(json!({ "mobile": "9866666666" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Mobile number already registered.");

    let (status, body) = call(
        &app,
        Method::PATCH,
        "/users/me",
        Some(&current),
        Some(json!({ "company_name": "Ravi Dal Mill" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["user"]["company_name"], "Ravi Dal Mill");

    let (status, body) = call(
        &app,
        Method::POST,
        "/auth/change-password",
        Some(&current),
        Some(json!({ "old_password": "wrong-pass", "new_password": "n3w-secret-pass" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Old password is incorrect.");

    let (status, body) = call(
        &app,
        Method::POST,
        "/auth/change-password",
        Some(&current),
        Some(json!({ "old_password": "s3cret-pass", "new_password": "n3w-secret-pass" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["revoked_sessions"], 1);

    let (status, _) = call(&app, Method::GET, "/users/me", Some(&current), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&app, Method::GET, "/users/me", Some(&elsewhere), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    login(&app, "ravi", "n3w-secret-pass").await;

    // Only admins edit other accounts.
    let uri = format!("/admin/users/{}", ravi_id);
    let (status, _) = call(&app, Method::PATCH, &uri, Some(&current), Some(json!({ "role": "seller" }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(
        &app,
        Method::PATCH,
        &uri,
        Some(&admin),
        Some(json!({ "role": "both_sellerandbuyer", "full_name": "Ravi Kumar" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["user"]["role"], "both_sellerandbuyer");
    assert_eq!(body["user"]["full_name"], "Ravi Kumar");
    assert_eq!(body["user"]["company_name"], "Ravi Dal Mill");
}
