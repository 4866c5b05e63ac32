use std::time::Duration;

use actix_web::{http::StatusCode, test, test::TestRequest, App};
use balance_common::Money;
use balance_engine::db_types::OrderSnapshot;
use serde_json::json;
use shopee_tools::helpers::sign_push;

use super::helpers::{send, TestServer, CALLBACK_URL, PARTNER_KEY, SHOP_ID};
use crate::{config::WebhookConfig, server::configure_app};

fn push_body(code: i32, data: serde_json::Value) -> String {
    json!({ "code": code, "shop_id": SHOP_ID, "timestamp": 1_700_000_000, "data": data }).to_string()
}

fn signed_push(url: &str, body: &str) -> TestRequest {
    let signature = sign_push(PARTNER_KEY, url, body.as_bytes()).unwrap();
    TestRequest::post()
        .uri("/webhook/shopee")
        .insert_header(("Authorization", signature))
        .insert_header(("Content-Type", "application/json"))
        .set_payload(body.to_string())
}

async fn order_status(sys: &TestServer, order_sn: &str) -> String {
    sys.engine.orders().fetch_order(SHOP_ID, order_sn).await.unwrap().order_status
}

#[actix_web::test]
async fn signed_push_is_accepted_and_handled() {
    let sys = TestServer::signed().await;
    let snapshot = OrderSnapshot {
        shop_id: SHOP_ID,
        order_sn: "C1".into(),
        currency: "CNY".into(),
        total_amount: Money::from(4_500),
        order_status: "UNPAID".into(),
        create_time: 1_000,
        update_time: 1_060,
        ..Default::default()
    };
    sys.engine.orders().upsert_from_sync(&snapshot).await.unwrap();
    let app = test::init_service(App::new().configure(configure_app(&sys.config, sys.engine.clone()))).await;

    let body = push_body(5, json!({ "ordersn": "C1", "cancel_by": "buyer", "cancel_reason": "changed mind" }));
    let (status, response) = send(&app, signed_push(CALLBACK_URL, &body).to_request()).await;
    assert_eq!(status, StatusCode::OK);
    assert!(response.contains(r#""success":true"#), "{response}");

    let mut cancelled = false;
    for _ in 0..100 {
        if order_status(&sys, "C1").await == "CANCELLED" {
            cancelled = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(cancelled, "the cancel push never reached the order");
    sys.tear_down().await;
}

#[actix_web::test]
async fn unsigned_push_is_refused() {
    let sys = TestServer::signed().await;
    let app = test::init_service(App::new().configure(configure_app(&sys.config, sys.engine.clone()))).await;
    let req = TestRequest::post().uri("/webhook/shopee").set_payload(push_body(10, json!({}))).to_request();
    let (status, response) = send(&app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(response.contains("No push signature was provided"), "{response}");
    sys.tear_down().await;
}

#[actix_web::test]
async fn forged_push_is_refused() {
    let sys = TestServer::signed().await;
    let app = test::init_service(App::new().configure(configure_app(&sys.config, sys.engine.clone()))).await;
    let body = push_body(10, json!({ "item_id": 1 }));
    // Signed over a different URL
    let req = signed_push("https://elsewhere.example.com/webhook/shopee", &body).to_request();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    // Body tampered with after signing
    let signature = sign_push(PARTNER_KEY, CALLBACK_URL, body.as_bytes()).unwrap();
    let req = TestRequest::post()
        .uri("/webhook/shopee")
        .insert_header(("Authorization", signature))
        .set_payload(push_body(10, json!({ "item_id": 2 })))
        .to_request();
    let (status, response) = send(&app, req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(response.contains("signature is invalid"), "{response}");
    sys.tear_down().await;
}

#[actix_web::test]
async fn callback_url_defaults_to_the_request_url() {
    let sys = TestServer::new(WebhookConfig { hmac_checks: true, callback_url: None }).await;
    let app = test::init_service(App::new().configure(configure_app(&sys.config, sys.engine.clone()))).await;
    let body = push_body(10, json!({}));
    let req = signed_push("http://hooks.example.com/webhook/shopee", &body)
        .insert_header(("Host", "hooks.example.com"))
        .to_request();
    let (status, response) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK, "{response}");
    sys.tear_down().await;
}

#[actix_web::test]
async fn checks_can_be_disabled() {
    let sys = TestServer::new(WebhookConfig { hmac_checks: false, callback_url: None }).await;
    let app = test::init_service(App::new().configure(configure_app(&sys.config, sys.engine.clone()))).await;
    let req = TestRequest::post().uri("/webhook/shopee").set_payload(push_body(99, json!({}))).to_request();
    let (status, response) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert!(response.contains(r#""success":true"#), "{response}");
    sys.tear_down().await;
}

#[actix_web::test]
async fn garbage_is_acknowledged() {
    let sys = TestServer::signed().await;
    let app = test::init_service(App::new().configure(configure_app(&sys.config, sys.engine.clone()))).await;
    let body = "this is not json";
    let (status, response) = send(&app, signed_push(CALLBACK_URL, body).to_request()).await;
    assert_eq!(status, StatusCode::OK);
    assert!(response.contains(r#""success":false"#), "{response}");
    sys.tear_down().await;
}
