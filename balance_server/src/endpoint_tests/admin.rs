use actix_web::{http::StatusCode, test, test::TestRequest, App};
use balance_engine::kv::{shop_sync_lock, LeaseLock, SHOP_SYNC_LOCK_TTL};

use super::helpers::{send, TestServer, ADMIN_TOKEN, SHOP_ID};
use crate::server::configure_app;

fn sync_request(path: &str, token: Option<&str>) -> actix_http::Request {
    let mut req = TestRequest::post().uri(path);
    if let Some(token) = token {
        req = req.insert_header(("Authorization", format!("Bearer {token}")));
    }
    req.to_request()
}

#[actix_web::test]
async fn admin_routes_need_the_token() {
    let sys = TestServer::signed().await;
    let app = test::init_service(App::new().configure(configure_app(&sys.config, sys.engine.clone()))).await;
    let path = format!("/admin/shops/{SHOP_ID}/sync");
    let (status, _) = send(&app, sync_request(&path, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, response) = send(&app, sync_request(&path, Some("guess"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(response.contains("access token is invalid"), "{response}");
    sys.tear_down().await;
}

#[actix_web::test]
async fn admin_routes_are_off_without_a_token() {
    let mut sys = TestServer::signed().await;
    sys.config.admin_token = Default::default();
    let app = test::init_service(App::new().configure(configure_app(&sys.config, sys.engine.clone()))).await;
    let path = format!("/admin/shops/{SHOP_ID}/sync");
    let (status, _) = send(&app, sync_request(&path, Some(ADMIN_TOKEN))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    sys.tear_down().await;
}

#[actix_web::test]
async fn bad_shop_id_is_a_bad_request() {
    let sys = TestServer::signed().await;
    let app = test::init_service(App::new().configure(configure_app(&sys.config, sys.engine.clone()))).await;
    let (status, response) = send(&app, sync_request("/admin/shops/abc/sync", Some(ADMIN_TOKEN))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(response.contains("abc is not a shop id"), "{response}");
    sys.tear_down().await;
}

#[actix_web::test]
async fn running_sync_is_a_conflict() {
    let sys = TestServer::signed().await;
    let app = test::init_service(App::new().configure(configure_app(&sys.config, sys.engine.clone()))).await;
    let lease = LeaseLock::try_acquire(sys.engine.kv(), shop_sync_lock(SHOP_ID), SHOP_SYNC_LOCK_TTL)
        .await
        .unwrap()
        .expect("lease should be free");
    let path = format!("/admin/shops/{SHOP_ID}/sync");
    let (status, response) = send(&app, sync_request(&path, Some(ADMIN_TOKEN))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(response.contains("already running"), "{response}");
    lease.release().await.unwrap();
    sys.tear_down().await;
}
