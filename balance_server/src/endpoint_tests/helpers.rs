use std::sync::Arc;

use actix_web::{
    body::MessageBody,
    dev::{Service, ServiceResponse},
    http::StatusCode,
    test,
};
use balance_common::Secret;
use balance_engine::{
    db_types::NewShop,
    kv::MemoryStore,
    test_utils::prepare_env::{prepare_test_env, random_db_path},
    BalanceEngine,
    EngineConfig,
};
use log::error;
use shopee_tools::{ShopeeApi, ShopeeConfig};
use sqlx::{migrate::MigrateDatabase, Sqlite};

use crate::config::{ServerConfig, WebhookConfig};

pub const PARTNER_KEY: &str = "test-partner-key";
pub const ADMIN_TOKEN: &str = "test-admin-token";
pub const CALLBACK_URL: &str = "https://hooks.example.com/webhook/shopee";
pub const SHOP_ID: i64 = 2001;
pub const OWNER_ID: i64 = 11;

pub struct TestServer {
    pub db_path: String,
    pub engine: BalanceEngine,
    pub config: ServerConfig,
}

impl TestServer {
    /// An engine over a fresh database, with one registered shop. No marketplace calls are made by these tests, so the
    /// live client is pointed at an unroutable host.
    pub async fn new(webhook: WebhookConfig) -> Self {
        let db_path = random_db_path();
        let db = prepare_test_env(&db_path).await;
        let shopee = ShopeeConfig {
            host: "http://127.0.0.1:9".into(),
            partner_id: 1,
            partner_key: Secret::new(PARTNER_KEY.to_string()),
            ..Default::default()
        };
        let config = ServerConfig {
            shopee: shopee.clone(),
            webhook,
            admin_token: Secret::new(ADMIN_TOKEN.to_string()),
            ..Default::default()
        };
        let marketplace = ShopeeApi::new(shopee).expect("Error creating marketplace client");
        let engine =
            BalanceEngine::new(db, Arc::new(MemoryStore::new()), Arc::new(marketplace), EngineConfig::default()).await;
        engine.shops().register_shop(&NewShop::new(SHOP_ID, OWNER_ID)).await.expect("Error registering shop");
        Self { db_path, engine, config }
    }

    pub async fn signed() -> Self {
        Self::new(WebhookConfig { hmac_checks: true, callback_url: Some(CALLBACK_URL.into()) }).await
    }

    pub async fn tear_down(self) {
        self.engine.db().close().await;
        if let Err(e) = Sqlite::drop_database(&self.db_path).await {
            error!("🚀️ Failed to drop {}: {e}", self.db_path);
        }
    }
}

/// Sends `req` and returns the status and body, mapping middleware errors onto their responses.
pub async fn send<S, B>(app: &S, req: actix_http::Request) -> (StatusCode, String)
where
    S: Service<actix_http::Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
    B: MessageBody,
{
    match test::try_call_service(app, req).await {
        Ok(res) => {
            let status = res.status();
            let body = test::read_body(res).await;
            (status, String::from_utf8_lossy(&body).into_owned())
        },
        Err(e) => {
            let res = e.error_response();
            let status = res.status();
            let body = res.into_body().try_into_bytes().unwrap_or_default();
            (status, String::from_utf8_lossy(&body).into_owned())
        },
    }
}
