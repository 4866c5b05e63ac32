use std::{sync::Arc, time::Duration};

use actix_web::{dev::Server, http::KeepAlive, middleware::Logger, web, App, HttpServer};
use balance_engine::{
    kv::{KvStore, MemoryStore, RedisStore},
    workers::ShutdownHandle,
    BalanceEngine,
    SqliteDatabase,
};
use futures::future::join_all;
use log::*;
use shopee_tools::ShopeeApi;

use crate::{
    config::ServerConfig,
    errors::ServerError,
    middleware::{AdminTokenMiddlewareFactory, HmacMiddlewareFactory},
    routes::{health, shopee_webhook, trigger_shop_sync},
};

/// How long in-flight requests get to finish after a shutdown signal.
const SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Builds the engine, starts the background workers and serves HTTP until the process is signalled to stop. The
/// workers are stopped and the database closed before this returns.
pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let engine = build_engine(&config).await?;
    let (shutdown, signal) = ShutdownHandle::new();
    let workers = if config.disable_workers {
        warn!("🕰️ Background workers are disabled on this node. Only pushes will be processed.");
        Vec::new()
    } else {
        engine.start_workers(signal)
    };
    let srv = create_server_instance(config, engine.clone())?;
    let result = srv.await.map_err(ServerError::from);
    info!("🚀️ HTTP server stopped. Waiting for the background workers to finish.");
    shutdown.stop();
    join_all(workers).await.into_iter().filter_map(Result::err).for_each(|e| error!("🕰️ A worker panicked. {e}"));
    engine.db().close().await;
    result
}

/// Connects the database and the key-value store and wires up the engine over the live marketplace client.
pub async fn build_engine(config: &ServerConfig) -> Result<BalanceEngine, ServerError> {
    if config.shopee.partner_key.is_empty() {
        return Err(ServerError::ConfigurationError("BAL_SHOPEE_PARTNER_KEY must be set".into()));
    }
    let db = SqliteDatabase::new_with_url(&config.database_url, config.db_max_connections)
        .await
        .map_err(|e| ServerError::InitializeError(format!("Cannot open {}. {e}", config.database_url)))?;
    db.migrate().await.map_err(|e| ServerError::InitializeError(format!("Database migration failed. {e}")))?;
    let kv: Arc<dyn KvStore> = match &config.redis_url {
        Some(url) => Arc::new(RedisStore::connect(url).await?),
        None => Arc::new(MemoryStore::new()),
    };
    let marketplace = ShopeeApi::new(config.shopee.clone())
        .map_err(|e| ServerError::InitializeError(format!("Cannot create the marketplace client. {e}")))?;
    let engine = BalanceEngine::new(db, kv, Arc::new(marketplace), config.engine_config()).await;
    info!("🚀️ Balance engine ready");
    Ok(engine)
}

pub fn create_server_instance(config: ServerConfig, engine: BalanceEngine) -> Result<Server, ServerError> {
    let bind_addr = (config.host.clone(), config.port);
    let srv = HttpServer::new(move || {
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("bal::access_log"))
            .configure(configure_app(&config, engine.clone()))
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .shutdown_timeout(SHUTDOWN_TIMEOUT_SECS)
    .bind(bind_addr)?
    .run();
    Ok(srv)
}

/// Registers the routes and their middleware. The `/admin` scope is only mounted when an admin token is set.
pub fn configure_app(config: &ServerConfig, engine: BalanceEngine) -> impl FnOnce(&mut web::ServiceConfig) {
    let hmac = HmacMiddlewareFactory::new(
        config.shopee.partner_key.clone(),
        config.webhook.callback_url.clone(),
        config.webhook.hmac_checks,
    );
    let admin_token = config.admin_token.clone();
    move |cfg| {
        cfg.app_data(web::Data::new(engine))
            .service(health)
            .service(web::scope("/webhook").wrap(hmac).service(shopee_webhook));
        if !admin_token.is_empty() {
            cfg.service(
                web::scope("/admin").wrap(AdminTokenMiddlewareFactory::new(admin_token)).service(trigger_shop_sync),
            );
        }
    }
}
