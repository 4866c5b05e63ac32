#![allow(dead_code)]
use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use balance_common::Money;
use balance_engine::{
    db_types::{AccountType, NewShop, OrderSnapshot, ReturnSnapshot},
    kv::{KvStore, MemoryStore},
    test_utils::prepare_env::{prepare_test_env, random_db_path},
    traits::Marketplace,
    BalanceEngine,
    EngineConfig,
};
use log::*;
use mockall::mock;
use shopee_tools::{
    data_objects::{
        EscrowDetail,
        OrderDetail,
        OrderListPage,
        OrderListQuery,
        ReturnDetail,
        ReturnListPage,
        ShipMethod,
        TokenResponse,
        WalletTransactionPage,
    },
    ShopAuth,
    ShopeeApiError,
};
use sqlx::{migrate::MigrateDatabase, Sqlite};
use tokio::runtime::Runtime;

pub const SHOP_ID: i64 = 1001;
pub const OWNER_ID: i64 = 7;
pub const OPERATOR_ID: i64 = 42;

mock! {
    pub Shopee {}

    #[async_trait]
    impl Marketplace for Shopee {
        async fn get_order_list(&self, shop: &ShopAuth, query: &OrderListQuery) -> Result<OrderListPage, ShopeeApiError>;
        async fn get_order_detail(&self, shop: &ShopAuth, order_sns: &[String]) -> Result<Vec<OrderDetail>, ShopeeApiError>;
        async fn get_escrow_detail(&self, shop: &ShopAuth, order_sn: &str) -> Result<EscrowDetail, ShopeeApiError>;
        async fn get_return_list(
            &self,
            shop: &ShopAuth,
            from: i64,
            to: i64,
            page_size: u32,
            cursor: Option<String>,
        ) -> Result<ReturnListPage, ShopeeApiError>;
        async fn get_return_detail(&self, shop: &ShopAuth, return_sn: &str) -> Result<ReturnDetail, ShopeeApiError>;
        async fn get_wallet_transaction_list(
            &self,
            shop: &ShopAuth,
            page_no: u32,
            page_size: u32,
        ) -> Result<WalletTransactionPage, ShopeeApiError>;
        async fn ship_order(&self, shop: &ShopAuth, order_sn: &str, method: Option<ShipMethod>) -> Result<(), ShopeeApiError>;
        async fn refresh_access_token(&self, refresh_token: &str, shop_id: i64) -> Result<TokenResponse, ShopeeApiError>;
    }
}

/// A marketplace that has no escrow breakdown for any order, so prepayment checks use the order total, and that
/// accepts every ship call.
pub fn quiet_marketplace() -> MockShopee {
    let mut mock = MockShopee::new();
    mock.expect_get_escrow_detail().returning(|_, sn| Err(ShopeeApiError::Transient(format!("no escrow for {sn}"))));
    mock.expect_ship_order().returning(|_, _, _| Ok(()));
    mock
}

/// Runs an async test body on a fresh multi-threaded runtime.
pub fn run<F: Future<Output = ()>>(test: F) {
    dotenvy::from_filename(".env.test").ok();
    let _ = env_logger::try_init();
    let rt = Runtime::new().unwrap();
    rt.block_on(test);
}

pub struct TestSystem {
    pub db_path: String,
    pub kv: Arc<dyn KvStore>,
    pub engine: BalanceEngine,
}

pub async fn setup(marketplace: MockShopee) -> TestSystem {
    setup_with(marketplace, EngineConfig::default()).await
}

pub async fn setup_with(marketplace: MockShopee, config: EngineConfig) -> TestSystem {
    let url = random_db_path();
    let db = prepare_test_env(&url).await;
    let kv: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
    let engine = BalanceEngine::new(db, Arc::clone(&kv), Arc::new(marketplace), config).await;
    register_shop(&engine, SHOP_ID, OWNER_ID).await;
    TestSystem { db_path: url, kv, engine }
}

pub async fn tear_down(sys: TestSystem) {
    sys.engine.db().close().await;
    if let Err(e) = Sqlite::drop_database(&sys.db_path).await {
        error!("🚀️ Failed to drop {}: {e}", sys.db_path);
    }
}

pub async fn register_shop(engine: &BalanceEngine, shop_id: i64, admin_id: i64) {
    engine.shops().register_shop(&NewShop::new(shop_id, admin_id)).await.expect("Error registering shop");
    engine.shops().link_operator(shop_id, OPERATOR_ID).await.expect("Error linking operator");
    let tokens = TokenResponse {
        access_token: format!("access-{shop_id}"),
        refresh_token: format!("refresh-{shop_id}"),
        expire_in: 4 * 3600,
        refresh_token_expire_in: 30 * 24 * 3600,
        shop_id_list: vec![shop_id],
    };
    engine.shops().store_tokens(shop_id, &tokens).await.expect("Error storing tokens");
}

/// Whole currency units as cents.
pub fn units(value: i64) -> Money {
    Money::from(value * 100)
}

pub fn order(order_sn: &str, total: Money, status: &str, update_time: i64) -> OrderSnapshot {
    OrderSnapshot {
        shop_id: SHOP_ID,
        order_sn: order_sn.to_string(),
        currency: "CNY".to_string(),
        total_amount: total,
        order_status: status.to_string(),
        create_time: update_time - 60,
        update_time,
        ..Default::default()
    }
}

pub fn refund_return(return_sn: &str, order_sn: &str, refund: Money, status: &str, update_time: i64) -> ReturnSnapshot {
    ReturnSnapshot {
        shop_id: SHOP_ID,
        return_sn: return_sn.to_string(),
        order_sn: order_sn.to_string(),
        refund_amount: refund,
        currency: "CNY".to_string(),
        status: status.to_string(),
        create_time: update_time - 60,
        update_time,
        ..Default::default()
    }
}

/// (balance, frozen) of the owner's prepayment account.
pub async fn prepayment(engine: &BalanceEngine, admin_id: i64) -> (Money, Money) {
    engine
        .ledger()
        .account(admin_id, AccountType::Prepayment)
        .await
        .expect("Error fetching account")
        .map(|a| (a.balance, a.frozen_amount))
        .unwrap_or((Money::ZERO, Money::ZERO))
}

/// Polls `check` until it holds or two seconds have passed. Event hooks run on their own tasks.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
