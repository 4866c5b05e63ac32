use std::{fmt::Debug, sync::Arc, time::Duration};

use chrono::Utc;
use log::*;
use shopee_tools::{data_objects::TokenResponse, helpers::unix_now, ShopAuth};

use crate::{
    balance_api::errors::AuthError,
    db::{shops, sync_records},
    db_types::{NewShop, Shop, ShopAuthorization, SyncRecordStatus, SyncType},
    kv::{shop_token, KvStore},
    traits::Marketplace,
    SqliteDatabase,
};

/// Tokens this close to expiry are refreshed rather than used.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Shop registry and marketplace credentials.
#[derive(Clone)]
pub struct ShopApi {
    db: SqliteDatabase,
    kv: Arc<dyn KvStore>,
    marketplace: Arc<dyn Marketplace>,
}

impl Debug for ShopApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ShopApi")
    }
}

impl ShopApi {
    pub fn new(db: SqliteDatabase, kv: Arc<dyn KvStore>, marketplace: Arc<dyn Marketplace>) -> Self {
        Self { db, kv, marketplace }
    }

    pub async fn register_shop(&self, shop: &NewShop) -> Result<Shop, AuthError> {
        let mut conn = self.db.pool().acquire().await?;
        let shop = shops::insert_shop(shop, &mut conn).await?;
        info!("🔐️ Shop {} registered to admin {}", shop.shop_id, shop.admin_id);
        Ok(shop)
    }

    pub async fn fetch_shop(&self, shop_id: i64) -> Result<Option<Shop>, AuthError> {
        let mut conn = self.db.pool().acquire().await?;
        let shop = shops::fetch_shop(shop_id, &mut conn).await?;
        Ok(shop)
    }

    pub async fn shops_for_admin(&self, admin_id: i64) -> Result<Vec<Shop>, AuthError> {
        let mut conn = self.db.pool().acquire().await?;
        let shops = shops::fetch_shops_for_admin(admin_id, &mut conn).await?;
        Ok(shops)
    }

    pub async fn link_operator(&self, shop_id: i64, operator_id: i64) -> Result<(), AuthError> {
        let mut conn = self.db.pool().acquire().await?;
        shops::link_operator(shop_id, operator_id, &mut conn).await?;
        Ok(())
    }

    pub async fn set_sync_toggles(&self, shop_id: i64, sync_orders: bool, sync_finance: bool) -> Result<(), AuthError> {
        let mut conn = self.db.pool().acquire().await?;
        shops::set_sync_toggles(shop_id, sync_orders, sync_finance, &mut conn).await?;
        Ok(())
    }

    /// Stores a token pair obtained from the marketplace and re-enables any sync that was disabled for lack of one.
    pub async fn store_tokens(&self, shop_id: i64, tokens: &TokenResponse) -> Result<ShopAuthorization, AuthError> {
        let now = unix_now();
        let auth = ShopAuthorization {
            shop_id,
            access_token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.clone(),
            access_expires_at: now + tokens.expire_in,
            refresh_expires_at: now + tokens.refresh_token_expire_in,
            updated_at: Utc::now(),
        };
        let mut tx = self.db.pool().begin().await?;
        shops::upsert_authorization(&auth, &mut tx).await?;
        for sync_type in [SyncType::Order, SyncType::FinanceIncome] {
            let record = sync_records::fetch_or_create(shop_id, sync_type, &mut tx).await?;
            if record.status == SyncRecordStatus::Disabled {
                sync_records::set_status(shop_id, sync_type, SyncRecordStatus::Enabled, "", &mut tx).await?;
            }
        }
        tx.commit().await?;
        self.cache_token(&auth, now).await;
        debug!("🔐️ Stored new tokens for shop {shop_id}");
        Ok(auth)
    }

    async fn cache_token(&self, auth: &ShopAuthorization, now: i64) {
        let ttl = auth.access_expires_at - now - EXPIRY_MARGIN_SECS;
        if ttl <= 0 {
            return;
        }
        let key = shop_token(auth.shop_id);
        if let Err(e) = self.kv.set_ex(&key, &auth.access_token, Duration::from_secs(ttl as u64)).await {
            warn!("🔐️ Could not cache the access token for shop {}: {e}", auth.shop_id);
        }
    }

    /// Credentials for a shop-level marketplace call, refreshing the access token when it has expired.
    ///
    /// When the refresh token itself has expired, the shop's sync records are disabled with the error and
    /// [`AuthError::RefreshExpired`] is returned. The shop must then be re-authorized.
    pub async fn shop_auth(&self, shop_id: i64) -> Result<ShopAuth, AuthError> {
        if let Some(token) = self.kv.get(&shop_token(shop_id)).await? {
            return Ok(ShopAuth::new(shop_id, token));
        }
        let mut conn = self.db.pool().acquire().await?;
        let auth = shops::fetch_authorization(shop_id, &mut conn).await?.ok_or(AuthError::NotAuthorized(shop_id))?;
        drop(conn);
        let now = unix_now();
        if !auth.access_expired(now + EXPIRY_MARGIN_SECS) {
            self.cache_token(&auth, now).await;
            return Ok(ShopAuth::new(shop_id, auth.access_token));
        }
        if auth.refresh_expired(now) {
            warn!("🔐️ The refresh token of shop {shop_id} has expired. Disabling sync until it is re-authorized");
            self.disable_sync(shop_id, "refresh token expired").await?;
            return Err(AuthError::RefreshExpired(shop_id));
        }
        let tokens = self.marketplace.refresh_access_token(&auth.refresh_token, shop_id).await?;
        let auth = self.store_tokens(shop_id, &tokens).await?;
        info!("🔐️ Refreshed the access token of shop {shop_id}");
        Ok(ShopAuth::new(shop_id, auth.access_token))
    }

    /// Drops the cached access token, e.g. after the marketplace rejected it.
    pub async fn invalidate_token(&self, shop_id: i64) -> Result<(), AuthError> {
        self.kv.del(&shop_token(shop_id)).await?;
        Ok(())
    }

    async fn disable_sync(&self, shop_id: i64, reason: &str) -> Result<(), AuthError> {
        let mut tx = self.db.pool().begin().await?;
        for sync_type in [SyncType::Order, SyncType::FinanceIncome] {
            sync_records::fetch_or_create(shop_id, sync_type, &mut tx).await?;
            sync_records::set_status(shop_id, sync_type, SyncRecordStatus::Disabled, reason, &mut tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
