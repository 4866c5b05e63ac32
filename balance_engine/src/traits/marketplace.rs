use async_trait::async_trait;
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
    ShopeeApi,
    ShopeeApiError,
};

/// The marketplace operations the engine depends on.
///
/// [`ShopeeApi`] is the production implementation. Engine tests substitute a mock so that no HTTP is involved.
#[async_trait]
pub trait Marketplace: Send + Sync {
    async fn get_order_list(&self, shop: &ShopAuth, query: &OrderListQuery) -> Result<OrderListPage, ShopeeApiError>;

    /// At most [`shopee_tools::DETAIL_BATCH_LIMIT`] order numbers per call.
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

    async fn ship_order(
        &self,
        shop: &ShopAuth,
        order_sn: &str,
        method: Option<ShipMethod>,
    ) -> Result<(), ShopeeApiError>;

    async fn refresh_access_token(&self, refresh_token: &str, shop_id: i64) -> Result<TokenResponse, ShopeeApiError>;
}

#[async_trait]
impl Marketplace for ShopeeApi {
    async fn get_order_list(&self, shop: &ShopAuth, query: &OrderListQuery) -> Result<OrderListPage, ShopeeApiError> {
        ShopeeApi::get_order_list(self, shop, query).await
    }

    async fn get_order_detail(&self, shop: &ShopAuth, order_sns: &[String]) -> Result<Vec<OrderDetail>, ShopeeApiError> {
        ShopeeApi::get_order_detail(self, shop, order_sns).await
    }

    async fn get_escrow_detail(&self, shop: &ShopAuth, order_sn: &str) -> Result<EscrowDetail, ShopeeApiError> {
        ShopeeApi::get_escrow_detail(self, shop, order_sn).await
    }

    async fn get_return_list(
        &self,
        shop: &ShopAuth,
        from: i64,
        to: i64,
        page_size: u32,
        cursor: Option<String>,
    ) -> Result<ReturnListPage, ShopeeApiError> {
        ShopeeApi::get_return_list(self, shop, from, to, page_size, cursor.as_deref()).await
    }

    async fn get_return_detail(&self, shop: &ShopAuth, return_sn: &str) -> Result<ReturnDetail, ShopeeApiError> {
        ShopeeApi::get_return_detail(self, shop, return_sn).await
    }

    async fn get_wallet_transaction_list(
        &self,
        shop: &ShopAuth,
        page_no: u32,
        page_size: u32,
    ) -> Result<WalletTransactionPage, ShopeeApiError> {
        ShopeeApi::get_wallet_transaction_list(self, shop, page_no, page_size).await
    }

    async fn ship_order(
        &self,
        shop: &ShopAuth,
        order_sn: &str,
        method: Option<ShipMethod>,
    ) -> Result<(), ShopeeApiError> {
        ShopeeApi::ship_order(self, shop, order_sn, method).await
    }

    async fn refresh_access_token(&self, refresh_token: &str, shop_id: i64) -> Result<TokenResponse, ShopeeApiError> {
        ShopeeApi::refresh_access_token(self, refresh_token, shop_id).await
    }
}
