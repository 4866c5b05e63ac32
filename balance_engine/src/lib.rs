//! Balance Engine
//!
//! The balance engine keeps the money of a multi-tenant marketplace operation straight. Shop owners prepay for the
//! cost of their orders; operators fulfil and ship them; the marketplace eventually pays out escrow. The engine tracks
//! every order through that life cycle and moves money between seven kinds of accounts as it goes.
//!
//! The library is divided into these sections:
//! 1. Persistence ([`mod@db`]). SQLite, with the high-volume tables spread over shards ([`shard`]). Callers never
//!    need the database functions directly; the row types in [`db_types`] are public.
//! 2. The ledger ([`ledger`]), the only code that changes a balance.
//! 3. The public API ([`mod@balance_api`]): one facade per component, each cheap to clone.
//! 4. Distributed coordination ([`kv`]): leases, queues and caches on Redis or in memory.
//! 5. Background work ([`workers`]): the order and finance syncs and the maintenance scheduler.
//!
//! Components talk to each other through the [`events`] hooks. [`BalanceEngine`] builds and wires all of them.
pub mod balance_api;
pub mod db;
pub mod db_types;
mod engine;
pub mod events;
pub mod kv;
pub mod ledger;
pub mod shard;
mod shopee_types;
pub mod traits;
pub mod workers;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

pub use balance_api::{
    errors::{
        AuthError,
        LedgerError,
        MaintenanceError,
        OrderEngineError,
        PrepaymentError,
        ReturnEngineError,
        SettlementError,
        ShipmentError,
        SyncError,
        WebhookError,
    },
    ledger_api::LedgerApi,
    order_api::OrderApi,
    prepayment_api::PrepaymentApi,
    return_api::ReturnApi,
    settlement_api::SettlementApi,
    shipment_api::ShipmentApi,
    shop_api::ShopApi,
    webhook_api::{WebhookApi, WebhookEvent, WebhookOutcome},
};
pub use db::SqliteDatabase;
pub use engine::{BalanceEngine, EngineConfig};
