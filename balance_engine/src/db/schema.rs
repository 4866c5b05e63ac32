//! DDL for the sharded tables. Each template is instantiated once per shard with `{t}` replaced by the physical
//! table name.
use log::*;
use sqlx::{Executor, SqliteConnection};

use crate::shard::{all_shards, ShardedTable};

const ORDERS: &str = r#"
CREATE TABLE IF NOT EXISTS {t} (
    id                          INTEGER PRIMARY KEY AUTOINCREMENT,
    shop_id                     INTEGER   NOT NULL,
    order_sn                    TEXT      NOT NULL,
    region                      TEXT      NOT NULL DEFAULT '',
    currency                    TEXT      NOT NULL DEFAULT '',
    cod                         BOOLEAN   NOT NULL DEFAULT FALSE,
    total_amount                INTEGER   NOT NULL DEFAULT 0,
    order_status                TEXT      NOT NULL,
    status_locked               BOOLEAN   NOT NULL DEFAULT FALSE,
    status_remark               TEXT      NOT NULL DEFAULT '',
    shipping_carrier            TEXT      NOT NULL DEFAULT '',
    payment_method              TEXT      NOT NULL DEFAULT '',
    tracking_number             TEXT      NOT NULL DEFAULT '',
    buyer_user_id               INTEGER   NOT NULL DEFAULT 0,
    buyer_username              TEXT      NOT NULL DEFAULT '',
    create_time                 INTEGER   NOT NULL DEFAULT 0,
    update_time                 INTEGER   NOT NULL DEFAULT 0,
    pay_time                    INTEGER   NOT NULL DEFAULT 0,
    ship_by_date                INTEGER   NOT NULL DEFAULT 0,
    prepayment_amount           INTEGER   NOT NULL DEFAULT 0,
    prepayment_status           INTEGER   NOT NULL DEFAULT 0,
    prepayment_snapshot         INTEGER   NOT NULL DEFAULT 0,
    prepayment_checked_at       TIMESTAMP,
    frozen_amount               INTEGER   NOT NULL DEFAULT 0 CHECK (frozen_amount >= 0),
    escrow_amount               INTEGER   NOT NULL DEFAULT 0,
    commission_fee              INTEGER   NOT NULL DEFAULT 0,
    service_fee                 INTEGER   NOT NULL DEFAULT 0,
    seller_transaction_fee      INTEGER   NOT NULL DEFAULT 0,
    buyer_paid_shipping_fee     INTEGER   NOT NULL DEFAULT 0,
    actual_shipping_fee         INTEGER   NOT NULL DEFAULT 0,
    credit_card_transaction_fee INTEGER   NOT NULL DEFAULT 0,
    fee_synced_at               TIMESTAMP,
    created_at                  TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at                  TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    UNIQUE (shop_id, order_sn)
);
CREATE INDEX IF NOT EXISTS idx_{t}_prepayment ON {t} (shop_id, prepayment_status, order_status, create_time);
CREATE INDEX IF NOT EXISTS idx_{t}_create_time ON {t} (create_time);
"#;

const ORDER_ITEMS: &str = r#"
CREATE TABLE IF NOT EXISTS {t} (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    shop_id             INTEGER NOT NULL,
    order_sn            TEXT    NOT NULL,
    item_id             INTEGER NOT NULL DEFAULT 0,
    item_name           TEXT    NOT NULL DEFAULT '',
    item_sku            TEXT    NOT NULL DEFAULT '',
    model_id            INTEGER NOT NULL DEFAULT 0,
    model_name          TEXT    NOT NULL DEFAULT '',
    model_sku           TEXT    NOT NULL DEFAULT '',
    quantity            INTEGER NOT NULL DEFAULT 0,
    item_price          INTEGER NOT NULL DEFAULT 0,
    prepayment_share    INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_{t}_order ON {t} (shop_id, order_sn);
"#;

const ORDER_ADDRESSES: &str = r#"
CREATE TABLE IF NOT EXISTS {t} (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    shop_id      INTEGER NOT NULL,
    order_sn     TEXT    NOT NULL,
    name         TEXT    NOT NULL DEFAULT '',
    phone        TEXT    NOT NULL DEFAULT '',
    town         TEXT    NOT NULL DEFAULT '',
    district     TEXT    NOT NULL DEFAULT '',
    city         TEXT    NOT NULL DEFAULT '',
    state        TEXT    NOT NULL DEFAULT '',
    region       TEXT    NOT NULL DEFAULT '',
    zipcode      TEXT    NOT NULL DEFAULT '',
    full_address TEXT    NOT NULL DEFAULT '',
    UNIQUE (shop_id, order_sn)
);
"#;

const ORDER_ESCROWS: &str = r#"
CREATE TABLE IF NOT EXISTS {t} (
    id                          INTEGER PRIMARY KEY AUTOINCREMENT,
    shop_id                     INTEGER   NOT NULL,
    order_sn                    TEXT      NOT NULL,
    escrow_amount               INTEGER   NOT NULL DEFAULT 0,
    buyer_total_amount          INTEGER   NOT NULL DEFAULT 0,
    original_price              INTEGER   NOT NULL DEFAULT 0,
    commission_fee              INTEGER   NOT NULL DEFAULT 0,
    service_fee                 INTEGER   NOT NULL DEFAULT 0,
    seller_transaction_fee      INTEGER   NOT NULL DEFAULT 0,
    final_shipping_fee          INTEGER   NOT NULL DEFAULT 0,
    actual_shipping_fee         INTEGER   NOT NULL DEFAULT 0,
    original_cost_of_goods_sold INTEGER   NOT NULL DEFAULT 0,
    sync_status                 INTEGER   NOT NULL DEFAULT 0,
    sync_error                  TEXT      NOT NULL DEFAULT '',
    updated_at                  TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    UNIQUE (shop_id, order_sn)
);
"#;

const ORDER_ESCROW_ITEMS: &str = r#"
CREATE TABLE IF NOT EXISTS {t} (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    shop_id             INTEGER NOT NULL,
    order_sn            TEXT    NOT NULL,
    item_id             INTEGER NOT NULL DEFAULT 0,
    item_name           TEXT    NOT NULL DEFAULT '',
    model_id            INTEGER NOT NULL DEFAULT 0,
    quantity            INTEGER NOT NULL DEFAULT 0,
    original_price      INTEGER NOT NULL DEFAULT 0,
    discounted_price    INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_{t}_order ON {t} (shop_id, order_sn);
"#;

const ORDER_SETTLEMENTS: &str = r#"
CREATE TABLE IF NOT EXISTS {t} (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    shop_id             INTEGER   NOT NULL,
    order_sn            TEXT      NOT NULL,
    operator_id         INTEGER   NOT NULL,
    shop_owner_id       INTEGER   NOT NULL,
    escrow_amount       INTEGER   NOT NULL,
    total_cost          INTEGER   NOT NULL,
    profit              INTEGER   NOT NULL,
    platform_rate       INTEGER   NOT NULL,
    operator_rate       INTEGER   NOT NULL,
    shop_owner_rate     INTEGER   NOT NULL,
    platform_share      INTEGER   NOT NULL,
    operator_share      INTEGER   NOT NULL,
    shop_owner_share    INTEGER   NOT NULL,
    operator_income     INTEGER   NOT NULL,
    adjustment_count    INTEGER   NOT NULL DEFAULT 0,
    adjustment_total    INTEGER   NOT NULL DEFAULT 0,
    status              INTEGER   NOT NULL DEFAULT 0,
    settled_at          TIMESTAMP,
    created_at          TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    UNIQUE (shop_id, order_sn)
);
"#;

const ORDER_SHIPMENT_RECORDS: &str = r#"
CREATE TABLE IF NOT EXISTS {t} (
    id                      INTEGER PRIMARY KEY AUTOINCREMENT,
    shop_id                 INTEGER   NOT NULL,
    order_sn                TEXT      NOT NULL,
    operator_id             INTEGER   NOT NULL,
    shop_owner_id           INTEGER   NOT NULL,
    goods_cost              INTEGER   NOT NULL DEFAULT 0,
    shipping_cost           INTEGER   NOT NULL DEFAULT 0,
    total_cost              INTEGER   NOT NULL DEFAULT 0,
    frozen_amount           INTEGER   NOT NULL DEFAULT 0,
    freeze_transaction_no   TEXT      NOT NULL DEFAULT '',
    ship_method             TEXT      NOT NULL DEFAULT '',
    status                  INTEGER   NOT NULL DEFAULT 0,
    settlement_id           INTEGER,
    failure_reason          TEXT      NOT NULL DEFAULT '',
    created_at              TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at              TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    UNIQUE (shop_id, order_sn)
);
CREATE INDEX IF NOT EXISTS idx_{t}_status ON {t} (status);
"#;

const SHIPMENTS: &str = r#"
CREATE TABLE IF NOT EXISTS {t} (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    shop_id          INTEGER   NOT NULL,
    order_sn         TEXT      NOT NULL,
    package_number   TEXT      NOT NULL DEFAULT '',
    tracking_number  TEXT      NOT NULL DEFAULT '',
    shipping_carrier TEXT      NOT NULL DEFAULT '',
    logistics_status TEXT      NOT NULL DEFAULT '',
    updated_at       TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    UNIQUE (shop_id, order_sn, package_number)
);
"#;

const FINANCE_INCOMES: &str = r#"
CREATE TABLE IF NOT EXISTS {t} (
    id                          INTEGER PRIMARY KEY AUTOINCREMENT,
    shop_id                     INTEGER   NOT NULL,
    transaction_id              INTEGER   NOT NULL UNIQUE,
    order_sn                    TEXT      NOT NULL DEFAULT '',
    refund_sn                   TEXT      NOT NULL DEFAULT '',
    transaction_type            TEXT      NOT NULL DEFAULT '',
    status                      TEXT      NOT NULL DEFAULT '',
    wallet_type                 TEXT      NOT NULL DEFAULT '',
    amount                      INTEGER   NOT NULL DEFAULT 0,
    current_balance             INTEGER   NOT NULL DEFAULT 0,
    transaction_fee             INTEGER   NOT NULL DEFAULT 0,
    description                 TEXT      NOT NULL DEFAULT '',
    buyer_name                  TEXT      NOT NULL DEFAULT '',
    reason                      TEXT      NOT NULL DEFAULT '',
    money_flow                  TEXT      NOT NULL DEFAULT '',
    create_time                 INTEGER   NOT NULL DEFAULT 0,
    settlement_handle_status    INTEGER   NOT NULL DEFAULT 0,
    settlement_handled_at       TIMESTAMP,
    created_at                  TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_{t}_order ON {t} (shop_id, order_sn, transaction_type, settlement_handle_status);
CREATE INDEX IF NOT EXISTS idx_{t}_create_time ON {t} (shop_id, create_time);
"#;

const RETURNS: &str = r#"
CREATE TABLE IF NOT EXISTS {t} (
    id                      INTEGER PRIMARY KEY AUTOINCREMENT,
    shop_id                 INTEGER   NOT NULL,
    return_sn               TEXT      NOT NULL,
    order_sn                TEXT      NOT NULL,
    refund_amount           INTEGER   NOT NULL DEFAULT 0,
    amount_before_discount  INTEGER   NOT NULL DEFAULT 0,
    currency                TEXT      NOT NULL DEFAULT '',
    status                  TEXT      NOT NULL DEFAULT '',
    reason                  TEXT      NOT NULL DEFAULT '',
    text_reason             TEXT      NOT NULL DEFAULT '',
    buyer_username          TEXT      NOT NULL DEFAULT '',
    tracking_number         TEXT      NOT NULL DEFAULT '',
    needs_logistics         BOOLEAN   NOT NULL DEFAULT FALSE,
    logistics_status        TEXT      NOT NULL DEFAULT '',
    due_date                INTEGER   NOT NULL DEFAULT 0,
    create_time             INTEGER   NOT NULL DEFAULT 0,
    update_time             INTEGER   NOT NULL DEFAULT 0,
    refund_status           INTEGER   NOT NULL DEFAULT 0,
    refund_error            TEXT      NOT NULL DEFAULT '',
    unfrozen_amount         INTEGER   NOT NULL DEFAULT 0,
    processed_at            TIMESTAMP,
    created_at              TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at              TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    UNIQUE (shop_id, return_sn)
);
CREATE INDEX IF NOT EXISTS idx_{t}_order ON {t} (shop_id, order_sn);
"#;

const OPERATION_LOGS: &str = r#"
CREATE TABLE IF NOT EXISTS {t} (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    shop_id     INTEGER   NOT NULL,
    order_sn    TEXT      NOT NULL DEFAULT '',
    operator_id INTEGER   NOT NULL DEFAULT 0,
    action      TEXT      NOT NULL,
    detail      TEXT      NOT NULL DEFAULT '',
    created_at  TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_{t}_created ON {t} (created_at);
CREATE INDEX IF NOT EXISTS idx_{t}_order ON {t} (shop_id, order_sn);
"#;

const ACCOUNT_TRANSACTIONS: &str = r#"
CREATE TABLE IF NOT EXISTS {t} (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    transaction_no      TEXT      NOT NULL UNIQUE,
    admin_id            INTEGER   NOT NULL,
    account_type        TEXT      NOT NULL,
    transaction_type    TEXT      NOT NULL,
    amount              INTEGER   NOT NULL,
    balance_before      INTEGER   NOT NULL,
    balance_after       INTEGER   NOT NULL,
    frozen_before       INTEGER   NOT NULL,
    frozen_after        INTEGER   NOT NULL,
    related_order_sn    TEXT,
    remark              TEXT      NOT NULL DEFAULT '',
    operator_id         INTEGER,
    created_at          TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_{t}_account ON {t} (admin_id, account_type, id);
CREATE INDEX IF NOT EXISTS idx_{t}_order ON {t} (related_order_sn);
"#;

fn template(table: ShardedTable) -> &'static str {
    match table {
        ShardedTable::Orders => ORDERS,
        ShardedTable::OrderItems => ORDER_ITEMS,
        ShardedTable::OrderAddresses => ORDER_ADDRESSES,
        ShardedTable::OrderEscrows => ORDER_ESCROWS,
        ShardedTable::OrderEscrowItems => ORDER_ESCROW_ITEMS,
        ShardedTable::OrderSettlements => ORDER_SETTLEMENTS,
        ShardedTable::OrderShipmentRecords => ORDER_SHIPMENT_RECORDS,
        ShardedTable::Shipments => SHIPMENTS,
        ShardedTable::FinanceIncomes => FINANCE_INCOMES,
        ShardedTable::Returns => RETURNS,
        // The archive shares the live layout so rows can be copied with INSERT .. SELECT *
        ShardedTable::OperationLogs | ShardedTable::OperationLogsArchive => OPERATION_LOGS,
        ShardedTable::AccountTransactions => ACCOUNT_TRANSACTIONS,
    }
}

/// The DDL for one physical table.
pub fn ddl(table: ShardedTable, shard: i64) -> String {
    template(table).replace("{t}", &table.table(shard))
}

/// Creates every shard of every sharded table. Safe to call on every start-up.
pub async fn create_sharded_tables(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    for table in ShardedTable::ALL {
        for shard in all_shards() {
            let sql = ddl(table, shard);
            conn.execute(sql.as_str()).await?;
        }
    }
    info!("🗃️ Sharded tables are in place");
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ddl_is_instantiated_per_shard() {
        let sql = ddl(ShardedTable::Orders, 7);
        assert!(sql.contains("CREATE TABLE IF NOT EXISTS orders_7 ("));
        assert!(sql.contains("idx_orders_7_prepayment ON orders_7"));
        assert!(!sql.contains("{t}"));
        let archive = ddl(ShardedTable::OperationLogsArchive, 0);
        assert!(archive.contains("operation_logs_archive_0"));
    }
}
