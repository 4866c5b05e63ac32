//! Sharding router.
//!
//! Order, finance, return and audit data is spread over [`SHARD_COUNT`] physical copies of each table. A shop's rows
//! always live in shard `shop_id mod SHARD_COUNT`; ledger rows are sharded by admin id instead. The router is a pure
//! function: changing the shard count means migrating data, which this crate does not do.

use std::fmt::Display;

pub const SHARD_COUNT: i64 = 10;

/// Entities stored in sharded tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShardedTable {
    Orders,
    OrderItems,
    OrderAddresses,
    OrderEscrows,
    OrderEscrowItems,
    OrderSettlements,
    OrderShipmentRecords,
    Shipments,
    FinanceIncomes,
    Returns,
    OperationLogs,
    OperationLogsArchive,
    AccountTransactions,
}

impl ShardedTable {
    pub const ALL: [ShardedTable; 13] = [
        Self::Orders,
        Self::OrderItems,
        Self::OrderAddresses,
        Self::OrderEscrows,
        Self::OrderEscrowItems,
        Self::OrderSettlements,
        Self::OrderShipmentRecords,
        Self::Shipments,
        Self::FinanceIncomes,
        Self::Returns,
        Self::OperationLogs,
        Self::OperationLogsArchive,
        Self::AccountTransactions,
    ];

    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Orders => "orders",
            Self::OrderItems => "order_items",
            Self::OrderAddresses => "order_addresses",
            Self::OrderEscrows => "order_escrows",
            Self::OrderEscrowItems => "order_escrow_items",
            Self::OrderSettlements => "order_settlements",
            Self::OrderShipmentRecords => "order_shipment_records",
            Self::Shipments => "shipments",
            Self::FinanceIncomes => "finance_incomes",
            Self::Returns => "returns",
            Self::OperationLogs => "operation_logs",
            Self::OperationLogsArchive => "operation_logs_archive",
            Self::AccountTransactions => "account_transactions",
        }
    }

    /// The physical table for shard index `shard`, e.g. `orders_3`.
    pub fn table(&self, shard: i64) -> String {
        format!("{}_{shard}", self.prefix())
    }

    /// The physical table holding rows for `key` (a shop id, or an admin id for ledger rows).
    pub fn for_key(&self, key: i64) -> String {
        self.table(shard(key))
    }
}

impl Display for ShardedTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.prefix())
    }
}

/// `shop_id mod SHARD_COUNT`, always in `0..SHARD_COUNT` even for negative ids.
pub fn shard(key: i64) -> i64 {
    key.rem_euclid(SHARD_COUNT)
}

/// All shard indices, for sweeps and statistics that must visit every shard.
pub fn all_shards() -> impl Iterator<Item = i64> {
    0..SHARD_COUNT
}

pub fn orders_table(shop_id: i64) -> String {
    ShardedTable::Orders.for_key(shop_id)
}

pub fn ledger_table(admin_id: i64) -> String {
    ShardedTable::AccountTransactions.for_key(admin_id)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn shard_is_shop_id_mod_ten() {
        for shop_id in [0i64, 1, 9, 10, 11, 123_456_789, 987_654_321_012] {
            assert_eq!(shard(shop_id), shop_id % 10);
            assert_eq!(orders_table(shop_id), format!("orders_{}", shop_id % 10));
            assert_eq!(orders_table(shop_id), orders_table(shop_id));
        }
        assert_eq!(shard(-3), 7);
    }

    #[test]
    fn table_names() {
        assert_eq!(ShardedTable::OperationLogsArchive.table(4), "operation_logs_archive_4");
        assert_eq!(ledger_table(25), "account_transactions_5");
        assert_eq!(all_shards().count(), 10);
        assert_eq!(ShardedTable::ALL.len(), 13);
    }
}
