use std::sync::Arc;

use balance_engine::{
    db::{finance, sync_records},
    db_types::{PrepaymentStatus, SyncRecordStatus, SyncType},
    kv::{shop_sync_lock, KvStore, LeaseLock, FINANCE_QUEUE, SHOP_QUEUE, SHOP_SYNC_LOCK_TTL},
    workers::{finance_sync::FinanceRun, sync_scheduler::SyncRun},
    BalanceEngine,
    SyncError,
};
use futures_util::future::join;
use log::*;
use shopee_tools::{
    data_objects::{
        OrderDetail,
        OrderListEntry,
        OrderListPage,
        ReturnListPage,
        WalletTransaction,
        WalletTransactionPage,
    },
    ShopeeApiError,
};

mod common;

use common::*;

fn listing_marketplace() -> MockShopee {
    let mut mock = quiet_marketplace();
    mock.expect_get_order_list().returning(|_, _| {
        Ok(OrderListPage {
            more: false,
            next_cursor: String::new(),
            order_list: vec![OrderListEntry { order_sn: "S1".into(), order_status: "READY_TO_SHIP".into() }],
        })
    });
    mock.expect_get_order_detail().returning(|_, sns| {
        Ok(sns
            .iter()
            .map(|sn| OrderDetail {
                order_sn: sn.clone(),
                currency: "CNY".into(),
                total_amount: 120.0,
                order_status: "READY_TO_SHIP".into(),
                create_time: 1_000,
                update_time: 1_500,
                ..Default::default()
            })
            .collect())
    });
    mock.expect_get_return_list().returning(|_, _, _, _, _| Ok(ReturnListPage::default()));
    mock
}

#[test]
fn one_node_wins_each_tick() {
    run(async {
        let sys = setup(quiet_marketplace()).await;
        let config = Default::default();
        let peer = BalanceEngine::new(sys.engine.db().clone(), sys.engine.kv(), Arc::new(quiet_marketplace()), config).await;
        let (a, b) = join(sys.engine.sync().schedule_tick(), peer.sync().schedule_tick()).await;
        let (a, b) = (a.unwrap(), b.unwrap());
        info!("🚀️ Tick results: {a:?} {b:?}");
        assert_eq!(a.is_some() as u8 + b.is_some() as u8, 1);
        assert_eq!(a.or(b), Some(1));
        assert_eq!(sys.kv.llen(SHOP_QUEUE).await.unwrap(), 1);

        // The lease outlives the tick, so a late peer in the same period does nothing.
        assert_eq!(peer.sync().schedule_tick().await.unwrap(), None);
        assert_eq!(sys.kv.llen(SHOP_QUEUE).await.unwrap(), 1);

        let (a, b) = join(sys.engine.finance().schedule_tick(), peer.finance().schedule_tick()).await;
        assert_eq!(a.unwrap().is_some() as u8 + b.unwrap().is_some() as u8, 1);
        assert_eq!(sys.kv.llen(FINANCE_QUEUE).await.unwrap(), 1);
        tear_down(sys).await;
    });
}

#[test]
fn held_lease_turns_syncs_away() {
    run(async {
        let sys = setup(quiet_marketplace()).await;
        let lease = LeaseLock::try_acquire(sys.engine.kv(), shop_sync_lock(SHOP_ID), SHOP_SYNC_LOCK_TTL)
            .await
            .unwrap()
            .expect("lease should be free");
        assert!(matches!(sys.engine.sync().sync_shop(SHOP_ID).await, Ok(SyncRun::Busy)));
        assert!(matches!(sys.engine.sync().trigger_shop_sync(SHOP_ID).await, Err(SyncError::AlreadyRunning(SHOP_ID))));
        assert!(lease.release().await.unwrap());
        tear_down(sys).await;
    });
}

#[test]
fn patrol_stores_listed_orders() {
    run(async {
        let sys = setup(listing_marketplace()).await;
        let run = sys.engine.sync().trigger_shop_sync(SHOP_ID).await.unwrap();
        let SyncRun::Completed { orders, returns } = run else { panic!("sync did not complete") };
        // Thirty days of lookback span several listing windows, and each lists S1.
        assert!(orders.windows > 1);
        assert_eq!(orders.listed, orders.windows);
        assert_eq!(orders.upserted, 1);
        assert_eq!(orders.unchanged, orders.listed - 1);
        assert_eq!(returns.map(|r| r.listed), Some(0));

        let order = sys.engine.orders().fetch_order(SHOP_ID, "S1").await.unwrap();
        assert_eq!(order.total_amount, units(120));
        // No prepayment yet: the hook marks it short.
        let short = eventually(|| async {
            sys.engine.orders().fetch_order(SHOP_ID, "S1").await.unwrap().prepayment_status
                == PrepaymentStatus::Insufficient
        })
        .await;
        assert!(short);

        // Nothing changed at the marketplace, so the second patrol writes nothing.
        let SyncRun::Completed { orders, .. } = sys.engine.sync().sync_shop(SHOP_ID).await.unwrap() else {
            panic!("sync did not complete")
        };
        assert_eq!(orders.upserted, 0);
        let record = {
            let mut conn = sys.engine.db().pool().acquire().await.unwrap();
            sync_records::fetch_or_create(SHOP_ID, SyncType::Order, &mut conn).await.unwrap()
        };
        assert_eq!(record.status, SyncRecordStatus::Enabled);
        assert_eq!(record.consecutive_fail_count, 0);
        tear_down(sys).await;
    });
}

#[test]
fn repeated_failures_pause_the_shop() {
    run(async {
        let mut mock = quiet_marketplace();
        mock.expect_get_order_list().returning(|_, _| Err(ShopeeApiError::Transient("error_data".into())));
        let sys = setup(mock).await;
        for _ in 0..sync_records::MAX_CONSECUTIVE_FAILURES {
            assert!(sys.engine.sync().sync_shop(SHOP_ID).await.is_err());
        }
        let record = {
            let mut conn = sys.engine.db().pool().acquire().await.unwrap();
            sync_records::fetch_or_create(SHOP_ID, SyncType::Order, &mut conn).await.unwrap()
        };
        assert_eq!(record.status, SyncRecordStatus::Paused);
        assert_eq!(sys.engine.sync().schedule_tick().await.unwrap(), Some(0));
        tear_down(sys).await;
    });
}

fn wallet_tx(id: i64, kind: &str, amount: f64, create_time: i64) -> WalletTransaction {
    WalletTransaction {
        transaction_id: id,
        transaction_type: kind.to_string(),
        amount,
        create_time,
        order_sn: format!("F{id}"),
        ..Default::default()
    }
}

#[test]
fn finance_sync_stores_each_row_once() {
    run(async {
        let mut mock = quiet_marketplace();
        mock.expect_get_wallet_transaction_list().returning(|_, _, _| {
            Ok(WalletTransactionPage {
                more: false,
                transaction_list: vec![
                    wallet_tx(13, "ESCROW_ADJUSTMENT", -5.0, 3_000),
                    wallet_tx(12, "WITHDRAWAL_CREATED", -100.0, 2_500),
                    wallet_tx(11, "ESCROW_VERIFIED_ADD", 280.0, 2_000),
                ],
            })
        });
        let sys = setup(mock).await;
        let first = sys.engine.finance().sync_shop_finance(SHOP_ID).await.unwrap();
        assert!(matches!(first, FinanceRun::Completed { inserted: 2, skipped: 1, watermark: 3_000 }));
        let second = sys.engine.finance().sync_shop_finance(SHOP_ID).await.unwrap();
        assert!(matches!(second, FinanceRun::Completed { inserted: 0, .. }));

        let mut conn = sys.engine.db().pool().acquire().await.unwrap();
        assert_eq!(finance::count_incomes(SHOP_ID, &mut conn).await.unwrap(), 2);
        let incomes = finance::fetch_incomes(SHOP_ID, &mut conn).await.unwrap();
        assert!(incomes.iter().any(|i| i.transaction_id == 11 && i.amount == units(280)));
        assert!(incomes.iter().all(|i| i.transaction_id != 12));
        drop(conn);
        tear_down(sys).await;
    });
}

#[test]
fn paused_finance_sync_is_inactive() {
    run(async {
        let sys = setup(quiet_marketplace()).await;
        {
            let mut conn = sys.engine.db().pool().acquire().await.unwrap();
            sync_records::fetch_or_create(SHOP_ID, SyncType::FinanceIncome, &mut conn).await.unwrap();
            sync_records::set_status(SHOP_ID, SyncType::FinanceIncome, SyncRecordStatus::Disabled, "", &mut conn)
                .await
                .unwrap();
        }
        assert!(matches!(sys.engine.finance().sync_shop_finance(SHOP_ID).await, Ok(FinanceRun::Inactive)));
        tear_down(sys).await;
    });
}
