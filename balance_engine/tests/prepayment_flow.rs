use balance_common::Money;
use balance_engine::{
    balance_api::{prepayment_api::PrepaymentOutcome, return_api::ReturnOutcome},
    db::notifications,
    db_types::{AccountType, PrepaymentStatus, RefundStatus, TransactionType},
    BalanceEngine,
};
use futures_util::future::join_all;
use log::*;

mod common;

use common::*;

async fn freezes_for(engine: &BalanceEngine, order_sn: &str) -> usize {
    engine
        .ledger()
        .transactions_for_order(OWNER_ID, order_sn)
        .await
        .expect("Error fetching transactions")
        .iter()
        .filter(|t| t.transaction_type == TransactionType::Freeze)
        .count()
}

async fn prepayment_status(engine: &BalanceEngine, order_sn: &str) -> PrepaymentStatus {
    engine.orders().fetch_order(SHOP_ID, order_sn).await.expect("Error fetching order").prepayment_status
}

async fn wait_for_status(engine: &BalanceEngine, order_sn: &str, status: PrepaymentStatus) -> bool {
    eventually(|| async { prepayment_status(engine, order_sn).await == status }).await
}

/// Recharge 1000 and let O1 (300) become READY_TO_SHIP.
async fn first_order(sys: &TestSystem) {
    sys.engine.ledger().recharge(OWNER_ID, units(1000), "top up", None).await.expect("Error recharging");
    sys.engine.orders().upsert_from_sync(&order("O1", units(300), "READY_TO_SHIP", 1_000)).await.unwrap();
    assert!(wait_for_status(&sys.engine, "O1", PrepaymentStatus::Sufficient).await);
}

#[test]
fn ready_to_ship_freezes_prepayment() {
    run(async {
        let sys = setup(quiet_marketplace()).await;
        first_order(&sys).await;
        assert_eq!(prepayment(&sys.engine, OWNER_ID).await, (units(700), units(300)));
        assert_eq!(freezes_for(&sys.engine, "O1").await, 1);
        let order = sys.engine.orders().fetch_order(SHOP_ID, "O1").await.unwrap();
        assert_eq!(order.frozen_amount, units(300));
        tear_down(sys).await;
    });
}

#[test]
fn short_balance_marks_insufficient_and_backfill_recovers() {
    run(async {
        let sys = setup(quiet_marketplace()).await;
        first_order(&sys).await;
        sys.engine.orders().upsert_from_sync(&order("O2", units(800), "READY_TO_SHIP", 1_100)).await.unwrap();
        assert!(wait_for_status(&sys.engine, "O2", PrepaymentStatus::Insufficient).await);
        assert_eq!(prepayment(&sys.engine, OWNER_ID).await, (units(700), units(300)));
        assert_eq!(freezes_for(&sys.engine, "O2").await, 0);
        let notes = {
            let mut conn = sys.engine.db().pool().acquire().await.unwrap();
            notifications::fetch_for_admin(OWNER_ID, &mut conn).await.unwrap()
        };
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].shop_id, SHOP_ID);

        sys.engine.ledger().recharge(OWNER_ID, units(500), "top up", None).await.unwrap();
        assert!(wait_for_status(&sys.engine, "O2", PrepaymentStatus::Sufficient).await);
        assert_eq!(prepayment(&sys.engine, OWNER_ID).await, (units(400), units(1100)));
        assert_eq!(freezes_for(&sys.engine, "O2").await, 1);
        tear_down(sys).await;
    });
}

#[test]
fn refund_paid_return_unfreezes() {
    run(async {
        let sys = setup(quiet_marketplace()).await;
        first_order(&sys).await;
        let ret = refund_return("R1", "O1", units(300), "REQUESTED", 2_000);
        let outcome = sys.engine.returns().upsert_return(&ret).await.unwrap();
        assert!(matches!(outcome, ReturnOutcome::Stored { refund: None, .. }));
        assert_eq!(prepayment(&sys.engine, OWNER_ID).await, (units(700), units(300)));

        let ret = refund_return("R1", "O1", units(300), "REFUND_PAID", 2_100);
        let outcome = sys.engine.returns().upsert_return(&ret).await.unwrap();
        let ReturnOutcome::Stored { record, refund } = outcome else { panic!("return was not stored") };
        assert!(refund.is_some());
        assert_eq!(record.refund_status, RefundStatus::Processed);
        assert_eq!(prepayment(&sys.engine, OWNER_ID).await, (units(1000), Money::ZERO));
        assert_eq!(prepayment_status(&sys.engine, "O1").await, PrepaymentStatus::Unchecked);

        // The marketplace repeats itself. Nothing moves twice.
        let outcome = sys.engine.returns().upsert_return(&ret).await.unwrap();
        assert!(matches!(outcome, ReturnOutcome::Stored { refund: None, .. }));
        assert_eq!(prepayment(&sys.engine, OWNER_ID).await, (units(1000), Money::ZERO));
        tear_down(sys).await;
    });
}

#[test]
fn concurrent_checks_freeze_once() {
    run(async {
        let sys = setup(quiet_marketplace()).await;
        sys.engine.ledger().recharge(OWNER_ID, units(1000), "top up", None).await.unwrap();
        // Not READY_TO_SHIP yet, so the hook stays out of it.
        sys.engine.orders().upsert_from_sync(&order("O9", units(250), "UNPAID", 1_000)).await.unwrap();
        let checks = (0..8).map(|_| {
            let prepayment = sys.engine.prepayment().clone();
            tokio::spawn(async move { prepayment.check_and_deduct_for_order(SHOP_ID, "O9", units(250)).await })
        });
        let outcomes = join_all(checks).await.into_iter().map(|r| r.unwrap().unwrap()).collect::<Vec<_>>();
        let frozen = outcomes.iter().filter(|o| matches!(o, PrepaymentOutcome::Frozen { .. })).count();
        info!("🚀️ Outcomes: {outcomes:?}");
        assert_eq!(frozen, 1);
        assert_eq!(freezes_for(&sys.engine, "O9").await, 1);
        assert_eq!(prepayment(&sys.engine, OWNER_ID).await, (units(750), units(250)));
        tear_down(sys).await;
    });
}

#[test]
fn concurrent_refunds_unfreeze_once() {
    run(async {
        let sys = setup(quiet_marketplace()).await;
        first_order(&sys).await;
        let ret = refund_return("R7", "O1", units(300), "REFUND_PAID", 3_000);
        let calls = (0..6).map(|_| {
            let returns = sys.engine.returns().clone();
            let ret = ret.clone();
            tokio::spawn(async move { returns.upsert_return(&ret).await })
        });
        let refunds = join_all(calls)
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(Ok(ReturnOutcome::Stored { refund: Some(_), .. }))))
            .count();
        assert_eq!(refunds, 1);
        let unfreezes = sys
            .engine
            .ledger()
            .transactions_for_order(OWNER_ID, "O1")
            .await
            .unwrap()
            .iter()
            .filter(|t| t.transaction_type == TransactionType::Unfreeze)
            .count();
        assert_eq!(unfreezes, 1);
        assert_eq!(prepayment(&sys.engine, OWNER_ID).await, (units(1000), Money::ZERO));
        tear_down(sys).await;
    });
}

#[test]
fn ledger_rows_explain_the_balance() {
    run(async {
        let sys = setup(quiet_marketplace()).await;
        sys.engine.ledger().recharge(OWNER_ID, units(900), "top up", None).await.unwrap();
        for (i, total) in [120, 340, 90, 700].into_iter().enumerate() {
            let sn = format!("L{i}");
            sys.engine.orders().upsert_from_sync(&order(&sn, units(total), "READY_TO_SHIP", 1_000 + i as i64)).await.unwrap();
        }
        let settled = eventually(|| async {
            let mut done = 0;
            for i in 0..4 {
                if prepayment_status(&sys.engine, &format!("L{i}")).await != PrepaymentStatus::Unchecked {
                    done += 1;
                }
            }
            done == 4
        })
        .await;
        assert!(settled);
        let ret = refund_return("R2", "L1", units(340), "REFUND_PAID", 5_000);
        sys.engine.returns().upsert_return(&ret).await.unwrap();

        let rows = sys.engine.ledger().list_transactions(OWNER_ID, AccountType::Prepayment, 1, 500).await.unwrap();
        let sum: Money = rows.iter().map(|r| r.amount).sum();
        let frozen_delta: Money = rows.iter().map(|r| r.frozen_after - r.frozen_before).sum();
        let (balance, frozen) = prepayment(&sys.engine, OWNER_ID).await;
        assert_eq!(sum, balance);
        assert_eq!(frozen_delta, frozen);
        assert!(!frozen.is_negative());
        assert!(rows.iter().all(|r| !r.frozen_after.is_negative()));
        tear_down(sys).await;
    });
}
