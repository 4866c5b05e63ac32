use balance_common::{Money, Rate};
use balance_engine::{
    balance_api::shipment_api::ShipRequest,
    db::{finance, operation_logs},
    db_types::{
        AccountType,
        NewFinanceIncome,
        PrepaymentStatus,
        ProfitShareRates,
        ProfitSplit,
        SettlementHandleStatus,
        SettlementStatus,
        ShipmentStatus,
        ESCROW_ADJUSTMENT,
        ESCROW_VERIFIED_ADD,
    },
    workers::adjustment::PolicyKind,
    BalanceEngine,
    EngineConfig,
    SettlementError,
    ShipmentError,
};
use shopee_tools::ShopeeApiError;

mod common;

use common::*;

async fn shipped_order(engine: &BalanceEngine, order_sn: &str, total: Money) {
    engine.ledger().recharge(OWNER_ID, units(1000), "top up", None).await.unwrap();
    engine.orders().upsert_from_sync(&order(order_sn, total, "READY_TO_SHIP", 1_000)).await.unwrap();
    let ready = eventually(|| async {
        engine.orders().fetch_order(SHOP_ID, order_sn).await.unwrap().prepayment_status == PrepaymentStatus::Sufficient
    })
    .await;
    assert!(ready);
    let req = ShipRequest {
        shop_id: SHOP_ID,
        order_sn: order_sn.to_string(),
        operator_id: OPERATOR_ID,
        goods_cost: units(150),
        shipping_cost: units(50),
        method: None,
    };
    let record = engine.shipments().ship_order(&req).await.expect("Error shipping");
    assert_eq!(record.status, ShipmentStatus::Shipped);
    assert_eq!(record.total_cost, units(200));
}

async fn wallet_row(engine: &BalanceEngine, id: i64, order_sn: &str, kind: &str, amount: Money) {
    let income = NewFinanceIncome {
        shop_id: SHOP_ID,
        transaction_id: id,
        order_sn: order_sn.to_string(),
        transaction_type: kind.to_string(),
        amount,
        create_time: 10_000 + id,
        ..Default::default()
    };
    let mut conn = engine.db().pool().acquire().await.unwrap();
    assert!(finance::insert_if_absent(&income, &mut conn).await.unwrap());
}

async fn balance(engine: &BalanceEngine, admin_id: i64, account_type: AccountType) -> Money {
    engine.ledger().account(admin_id, account_type).await.unwrap().map(|a| a.balance).unwrap_or(Money::ZERO)
}

#[test]
fn escrow_payout_settles_shipped_order() {
    run(async {
        let sys = setup(quiet_marketplace()).await;
        shipped_order(&sys.engine, "O1", units(300)).await;
        assert_eq!(balance(&sys.engine, OWNER_ID, AccountType::Escrow).await, units(300));

        wallet_row(&sys.engine, 1, "O1", ESCROW_VERIFIED_ADD, units(280)).await;
        let report = sys.engine.maintenance().settlement_sweep().await.unwrap();
        assert_eq!(report.handled, 1);

        let s = sys.engine.settlements().fetch_settlement(SHOP_ID, "O1").await.unwrap().expect("no settlement");
        assert_eq!(s.status, SettlementStatus::Completed);
        assert_eq!(s.profit, units(80));
        assert_eq!(s.platform_share, units(4));
        assert_eq!(s.operator_share, units(36));
        assert_eq!(s.shop_owner_share, units(40));
        assert_eq!(s.operator_income, units(236));

        assert_eq!(balance(&sys.engine, OPERATOR_ID, AccountType::Operator).await, units(236));
        assert_eq!(balance(&sys.engine, OWNER_ID, AccountType::ShopOwnerCommission).await, units(40));
        assert_eq!(balance(&sys.engine, 0, AccountType::PlatformCommission).await, units(4));
        assert_eq!(balance(&sys.engine, OWNER_ID, AccountType::Escrow).await, Money::ZERO);
        assert_eq!(prepayment(&sys.engine, OWNER_ID).await, (units(700), Money::ZERO));

        let owner_rows = sys.engine.ledger().transactions_for_order(OWNER_ID, "O1").await.unwrap();
        let operator_rows = sys.engine.ledger().transactions_for_order(OPERATOR_ID, "O1").await.unwrap();
        let platform_rows = sys.engine.ledger().transactions_for_order(0, "O1").await.unwrap();
        // Freeze and escrow-in happened before settlement.
        assert_eq!(owner_rows.len() - 2 + operator_rows.len() + platform_rows.len(), 5);

        let incomes = {
            let mut conn = sys.engine.db().pool().acquire().await.unwrap();
            finance::fetch_incomes(SHOP_ID, &mut conn).await.unwrap()
        };
        assert_eq!(incomes[0].settlement_handle_status, SettlementHandleStatus::Completed);
        let record = sys.engine.shipments().fetch_record(SHOP_ID, "O1").await.unwrap().unwrap();
        assert_eq!(record.status, ShipmentStatus::Completed);
        assert_eq!(record.settlement_id, Some(s.id));

        // A second sweep finds nothing to do, and settling again is refused.
        assert_eq!(sys.engine.maintenance().settlement_sweep().await.unwrap().examined, 0);
        let again = sys.engine.settlements().settle_order(SHOP_ID, "O1", units(280)).await;
        assert!(matches!(again, Err(SettlementError::NotReady(_)) | Err(SettlementError::AlreadySettled(_))));
        tear_down(sys).await;
    });
}

#[test]
fn sweep_waits_for_the_payout() {
    run(async {
        let sys = setup(quiet_marketplace()).await;
        shipped_order(&sys.engine, "O3", units(300)).await;
        let report = sys.engine.maintenance().settlement_sweep().await.unwrap();
        assert_eq!(report.examined, 0);
        assert!(sys.engine.settlements().fetch_settlement(SHOP_ID, "O3").await.unwrap().is_none());
        tear_down(sys).await;
    });
}

#[test]
fn custom_rates_apply() {
    run(async {
        let sys = setup(quiet_marketplace()).await;
        let bad = ProfitShareRates::new(Rate::from_bps(1000), Rate::from_bps(1000), Rate::from_bps(1000));
        let err = sys.engine.settlements().create_profit_share_config(SHOP_ID, OPERATOR_ID, bad).await;
        assert!(matches!(err, Err(SettlementError::InvalidProfitShare)));
        let rates = ProfitShareRates::new(Rate::from_bps(1000), Rate::from_bps(6000), Rate::from_bps(3000));
        sys.engine.settlements().create_profit_share_config(SHOP_ID, OPERATOR_ID, rates).await.unwrap();
        assert_eq!(sys.engine.settlements().active_rates(SHOP_ID, OPERATOR_ID).await.unwrap(), rates);

        shipped_order(&sys.engine, "O4", units(300)).await;
        let s = sys.engine.settlements().settle_order(SHOP_ID, "O4", units(300)).await.unwrap();
        assert_eq!(s.profit, units(100));
        assert_eq!((s.platform_share, s.operator_share, s.shop_owner_share), (units(10), units(60), units(30)));
        tear_down(sys).await;
    });
}

#[test]
fn failed_ship_call_is_reverted() {
    run(async {
        let mut mock = MockShopee::new();
        mock.expect_get_escrow_detail().returning(|_, _| Err(ShopeeApiError::Transient("later".into())));
        mock.expect_ship_order().times(1).returning(|_, sn, _| Err(ShopeeApiError::NoShippingMethod(sn.to_string())));
        let sys = setup(mock).await;
        let err = sys
            .engine
            .shipments()
            .ship_order(&ShipRequest {
                shop_id: SHOP_ID,
                order_sn: "O5".into(),
                operator_id: OPERATOR_ID,
                goods_cost: units(10),
                shipping_cost: units(5),
                method: None,
            })
            .await;
        assert!(matches!(err, Err(ShipmentError::OrderNotFound(_))));

        sys.engine.ledger().recharge(OWNER_ID, units(100), "top up", None).await.unwrap();
        sys.engine.orders().upsert_from_sync(&order("O5", units(60), "READY_TO_SHIP", 1_000)).await.unwrap();
        let ready = eventually(|| async {
            sys.engine.orders().fetch_order(SHOP_ID, "O5").await.unwrap().prepayment_status == PrepaymentStatus::Sufficient
        })
        .await;
        assert!(ready);
        let req = ShipRequest {
            shop_id: SHOP_ID,
            order_sn: "O5".into(),
            operator_id: OPERATOR_ID,
            goods_cost: units(10),
            shipping_cost: units(5),
            method: None,
        };
        assert!(matches!(sys.engine.shipments().ship_order(&req).await, Err(ShipmentError::Marketplace(_))));
        let record = sys.engine.shipments().fetch_record(SHOP_ID, "O5").await.unwrap().unwrap();
        assert_eq!(record.status, ShipmentStatus::Failed);
        assert_eq!(balance(&sys.engine, OWNER_ID, AccountType::Escrow).await, Money::ZERO);
        assert_eq!(prepayment(&sys.engine, OWNER_ID).await, (units(40), units(60)));

        let stranger = ShipRequest { operator_id: OPERATOR_ID + 1, ..req };
        assert!(matches!(sys.engine.shipments().ship_order(&stranger).await, Err(ShipmentError::NotOperator { .. })));
        tear_down(sys).await;
    });
}

#[test]
fn adjustments_go_to_review_by_default() {
    run(async {
        let sys = setup(quiet_marketplace()).await;
        shipped_order(&sys.engine, "O6", units(300)).await;
        wallet_row(&sys.engine, 1, "O6", ESCROW_ADJUSTMENT, units(-20)).await;
        // Not settled yet: the adjustment waits.
        assert_eq!(sys.engine.maintenance().adjustment_sweep().await.unwrap().examined, 0);

        wallet_row(&sys.engine, 2, "O6", ESCROW_VERIFIED_ADD, units(280)).await;
        sys.engine.maintenance().settlement_sweep().await.unwrap();
        let report = sys.engine.maintenance().adjustment_sweep().await.unwrap();
        assert_eq!(report.handled, 1);
        assert_eq!(balance(&sys.engine, OPERATOR_ID, AccountType::Operator).await, units(236));
        let logs = {
            let mut conn = sys.engine.db().pool().acquire().await.unwrap();
            operation_logs::fetch_logs_for_order(SHOP_ID, "O6", &mut conn).await.unwrap()
        };
        assert!(logs.iter().any(|l| l.action == "adjustment_review"));
        let s = sys.engine.settlements().fetch_settlement(SHOP_ID, "O6").await.unwrap().unwrap();
        assert_eq!(s.adjustment_count, 0);
        tear_down(sys).await;
    });
}

#[test]
fn proportional_adjustments_move_money() {
    run(async {
        let config = EngineConfig { adjustment_policy: PolicyKind::Proportional, ..Default::default() };
        let sys = setup_with(quiet_marketplace(), config).await;
        shipped_order(&sys.engine, "O7", units(300)).await;
        wallet_row(&sys.engine, 1, "O7", ESCROW_VERIFIED_ADD, units(280)).await;
        sys.engine.maintenance().settlement_sweep().await.unwrap();
        wallet_row(&sys.engine, 2, "O7", ESCROW_ADJUSTMENT, units(-20)).await;
        let report = sys.engine.maintenance().adjustment_sweep().await.unwrap();
        assert_eq!(report.handled, 1);

        assert_eq!(balance(&sys.engine, OPERATOR_ID, AccountType::Operator).await, units(227));
        assert_eq!(balance(&sys.engine, OWNER_ID, AccountType::ShopOwnerCommission).await, units(30));
        assert_eq!(balance(&sys.engine, 0, AccountType::PlatformCommission).await, units(3));
        assert_eq!(prepayment(&sys.engine, OWNER_ID).await, (units(720), Money::ZERO));
        let s = sys.engine.settlements().fetch_settlement(SHOP_ID, "O7").await.unwrap().unwrap();
        assert_eq!(s.adjustment_count, 1);
        assert_eq!(s.adjustment_total, units(-20));
        tear_down(sys).await;
    });
}

#[test]
fn overlapping_adjustment_sweeps_apply_once() {
    run(async {
        let config = EngineConfig { adjustment_policy: PolicyKind::Proportional, ..Default::default() };
        let sys = setup_with(quiet_marketplace(), config).await;
        shipped_order(&sys.engine, "O8", units(300)).await;
        wallet_row(&sys.engine, 1, "O8", ESCROW_VERIFIED_ADD, units(280)).await;
        sys.engine.maintenance().settlement_sweep().await.unwrap();
        wallet_row(&sys.engine, 2, "O8", ESCROW_ADJUSTMENT, units(-20)).await;

        let m = sys.engine.maintenance();
        let (a, b, c, d) =
            tokio::join!(m.adjustment_sweep(), m.adjustment_sweep(), m.adjustment_sweep(), m.adjustment_sweep());
        let handled = [a, b, c, d].into_iter().map(|r| r.unwrap().handled).sum::<usize>();
        assert_eq!(handled, 1);

        // Later sweeps find the row handled.
        assert_eq!(m.adjustment_sweep().await.unwrap().examined, 0);
        assert_eq!(m.adjustment_sweep().await.unwrap().handled, 0);

        assert_eq!(balance(&sys.engine, OPERATOR_ID, AccountType::Operator).await, units(227));
        assert_eq!(balance(&sys.engine, OWNER_ID, AccountType::ShopOwnerCommission).await, units(30));
        assert_eq!(prepayment(&sys.engine, OWNER_ID).await, (units(720), Money::ZERO));
        let s = sys.engine.settlements().fetch_settlement(SHOP_ID, "O8").await.unwrap().unwrap();
        assert_eq!(s.adjustment_count, 1);
        assert_eq!(s.adjustment_total, units(-20));
        let incomes = {
            let mut conn = sys.engine.db().pool().acquire().await.unwrap();
            finance::fetch_incomes(SHOP_ID, &mut conn).await.unwrap()
        };
        assert!(incomes.iter().all(|i| i.settlement_handle_status == SettlementHandleStatus::Completed));
        tear_down(sys).await;
    });
}

#[test]
fn adjustment_stays_pending_until_settled() {
    run(async {
        let config = EngineConfig { adjustment_policy: PolicyKind::Proportional, ..Default::default() };
        let sys = setup_with(quiet_marketplace(), config).await;
        shipped_order(&sys.engine, "O9", units(300)).await;
        wallet_row(&sys.engine, 1, "O9", ESCROW_ADJUSTMENT, units(-20)).await;
        let m = sys.engine.maintenance();
        assert_eq!(m.adjustment_sweep().await.unwrap().handled, 0);
        let incomes = {
            let mut conn = sys.engine.db().pool().acquire().await.unwrap();
            finance::fetch_incomes(SHOP_ID, &mut conn).await.unwrap()
        };
        assert_eq!(incomes[0].settlement_handle_status, SettlementHandleStatus::Pending);

        wallet_row(&sys.engine, 2, "O9", ESCROW_VERIFIED_ADD, units(280)).await;
        m.settlement_sweep().await.unwrap();
        assert_eq!(m.adjustment_sweep().await.unwrap().handled, 1);
        let s = sys.engine.settlements().fetch_settlement(SHOP_ID, "O9").await.unwrap().unwrap();
        assert_eq!(s.adjustment_count, 1);
        tear_down(sys).await;
    });
}

#[test]
fn cancelling_a_shipped_order_reverses_escrow() {
    run(async {
        let sys = setup(quiet_marketplace()).await;
        shipped_order(&sys.engine, "O10", units(300)).await;
        assert_eq!(balance(&sys.engine, OWNER_ID, AccountType::Escrow).await, units(300));
        assert_eq!(prepayment(&sys.engine, OWNER_ID).await, (units(700), units(300)));

        let released = sys.engine.orders().cancel_order(SHOP_ID, "O10", "buyer cancelled").await.unwrap();
        assert_eq!(released, units(300));
        assert_eq!(balance(&sys.engine, OWNER_ID, AccountType::Escrow).await, Money::ZERO);
        assert_eq!(prepayment(&sys.engine, OWNER_ID).await, (units(1000), Money::ZERO));
        let record = sys.engine.shipments().fetch_record(SHOP_ID, "O10").await.unwrap().unwrap();
        assert_eq!(record.status, ShipmentStatus::Cancelled);
        let order = sys.engine.orders().fetch_order(SHOP_ID, "O10").await.unwrap();
        assert_eq!(order.order_status, "CANCELLED");
        assert_eq!(order.frozen_amount, Money::ZERO);

        // Nothing is left to release, and a late payout no longer settles the order.
        assert_eq!(sys.engine.orders().cancel_order(SHOP_ID, "O10", "again").await.unwrap(), Money::ZERO);
        assert_eq!(balance(&sys.engine, OWNER_ID, AccountType::Escrow).await, Money::ZERO);
        wallet_row(&sys.engine, 1, "O10", ESCROW_VERIFIED_ADD, units(280)).await;
        assert_eq!(sys.engine.maintenance().settlement_sweep().await.unwrap().examined, 0);
        assert!(sys.engine.settlements().fetch_settlement(SHOP_ID, "O10").await.unwrap().is_none());
        tear_down(sys).await;
    });
}

#[test]
fn profit_split_is_exact() {
    let rates = [
        ProfitShareRates::default(),
        ProfitShareRates::new(Rate::from_bps(333), Rate::from_bps(3333), Rate::from_bps(6334)),
        ProfitShareRates::new(Rate::from_bps(0), Rate::from_bps(10_000), Rate::from_bps(0)),
    ];
    for rate in &rates {
        for (escrow, cost) in [(28_000, 20_000), (1, 0), (10_001, 9_999), (5_000, 7_777), (999_999, 3)] {
            let split = ProfitSplit::compute(Money::from(escrow), Money::from(cost), rate);
            assert_eq!(split.platform_share + split.operator_share + split.shop_owner_share, split.profit);
            assert_eq!(split.operator_income, Money::from(cost) + split.operator_share);
        }
    }
}
