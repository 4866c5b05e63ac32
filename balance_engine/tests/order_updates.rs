use balance_common::Money;
use balance_engine::{
    balance_api::order_api::{NonStatusReason, UpsertOutcome},
    db::operation_logs,
    db_types::PrepaymentStatus,
    BalanceEngine,
    WebhookEvent,
    WebhookOutcome,
};
use serde_json::json;
use shopee_tools::data_objects::{OrderDetail, ReturnDetail};

mod common;

use common::*;

fn push(code: i32, timestamp: i64, data: serde_json::Value) -> WebhookEvent {
    WebhookEvent { code, shop_id: SHOP_ID, timestamp, data }
}

async fn logged(engine: &BalanceEngine, order_sn: &str, action: &str) -> bool {
    let mut conn = engine.db().pool().acquire().await.unwrap();
    operation_logs::fetch_logs_for_order(SHOP_ID, order_sn, &mut conn).await.unwrap().iter().any(|l| l.action == action)
}

async fn status_of(engine: &BalanceEngine, order_sn: &str) -> String {
    engine.orders().fetch_order(SHOP_ID, order_sn).await.unwrap().order_status
}

#[test]
fn status_never_moves_backwards() {
    run(async {
        let sys = setup(quiet_marketplace()).await;
        let orders = sys.engine.orders();
        orders.upsert_from_sync(&order("P1", units(10), "SHIPPED", 1_000)).await.unwrap();
        let outcome = orders.upsert_from_sync(&order("P1", units(12), "READY_TO_SHIP", 1_100)).await.unwrap();
        assert!(matches!(outcome, UpsertOutcome::NonStatusOnly(NonStatusReason::Regression)));
        let stored = orders.fetch_order(SHOP_ID, "P1").await.unwrap();
        assert_eq!(stored.order_status, "SHIPPED");
        assert_eq!(stored.total_amount, units(12));
        assert!(logged(&sys.engine, "P1", "status_regression_blocked").await);

        let outcome = orders.upsert_from_sync(&order("P1", units(10), "COMPLETED", 1_200)).await.unwrap();
        assert!(outcome.is_stored());
        assert_eq!(status_of(&sys.engine, "P1").await, "COMPLETED");
        tear_down(sys).await;
    });
}

#[test]
fn older_snapshots_are_dropped() {
    run(async {
        let sys = setup(quiet_marketplace()).await;
        let orders = sys.engine.orders();
        orders.upsert_from_sync(&order("P2", units(10), "UNPAID", 2_000)).await.unwrap();
        let outcome = orders.upsert_from_sync(&order("P2", units(10), "PROCESSED", 1_500)).await.unwrap();
        assert!(matches!(outcome, UpsertOutcome::Stale));
        assert_eq!(status_of(&sys.engine, "P2").await, "UNPAID");
        tear_down(sys).await;
    });
}

#[test]
fn locked_status_survives_sync() {
    run(async {
        let sys = setup(quiet_marketplace()).await;
        let orders = sys.engine.orders();
        orders.upsert_from_sync(&order("P3", units(10), "UNPAID", 1_000)).await.unwrap();
        orders.force_update_status(SHOP_ID, "P3", "PROCESSED", "held for inspection", true, 99).await.unwrap();
        assert!(orders.is_status_locked(SHOP_ID, "P3").await.unwrap());
        assert!(logged(&sys.engine, "P3", "force_status").await);

        let outcome = orders.upsert_from_sync(&order("P3", units(10), "SHIPPED", 1_100)).await.unwrap();
        assert!(matches!(outcome, UpsertOutcome::NonStatusOnly(NonStatusReason::Locked)));
        assert_eq!(orders.order_status(SHOP_ID, "P3").await.unwrap(), "PROCESSED");

        orders.unlock_status(SHOP_ID, "P3", 99).await.unwrap();
        let outcome = orders.upsert_from_sync(&order("P3", units(10), "SHIPPED", 1_200)).await.unwrap();
        assert!(outcome.is_stored());
        assert_eq!(orders.order_status(SHOP_ID, "P3").await.unwrap(), "SHIPPED");
        tear_down(sys).await;
    });
}

#[test]
fn cancel_push_releases_prepayment() {
    run(async {
        let sys = setup(quiet_marketplace()).await;
        sys.engine.ledger().recharge(OWNER_ID, units(1000), "top up", None).await.unwrap();
        sys.engine.orders().upsert_from_sync(&order("O1", units(300), "READY_TO_SHIP", 1_000)).await.unwrap();
        let frozen = eventually(|| async { prepayment(&sys.engine, OWNER_ID).await == (units(700), units(300)) }).await;
        assert!(frozen);

        let event = push(5, 7_000, json!({"ordersn": "O1", "cancel_by": "buyer", "cancel_reason": "changed mind"}));
        assert_eq!(sys.engine.webhooks().handle(event.clone()).await, WebhookOutcome::Applied);
        assert_eq!(status_of(&sys.engine, "O1").await, "CANCELLED");
        assert_eq!(prepayment(&sys.engine, OWNER_ID).await, (units(1000), Money::ZERO));
        assert!(logged(&sys.engine, "O1", "order_cancelled").await);

        assert_eq!(sys.engine.webhooks().handle(event).await, WebhookOutcome::Duplicate);
        assert_eq!(prepayment(&sys.engine, OWNER_ID).await, (units(1000), Money::ZERO));
        tear_down(sys).await;
    });
}

#[test]
fn ready_to_ship_push_refreshes_the_order() {
    run(async {
        let mut mock = quiet_marketplace();
        mock.expect_get_order_detail().returning(|_, sns| {
            Ok(sns
                .iter()
                .map(|sn| OrderDetail {
                    order_sn: sn.clone(),
                    currency: "CNY".into(),
                    total_amount: 50.0,
                    order_status: "READY_TO_SHIP".into(),
                    create_time: 900,
                    update_time: 3_000,
                    ..Default::default()
                })
                .collect())
        });
        let sys = setup(mock).await;
        sys.engine.orders().upsert_from_sync(&order("W1", units(50), "UNPAID", 1_000)).await.unwrap();

        let event = push(3, 8_000, json!({"ordersn": "W1", "status": "READY_TO_SHIP", "update_time": 3_000}));
        assert_eq!(sys.engine.webhooks().handle(event).await, WebhookOutcome::Refreshed);
        assert_eq!(status_of(&sys.engine, "W1").await, "READY_TO_SHIP");
        let checked = eventually(|| async {
            sys.engine.orders().fetch_order(SHOP_ID, "W1").await.unwrap().prepayment_status
                == PrepaymentStatus::Insufficient
        })
        .await;
        assert!(checked);

        let late = push(3, 8_001, json!({"ordersn": "W1", "status": "UNPAID", "update_time": 2_000}));
        assert_eq!(sys.engine.webhooks().handle(late).await, WebhookOutcome::Stale);

        // A push for an order never seen before is fetched in full.
        let unknown = push(3, 8_002, json!({"ordersn": "W2", "status": "SHIPPED", "update_time": 3_100}));
        assert_eq!(sys.engine.webhooks().handle(unknown).await, WebhookOutcome::Refreshed);
        assert!(sys.engine.orders().fetch_order(SHOP_ID, "W2").await.is_ok());
        tear_down(sys).await;
    });
}

#[test]
fn return_push_refunds_prepayment() {
    run(async {
        let mut mock = quiet_marketplace();
        mock.expect_get_return_detail().returning(|_, rsn| {
            Ok(ReturnDetail {
                return_sn: rsn.to_string(),
                order_sn: "O1".into(),
                refund_amount: 300.0,
                currency: "CNY".into(),
                status: "REFUND_PAID".into(),
                create_time: 4_000,
                update_time: 4_100,
                ..Default::default()
            })
        });
        let sys = setup(mock).await;
        sys.engine.ledger().recharge(OWNER_ID, units(1000), "top up", None).await.unwrap();
        sys.engine.orders().upsert_from_sync(&order("O1", units(300), "READY_TO_SHIP", 1_000)).await.unwrap();
        assert!(eventually(|| async { prepayment(&sys.engine, OWNER_ID).await.1 == units(300) }).await);

        let event = push(15, 9_000, json!({"returnsn": "R5"}));
        assert_eq!(sys.engine.webhooks().handle(event.clone()).await, WebhookOutcome::Applied);
        assert_eq!(prepayment(&sys.engine, OWNER_ID).await, (units(1000), Money::ZERO));
        assert_eq!(sys.engine.webhooks().handle(event).await, WebhookOutcome::Duplicate);
        tear_down(sys).await;
    });
}

#[test]
fn odd_pushes_never_escape() {
    run(async {
        let sys = setup(quiet_marketplace()).await;
        let webhooks = sys.engine.webhooks();
        assert_eq!(webhooks.handle(push(99, 1, json!({}))).await, WebhookOutcome::Ignored);
        assert_eq!(webhooks.handle(push(10, 1, json!({"item_id": 5}))).await, WebhookOutcome::Ignored);
        let bad = webhooks.handle(push(3, 1, json!({"ordersn": 5}))).await;
        assert!(matches!(bad, WebhookOutcome::Failed(_)));
        let missing_sn = webhooks.handle(push(4, 1, json!({"tracking_no": "TN"}))).await;
        assert!(matches!(missing_sn, WebhookOutcome::Failed(_)));
        tear_down(sys).await;
    });
}
