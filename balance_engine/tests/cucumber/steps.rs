use std::sync::Arc;

use balance_common::Money;
use balance_engine::{
    balance_api::shipment_api::ShipRequest,
    db::{finance, notifications},
    db_types::{AccountType, NewFinanceIncome, PrepaymentStatus, TransactionType, ESCROW_ADJUSTMENT, ESCROW_VERIFIED_ADD},
    kv::{KvStore, SHOP_QUEUE},
    BalanceEngine,
    EngineConfig,
};
use cucumber::{then, when};
use futures_util::future::join;

use crate::{
    common::{eventually, order, prepayment, quiet_marketplace, refund_return, units, OPERATOR_ID, OWNER_ID, SHOP_ID},
    cucumber::BalanceWorld,
};

async fn prepayment_status(engine: &BalanceEngine, order_sn: &str) -> PrepaymentStatus {
    engine.orders().fetch_order(SHOP_ID, order_sn).await.expect("Error fetching order").prepayment_status
}

async fn account_balance(engine: &BalanceEngine, admin_id: i64, account_type: AccountType) -> Money {
    engine
        .ledger()
        .account(admin_id, account_type)
        .await
        .expect("Error fetching account")
        .map(|a| a.balance)
        .unwrap_or(Money::ZERO)
}

#[when(expr = "the shop owner recharges {int}")]
async fn recharge(world: &mut BalanceWorld, amount: i64) {
    world.engine().ledger().recharge(OWNER_ID, units(amount), "recharge", None).await.expect("Error recharging");
}

#[when(expr = "order {word} for {int} becomes {word}")]
async fn order_moves(world: &mut BalanceWorld, order_sn: String, total: i64, status: String) {
    let update_time = world.tick();
    let snapshot = order(&order_sn, units(total), &status, update_time);
    world.engine().orders().upsert_from_sync(&snapshot).await.expect("Error storing order");
    if status == "READY_TO_SHIP" {
        let engine = world.engine();
        let checked =
            eventually(|| async { prepayment_status(engine, &order_sn).await != PrepaymentStatus::Unchecked }).await;
        assert!(checked, "Prepayment of {order_sn} was never checked");
    }
}

#[when(expr = "return {word} for order {word} refunding {int} reaches {word}")]
async fn return_moves(world: &mut BalanceWorld, return_sn: String, order_sn: String, refund: i64, status: String) {
    let update_time = world.tick();
    let snapshot = refund_return(&return_sn, &order_sn, units(refund), &status, update_time);
    world.engine().returns().upsert_return(&snapshot).await.expect("Error storing return");
}

#[when(expr = "the operator ships order {word} with goods cost {int} and shipping cost {int}")]
async fn ship(world: &mut BalanceWorld, order_sn: String, goods: i64, shipping: i64) {
    let req = ShipRequest {
        shop_id: SHOP_ID,
        order_sn,
        operator_id: OPERATOR_ID,
        goods_cost: units(goods),
        shipping_cost: units(shipping),
        method: None,
    };
    world.engine().shipments().ship_order(&req).await.expect("Error shipping order");
}

async fn wallet_row(world: &mut BalanceWorld, order_sn: &str, kind: &str, amount: i64) {
    let transaction_id = world.next_wallet_tx();
    let income = NewFinanceIncome {
        shop_id: SHOP_ID,
        transaction_id,
        order_sn: order_sn.to_string(),
        transaction_type: kind.to_string(),
        amount: units(amount),
        create_time: 50_000 + transaction_id,
        ..Default::default()
    };
    let mut conn = world.engine().db().pool().acquire().await.expect("Error acquiring connection");
    finance::insert_if_absent(&income, &mut conn).await.expect("Error storing wallet row");
}

#[when(expr = "the marketplace pays out {int} escrow for order {word}")]
async fn escrow_paid(world: &mut BalanceWorld, amount: i64, order_sn: String) {
    wallet_row(world, &order_sn, ESCROW_VERIFIED_ADD, amount).await;
    world.engine().maintenance().settlement_sweep().await.expect("Error running the settlement sweep");
}

#[when(expr = "the marketplace adjusts the escrow of order {word} by {int}")]
async fn escrow_adjusted(world: &mut BalanceWorld, order_sn: String, amount: i64) {
    wallet_row(world, &order_sn, ESCROW_ADJUSTMENT, amount).await;
    world.engine().maintenance().adjustment_sweep().await.expect("Error running the adjustment sweep");
}

#[when("two nodes run the scheduler tick at the same time")]
async fn double_tick(world: &mut BalanceWorld) {
    let engine = world.engine();
    let peer =
        BalanceEngine::new(engine.db().clone(), engine.kv(), Arc::new(quiet_marketplace()), EngineConfig::default())
            .await;
    let (a, b) = join(engine.sync().schedule_tick(), peer.sync().schedule_tick()).await;
    world.tick_results = vec![a.expect("Tick failed"), b.expect("Tick failed")];
}

#[then(expr = "the prepayment balance is {int} with {int} frozen")]
async fn check_prepayment(world: &mut BalanceWorld, balance: i64, frozen: i64) {
    assert_eq!(prepayment(world.engine(), OWNER_ID).await, (units(balance), units(frozen)));
}

#[then(expr = "the prepayment of order {word} is {word}")]
async fn check_order_prepayment(world: &mut BalanceWorld, order_sn: String, status: String) {
    assert_eq!(prepayment_status(world.engine(), &order_sn).await.to_string(), status);
}

#[then(expr = "order {word} has {int} {word} transaction(s)")]
async fn check_transactions(world: &mut BalanceWorld, order_sn: String, count: usize, kind: String) {
    let kind = match kind.as_str() {
        "freeze" => TransactionType::Freeze,
        "unfreeze" => TransactionType::Unfreeze,
        other => panic!("Unknown transaction kind {other}"),
    };
    let rows = world.engine().ledger().transactions_for_order(OWNER_ID, &order_sn).await.expect("Error fetching rows");
    assert_eq!(rows.iter().filter(|r| r.transaction_type == kind).count(), count);
}

#[then(expr = "the shop owner has {int} notification(s)")]
async fn check_notifications(world: &mut BalanceWorld, count: usize) {
    let mut conn = world.engine().db().pool().acquire().await.expect("Error acquiring connection");
    let notes = notifications::fetch_for_admin(OWNER_ID, &mut conn).await.expect("Error fetching notifications");
    assert_eq!(notes.len(), count);
}

#[then(expr = "return {word} is {word}")]
async fn check_refund_status(world: &mut BalanceWorld, return_sn: String, status: String) {
    let record = world
        .engine()
        .returns()
        .fetch_return(SHOP_ID, &return_sn)
        .await
        .expect("Error fetching return")
        .expect("Return does not exist");
    assert_eq!(record.refund_status.to_string(), status);
}

#[then(expr = "the settlement of order {word} is {word} with profit {int}")]
async fn check_settlement(world: &mut BalanceWorld, order_sn: String, status: String, profit: i64) {
    let settlement = world
        .engine()
        .settlements()
        .fetch_settlement(SHOP_ID, &order_sn)
        .await
        .expect("Error fetching settlement")
        .expect("Settlement does not exist");
    assert_eq!(settlement.status.to_string(), status);
    assert_eq!(settlement.profit, units(profit));
}

#[then(expr = "the shares of order {word} are {int} to the platform, {int} to the operator and {int} to the shop owner")]
async fn check_shares(world: &mut BalanceWorld, order_sn: String, platform: i64, operator: i64, owner: i64) {
    let s = world.engine().settlements().fetch_settlement(SHOP_ID, &order_sn).await.unwrap().unwrap();
    assert_eq!((s.platform_share, s.operator_share, s.shop_owner_share), (units(platform), units(operator), units(owner)));
}

#[then(expr = "the operator income of order {word} is {int}")]
async fn check_operator_income(world: &mut BalanceWorld, order_sn: String, income: i64) {
    let s = world.engine().settlements().fetch_settlement(SHOP_ID, &order_sn).await.unwrap().unwrap();
    assert_eq!(s.operator_income, units(income));
}

#[then(expr = "the operator account holds {int}")]
async fn check_operator_account(world: &mut BalanceWorld, amount: i64) {
    assert_eq!(account_balance(world.engine(), OPERATOR_ID, AccountType::Operator).await, units(amount));
}

#[then(expr = "the shop owner commission account holds {int}")]
async fn check_owner_commission(world: &mut BalanceWorld, amount: i64) {
    assert_eq!(account_balance(world.engine(), OWNER_ID, AccountType::ShopOwnerCommission).await, units(amount));
}

#[then(expr = "the platform commission account holds {int}")]
async fn check_platform_commission(world: &mut BalanceWorld, amount: i64) {
    assert_eq!(account_balance(world.engine(), 0, AccountType::PlatformCommission).await, units(amount));
}

#[then(expr = "the escrow payout of order {word} is handled")]
async fn check_income_handled(world: &mut BalanceWorld, order_sn: String) {
    let mut conn = world.engine().db().pool().acquire().await.unwrap();
    let incomes = finance::fetch_incomes(SHOP_ID, &mut conn).await.expect("Error fetching incomes");
    let handled = incomes
        .iter()
        .filter(|i| i.order_sn == order_sn && i.transaction_type == ESCROW_VERIFIED_ADD)
        .all(|i| i.settlement_handle_status.to_string() == "Completed");
    assert!(handled);
}

#[then("exactly one node enqueued the shops")]
async fn check_single_tick(world: &mut BalanceWorld) {
    let winners = world.tick_results.iter().filter(|r| r.is_some()).count();
    assert_eq!(winners, 1, "Tick results: {:?}", world.tick_results);
    let queued = world.engine().kv().llen(SHOP_QUEUE).await.expect("Error reading the queue");
    assert_eq!(queued, 1);
}
