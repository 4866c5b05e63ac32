use balance_common::Money;

/// An order has just been stored in READY_TO_SHIP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyToShipEvent {
    pub shop_id: i64,
    pub order_sn: String,
    pub total_amount: Money,
}

impl ReadyToShipEvent {
    pub fn new(shop_id: i64, order_sn: impl Into<String>, total_amount: Money) -> Self {
        Self { shop_id, order_sn: order_sn.into(), total_amount }
    }
}

/// A shop owner topped up their prepayment account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RechargedEvent {
    pub admin_id: i64,
    pub amount: Money,
}

impl RechargedEvent {
    pub fn new(admin_id: i64, amount: Money) -> Self {
        Self { admin_id, amount }
    }
}
