//! What to do with a marketplace adjustment (an `ESCROW_ADJUSTMENT` wallet row) that arrives after an order has been
//! settled. The rule is a business decision, so it is a swappable policy.
use std::str::FromStr;

use async_trait::async_trait;
use balance_common::Money;
use log::*;
use sqlx::SqliteConnection;

use crate::{
    balance_api::errors::SettlementError,
    db::{operation_logs, settlements},
    db_types::{AccountType, FinanceIncome, NewOperationLog, OrderSettlement, ProfitShareRates},
    ledger::{self, PLATFORM_ADMIN_ID},
};

/// Adjustments a single settlement may absorb under [`ProportionalSplit`].
pub const MAX_ADJUSTMENTS: i64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustmentOutcome {
    /// Logged for a person to look at. No money moved.
    Recorded,
    Applied { platform: Money, operator: Money, shop_owner: Money },
}

#[async_trait]
pub trait AdjustmentPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Applies `income` against the order's completed settlement. Runs inside the caller's transaction, which also
    /// marks the income handled.
    async fn apply(
        &self,
        income: &FinanceIncome,
        settlement: &OrderSettlement,
        conn: &mut SqliteConnection,
    ) -> Result<AdjustmentOutcome, SettlementError>;
}

/// Default: write an `adjustment_review` entry to the operation log and leave the ledger alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualReview;

#[async_trait]
impl AdjustmentPolicy for ManualReview {
    fn name(&self) -> &'static str {
        "manual"
    }

    async fn apply(
        &self,
        income: &FinanceIncome,
        settlement: &OrderSettlement,
        conn: &mut SqliteConnection,
    ) -> Result<AdjustmentOutcome, SettlementError> {
        let detail = format!(
            "adjustment {} of {} against settlement {} (profit {})",
            income.transaction_id, income.amount, settlement.id, settlement.profit
        );
        let log = NewOperationLog::new(income.shop_id, &income.order_sn, "adjustment_review", detail);
        operation_logs::insert_log(&log, conn).await?;
        info!("🧹️ Adjustment {} on {} queued for review", income.amount, income.order_sn);
        Ok(AdjustmentOutcome::Recorded)
    }
}

/// Splits the adjustment with the settlement's own rates and books each share to its account.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProportionalSplit;

/// Shares of `amount` for platform, operator and shop owner. The shop owner takes the rounding residual.
pub fn split_adjustment(amount: Money, rates: &ProfitShareRates) -> (Money, Money, Money) {
    let platform = amount.share(rates.platform);
    let operator = amount.share(rates.operator);
    (platform, operator, amount - platform - operator)
}

#[async_trait]
impl AdjustmentPolicy for ProportionalSplit {
    fn name(&self) -> &'static str {
        "proportional"
    }

    async fn apply(
        &self,
        income: &FinanceIncome,
        settlement: &OrderSettlement,
        conn: &mut SqliteConnection,
    ) -> Result<AdjustmentOutcome, SettlementError> {
        if settlement.adjustment_count >= MAX_ADJUSTMENTS {
            return Err(SettlementError::TooManyAdjustments(settlement.order_sn.clone()));
        }
        let sn = settlement.order_sn.as_str();
        let amount = income.amount;
        let (platform, operator, shop_owner) = split_adjustment(amount, &settlement.rates());
        book(settlement.operator_id, AccountType::Operator, operator, sn, &mut *conn).await?;
        book(settlement.shop_owner_id, AccountType::ShopOwnerCommission, shop_owner, sn, &mut *conn).await?;
        book(PLATFORM_ADMIN_ID, AccountType::PlatformCommission, platform, sn, &mut *conn).await?;
        if amount.is_negative() {
            ledger::refund_prepayment_adjustment(settlement.shop_owner_id, amount.abs(), sn, &mut *conn).await?;
        }
        settlements::record_adjustment(settlement.shop_id, settlement.id, amount, conn).await?;
        info!("🧹️ Adjustment {amount} on {sn} split: platform {platform}, operator {operator}, shop owner {shop_owner}");
        Ok(AdjustmentOutcome::Applied { platform, operator, shop_owner })
    }
}

async fn book(
    admin_id: i64,
    account_type: AccountType,
    amount: Money,
    order_sn: &str,
    conn: &mut SqliteConnection,
) -> Result<(), SettlementError> {
    if amount.is_negative() {
        let value = amount.abs();
        match account_type {
            AccountType::Operator => ledger::deduct_operator_balance(admin_id, value, order_sn, conn).await?,
            AccountType::ShopOwnerCommission => ledger::deduct_shop_owner_commission(admin_id, value, order_sn, conn).await?,
            _ => ledger::deduct_platform_commission(value, order_sn, conn).await?,
        };
    } else {
        ledger::adjust(admin_id, account_type, amount, order_sn, conn).await?;
    }
    Ok(())
}

/// Selects a policy by its configuration name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PolicyKind {
    #[default]
    Manual,
    Proportional,
}

impl PolicyKind {
    pub fn build(&self) -> Box<dyn AdjustmentPolicy> {
        match self {
            Self::Manual => Box::new(ManualReview),
            Self::Proportional => Box::new(ProportionalSplit),
        }
    }
}

impl FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manual" => Ok(Self::Manual),
            "proportional" => Ok(Self::Proportional),
            other => Err(format!("Unknown adjustment policy: {other}")),
        }
    }
}
