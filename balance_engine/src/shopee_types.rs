//! Conversions from marketplace wire objects to the engine's row types. Decimal amounts become cents here and
//! nowhere else.
use balance_common::Money;
use shopee_tools::data_objects::{EscrowDetail, OrderDetail, OrderIncome, ReturnDetail, WalletTransaction};

use crate::{
    db::escrows::NewEscrowItem,
    db_types::{FeeBreakdown, NewFinanceIncome, NewOrderItem, OrderAddress, OrderSnapshot, ReturnSnapshot, Shipment},
};

fn cents(amount: f64) -> Money {
    Money::from_major_lossy(amount)
}

impl OrderSnapshot {
    pub fn from_detail(shop_id: i64, detail: &OrderDetail) -> Self {
        let items = detail
            .item_list
            .iter()
            .map(|i| NewOrderItem {
                item_id: i.item_id,
                item_name: i.item_name.clone(),
                item_sku: i.item_sku.clone(),
                model_id: i.model_id,
                model_name: i.model_name.clone(),
                model_sku: i.model_sku.clone(),
                quantity: i.quantity,
                item_price: cents(i.original_price),
                prepayment_share: Money::ZERO,
            })
            .collect();
        let a = &detail.recipient_address;
        let address = OrderAddress {
            name: a.name.clone(),
            phone: a.phone.clone(),
            town: a.town.clone(),
            district: a.district.clone(),
            city: a.city.clone(),
            state: a.state.clone(),
            region: a.region.clone(),
            zipcode: a.zipcode.clone(),
            full_address: a.full_address.clone(),
        };
        let packages = detail
            .package_list
            .iter()
            .filter(|p| !p.package_number.is_empty())
            .map(|p| Shipment {
                shop_id,
                order_sn: detail.order_sn.clone(),
                package_number: p.package_number.clone(),
                tracking_number: String::new(),
                shipping_carrier: p.shipping_carrier.clone(),
                logistics_status: p.logistics_status.clone(),
            })
            .collect();
        Self {
            shop_id,
            order_sn: detail.order_sn.clone(),
            region: detail.region.clone(),
            currency: detail.currency.clone(),
            cod: detail.cod,
            total_amount: cents(detail.total_amount),
            order_status: detail.order_status.clone(),
            shipping_carrier: detail.shipping_carrier.clone(),
            payment_method: detail.payment_method.clone(),
            tracking_number: detail.tracking_no.clone(),
            buyer_user_id: detail.buyer_user_id,
            buyer_username: detail.buyer_username.clone(),
            create_time: detail.create_time,
            update_time: detail.update_time,
            pay_time: detail.pay_time,
            ship_by_date: detail.ship_by_date,
            items,
            address,
            packages,
        }
    }
}

impl From<&OrderIncome> for FeeBreakdown {
    fn from(income: &OrderIncome) -> Self {
        Self {
            escrow_amount: cents(income.escrow_amount),
            buyer_total_amount: cents(income.buyer_total_amount),
            original_price: cents(income.original_price),
            commission_fee: cents(income.commission_fee),
            service_fee: cents(income.service_fee),
            seller_transaction_fee: cents(income.seller_transaction_fee),
            buyer_paid_shipping_fee: cents(income.buyer_paid_shipping_fee),
            final_shipping_fee: cents(income.final_shipping_fee),
            actual_shipping_fee: cents(income.actual_shipping_fee),
            credit_card_transaction_fee: cents(income.credit_card_transaction_fee),
            original_cost_of_goods_sold: cents(income.original_cost_of_goods_sold),
        }
    }
}

impl FeeBreakdown {
    /// The amount to reserve from prepayment: the escrow amount when the marketplace reports one, otherwise the
    /// order total.
    pub fn prepayment_amount(&self, order_total: Money) -> Money {
        if self.escrow_amount.is_positive() {
            self.escrow_amount
        } else {
            order_total
        }
    }
}

/// Per-item escrow amounts keyed by `(item_id, model_id)`, used to apportion the prepayment over line items.
pub fn escrow_item_amounts(detail: &EscrowDetail) -> Vec<((i64, i64), Money)> {
    detail
        .items
        .iter()
        .map(|i| ((i.item_id, i.model_id), cents(i.discounted_price) * i.quantity_purchased.max(1)))
        .collect()
}

pub fn escrow_items(detail: &EscrowDetail) -> Vec<NewEscrowItem> {
    detail
        .items
        .iter()
        .map(|i| NewEscrowItem {
            item_id: i.item_id,
            item_name: i.item_name.clone(),
            model_id: i.model_id,
            quantity: i.quantity_purchased,
            original_price: cents(i.original_price),
            discounted_price: cents(i.discounted_price),
        })
        .collect()
}

impl ReturnSnapshot {
    pub fn from_detail(shop_id: i64, detail: &ReturnDetail) -> Self {
        Self {
            shop_id,
            return_sn: detail.return_sn.clone(),
            order_sn: detail.order_sn.clone(),
            refund_amount: cents(detail.refund_amount),
            amount_before_discount: cents(detail.amount_before_discount),
            currency: detail.currency.clone(),
            status: detail.status.clone(),
            reason: detail.reason.clone(),
            text_reason: detail.text_reason.clone(),
            buyer_username: detail.user.username.clone(),
            tracking_number: detail.tracking_number.clone(),
            needs_logistics: detail.needs_logistics,
            logistics_status: detail.logistics_status.clone(),
            due_date: detail.due_date,
            create_time: detail.create_time,
            update_time: detail.update_time,
        }
    }
}

impl NewFinanceIncome {
    pub fn from_wallet(shop_id: i64, tx: &WalletTransaction) -> Self {
        Self {
            shop_id,
            transaction_id: tx.transaction_id,
            order_sn: tx.order_sn.clone(),
            refund_sn: tx.refund_sn.clone(),
            transaction_type: tx.transaction_type.clone(),
            status: tx.status.clone(),
            wallet_type: tx.wallet_type.clone(),
            amount: cents(tx.amount),
            current_balance: cents(tx.current_balance),
            transaction_fee: cents(tx.transaction_fee),
            description: tx.description.clone(),
            buyer_name: tx.buyer_name.clone(),
            reason: tx.reason.clone(),
            money_flow: tx.money_flow.clone(),
            create_time: tx.create_time,
        }
    }
}

#[cfg(test)]
mod test {
    use shopee_tools::data_objects::{EscrowItem, OrderLineItem};

    use super::*;

    #[test]
    fn order_detail_to_snapshot() {
        let detail = OrderDetail {
            order_sn: "SN1".into(),
            total_amount: 300.0,
            order_status: "READY_TO_SHIP".into(),
            update_time: 1_717_200_100,
            item_list: vec![OrderLineItem { item_id: 1, quantity: 2, original_price: 150.0, ..Default::default() }],
            ..Default::default()
        };
        let snapshot = OrderSnapshot::from_detail(77, &detail);
        assert_eq!(snapshot.shop_id, 77);
        assert_eq!(snapshot.total_amount, Money::from(30_000));
        assert_eq!(snapshot.items[0].item_price, Money::from(15_000));
        assert!(snapshot.packages.is_empty());
    }

    #[test]
    fn prepayment_amount_prefers_escrow() {
        let income = OrderIncome { escrow_amount: 280.5, ..Default::default() };
        let fees = FeeBreakdown::from(&income);
        assert_eq!(fees.prepayment_amount(Money::from(30_000)), Money::from(28_050));
        let fees = FeeBreakdown::default();
        assert_eq!(fees.prepayment_amount(Money::from(30_000)), Money::from(30_000));
    }

    #[test]
    fn escrow_items() {
        let detail = EscrowDetail {
            items: vec![EscrowItem { item_id: 4, model_id: 5, discounted_price: 9.99, quantity_purchased: 3, ..Default::default() }],
            ..Default::default()
        };
        assert_eq!(escrow_item_amounts(&detail), vec![((4, 5), Money::from(2_997))]);
    }
}
