//! # Balance engine public API
//!
//! Every component is a small, cloneable facade over the shared [`crate::SqliteDatabase`] (and, where it needs one,
//! the [`crate::kv::KvStore`] and the [`crate::traits::Marketplace`]). Clients pick the facades they need; the
//! [`crate::BalanceEngine`] wires them all together with the event hooks.
//!
//! * [`ledger_api`] moves money between the per-admin accounts and records every movement.
//! * [`shop_api`] registers shops and hands out valid marketplace credentials.
//! * [`order_api`] ingests order snapshots and status pushes.
//! * [`prepayment_api`] freezes an order's prepayment when it becomes ready to ship.
//! * [`ready_to_ship`] fetches the escrow breakdown before the prepayment check.
//! * [`shipment_api`] moves frozen prepayment into escrow custody when an operator ships.
//! * [`return_api`] gives prepayment back for refund-confirmed returns.
//! * [`settlement_api`] splits the profit of settled orders.
//! * [`webhook_api`] turns marketplace pushes into calls on the above.
pub mod errors;
pub mod ledger_api;
pub mod order_api;
pub mod prepayment_api;
pub mod ready_to_ship;
pub mod return_api;
pub mod settlement_api;
pub mod shipment_api;
pub mod shop_api;
pub mod webhook_api;
