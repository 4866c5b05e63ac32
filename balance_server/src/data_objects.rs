use std::fmt::Display;

use balance_engine::workers::sync_scheduler::SyncRun;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonResponse {
    pub success: bool,
    pub message: String,
}

impl JsonResponse {
    pub fn success<S: Display>(message: S) -> Self {
        Self { success: true, message: message.to_string() }
    }

    pub fn failure<S: Display>(message: S) -> Self {
        Self { success: false, message: message.to_string() }
    }
}

/// The result of a manual shop sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub shop_id: i64,
    pub windows: usize,
    pub orders_listed: usize,
    pub orders_upserted: usize,
    pub orders_unchanged: usize,
    /// `None` when the return patrol did not complete. Orders are still synced in that case.
    pub returns_listed: Option<usize>,
    pub returns_upserted: Option<usize>,
}

impl SyncSummary {
    pub fn new(shop_id: i64, run: &SyncRun) -> Self {
        match run {
            SyncRun::Completed { orders, returns } => Self {
                shop_id,
                windows: orders.windows,
                orders_listed: orders.listed,
                orders_upserted: orders.upserted,
                orders_unchanged: orders.unchanged,
                returns_listed: returns.as_ref().map(|r| r.listed),
                returns_upserted: returns.as_ref().map(|r| r.upserted),
            },
            SyncRun::Busy => Self { shop_id, ..Default::default() },
        }
    }
}
