use std::fmt::Debug;

use balance_engine::BalanceEngine;
use cucumber::World;

use crate::common::TestSystem;

#[derive(Default, World)]
pub struct BalanceWorld {
    pub system: Option<TestSystem>,
    /// Marketplace update times only ever move forward within a scenario.
    pub clock: i64,
    pub wallet_tx_id: i64,
    pub tick_results: Vec<Option<usize>>,
}

impl Debug for BalanceWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.system {
            Some(sys) => write!(f, "BalanceWorld({})", sys.db_path),
            None => write!(f, "BalanceWorld(uninitialised)"),
        }
    }
}

impl BalanceWorld {
    pub fn engine(&self) -> &BalanceEngine {
        &self.system.as_ref().expect("Engine not initialised").engine
    }

    pub fn tick(&mut self) -> i64 {
        self.clock += 100;
        1_000 + self.clock
    }

    pub fn next_wallet_tx(&mut self) -> i64 {
        self.wallet_tx_id += 1;
        self.wallet_tx_id
    }
}
