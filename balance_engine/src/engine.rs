use std::{fmt::Debug, sync::Arc};

use log::*;
use tokio::task::JoinHandle;

use crate::{
    balance_api::{
        ledger_api::LedgerApi,
        order_api::OrderApi,
        prepayment_api::PrepaymentApi,
        ready_to_ship::ReadyToShipProcessor,
        return_api::ReturnApi,
        settlement_api::SettlementApi,
        shipment_api::ShipmentApi,
        shop_api::ShopApi,
        webhook_api::WebhookApi,
    },
    events::{EventHandlers, EventHooks},
    kv::KvStore,
    traits::Marketplace,
    workers::{
        adjustment::PolicyKind,
        finance_sync::FinanceSync,
        maintenance::Maintenance,
        patrol::Patrol,
        sync_scheduler::SyncScheduler,
        Shutdown,
        WorkerSettings,
    },
    SqliteDatabase,
};

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub workers: WorkerSettings,
    pub adjustment_policy: PolicyKind,
}

const EVENT_BUFFER: usize = 256;

/// Every engine component, built over one database, one key-value store and one marketplace client.
///
/// Construction installs the event hooks: an order entering READY_TO_SHIP runs the prepayment check, and a recharge
/// retries the admin's orders that were short of funds. The background workers are not started until
/// [`BalanceEngine::start_workers`] is called.
#[derive(Clone)]
pub struct BalanceEngine {
    db: SqliteDatabase,
    kv: Arc<dyn KvStore>,
    shops: ShopApi,
    ledger: LedgerApi,
    orders: OrderApi,
    prepayment: PrepaymentApi,
    returns: ReturnApi,
    shipments: ShipmentApi,
    settlements: SettlementApi,
    webhooks: WebhookApi,
    sync: SyncScheduler,
    finance: FinanceSync,
    maintenance: Maintenance,
}

impl Debug for BalanceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BalanceEngine({:?}, {:?})", self.sync, self.maintenance)
    }
}

impl BalanceEngine {
    pub async fn new(
        db: SqliteDatabase,
        kv: Arc<dyn KvStore>,
        marketplace: Arc<dyn Marketplace>,
        config: EngineConfig,
    ) -> Self {
        let shops = ShopApi::new(db.clone(), Arc::clone(&kv), Arc::clone(&marketplace));
        let prepayment = PrepaymentApi::new(db.clone(), Arc::clone(&kv));
        let processor = ReadyToShipProcessor::new(db.clone(), shops.clone(), Arc::clone(&marketplace), prepayment.clone());

        let mut hooks = EventHooks::default();
        hooks.on_ready_to_ship(move |event| {
            let processor = processor.clone();
            Box::pin(async move {
                if let Err(e) = processor.process(&event).await {
                    error!("🧊️ Prepayment check of {} failed: {e}", event.order_sn);
                }
            })
        });
        let backfill = prepayment.clone();
        hooks.on_recharged(move |event| {
            let backfill = backfill.clone();
            Box::pin(async move {
                match backfill.backfill_insufficient(event.admin_id).await {
                    Ok(0) => {},
                    Ok(n) => info!("🧊️ Recharge of admin {} covered {n} waiting orders", event.admin_id),
                    Err(e) => error!("🧊️ Backfill after the recharge of admin {} failed: {e}", event.admin_id),
                }
            })
        });
        let handlers = EventHandlers::new(EVENT_BUFFER, hooks);
        let producers = handlers.producers();
        handlers.start_handlers().await;

        let ledger = LedgerApi::new(db.clone(), producers.clone());
        let orders = OrderApi::new(db.clone(), Arc::clone(&kv), shops.clone(), Arc::clone(&marketplace), producers);
        let returns = ReturnApi::new(db.clone(), Arc::clone(&kv));
        let shipments = ShipmentApi::new(db.clone(), shops.clone(), Arc::clone(&marketplace));
        let settlements = SettlementApi::new(db.clone());
        let webhooks = WebhookApi::new(
            db.clone(),
            Arc::clone(&kv),
            orders.clone(),
            returns.clone(),
            shops.clone(),
            Arc::clone(&marketplace),
        );
        let patrol = Patrol::new(db.clone(), shops.clone(), orders.clone(), returns.clone(), Arc::clone(&marketplace));
        let sync = SyncScheduler::new(db.clone(), Arc::clone(&kv), patrol, config.workers.clone());
        let finance = FinanceSync::new(db.clone(), Arc::clone(&kv), shops.clone(), marketplace, config.workers);
        let policy = Arc::from(config.adjustment_policy.build());
        let maintenance = Maintenance::new(db.clone(), Arc::clone(&kv), settlements.clone(), policy);
        Self { db, kv, shops, ledger, orders, prepayment, returns, shipments, settlements, webhooks, sync, finance, maintenance }
    }

    /// Starts the order sync, the finance sync and the maintenance scheduler. All of them stop when `shutdown` fires.
    pub fn start_workers(&self, shutdown: Shutdown) -> Vec<JoinHandle<()>> {
        let mut handles = self.sync.clone().start(shutdown.clone());
        handles.extend(self.finance.clone().start(shutdown.clone()));
        handles.push(self.maintenance.clone().start(shutdown));
        info!("🕰️ Background workers started");
        handles
    }

    pub fn db(&self) -> &SqliteDatabase {
        &self.db
    }

    pub fn kv(&self) -> Arc<dyn KvStore> {
        Arc::clone(&self.kv)
    }

    pub fn shops(&self) -> &ShopApi {
        &self.shops
    }

    pub fn ledger(&self) -> &LedgerApi {
        &self.ledger
    }

    pub fn orders(&self) -> &OrderApi {
        &self.orders
    }

    pub fn prepayment(&self) -> &PrepaymentApi {
        &self.prepayment
    }

    pub fn returns(&self) -> &ReturnApi {
        &self.returns
    }

    pub fn shipments(&self) -> &ShipmentApi {
        &self.shipments
    }

    pub fn settlements(&self) -> &SettlementApi {
        &self.settlements
    }

    pub fn webhooks(&self) -> &WebhookApi {
        &self.webhooks
    }

    pub fn sync(&self) -> &SyncScheduler {
        &self.sync
    }

    pub fn finance(&self) -> &FinanceSync {
        &self.finance
    }

    pub fn maintenance(&self) -> &Maintenance {
        &self.maintenance
    }
}
