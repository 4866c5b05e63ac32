use std::{future::Future, pin::Pin, sync::Arc};

use crate::events::{EventHandler, EventProducer, Handler, ReadyToShipEvent, RechargedEvent};

#[derive(Default, Clone)]
pub struct EventProducers {
    pub ready_to_ship_producer: Vec<EventProducer<ReadyToShipEvent>>,
    pub recharged_producer: Vec<EventProducer<RechargedEvent>>,
}

impl EventProducers {
    pub async fn publish_ready_to_ship(&self, event: ReadyToShipEvent) {
        for producer in &self.ready_to_ship_producer {
            producer.publish_event(event.clone()).await;
        }
    }

    pub async fn publish_recharged(&self, event: RechargedEvent) {
        for producer in &self.recharged_producer {
            producer.publish_event(event.clone()).await;
        }
    }
}

pub struct EventHandlers {
    pub on_ready_to_ship: Option<EventHandler<ReadyToShipEvent>>,
    pub on_recharged: Option<EventHandler<RechargedEvent>>,
}

impl EventHandlers {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        let on_ready_to_ship = hooks.on_ready_to_ship.map(|f| EventHandler::new(buffer_size, f));
        let on_recharged = hooks.on_recharged.map(|f| EventHandler::new(buffer_size, f));
        Self { on_ready_to_ship, on_recharged }
    }

    pub fn producers(&self) -> EventProducers {
        let mut result = EventProducers::default();
        if let Some(handler) = &self.on_ready_to_ship {
            result.ready_to_ship_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_recharged {
            result.recharged_producer.push(handler.subscribe());
        }
        result
    }

    /// Spawns one task per installed hook. Each task exits once every producer has been dropped.
    pub async fn start_handlers(self) {
        if let Some(handler) = self.on_ready_to_ship {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
        if let Some(handler) = self.on_recharged {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
    }
}

#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_ready_to_ship: Option<Handler<ReadyToShipEvent>>,
    pub on_recharged: Option<Handler<RechargedEvent>>,
}

impl EventHooks {
    pub fn on_ready_to_ship<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(ReadyToShipEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_ready_to_ship = Some(Arc::new(f));
        self
    }

    pub fn on_recharged<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(RechargedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_recharged = Some(Arc::new(f));
        self
    }
}
