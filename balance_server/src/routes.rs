//! Request handler definitions
//!
//! Handlers must not block the worker thread. Anything longer than parsing a request is either awaited or spawned.
use actix_web::{get, post, web, HttpResponse, Responder};
use balance_engine::{BalanceEngine, WebhookEvent, WebhookOutcome};
use log::*;

use crate::{
    data_objects::{JsonResponse, SyncSummary},
    errors::ServerError,
};

// ----------------------------------------------   Health  ----------------------------------------------------
#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("💻️ Received health check request");
    HttpResponse::Ok().body("👍️\n")
}

// ----------------------------------------------   Webhook  ---------------------------------------------------
/// Receives a marketplace push.
///
/// The marketplace retries anything that is not answered with a 2xx quickly, so the event is handed to the webhook
/// engine on its own task and the response goes out straight away. Payloads that cannot be parsed are acknowledged
/// too. A retry would not fix them.
#[post("/shopee")]
pub async fn shopee_webhook(body: web::Bytes, engine: web::Data<BalanceEngine>) -> HttpResponse {
    let event = match serde_json::from_slice::<WebhookEvent>(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!("🪝️ Could not parse push payload. {e}. {}", String::from_utf8_lossy(&body));
            return HttpResponse::Ok().json(JsonResponse::failure(format!("Invalid payload. {e}")));
        },
    };
    trace!("🪝️ Push {} received for shop {}", event.code, event.shop_id);
    let webhooks = engine.webhooks().clone();
    tokio::spawn(async move {
        let (code, shop_id) = (event.code, event.shop_id);
        match webhooks.handle(event).await {
            WebhookOutcome::Failed(reason) => warn!("🪝️ Push {code} for shop {shop_id} failed. {reason}"),
            outcome => debug!("🪝️ Push {code} for shop {shop_id} handled: {outcome:?}"),
        }
    });
    HttpResponse::Ok().json(JsonResponse::success("Push received."))
}

// ----------------------------------------------   Admin  -----------------------------------------------------
/// Runs a shop's order and return sync now, on this node. Answers 409 when a scheduled sync holds the shop.
#[post("/shops/{shop_id}/sync")]
pub async fn trigger_shop_sync(
    path: web::Path<String>,
    engine: web::Data<BalanceEngine>,
) -> Result<HttpResponse, ServerError> {
    let shop_id = path
        .parse::<i64>()
        .map_err(|e| ServerError::InvalidRequestPath(format!("{} is not a shop id. {e}", path.as_str())))?;
    info!("🕰️ Manual sync of shop {shop_id} requested");
    let run = engine.sync().trigger_shop_sync(shop_id).await?;
    Ok(HttpResponse::Ok().json(SyncSummary::new(shop_id, &run)))
}
