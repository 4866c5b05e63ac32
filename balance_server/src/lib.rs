//! # Balance server
//! Hosts the balance engine. It is responsible for:
//! * Receiving push notifications from Shopee, checking their signature and handing them to the webhook engine.
//! * Running the background workers: the order and return sync, the finance-income sync and the maintenance jobs.
//! * Stopping the workers cleanly when the process is asked to shut down.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more information.
//!
//! ## Routes
//! * `/health`: A health check route that returns a 200 OK response.
//! * `/webhook/shopee`: Push intake. Always answered with 200 once the signature checks out.
//! * `/admin/shops/{shop_id}/sync`: Runs a shop sync on demand. Only mounted when an admin token is configured.

pub mod cli;
pub mod config;
pub mod data_objects;
pub mod errors;
pub mod middleware;
pub mod routes;
pub mod server;

#[cfg(test)]
mod endpoint_tests;
