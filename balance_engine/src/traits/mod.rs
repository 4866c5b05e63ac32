//! Seams between the engine and the outside world.
mod marketplace;

pub use marketplace::Marketplace;
