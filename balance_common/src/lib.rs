mod money;

pub mod helpers;
pub mod op;
mod rate;
mod secret;

pub use money::{Money, MoneyConversionError, DEFAULT_CURRENCY};
pub use rate::{Rate, RateError};
pub use secret::Secret;
