mod admin;
mod hmac;

pub use admin::{AdminTokenMiddlewareFactory, AdminTokenMiddlewareService};
pub use hmac::{HmacMiddlewareFactory, HmacMiddlewareService};

/// Compares two byte strings in time that depends only on their lengths.
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
