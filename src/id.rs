//! Handshake client identifiers
//!
//! Every connection introduces itself with a freshly generated identifier:
//! millisecond timestamp plus random bytes, formatted as a UUID-like
//! string. The formatting is a pure function over its inputs so tests can
//! pin the clock and the randomness.

use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

/// Format a client identifier from an explicit timestamp and nonce.
///
/// Layout: `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx` where the first three
/// groups carry the low 64 bits of the millisecond timestamp and the last
/// two carry the random nonce.
pub fn format_client_id(millis: u64, nonce: u64) -> String {
    format!(
        "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
        (millis >> 32) as u32,
        (millis >> 16) as u16,
        millis as u16,
        (nonce >> 48) as u16,
        nonce & 0xffff_ffff_ffff,
    )
}

/// Generate a fresh client identifier from the system clock and a random
/// nonce. Called once per handshake; no global counter is involved.
pub fn generate_client_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let nonce = Uuid::new_v4().as_u64_pair().0;
    format_client_id(millis, nonce)
}
