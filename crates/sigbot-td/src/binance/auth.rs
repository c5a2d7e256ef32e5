//! Binance request signing.
//!
//! Signed endpoints take an HMAC-SHA256 signature of the URL-encoded query
//! string, keyed with the API secret, appended as `signature=<hex>`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute an HMAC-SHA256 signature and return it as a lowercase hex string.
///
/// # Example
///
/// ```ignore
/// let sig = hmac_sha256_sign("my_secret", "symbol=ETHUSDT&timestamp=1234567890");
/// assert_eq!(sig.len(), 64); // 32 bytes → 64 hex chars
/// ```
pub fn hmac_sha256_sign(secret: &str, message: &str) -> String {
    // HMAC accepts keys of any length, so this never fails.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Build a URL-encoded, HMAC-SHA256–signed query string.
///
/// Joins `(key, value)` pairs with `&`, signs the result and appends
/// `&signature=<hex>`. `params` must already include `timestamp`.
pub fn build_signed_query(params: &[(&str, &str)], secret: &str) -> String {
    let query = build_query(params);
    let signature = hmac_sha256_sign(secret, &query);
    format!("{query}&signature={signature}")
}

/// URL-encode and join parameters without signing.
pub fn build_query(params: &[(&str, &str)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}
