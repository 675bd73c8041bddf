//! Time-based one-time passwords (RFC 6238) for the login 2FA step.
//!
//! HMAC-SHA1 over the 30-second time step counter, dynamic truncation to
//! six decimal digits. The shared secret is the base32 string shown when
//! 2FA was enrolled.

use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::types::{BrokerError, BrokerResult};

type HmacSha1 = Hmac<Sha1>;

const STEP_SECS: u64 = 30;
const DIGITS: u32 = 6;

/// Decode a base32 secret. Spaces and padding are ignored, case-insensitive.
fn decode_secret(secret: &str) -> BrokerResult<Vec<u8>> {
    let cleaned: String = secret
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '=')
        .collect::<String>()
        .to_uppercase();
    base32::decode(base32::Alphabet::RFC4648 { padding: false }, &cleaned)
        .filter(|key| !key.is_empty())
        .ok_or_else(|| BrokerError::Auth("OTP secret is not valid base32".to_string()))
}

/// Code for an explicit unix time.
pub fn code_at(secret: &str, unix_secs: u64) -> BrokerResult<String> {
    let key = decode_secret(secret)?;
    let counter = unix_secs / STEP_SECS;

    let mut mac = HmacSha1::new_from_slice(&key)
        .map_err(|e| BrokerError::Auth(format!("OTP key rejected: {e}")))?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = u32::from_be_bytes([
        digest[offset] & 0x7f,
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]);
    let code = binary % 10u32.pow(DIGITS);
    Ok(format!("{code:0width$}", width = DIGITS as usize))
}

/// Code for the current wall-clock time.
pub fn current_code(secret: &str) -> BrokerResult<String> {
    code_at(secret, chrono::Utc::now().timestamp().max(0) as u64)
}
