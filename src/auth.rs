//! Digest authentication: nonce lifecycle and RFC 2617 MD5 digests.

use crate::message::HeaderLine;
use crate::transaction::{random_text, CNONCE_LEN};
use std::time::{SystemTime, UNIX_EPOCH};

/// Nonces older than this are re-issued on the next `get`.
pub const NONCE_REISSUE_AGE: u64 = 300;

/// Nonces older than this fail the stale check in `auth_user` consumers.
pub const NONCE_MAX_AGE: i64 = 600;

pub fn md5_hex(data: &str) -> String {
    format!("{:032x}", md5::compute(data.as_bytes()))
}

/// RFC 2617 digest: `MD5(MD5(user:realm:pass):nonce:MD5(method:uri))`.
pub fn build_digest(
    username: &str,
    realm: &str,
    password: &str,
    nonce: &str,
    method: &str,
    uri: &str,
) -> String {
    let ha1 = md5_hex(&format!("{}:{}:{}", username, realm, password));
    let ha2 = md5_hex(&format!("{}:{}", method, uri));
    build_digest_hashed(&ha1, nonce, &ha2)
}

/// Digest variant for credential stores that only hold the A1 hash.
pub fn build_digest_hashed(hash_a1: &str, nonce: &str, hash_a2: &str) -> String {
    md5_hex(&format!("{}:{}:{}", hash_a1, nonce, hash_a2))
}

/// Build a `WWW-Authenticate` or `Proxy-Authenticate` challenge line.
pub fn challenge(nonce: &str, realm: &str, domain: &str, stale: bool, proxy: bool) -> HeaderLine {
    let name = if proxy {
        "Proxy-Authenticate"
    } else {
        "WWW-Authenticate"
    };
    let mut line = HeaderLine::new(name, "Digest");
    line.set_param("realm", Some(&format!("\"{}\"", realm)));
    if !domain.is_empty() {
        line.set_param("domain", Some(&format!("\"{}\"", domain)));
    }
    line.set_param("nonce", Some(&format!("\"{}\"", nonce)));
    if stale {
        line.set_param("stale", Some("TRUE"));
    }
    line
}

/// Current nonce, the secret authenticating it and its issue time.
///
/// Nonce format: `hex(ts):md5(hex(ts):secret)`, so `age` can recover the
/// timestamp and verify the MAC without remembering issued nonces.
/// Rotating the secret invalidates every outstanding nonce.
pub struct NonceRegister {
    nonce: String,
    secret: String,
    time: u64,
    reissue_age: u64,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl NonceRegister {
    pub fn new(secret: Option<&str>) -> Self {
        NonceRegister {
            nonce: String::new(),
            secret: secret
                .map(|s| s.to_string())
                .unwrap_or_else(|| random_text(CNONCE_LEN * 2)),
            time: 0,
            reissue_age: NONCE_REISSUE_AGE,
        }
    }

    pub fn set_secret(&mut self, secret: &str) {
        self.secret = secret.to_string();
        self.nonce.clear();
        self.time = 0;
    }

    fn mac(&self, ts_hex: &str) -> String {
        md5_hex(&format!("{}:{}", ts_hex, self.secret))
    }

    /// Current nonce, re-issued when aged past the ceiling.
    pub fn get(&mut self) -> String {
        let now = unix_now();
        if self.nonce.is_empty() || now.saturating_sub(self.time) >= self.reissue_age {
            let ts_hex = format!("{:08x}", now);
            self.nonce = format!("{}:{}", ts_hex, self.mac(&ts_hex));
            self.time = now;
        }
        self.nonce.clone()
    }

    /// Age of a nonce in seconds, negative for a tampered or foreign one.
    pub fn age(&self, nonce: &str) -> i64 {
        let (ts_hex, mac) = match nonce.split_once(':') {
            Some(parts) => parts,
            None => return -1,
        };
        if self.mac(ts_hex) != mac {
            return -1;
        }
        match u64::from_str_radix(ts_hex, 16) {
            Ok(ts) if ts <= unix_now() => (unix_now() - ts) as i64,
            _ => -1,
        }
    }
}
