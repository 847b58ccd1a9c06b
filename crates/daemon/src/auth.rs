// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared-secret generation, deterministic bearer-token derivation, and
//! constant-time verification.

use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::DaemonError;

/// The fixed HMAC message both peers sign the shared secret against.
const TOKEN_MESSAGE: &[u8] = b"p2p-auth";

/// A 32-byte shared secret, the sole authentication root for one daemon
/// generation.
#[derive(Clone)]
pub struct Secret(pub [u8; 32]);

impl Secret {
    /// Generate a fresh 32-byte shared secret from a CSPRNG.
    ///
    /// `fill` only fails on catastrophic RNG unavailability; there is no
    /// sane fallback, so this is surfaced as a `Fatal` error for the caller
    /// to route through the normal shutdown path rather than arming the
    /// daemon with a guessable, constant secret.
    pub fn generate() -> Result<Self, DaemonError> {
        let rng = SystemRandom::new();
        let mut bytes = [0u8; 32];
        rng.fill(&mut bytes).map_err(|_| DaemonError::Fatal)?;
        Ok(Self(bytes))
    }

    /// Standard base64-with-padding encoding, for on-wire transport (state
    /// file, connect-URL QR payload).
    pub fn to_base64(&self) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(self.0)
    }

    pub fn from_base64(s: &str) -> Option<Self> {
        use base64::Engine;
        let bytes = base64::engine::general_purpose::STANDARD.decode(s).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

/// Derive the deterministic bearer token: lowercase hex of
/// `HMAC-SHA256(secret, "p2p-auth")`. Both peers compute this
/// independently from the shared secret; it is never transmitted alone.
pub fn derive_token(secret: &Secret) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, &secret.0);
    let tag = hmac::sign(&key, TOKEN_MESSAGE);
    hex::encode(tag.as_ref())
}

/// Verify a presented token against the shared secret. Never panics;
/// malformed or mismatched input simply yields `false`. Comparison runs in
/// constant time with respect to byte content (length mismatch still
/// short-circuits, which is acceptable: token length is not secret).
pub fn verify_token(presented: &str, secret: &Secret) -> bool {
    let expected = derive_token(secret);
    constant_time_eq(presented.as_bytes(), expected.as_bytes())
}

/// Constant-time byte comparison. Short-circuits only on length mismatch;
/// for equal-length inputs every byte is inspected regardless of earlier
/// mismatches, so branch timing carries no information about which byte
/// differed.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
