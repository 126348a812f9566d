//! Challenge-response signing for JWT authentication
//!
//! The broker issues a nonce on connect; the client proves key ownership by
//! signing it with the NKey seed. The seed buffer handed to `sign_nonce` is
//! zeroed before the function returns, on success and error paths alike, so
//! signing key material never outlives one challenge-response round trip.
//! The derived keypair's internal material is wiped on drop by `nkeys`.

use crate::error::{PubSubError, Result};
use zeroize::Zeroize;

/// Sign a server nonce with an NKey seed, wiping the seed afterwards
///
/// Deterministic for a fixed seed and nonce (Ed25519).
pub fn sign_nonce(seed: &mut [u8], nonce: &[u8]) -> Result<Vec<u8>> {
    let signature = sign(seed, nonce);
    seed.zeroize();
    signature
}

fn sign(seed: &[u8], nonce: &[u8]) -> Result<Vec<u8>> {
    let seed = std::str::from_utf8(seed)
        .map_err(|_| PubSubError::Connection("NKey seed is not valid UTF-8".to_string()))?;
    let keypair = nkeys::KeyPair::from_seed(seed)
        .map_err(|e| PubSubError::Connection(format!("invalid NKey seed: {}", e)))?;

    keypair
        .sign(nonce)
        .map_err(|e| PubSubError::Connection(format!("nonce signing failed: {}", e)))
}
