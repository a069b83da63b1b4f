use {
    base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD},
    rand::{TryRngCore, rngs::OsRng},
    sha2::{Digest, Sha256},
};

use crate::{
    error::{AuthError, Result},
    types::PkceChallenge,
};

const VERIFIER_BYTES: usize = 32;
const STATE_BYTES: usize = 24;
const DEVICE_ID_LEN: usize = 10;
const DEVICE_ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

fn random_bytes(len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0_u8; len];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| AuthError::Randomness(e.to_string()))?;
    Ok(buf)
}

/// Derive the S256 challenge for a verifier.
pub fn challenge_for(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Generate a fresh verifier (256 bits) and its challenge.
pub fn generate() -> Result<PkceChallenge> {
    let verifier = URL_SAFE_NO_PAD.encode(random_bytes(VERIFIER_BYTES)?);
    let challenge = challenge_for(&verifier);
    Ok(PkceChallenge {
        verifier,
        challenge,
    })
}

/// Opaque CSRF token (192 bits).
pub fn generate_state() -> Result<String> {
    Ok(URL_SAFE_NO_PAD.encode(random_bytes(STATE_BYTES)?))
}

/// Matrix device id requested through the device scope.
pub fn generate_device_id() -> Result<String> {
    let bytes = random_bytes(DEVICE_ID_LEN)?;
    Ok(bytes
        .iter()
        .map(|b| DEVICE_ID_ALPHABET[usize::from(*b) % DEVICE_ID_ALPHABET.len()] as char)
        .collect())
}
