//! Authenticated key sharing between vault members.
//!
//! A vault key travels to another member's device wrapped under a key
//! agreed by static-static x25519 Diffie-Hellman between the sender's
//! identity keypair and the recipient's public key. The DH output is
//! run through the keyed-derivation primitive with a sharing-specific
//! context before use, and the AEAD binds a share-domain tag, so a
//! wrapped payload is only readable by the intended recipient and only
//! as a key share.

use zeroize::Zeroize;

use crate::aead::{NONCE_SIZE, TAG_SIZE};
use crate::keys::{IdentityKeypair, MasterKey, PublicKey, KEY_LENGTH};
use crate::provider::{CryptoProvider, CONTEXT_LENGTH};
use strongroom_common::{Error, Result};

/// Derivation context separating share-wrap keys from all other sub-keys.
const SHARE_CONTEXT: &[u8; CONTEXT_LENGTH] = b"keyshare";

/// Sub-key index for share-wrap keys.
const SHARE_KEY_INDEX: u64 = 1;

/// Domain tag authenticated into every shared payload.
const SHARE_AAD: &[u8] = b"strongroom-keyshare-v1";

/// Derive the symmetric wrap key for one (sender, recipient) pair.
///
/// Rejects degenerate DH results from low-order public keys.
fn wrap_key(
    crypto: &dyn CryptoProvider,
    local: &IdentityKeypair,
    remote: &PublicKey,
) -> Result<[u8; KEY_LENGTH]> {
    let shared = local.secret().diffie_hellman(remote);
    if !shared.was_contributory() {
        return Err(Error::AuthenticationFailed);
    }
    crypto.keyed_derive(shared.as_bytes(), SHARE_KEY_INDEX, SHARE_CONTEXT)
}

/// Wrap a vault key for a recipient.
///
/// # Postconditions
/// - Returns nonce || ciphertext; only the recipient's secret key (or
///   the sender's own, since DH is symmetric) can unwrap it
///
/// # Errors
/// - `AuthenticationFailed` if the recipient public key is degenerate
pub fn share_key(
    crypto: &dyn CryptoProvider,
    vault_key: &MasterKey,
    recipient: &PublicKey,
    sender: &IdentityKeypair,
) -> Result<Vec<u8>> {
    let mut wrap = wrap_key(crypto, sender, recipient)?;

    let mut nonce = [0u8; NONCE_SIZE];
    crypto.random_bytes(&mut nonce);

    let sealed = crypto.aead_seal(&wrap, &nonce, vault_key.as_bytes(), SHARE_AAD);
    wrap.zeroize();
    let sealed = sealed?;

    let mut payload = Vec::with_capacity(NONCE_SIZE + sealed.len());
    payload.extend_from_slice(&nonce);
    payload.extend_from_slice(&sealed);
    Ok(payload)
}

/// Unwrap a shared vault key.
///
/// # Errors
/// - `AuthenticationFailed` if the payload is malformed, was not
///   produced for this (sender, recipient) pair, or has been tampered
///   with; the cases are indistinguishable by design
pub fn unshare_key(
    crypto: &dyn CryptoProvider,
    payload: &[u8],
    sender_public: &PublicKey,
    recipient: &IdentityKeypair,
) -> Result<MasterKey> {
    if payload.len() < NONCE_SIZE + KEY_LENGTH + TAG_SIZE {
        return Err(Error::AuthenticationFailed);
    }

    let (nonce_bytes, sealed) = payload.split_at(NONCE_SIZE);
    let nonce: [u8; NONCE_SIZE] = nonce_bytes
        .try_into()
        .map_err(|_| Error::AuthenticationFailed)?;

    let mut wrap = wrap_key(crypto, recipient, sender_public)?;
    let opened = crypto.aead_open(&wrap, &nonce, sealed, SHARE_AAD);
    wrap.zeroize();

    let mut key_bytes = opened.map_err(|_| Error::AuthenticationFailed)?;
    let key = MasterKey::from_slice(&key_bytes).map_err(|_| Error::AuthenticationFailed);
    key_bytes.zeroize();
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::SoftwareCrypto;

    fn vault_key() -> MasterKey {
        MasterKey::from_bytes([0xA5u8; KEY_LENGTH])
    }

    #[test]
    fn test_share_unshare_roundtrip() {
        let crypto = SoftwareCrypto::new();
        let sender = IdentityKeypair::generate();
        let recipient = IdentityKeypair::generate();

        let payload = share_key(&crypto, &vault_key(), recipient.public(), &sender).unwrap();
        let unwrapped = unshare_key(&crypto, &payload, sender.public(), &recipient).unwrap();

        assert_eq!(unwrapped.as_bytes(), vault_key().as_bytes());
    }

    #[test]
    fn test_wrong_recipient_fails() {
        let crypto = SoftwareCrypto::new();
        let sender = IdentityKeypair::generate();
        let recipient = IdentityKeypair::generate();
        let outsider = IdentityKeypair::generate();

        let payload = share_key(&crypto, &vault_key(), recipient.public(), &sender).unwrap();
        let result = unshare_key(&crypto, &payload, sender.public(), &outsider);

        assert!(matches!(result, Err(Error::AuthenticationFailed)));
    }

    #[test]
    fn test_wrong_sender_public_fails() {
        let crypto = SoftwareCrypto::new();
        let sender = IdentityKeypair::generate();
        let recipient = IdentityKeypair::generate();
        let outsider = IdentityKeypair::generate();

        let payload = share_key(&crypto, &vault_key(), recipient.public(), &sender).unwrap();
        let result = unshare_key(&crypto, &payload, outsider.public(), &recipient);

        assert!(matches!(result, Err(Error::AuthenticationFailed)));
    }

    #[test]
    fn test_tampered_payload_fails() {
        let crypto = SoftwareCrypto::new();
        let sender = IdentityKeypair::generate();
        let recipient = IdentityKeypair::generate();

        let mut payload = share_key(&crypto, &vault_key(), recipient.public(), &sender).unwrap();
        payload[NONCE_SIZE + 3] ^= 0xFF;

        let result = unshare_key(&crypto, &payload, sender.public(), &recipient);
        assert!(matches!(result, Err(Error::AuthenticationFailed)));
    }

    #[test]
    fn test_short_payload_fails() {
        let crypto = SoftwareCrypto::new();
        let sender = IdentityKeypair::generate();
        let recipient = IdentityKeypair::generate();

        let result = unshare_key(&crypto, &[0u8; 8], sender.public(), &recipient);
        assert!(matches!(result, Err(Error::AuthenticationFailed)));
    }

    #[test]
    fn test_low_order_public_key_rejected() {
        let crypto = SoftwareCrypto::new();
        let sender = IdentityKeypair::generate();
        // The identity point; DH with it yields an all-zero shared secret.
        let degenerate = PublicKey::from([0u8; KEY_LENGTH]);

        let result = share_key(&crypto, &vault_key(), &degenerate, &sender);
        assert!(matches!(result, Err(Error::AuthenticationFailed)));
    }

    #[test]
    fn test_payloads_are_nondeterministic() {
        let crypto = SoftwareCrypto::new();
        let sender = IdentityKeypair::generate();
        let recipient = IdentityKeypair::generate();

        let a = share_key(&crypto, &vault_key(), recipient.public(), &sender).unwrap();
        let b = share_key(&crypto, &vault_key(), recipient.public(), &sender).unwrap();

        assert_ne!(a, b);
    }
}
