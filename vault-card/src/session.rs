//! The card transport contract and the paired session.
//!
//! A session spans one physical tap: select, exchange APDUs, deselect.
//! Once a card is paired, every exchange is encrypted under the pairing
//! secret (full-tag ChaCha20-Poly1305 on the wire; only the at-rest share
//! envelope truncates tags). The pairing secret itself is derived from the
//! randoms both sides contribute during the pairing handshake, bound to
//! the card family id.

use async_trait::async_trait;
use ring::aead;
use thiserror::Error;
use vault_common::{
    card::{CardNumber, FamilyId},
    error::CoreError,
    rng::{Crng, RngExt},
    secret::PersistedSecret,
};

/// What the NFC front end reports once a card is selected.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CardIdentity {
    pub card_number: CardNumber,
    pub family_id: FamilyId,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum TransportError {
    /// The card left the field mid-operation.
    #[error("card removed from the field")]
    Removed,
    /// Low-level NFC / framing failure.
    #[error("nfc transport failure")]
    Transport,
}

impl From<TransportError> for CoreError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Removed => CoreError::CardRemoved,
            TransportError::Transport => CoreError::CardTransport,
        }
    }
}

/// The NFC driver contract (PN532 on the real device). One card at a time:
/// `select` claims the field until `deselect`.
#[async_trait(?Send)]
pub trait CardTransport {
    /// Select the card currently in the field.
    async fn select(&mut self) -> Result<CardIdentity, TransportError>;

    /// One raw request/response exchange with the selected card.
    async fn exchange(
        &mut self,
        request: &[u8],
    ) -> Result<Vec<u8>, TransportError>;

    /// Release the field.
    async fn deselect(&mut self);

    /// Wait until the user removes the card from the field.
    async fn wait_for_removal(&mut self);
}

/// Derive the pairing secret both sides compute during the handshake.
///
/// On the real device the co-processor contributes an ECDH step here; the
/// core's contract is only that both sides end up with the same 32 bytes
/// bound to this card family.
pub fn derive_pairing_secret(
    device_random: &[u8; 32],
    card_random: &[u8; 32],
    family_id: &FamilyId,
) -> PersistedSecret {
    const PAIRING_SALT: [u8; 32] =
        vault_std::array::pad(*b"x1-card:pairing:v1");

    let salt =
        ring::hkdf::Salt::new(ring::hkdf::HKDF_SHA256, &PAIRING_SALT);
    let ikm: [u8; 64] = vault_std::array::concat(device_random, card_random);

    let prk = salt.extract(&ikm);
    let info = [family_id.0.as_slice()];
    let okm = prk
        .expand(&info, ring::hkdf::HKDF_SHA256)
        .expect("32-byte output fits HKDF-SHA256");

    let mut secret = [0u8; 32];
    okm.fill(&mut secret).expect("lengths match");
    PersistedSecret::new(secret)
}

const NONCE_LEN: usize = 12;

/// Encrypt one wire message under the pairing secret:
/// `nonce(12) || ciphertext || tag(16)`.
pub fn seal_message<R: Crng>(
    key: &PersistedSecret,
    rng: &mut R,
    plaintext: &[u8],
) -> Vec<u8> {
    let key = aead::LessSafeKey::new(
        aead::UnboundKey::new(&aead::CHACHA20_POLY1305, key.expose())
            .expect("key is 32 bytes"),
    );

    let nonce_bytes: [u8; NONCE_LEN] = rng.gen_bytes();
    let nonce = aead::Nonce::assume_unique_for_key(nonce_bytes);

    let mut out = Vec::with_capacity(
        NONCE_LEN + plaintext.len() + aead::CHACHA20_POLY1305.tag_len(),
    );
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(plaintext);

    let tag = key
        .seal_in_place_separate_tag(nonce, aead::Aad::empty(), &mut out[NONCE_LEN..])
        .expect("wire messages are far below the AEAD limit");
    out.extend_from_slice(tag.as_ref());
    out
}

/// Decrypt one wire message. Any framing or authentication failure is a
/// transport-level error; the session can't tell them apart.
pub fn open_message(
    key: &PersistedSecret,
    data: &[u8],
) -> Result<Vec<u8>, CoreError> {
    let tag_len = aead::CHACHA20_POLY1305.tag_len();
    if data.len() < NONCE_LEN + tag_len {
        return Err(CoreError::CardTransport);
    }

    let key = aead::LessSafeKey::new(
        aead::UnboundKey::new(&aead::CHACHA20_POLY1305, key.expose())
            .expect("key is 32 bytes"),
    );

    let nonce_bytes: [u8; NONCE_LEN] =
        data[..NONCE_LEN].try_into().expect("length checked");
    let nonce = aead::Nonce::assume_unique_for_key(nonce_bytes);

    let mut buf = data[NONCE_LEN..].to_vec();
    let plaintext = key
        .open_in_place(nonce, aead::Aad::empty(), &mut buf)
        .map_err(|_| CoreError::CardTransport)?;
    let len = plaintext.len();
    buf.truncate(len);
    Ok(buf)
}

#[cfg(test)]
mod test {
    use vault_common::rng::SmallRng;

    use super::*;

    #[test]
    fn pairing_secret_is_symmetric_and_bound() {
        let device = [1u8; 32];
        let card = [2u8; 32];
        let family = FamilyId([3, 4, 5, 6]);

        let a = derive_pairing_secret(&device, &card, &family);
        let b = derive_pairing_secret(&device, &card, &family);
        assert_eq!(a, b);

        // Different family id, different secret.
        let c = derive_pairing_secret(&device, &card, &FamilyId([0; 4]));
        assert_ne!(a, c);
    }

    #[test]
    fn wire_roundtrip() {
        let mut rng = SmallRng::from_u64(21);
        let key = PersistedSecret::new([7; 32]);

        let sealed = seal_message(&key, &mut rng, b"hello card");
        let opened = open_message(&key, &sealed).unwrap();
        assert_eq!(opened, b"hello card");
    }

    #[test]
    fn wire_tamper_fails() {
        let mut rng = SmallRng::from_u64(22);
        let key = PersistedSecret::new([7; 32]);

        let mut sealed = seal_message(&key, &mut rng, b"hello card");
        *sealed.last_mut().unwrap() ^= 1;
        assert_eq!(
            open_message(&key, &sealed),
            Err(CoreError::CardTransport)
        );

        // Wrong key fails too.
        let sealed = seal_message(&key, &mut rng, b"hello card");
        let wrong = PersistedSecret::new([8; 32]);
        assert_eq!(
            open_message(&wrong, &sealed),
            Err(CoreError::CardTransport)
        );
    }

    #[test]
    fn short_frames_rejected() {
        let key = PersistedSecret::new([7; 32]);
        assert_eq!(
            open_message(&key, &[0u8; 8]),
            Err(CoreError::CardTransport)
        );
    }
}
