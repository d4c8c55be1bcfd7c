//! The persistent share envelope: per-share ChaCha20-Poly1305 with a
//! truncated tag.
//!
//! The at-rest format keeps only the first 4 bytes of the Poly1305 tag (a
//! share blob is 32 ciphertext + 12 nonce + 4 tag = 48 bytes). The AEAD
//! crates only verify full tags, so `open` recovers the plaintext with the
//! raw ChaCha20 keystream (payload starts at block 1 per RFC 8439), then
//! recomputes the full tag over it and compares the stored prefix in
//! constant time.
//!
//! The envelope key is `SHA256(single_hash(PIN))` when the wallet has a
//! PIN, and the all-zero key otherwise.
//!
//! Nonces: the device draws one fresh 12-byte nonce per wallet at creation;
//! each share's nonce is that seed with the per-share counter (the Shamir
//! x-coordinate) added into the trailing 4 bytes. A reconstruct step can
//! therefore detect mixed-wallet shares by stripping the counters and
//! comparing seeds, before running Shamir at all.

use chacha20::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use chacha20poly1305::{aead::AeadInPlace, ChaCha20Poly1305, KeyInit};
use thiserror::Error;
use vault_common::{
    constants::{ENVELOPE_NONCE_LEN, ENVELOPE_TAG_LEN, SHARE_LEN},
    rng::Crng,
    secret::SecretBytes,
    sha256,
    wallet::{SealedShare, ShareEnvelope},
    ExposeSecret,
};

use crate::kdf::PinSingleHash;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
#[error("share envelope failed to authenticate")]
pub struct ShareCorrupt;

/// The symmetric key protecting share envelopes.
pub struct EnvelopeKey(SecretBytes<32>);

impl EnvelopeKey {
    /// Key for a PIN-protected wallet: `SHA256(single_hash(PIN))`.
    pub fn from_pin(single_hash: &PinSingleHash) -> Self {
        Self(SecretBytes::new(sha256::digest(
            single_hash.expose_secret(),
        )))
    }

    /// The all-zero key used when no PIN is set.
    pub fn unprotected() -> Self {
        Self(SecretBytes::zero())
    }

    /// Encrypt one share under this key.
    pub fn seal(
        &self,
        nonce: &[u8; ENVELOPE_NONCE_LEN],
        share: &SecretBytes<SHARE_LEN>,
    ) -> SealedShare {
        let cipher = ChaCha20Poly1305::new(self.0.expose_secret().into());

        let mut buf = *share.expose_secret();
        let tag = cipher
            .encrypt_in_place_detached(nonce.into(), b"", &mut buf)
            .expect("32-byte payload can't exceed the AEAD limit");

        let mut truncated = [0u8; ENVELOPE_TAG_LEN];
        truncated.copy_from_slice(&tag[..ENVELOPE_TAG_LEN]);

        SealedShare {
            ciphertext: buf,
            envelope: ShareEnvelope {
                nonce: *nonce,
                tag: truncated,
            },
        }
    }

    /// Decrypt one share; a wrong key or tampered blob yields
    /// [`ShareCorrupt`].
    pub fn open(
        &self,
        sealed: &SealedShare,
    ) -> Result<SecretBytes<SHARE_LEN>, ShareCorrupt> {
        // Recover the candidate plaintext with the raw keystream. Block 0
        // is reserved for the Poly1305 key, the payload starts at block 1.
        let mut plaintext = sealed.ciphertext;
        let mut stream = chacha20::ChaCha20::new(
            self.0.expose_secret().into(),
            (&sealed.envelope.nonce).into(),
        );
        stream.seek(64u64);
        stream.apply_keystream(&mut plaintext);

        // Recompute the full tag over the candidate and compare prefixes.
        let cipher = ChaCha20Poly1305::new(self.0.expose_secret().into());
        let mut reencrypted = plaintext;
        let tag = cipher
            .encrypt_in_place_detached(
                (&sealed.envelope.nonce).into(),
                b"",
                &mut reencrypted,
            )
            .expect("32-byte payload can't exceed the AEAD limit");

        let tag_ok = ring::constant_time::verify_slices_are_equal(
            &tag[..ENVELOPE_TAG_LEN],
            &sealed.envelope.tag,
        )
        .is_ok();

        // Belt and braces: the recomputed ciphertext must match too.
        let ct_ok = ring::constant_time::verify_slices_are_equal(
            &reencrypted,
            &sealed.ciphertext,
        )
        .is_ok();

        let plaintext = SecretBytes::new(plaintext);
        if tag_ok && ct_ok {
            Ok(plaintext)
        } else {
            Err(ShareCorrupt)
        }
    }
}

/// Draw the per-wallet nonce seed at wallet creation.
pub fn derive_wallet_nonce<R: Crng>(rng: &mut R) -> [u8; ENVELOPE_NONCE_LEN] {
    let mut nonce = [0u8; ENVELOPE_NONCE_LEN];
    rng.fill_bytes(&mut nonce);
    nonce
}

/// The nonce for the share at x-coordinate `x`: the wallet seed with `x`
/// added into the trailing 4-byte counter.
pub fn share_nonce(
    wallet_nonce: &[u8; ENVELOPE_NONCE_LEN],
    x: u8,
) -> [u8; ENVELOPE_NONCE_LEN] {
    let mut nonce = *wallet_nonce;
    let counter =
        u32::from_le_bytes(nonce[8..12].try_into().unwrap()).wrapping_add(
            u32::from(x),
        );
    nonce[8..12].copy_from_slice(&counter.to_le_bytes());
    nonce
}

/// Invert [`share_nonce`]: recover the wallet seed from a share's nonce.
pub fn wallet_nonce_of_share(
    nonce: &[u8; ENVELOPE_NONCE_LEN],
    x: u8,
) -> [u8; ENVELOPE_NONCE_LEN] {
    let mut seed = *nonce;
    let counter =
        u32::from_le_bytes(seed[8..12].try_into().unwrap()).wrapping_sub(
            u32::from(x),
        );
    seed[8..12].copy_from_slice(&counter.to_le_bytes());
    seed
}
