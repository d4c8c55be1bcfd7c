//! PIN hashing and key derivation.
//!
//! - PIN single hash `SHA256(PIN)` derives the share-encryption key.
//! - PIN double hash `SHA256(SHA256(PIN))` is what cards verify against.
//! - `wallet_id = SHA256(mnemonic string)` is the wallet's primary key.
//! - The wallet key (m/190'/1') and beneficiary key (m/190'/2') are BIP-32
//!   children of the mnemonic seed, used to encrypt persistent xPub caches.

use bitcoin::bip32::{ChildNumber, Xpriv};
use thiserror::Error;
use vault_common::{
    secret::SecretBytes, sha256, wallet::WalletId, ExposeSecret,
};

use crate::mnemonic::MnemonicPhrase;

/// `SHA256(PIN)`. Input to the share-encryption key, never leaves the
/// device.
pub type PinSingleHash = SecretBytes<32>;

/// `SHA256(SHA256(PIN))`. Sent to cards for PIN verification.
pub type PinDoubleHash = SecretBytes<32>;

/// Both PIN hash forms, computed together so the plaintext PIN is touched
/// exactly once.
pub struct PinHashes {
    pub single: PinSingleHash,
    pub double: PinDoubleHash,
}

/// Hash a PIN into its single and double forms.
pub fn hash_pin(pin: &str) -> PinHashes {
    let single = sha256::digest(pin.as_bytes());
    let double = sha256::digest(&single);
    PinHashes {
        single: SecretBytes::new(single),
        double: SecretBytes::new(double),
    }
}

/// Derive the wallet id from a mnemonic. Deterministic; equal mnemonics
/// (and only those, with overwhelming probability) map to equal ids.
pub fn wallet_id(mnemonic: &MnemonicPhrase) -> WalletId {
    WalletId(sha256::digest(mnemonic.phrase().as_bytes()))
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
#[error("BIP32 derivation failed")]
pub struct DeriveError;

/// The xPub-cache encryption key, BIP-32 node m/190'/1'.
pub fn derive_wallet_key(
    mnemonic: &MnemonicPhrase,
) -> Result<SecretBytes<32>, DeriveError> {
    derive_hardened(mnemonic, &[190, 1])
}

/// The beneficiary key, BIP-32 node m/190'/2'.
pub fn derive_beneficiary_key(
    mnemonic: &MnemonicPhrase,
) -> Result<SecretBytes<32>, DeriveError> {
    derive_hardened(mnemonic, &[190, 2])
}

fn derive_hardened(
    mnemonic: &MnemonicPhrase,
    path: &[u32],
) -> Result<SecretBytes<32>, DeriveError> {
    let seed = mnemonic.to_seed();
    let master = Xpriv::new_master(bitcoin::Network::Bitcoin, seed.as_ref())
        .map_err(|_| DeriveError)?;

    let path = path
        .iter()
        .map(|idx| ChildNumber::from_hardened_idx(*idx))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| DeriveError)?;

    let secp = bitcoin::secp256k1::Secp256k1::new();
    let child = master.derive_priv(&secp, &path).map_err(|_| DeriveError)?;

    Ok(SecretBytes::new(child.private_key.secret_bytes()))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mnemonic;

    const PHRASE: &str = "abandon abandon abandon abandon abandon abandon \
                          abandon abandon abandon abandon abandon about";

    #[test]
    fn pin_hashes_relate() {
        let hashes = hash_pin("1234");
        assert_eq!(
            *hashes.double.expose_secret(),
            sha256::digest(hashes.single.expose_secret()),
        );
        assert_eq!(
            *hashes.single.expose_secret(),
            sha256::digest(b"1234"),
        );
    }

    #[test]
    fn wallet_id_is_mnemonic_hash() {
        let mnemonic = mnemonic::parse(PHRASE).unwrap();
        let id = wallet_id(&mnemonic);
        assert_eq!(id.0, sha256::digest(mnemonic.phrase().as_bytes()));

        // Deterministic across calls.
        assert_eq!(id, wallet_id(&mnemonic));
    }

    #[test]
    fn derived_keys_differ() {
        let mnemonic = mnemonic::parse(PHRASE).unwrap();
        let wallet_key = derive_wallet_key(&mnemonic).unwrap();
        let beneficiary_key = derive_beneficiary_key(&mnemonic).unwrap();
        assert_ne!(wallet_key, beneficiary_key);
    }

    #[test]
    fn derivation_is_deterministic() {
        let mnemonic = mnemonic::parse(PHRASE).unwrap();
        assert_eq!(
            derive_wallet_key(&mnemonic).unwrap(),
            derive_wallet_key(&mnemonic).unwrap()
        );
    }
}
