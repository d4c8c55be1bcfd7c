//! BIP-39 mnemonic handling.
//!
//! Wraps [`bip39::Mnemonic`] (built with its `zeroize` feature) so the rest
//! of the core never touches raw word strings. The Shamir master secret is
//! the mnemonic's entropy zero-padded to 32 bytes; the word count recorded
//! in the wallet header recovers the original entropy length.

use std::fmt;

use thiserror::Error;
use vault_common::{
    constants::SHARE_LEN, rng::Crng, secret::SecretBytes,
    wallet::WordCount, ExposeSecret,
};
use zeroize::Zeroizing;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum MnemonicError {
    #[error("unsupported mnemonic word count")]
    BadWordCount,
    #[error("mnemonic failed BIP-39 validation")]
    Invalid,
}

/// A validated BIP-39 mnemonic.
pub struct MnemonicPhrase(bip39::Mnemonic);

/// Generate a fresh mnemonic from `word_count.entropy_len()` bytes of
/// system entropy.
pub fn generate<R: Crng>(
    rng: &mut R,
    word_count: WordCount,
) -> MnemonicPhrase {
    let mut entropy = Zeroizing::new([0u8; 32]);
    let len = word_count.entropy_len();
    rng.fill_bytes(&mut entropy[..len]);

    let mnemonic = bip39::Mnemonic::from_entropy(&entropy[..len])
        .expect("entropy length is one of 16/24/32");
    MnemonicPhrase(mnemonic)
}

/// Parse user-supplied words, validating the BIP-39 checksum.
pub fn parse(phrase: &str) -> Result<MnemonicPhrase, MnemonicError> {
    let mnemonic = bip39::Mnemonic::parse_normalized(phrase)
        .map_err(|_| MnemonicError::Invalid)?;
    WordCount::from_words(mnemonic.word_count())
        .ok_or(MnemonicError::BadWordCount)?;
    Ok(MnemonicPhrase(mnemonic))
}

impl MnemonicPhrase {
    pub fn word_count(&self) -> WordCount {
        WordCount::from_words(self.0.word_count())
            .expect("checked at construction")
    }

    /// The space-separated phrase; wiped when the returned buffer drops.
    pub fn phrase(&self) -> Zeroizing<String> {
        Zeroizing::new(self.0.to_string())
    }

    /// Iterate the words, e.g. for the view-seed screens.
    pub fn words(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.0.words()
    }

    /// The 64-byte BIP-39 seed (empty passphrase).
    pub fn to_seed(&self) -> Zeroizing<[u8; 64]> {
        Zeroizing::new(self.0.to_seed_normalized(""))
    }

    /// The Shamir master secret: entropy zero-padded to 32 bytes.
    pub fn to_master_secret(&self) -> SecretBytes<SHARE_LEN> {
        let (entropy, len) = self.0.to_entropy_array();
        let mut secret = [0u8; SHARE_LEN];
        secret[..len].copy_from_slice(&entropy[..len]);
        SecretBytes::new(secret)
    }

    /// Rebuild the mnemonic from a reconstructed master secret.
    pub fn from_master_secret(
        secret: &SecretBytes<SHARE_LEN>,
        word_count: WordCount,
    ) -> Result<Self, MnemonicError> {
        let len = word_count.entropy_len();
        let entropy = &secret.expose_secret()[..len];
        bip39::Mnemonic::from_entropy(entropy)
            .map(Self)
            .map_err(|_| MnemonicError::Invalid)
    }
}

impl fmt::Debug for MnemonicPhrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print the words.
        write!(f, "MnemonicPhrase({} words, ..)", self.0.word_count())
    }
}

#[cfg(test)]
mod test {
    use vault_common::rng::SmallRng;

    use super::*;

    #[test]
    fn generate_word_counts() {
        let mut rng = SmallRng::from_u64(11);
        for wc in
            [WordCount::Twelve, WordCount::Eighteen, WordCount::TwentyFour]
        {
            let mnemonic = generate(&mut rng, wc);
            assert_eq!(mnemonic.word_count(), wc);
            assert_eq!(
                mnemonic.phrase().split_whitespace().count(),
                wc.words()
            );
        }
    }

    #[test]
    fn parse_checks_checksum() {
        // Valid test vector.
        assert!(parse(
            "abandon abandon abandon abandon abandon abandon abandon \
             abandon abandon abandon abandon about"
        )
        .is_ok());

        // Same words, broken checksum.
        assert!(matches!(
            parse(
                "abandon abandon abandon abandon abandon abandon abandon \
                 abandon abandon abandon abandon abandon"
            ),
            Err(MnemonicError::Invalid)
        ));
    }

    #[test]
    fn master_secret_roundtrip() {
        let mut rng = SmallRng::from_u64(12);
        for wc in
            [WordCount::Twelve, WordCount::Eighteen, WordCount::TwentyFour]
        {
            let mnemonic = generate(&mut rng, wc);
            let secret = mnemonic.to_master_secret();

            // Padding beyond the entropy is zero.
            let len = wc.entropy_len();
            assert!(secret.expose_secret()[len..].iter().all(|b| *b == 0));

            let rebuilt =
                MnemonicPhrase::from_master_secret(&secret, wc).unwrap();
            assert_eq!(*mnemonic.phrase(), *rebuilt.phrase());
        }
    }

    #[test]
    fn debug_redacts() {
        let mut rng = SmallRng::from_u64(13);
        let mnemonic = generate(&mut rng, WordCount::Twelve);
        let debug = format!("{mnemonic:?}");
        assert!(!debug.contains(&*mnemonic.phrase()));
    }
}
