//! Cryptography for the vault firmware core: (2,5) Shamir secret sharing
//! over GF(2^8), the ChaCha20-Poly1305 share envelope, mnemonic handling,
//! key derivation, and the wallet-unlock proof-of-work.

/// The persistent share envelope (truncated-tag ChaCha20-Poly1305).
pub mod envelope;
/// GF(2^8) field arithmetic.
mod gf256;
/// PIN hashing, wallet-id and wallet/beneficiary key derivation.
pub mod kdf;
/// BIP-39 mnemonic wrapper.
pub mod mnemonic;
/// Wallet-unlock proof-of-work.
pub mod pow;
/// (2,5) Shamir split / reconstruct.
pub mod shamir;
