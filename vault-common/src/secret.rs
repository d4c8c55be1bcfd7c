//! Self-wiping byte buffers for secret material.
//!
//! Every secret the core touches (entropy, mnemonic, PIN hashes, shares,
//! derived keys) is kept inside [`SecretBytes`], which zeroizes its contents
//! on drop and redacts `Debug`. Secrets are single-owner: the buffer moves
//! with the value and is wiped on every exit path without the flow code
//! having to remember to do so.

use std::fmt;

use secrecy::{ExposeSecret, Secret};
use zeroize::Zeroizing;

use crate::rng::Crng;

/// A fixed-size secret byte buffer that wipes itself on drop.
pub struct SecretBytes<const N: usize>(Secret<[u8; N]>);

impl<const N: usize> SecretBytes<N> {
    pub const LENGTH: usize = N;

    pub fn new(bytes: [u8; N]) -> Self {
        Self(Secret::new(bytes))
    }

    /// All-zero buffer, e.g. the share-encryption key of a PIN-less wallet.
    pub fn zero() -> Self {
        Self::new([0u8; N])
    }

    pub fn from_rng<R: Crng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; N];
        rng.fill_bytes(&mut bytes);
        Self(Secret::new(bytes))
    }

    /// Copies from a slice of exactly `N` bytes.
    pub fn try_from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != N {
            return None;
        }
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Some(Self::new(out))
    }
}

impl<const N: usize> ExposeSecret<[u8; N]> for SecretBytes<N> {
    fn expose_secret(&self) -> &[u8; N] {
        self.0.expose_secret()
    }
}

impl<const N: usize> Clone for SecretBytes<N> {
    fn clone(&self) -> Self {
        Self::new(*self.0.expose_secret())
    }
}

impl<const N: usize> PartialEq for SecretBytes<N> {
    /// Constant-time comparison.
    fn eq(&self, other: &Self) -> bool {
        ring::constant_time::verify_slices_are_equal(
            self.0.expose_secret(),
            other.0.expose_secret(),
        )
        .is_ok()
    }
}

impl<const N: usize> Eq for SecretBytes<N> {}

impl<const N: usize> fmt::Debug for SecretBytes<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Avoid formatting secrets.
        write!(f, "SecretBytes<{N}>(..)")
    }
}

/// A secret UTF-8 string (PIN or passphrase input) that wipes on drop.
pub struct SecretString(Secret<String>);

impl SecretString {
    pub fn new(s: String) -> Self {
        Self(Secret::new(s))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn len(&self) -> usize {
        self.0.expose_secret().chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }
}

impl Clone for SecretString {
    fn clone(&self) -> Self {
        Self::new(self.0.expose_secret().clone())
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString(..)")
    }
}

/// A variable-length scratch buffer that wipes on drop. Used for secrets
/// whose size isn't known at compile time (e.g. recovered plaintext).
pub type SecretVec = Zeroizing<Vec<u8>>;

/// A 32-byte secret that, unlike [`SecretBytes`], participates in flash
/// serialization (pairing shared secrets, the IO-protection key). Still
/// wipes on drop and redacts `Debug`.
#[derive(
    Clone,
    serde::Serialize,
    serde::Deserialize,
    zeroize::Zeroize,
    zeroize::ZeroizeOnDrop,
)]
pub struct PersistedSecret([u8; 32]);

impl PersistedSecret {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_rng<R: Crng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn expose(&self) -> &[u8; 32] {
        &self.0
    }
}

impl PartialEq for PersistedSecret {
    /// Constant-time comparison.
    fn eq(&self, other: &Self) -> bool {
        ring::constant_time::verify_slices_are_equal(&self.0, &other.0)
            .is_ok()
    }
}

impl Eq for PersistedSecret {}

impl fmt::Debug for PersistedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PersistedSecret(..)")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::rng::SmallRng;

    #[test]
    fn debug_redacts() {
        let secret = SecretBytes::<32>::new([0x42; 32]);
        assert_eq!(format!("{secret:?}"), "SecretBytes<32>(..)");

        let pin = SecretString::new("1234".to_owned());
        assert_eq!(format!("{pin:?}"), "SecretString(..)");
    }

    #[test]
    fn from_slice_checks_len() {
        assert!(SecretBytes::<4>::try_from_slice(&[0u8; 4]).is_some());
        assert!(SecretBytes::<4>::try_from_slice(&[0u8; 3]).is_none());
        assert!(SecretBytes::<4>::try_from_slice(&[0u8; 5]).is_none());
    }

    #[test]
    fn eq_is_by_value() {
        let mut rng = SmallRng::from_u64(7);
        let a = SecretBytes::<16>::from_rng(&mut rng);
        let b = a.clone();
        assert_eq!(a, b);
        assert_ne!(a, SecretBytes::<16>::zero());
    }
}
