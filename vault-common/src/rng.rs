//! Random number generation utilities.

pub use rand_core::{CryptoRng, RngCore, SeedableRng};
use ring::rand::SecureRandom;

/// A succinct trait alias for a Cryptographically Secure PRNG.
pub trait Crng: RngCore + CryptoRng {}

impl<R: RngCore + CryptoRng> Crng for R {}

/// Extension methods on [`RngCore`].
pub trait RngExt: RngCore {
    /// Sample a fixed-size array of random bytes.
    fn gen_bytes<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        self.fill_bytes(&mut out);
        out
    }
}

impl<R: RngCore> RngExt for R {}

/// A compatibility wrapper so we can use `ring`'s PRG with `rand` traits.
#[derive(Clone, Debug)]
pub struct SysRng(ring::rand::SystemRandom);

impl SysRng {
    pub fn new() -> Self {
        Self(ring::rand::SystemRandom::new())
    }
}

impl Default for SysRng {
    fn default() -> Self {
        Self::new()
    }
}

/// [`ring::rand::SystemRandom`] is a cryptographically secure PRG.
impl CryptoRng for SysRng {}

impl RngCore for SysRng {
    #[inline]
    fn next_u32(&mut self) -> u32 {
        rand_core::impls::next_u32_via_fill(self)
    }

    #[inline]
    fn next_u64(&mut self) -> u64 {
        rand_core::impls::next_u64_via_fill(self)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        // The system RNG failing is not a state the firmware can recover
        // from; nothing that needs entropy can proceed.
        self.0.fill(dest).expect("system RNG failed");
    }

    fn try_fill_bytes(
        &mut self,
        dest: &mut [u8],
    ) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

/// A small, fast, _non-cryptographic_ rng (xorshift64*). Used as a
/// deterministic stand-in for [`SysRng`] in tests.
#[derive(Clone, Debug)]
pub struct SmallRng {
    state: u64,
}

impl SmallRng {
    pub fn new() -> Self {
        Self::from_u64(0x193a_6754_a8a7_d469)
    }

    pub fn from_u64(seed: u64) -> Self {
        // xorshift state must be non-zero
        Self {
            state: seed.wrapping_add(0x9e37_79b9_7f4a_7c15) | 1,
        }
    }
}

impl Default for SmallRng {
    fn default() -> Self {
        Self::new()
    }
}

impl SeedableRng for SmallRng {
    type Seed = [u8; 8];

    fn from_seed(seed: Self::Seed) -> Self {
        Self::from_u64(u64::from_le_bytes(seed))
    }
}

/// Only a [`CryptoRng`] in tests, where determinism beats security.
#[cfg(any(test, feature = "test-utils"))]
impl CryptoRng for SmallRng {}

impl RngCore for SmallRng {
    #[inline]
    fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    #[inline]
    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_f491_4f6c_dd1d)
    }

    #[inline]
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        rand_core::impls::fill_bytes_via_next(self, dest);
    }

    #[inline]
    fn try_fill_bytes(
        &mut self,
        dest: &mut [u8],
    ) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

#[cfg(any(test, feature = "test-utils"))]
mod arbitrary_impl {
    use proptest::{
        arbitrary::{any, Arbitrary},
        strategy::{BoxedStrategy, Strategy},
    };

    use super::*;

    impl Arbitrary for SmallRng {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
            any::<u64>().prop_map(SmallRng::from_u64).no_shrink().boxed()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn small_rng_deterministic() {
        let mut a = SmallRng::from_u64(42);
        let mut b = SmallRng::from_u64(42);
        for _ in 0..16 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn small_rng_fills() {
        let mut rng = SmallRng::new();
        let mut buf = [0u8; 37];
        rng.fill_bytes(&mut buf);
        assert_ne!(buf, [0u8; 37]);
    }
}
