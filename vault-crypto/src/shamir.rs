//! Byte-wise (2-of-5) Shamir secret sharing over GF(2^8).
//!
//! Each byte of the 32-byte secret is split independently with a fresh
//! degree-1 polynomial `p(x) = s + a*x`; share *i* holds `p(x_i)` for its
//! x-coordinate. Cards hold x ∈ {1..4}, the device holds x = 5.

use thiserror::Error;
use vault_common::{
    constants::{DEVICE_SHARE_X, RECONSTRUCT_THRESHOLD, SHARE_COUNT, SHARE_LEN},
    rng::Crng,
    secret::SecretBytes,
    ExposeSecret,
};

use crate::gf256;

/// The 32-byte master secret (zero-padded wallet entropy).
pub type Secret = SecretBytes<SHARE_LEN>;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum ShamirError {
    /// Fewer than two distinct points supplied.
    #[error("at least {RECONSTRUCT_THRESHOLD} shares are required")]
    Underdetermined,
    /// Two supplied shares claim the same x-coordinate.
    #[error("duplicate share x-coordinate")]
    DuplicateX,
    /// An x-coordinate outside 1..=5 (x = 0 would leak the secret).
    #[error("share x-coordinate out of range")]
    BadXCoord,
}

/// One share: its x-coordinate and 32 bytes of polynomial evaluations.
pub struct Share {
    pub x: u8,
    pub data: SecretBytes<SHARE_LEN>,
}

impl Share {
    pub fn new(x: u8, data: SecretBytes<SHARE_LEN>) -> Self {
        Self { x, data }
    }
}

/// Split `secret` into [`SHARE_COUNT`] shares at x-coordinates 1..=5.
/// Any [`RECONSTRUCT_THRESHOLD`] of them recover the secret.
pub fn split<R: Crng>(rng: &mut R, secret: &Secret) -> Vec<Share> {
    // One random degree-1 coefficient per secret byte; wiped on drop.
    let coeffs = SecretBytes::<SHARE_LEN>::from_rng(rng);

    (1..=SHARE_COUNT as u8)
        .map(|x| {
            let mut data = [0u8; SHARE_LEN];
            for (byte, (s, a)) in data.iter_mut().zip(
                secret
                    .expose_secret()
                    .iter()
                    .zip(coeffs.expose_secret().iter()),
            ) {
                *byte = s ^ gf256::mul(*a, x);
            }
            Share::new(x, SecretBytes::new(data))
        })
        .collect()
}

/// Reconstruct the secret from any ≥ 2 shares by Lagrange interpolation
/// at x = 0.
pub fn reconstruct(shares: &[Share]) -> Result<Secret, ShamirError> {
    interpolate(shares, 0)
}

/// Evaluate the shared polynomial at another x-coordinate, e.g. to
/// regenerate the device share (x = 5) from two card shares without
/// re-randomizing the polynomial.
pub fn evaluate_at(
    shares: &[Share],
    x: u8,
) -> Result<SecretBytes<SHARE_LEN>, ShamirError> {
    if x == 0 || x > DEVICE_SHARE_X {
        return Err(ShamirError::BadXCoord);
    }
    interpolate(shares, x)
}

fn interpolate(
    shares: &[Share],
    at: u8,
) -> Result<SecretBytes<SHARE_LEN>, ShamirError> {
    if shares.len() < RECONSTRUCT_THRESHOLD {
        return Err(ShamirError::Underdetermined);
    }
    for share in shares {
        if share.x == 0 || share.x > DEVICE_SHARE_X {
            return Err(ShamirError::BadXCoord);
        }
    }
    for (i, a) in shares.iter().enumerate() {
        if shares[i + 1..].iter().any(|b| b.x == a.x) {
            return Err(ShamirError::DuplicateX);
        }
    }

    let mut out = [0u8; SHARE_LEN];
    for (i, share) in shares.iter().enumerate() {
        // basis_i(at) = Π_{k≠i} (at + x_k) / (x_i + x_k)
        let mut basis: u8 = 1;
        for (k, other) in shares.iter().enumerate() {
            if k == i {
                continue;
            }
            basis = gf256::mul(
                basis,
                gf256::div(at ^ other.x, share.x ^ other.x),
            );
        }
        for (byte, y) in out.iter_mut().zip(share.data.expose_secret()) {
            *byte ^= gf256::mul(basis, *y);
        }
    }

    Ok(SecretBytes::new(out))
}

#[cfg(test)]
mod test {
    use proptest::{arbitrary::any, proptest};
    use vault_common::rng::SmallRng;

    use super::*;

    #[test]
    fn any_two_shares_reconstruct() {
        proptest!(|(
            mut rng in any::<SmallRng>(),
            secret_bytes in any::<[u8; 32]>(),
        )| {
            let secret = SecretBytes::new(secret_bytes);
            let shares = split(&mut rng, &secret);
            assert_eq!(shares.len(), 5);

            for i in 0..5 {
                for j in 0..5 {
                    if i == j {
                        continue;
                    }
                    let pair = [
                        Share::new(shares[i].x, shares[i].data.clone()),
                        Share::new(shares[j].x, shares[j].data.clone()),
                    ];
                    let recovered = reconstruct(&pair).unwrap();
                    assert_eq!(recovered, secret);
                }
            }
        });
    }

    #[test]
    fn all_five_shares_reconstruct() {
        let mut rng = SmallRng::from_u64(99);
        let secret = SecretBytes::new([0x5a; 32]);
        let shares = split(&mut rng, &secret);
        assert_eq!(reconstruct(&shares).unwrap(), secret);
    }

    #[test]
    fn single_share_fails() {
        let mut rng = SmallRng::from_u64(1);
        let secret = SecretBytes::new([9; 32]);
        let shares = split(&mut rng, &secret);
        let one = [Share::new(shares[0].x, shares[0].data.clone())];
        assert_eq!(reconstruct(&one), Err(ShamirError::Underdetermined));
        assert_eq!(reconstruct(&[]), Err(ShamirError::Underdetermined));
    }

    #[test]
    fn duplicate_x_rejected() {
        let a = Share::new(1, SecretBytes::new([1; 32]));
        let b = Share::new(1, SecretBytes::new([2; 32]));
        assert_eq!(reconstruct(&[a, b]), Err(ShamirError::DuplicateX));
    }

    #[test]
    fn x_zero_rejected() {
        let a = Share::new(0, SecretBytes::new([1; 32]));
        let b = Share::new(2, SecretBytes::new([2; 32]));
        assert_eq!(reconstruct(&[a, b]), Err(ShamirError::BadXCoord));
    }

    #[test]
    fn evaluate_at_regenerates_the_device_share() {
        let mut rng = SmallRng::from_u64(17);
        let secret = SecretBytes::new([0x33; 32]);
        let shares = split(&mut rng, &secret);

        // Any two card shares reproduce the device share at x = 5.
        let pair = [
            Share::new(shares[0].x, shares[0].data.clone()),
            Share::new(shares[1].x, shares[1].data.clone()),
        ];
        let device = evaluate_at(&pair, 5).unwrap();
        assert_eq!(device, shares[4].data);

        assert_eq!(evaluate_at(&pair, 0), Err(ShamirError::BadXCoord));
    }

    #[test]
    fn share_data_differs_from_secret() {
        let mut rng = SmallRng::from_u64(3);
        let secret = SecretBytes::new([0xaa; 32]);
        let shares = split(&mut rng, &secret);
        // Shares at x != 0 reveal nothing on their own; in particular no
        // share should equal the secret outright.
        for share in &shares {
            assert_ne!(share.data, secret);
        }
    }
}
