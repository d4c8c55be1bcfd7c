//! Firmware-wide constants.

use std::time::Duration;

/// Maximum number of wallets that can be installed on one device.
pub const MAX_WALLETS: usize = 4;

/// Number of X1 cards paired with one device.
pub const CARD_COUNT: usize = 4;

/// Total Shamir shares per wallet: one per card plus the device share.
pub const SHARE_COUNT: usize = 5;

/// Minimum number of shares required to reconstruct a secret.
pub const RECONSTRUCT_THRESHOLD: usize = 2;

/// The x-coordinate reserved for the device-held share. Cards use 1..=4.
pub const DEVICE_SHARE_X: u8 = 5;

/// Byte length of a single share (and of the master secret).
pub const SHARE_LEN: usize = 32;

/// Byte length of the envelope nonce.
pub const ENVELOPE_NONCE_LEN: usize = 12;

/// Byte length of the (truncated) envelope auth tag.
pub const ENVELOPE_TAG_LEN: usize = 4;

/// Maximum wallet name length in bytes, excluding the terminator.
pub const MAX_NAME_LEN: usize = 15;

/// Maximum PIN length in characters.
pub const MAX_PIN_LEN: usize = 8;

/// Minimum PIN length in characters.
pub const MIN_PIN_LEN: usize = 4;

/// How many times a single tap prompt is retried on a recoverable card
/// error (card removed, wrong card) before the operation gives up.
pub const MAX_TAP_RETRIES: usize = 5;

/// Maximum depth of the flow engine step stack.
pub const STEP_STACK_CAPACITY: usize = 10;

/// Default per-step inactivity timeout.
pub const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Byte length of the PoW target and nonces.
pub const POW_NONCE_LEN: usize = 16;

vault_std::const_assert!(RECONSTRUCT_THRESHOLD >= 2);
vault_std::const_assert!(DEVICE_SHARE_X as usize == SHARE_COUNT);
vault_std::const_assert!(SHARE_COUNT == CARD_COUNT + 1);
