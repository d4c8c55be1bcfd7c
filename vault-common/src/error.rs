//! The shared error taxonomy for the firmware core.
//!
//! Every layer (flash, card, flows, engine) surfaces failures as a
//! [`CoreError`]. Locally recoverable conditions (a retryable tap, a wrong
//! PIN with attempts left, a duplicate name re-prompt) are handled inside
//! the operation that sees them and never reach a caller as an error.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The error families reported to the host in error frames.
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize,
)]
#[repr(u16)]
pub enum ErrorTag {
    CardError = 1,
    UserRejection = 2,
    WalletNotFound = 3,
    UnknownApp = 4,
    DeviceSetupRequired = 5,
    Internal = 6,
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum CoreError {
    /// Inactivity timeout fired while waiting on the user.
    #[error("operation timed out waiting for user input")]
    P0Timeout,
    /// The host (or the device itself) aborted the operation.
    #[error("operation aborted")]
    P0Abort,
    /// The user rejected a confirmation prompt.
    #[error("user rejected the operation")]
    UserRejection,
    /// Card left the field mid-operation and retries were exhausted.
    #[error("card was removed during the operation")]
    CardRemoved,
    /// A card outside the acceptable set was tapped, retries exhausted.
    #[error("wrong card tapped")]
    CardWrong,
    /// The card reported an application-level status word we don't handle.
    #[error("card returned status word {0:#06x}")]
    CardSwStatus(u16),
    /// Low-level NFC / framing failure.
    #[error("card transport failure")]
    CardTransport,
    /// The target wallet is locked on the card.
    #[error("wallet is locked on the card")]
    CardLockedWallet,
    /// Wrong PIN; the card still allows `attempts_left` more tries.
    #[error("incorrect PIN, {attempts_left} attempts left")]
    CardWrongPin { attempts_left: u8 },
    /// Wrong PIN and the card consumed the last attempt.
    #[error("incorrect PIN, no attempts left")]
    CardPinExhausted,
    /// All four wallet slots are occupied.
    #[error("no free wallet slot")]
    FlashFull,
    /// A wallet with the same name already exists.
    #[error("a wallet with this name already exists")]
    FlashDuplicateName,
    /// A wallet with the same id already exists.
    #[error("a wallet with this id already exists")]
    FlashDuplicateId,
    /// The flash backend failed to read or program a page.
    #[error("flash io failure")]
    FlashIo,
    /// Share envelope failed to authenticate under the supplied key.
    #[error("stored share failed to decrypt")]
    ShareCorrupt,
    /// A persisted wallet violates a state invariant.
    #[error("wallet state invariant violated")]
    WalletInvariant,
    /// Host addressed an applet this firmware doesn't carry.
    #[error("unknown applet id")]
    UnknownApp,
    /// Wallet not found (on flash or on a card).
    #[error("wallet not found")]
    WalletNotFound,
    /// Device setup (onboarding / authentication) is incomplete.
    #[error("device setup incomplete")]
    SetupRequired,
}

impl CoreError {
    /// The host-facing error family for this error.
    pub fn tag(&self) -> ErrorTag {
        use CoreError::*;
        match self {
            UserRejection | P0Timeout | P0Abort => ErrorTag::UserRejection,
            CardRemoved | CardWrong | CardSwStatus(_) | CardTransport
            | CardLockedWallet | CardWrongPin { .. } | CardPinExhausted =>
                ErrorTag::CardError,
            WalletNotFound => ErrorTag::WalletNotFound,
            UnknownApp => ErrorTag::UnknownApp,
            SetupRequired => ErrorTag::DeviceSetupRequired,
            FlashFull | FlashDuplicateName | FlashDuplicateId | FlashIo
            | ShareCorrupt | WalletInvariant => ErrorTag::Internal,
        }
    }

    /// The specific variant code carried next to the tag in error frames.
    pub fn code(&self) -> u16 {
        use CoreError::*;
        match self {
            P0Timeout => 0x0001,
            P0Abort => 0x0002,
            UserRejection => 0x0003,
            CardRemoved => 0x0101,
            CardWrong => 0x0102,
            CardSwStatus(sw) => *sw,
            CardTransport => 0x0103,
            CardLockedWallet => 0x0104,
            CardWrongPin { attempts_left } =>
                0x0110 | u16::from(*attempts_left),
            CardPinExhausted => 0x0111,
            FlashFull => 0x0201,
            FlashDuplicateName => 0x0202,
            FlashDuplicateId => 0x0203,
            FlashIo => 0x0204,
            ShareCorrupt => 0x0301,
            WalletInvariant => 0x0302,
            UnknownApp => 0x0401,
            WalletNotFound => 0x0402,
            SetupRequired => 0x0403,
        }
    }

    /// Whether this error unwinds the whole flow (vs. being reported and
    /// returning to the caller's menu normally).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoreError::P0Timeout
                | CoreError::P0Abort
                | CoreError::ShareCorrupt
                | CoreError::WalletInvariant
                | CoreError::CardSwStatus(_)
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tags_cover_card_errors() {
        assert_eq!(CoreError::CardRemoved.tag(), ErrorTag::CardError);
        assert_eq!(
            CoreError::CardWrongPin { attempts_left: 2 }.tag(),
            ErrorTag::CardError
        );
        assert_eq!(CoreError::UnknownApp.tag(), ErrorTag::UnknownApp);
        assert_eq!(
            CoreError::UserRejection.tag(),
            ErrorTag::UserRejection
        );
    }

    #[test]
    fn wrong_pin_code_carries_attempts() {
        let err = CoreError::CardWrongPin { attempts_left: 2 };
        assert_eq!(err.code(), 0x0112);
    }

    #[test]
    fn sw_status_code_passthrough() {
        assert_eq!(CoreError::CardSwStatus(0x6a82).code(), 0x6a82);
    }

    #[test]
    fn fatality() {
        assert!(CoreError::P0Abort.is_fatal());
        assert!(CoreError::ShareCorrupt.is_fatal());
        assert!(!CoreError::UserRejection.is_fatal());
        assert!(!CoreError::FlashFull.is_fatal());
    }
}
