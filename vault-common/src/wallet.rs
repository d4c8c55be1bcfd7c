//! The persistent wallet model: ids, names, info flags, states, and the
//! header record stored in flash (one per installed wallet, at most four).

use std::{fmt, str::FromStr};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    card::{CardMask, CardNumber},
    constants::{
        ENVELOPE_NONCE_LEN, ENVELOPE_TAG_LEN, MAX_NAME_LEN, POW_NONCE_LEN,
    },
    error::CoreError,
    hex,
};

/// The wallet's primary key everywhere: `SHA256(mnemonic)`.
#[derive(
    Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize,
)]
pub struct WalletId(pub [u8; 32]);

impl WalletId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::display(&self.0))
    }
}

impl fmt::Debug for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The full id is noise in logs; the first four bytes identify it.
        write!(f, "WalletId({}..)", hex::display(&self.0[..4]))
    }
}

impl FromStr for WalletId {
    type Err = hex::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        hex::decode_array(s).map(Self)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum WalletNameError {
    #[error("wallet name cannot be empty")]
    Empty,
    #[error("wallet name cannot be longer than {MAX_NAME_LEN} bytes")]
    TooLong,
    #[error("wallet name must be printable ASCII")]
    NonPrintable,
}

/// A short printable wallet label, at most [`MAX_NAME_LEN`] bytes.
/// Comparison is case-sensitive.
#[derive(
    Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
    Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct WalletName(String);

impl WalletName {
    pub fn new(name: &str) -> Result<Self, WalletNameError> {
        if name.is_empty() {
            return Err(WalletNameError::Empty);
        }
        if name.len() > MAX_NAME_LEN {
            return Err(WalletNameError::TooLong);
        }
        if !name.chars().all(|c| c.is_ascii_graphic() || c == ' ') {
            return Err(WalletNameError::NonPrintable);
        }
        Ok(Self(name.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for WalletName {
    type Err = WalletNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for WalletName {
    type Error = WalletNameError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(&s)
    }
}

impl From<WalletName> for String {
    fn from(name: WalletName) -> String {
        name.0
    }
}

impl fmt::Display for WalletName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

bitflags! {
    /// Wallet attribute flags persisted in the header and mirrored on the
    /// cards.
    #[derive(
        Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize,
    )]
    pub struct WalletInfo: u8 {
        const PIN_SET = 1 << 0;
        const PASSPHRASE_SET = 1 << 1;
        const ARBITRARY_DATA = 1 << 2;
    }
}

impl WalletInfo {
    pub fn pin_set(self) -> bool {
        self.contains(Self::PIN_SET)
    }

    pub fn passphrase_set(self) -> bool {
        self.contains(Self::PASSPHRASE_SET)
    }
}

/// How many BIP-39 words back this wallet, fixing the entropy length the
/// Shamir secret is padded from.
#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize,
)]
pub enum WordCount {
    Twelve,
    Eighteen,
    #[default]
    TwentyFour,
}

impl WordCount {
    pub fn words(self) -> usize {
        match self {
            Self::Twelve => 12,
            Self::Eighteen => 18,
            Self::TwentyFour => 24,
        }
    }

    /// Entropy bytes: 4/3 of the word count.
    pub fn entropy_len(self) -> usize {
        self.words() * 4 / 3
    }

    pub fn from_words(words: usize) -> Option<Self> {
        match words {
            12 => Some(Self::Twelve),
            18 => Some(Self::Eighteen),
            24 => Some(Self::TwentyFour),
            _ => None,
        }
    }
}

/// Lifecycle state of an installed wallet.
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize,
)]
pub enum WalletState {
    /// Share verification failed; only deletion is offered.
    Invalid,
    /// Created / restored but the share read-back hasn't been verified.
    UnverifiedValid,
    /// Discovered via sync; the cards hold shares but the device doesn't.
    ValidWithoutDeviceShare,
    /// Fully installed and verified.
    Valid,
}

/// The PoW challenge cached from the card that locked the wallet.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct UnlockChallenge {
    /// Hash target the PoW solution must meet.
    pub target: [u8; POW_NONCE_LEN],
    /// Random nonce drawn by the card.
    pub card_nonce: [u8; POW_NONCE_LEN],
    /// The card's estimate of the time needed to solve, for display.
    pub time_to_unlock_secs: u32,
}

/// The encrypted-share envelope metadata: a per-wallet nonce (plus a
/// per-share counter already mixed in) and the truncated Poly1305 tag.
#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize,
)]
pub struct ShareEnvelope {
    pub nonce: [u8; ENVELOPE_NONCE_LEN],
    pub tag: [u8; ENVELOPE_TAG_LEN],
}

/// A sealed share blob as stored on a card or in the secure flash region:
/// 32 ciphertext + 12 nonce + 4 tag = 48 bytes.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SealedShare {
    pub ciphertext: [u8; 32],
    pub envelope: ShareEnvelope,
}

/// One wallet header as persisted in the normal flash region.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct WalletHeader {
    pub id: WalletId,
    pub name: WalletName,
    pub info: WalletInfo,
    pub word_count: WordCount,
    pub state: WalletState,
    /// Bit *i* set ⇔ card *i+1* holds this wallet's share.
    pub cards_states: CardMask,
    pub is_locked: bool,
    /// The card that locked the wallet; the unlock flow must tap it.
    pub locked_by: Option<CardNumber>,
    /// Present once the unlock flow has fetched (and cached) a challenge.
    pub challenge: Option<UnlockChallenge>,
}

impl WalletHeader {
    /// Structural invariants every persisted header must satisfy:
    /// a `Valid` wallet has all four card shares and is not locked, and a
    /// locked wallet knows which card locked it.
    pub fn check_invariants(&self) -> Result<(), CoreError> {
        if self.state == WalletState::Valid
            && (self.cards_states != CardMask::ALL || self.is_locked)
        {
            return Err(CoreError::WalletInvariant);
        }
        if self.is_locked != self.locked_by.is_some() {
            return Err(CoreError::WalletInvariant);
        }
        Ok(())
    }
}
