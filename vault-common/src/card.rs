//! Card identities: card numbers, acceptable-card masks, family ids.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{constants::CARD_COUNT, hex};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
#[error("card number must be in 1..=4")]
pub struct InvalidCardNumber;

/// One of the four X1 cards, numbered 1..=4.
#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
    Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub struct CardNumber(u8);

impl CardNumber {
    pub const ONE: Self = Self(1);
    pub const TWO: Self = Self(2);
    pub const THREE: Self = Self(3);
    pub const FOUR: Self = Self(4);

    pub fn new(n: u8) -> Result<Self, InvalidCardNumber> {
        if (1..=CARD_COUNT as u8).contains(&n) {
            Ok(Self(n))
        } else {
            Err(InvalidCardNumber)
        }
    }

    /// All four cards in tap order.
    pub fn all() -> impl Iterator<Item = Self> {
        (1..=CARD_COUNT as u8).map(Self)
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Zero-based slot index into per-card arrays (keystore, shares).
    pub fn index(self) -> usize {
        usize::from(self.0 - 1)
    }

    /// The Shamir x-coordinate held by this card.
    pub fn x_coord(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for CardNumber {
    type Error = InvalidCardNumber;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        Self::new(n)
    }
}

impl From<CardNumber> for u8 {
    fn from(card: CardNumber) -> u8 {
        card.0
    }
}

impl fmt::Display for CardNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A 4-bit mask of card numbers, bit `i` ⇔ card `i + 1`.
#[derive(
    Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize,
)]
pub struct CardMask(u8);

impl CardMask {
    pub const NONE: Self = Self(0);
    pub const ALL: Self = Self(0b1111);

    pub fn from_bits(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn only(card: CardNumber) -> Self {
        Self(1 << card.index())
    }

    pub fn contains(self, card: CardNumber) -> bool {
        self.0 & (1 << card.index()) != 0
    }

    pub fn insert(&mut self, card: CardNumber) {
        self.0 |= 1 << card.index();
    }

    pub fn remove(&mut self, card: CardNumber) {
        self.0 &= !(1 << card.index());
    }

    pub fn count(self) -> u32 {
        self.0.count_ones()
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = CardNumber> {
        CardNumber::all().filter(move |card| self.contains(*card))
    }
}

impl fmt::Display for CardMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04b}", self.0)
    }
}

/// Per-production-batch identifier shared by the four cards of one device.
#[derive(
    Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize,
)]
pub struct FamilyId(pub [u8; 4]);

impl fmt::Display for FamilyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::display(&self.0))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn card_number_bounds() {
        assert!(CardNumber::new(0).is_err());
        assert!(CardNumber::new(5).is_err());
        assert_eq!(CardNumber::new(3).unwrap(), CardNumber::THREE);
        assert_eq!(CardNumber::all().count(), 4);
    }

    #[test]
    fn mask_ops() {
        let mut mask = CardMask::NONE;
        mask.insert(CardNumber::ONE);
        mask.insert(CardNumber::FOUR);
        assert_eq!(mask.bits(), 0b1001);
        assert_eq!(mask.count(), 2);
        assert!(mask.contains(CardNumber::FOUR));
        assert!(!mask.contains(CardNumber::TWO));

        mask.remove(CardNumber::FOUR);
        assert_eq!(mask.bits(), 0b0001);

        let cards: Vec<_> = CardMask::ALL.iter().collect();
        assert_eq!(cards.len(), 4);
    }

    #[test]
    fn mask_from_bits_truncates() {
        assert_eq!(CardMask::from_bits(0xff), CardMask::ALL);
    }
}
