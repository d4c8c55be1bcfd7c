//! The card wire protocol.
//!
//! Requests and responses are bcs-encoded enums framed by the session
//! layer (encrypted once a card is paired). Application-level failures
//! come back as ISO-style status words; [`sw::to_error`] maps them onto
//! the core error taxonomy.

use serde::{Deserialize, Serialize};
use vault_common::{
    card::FamilyId,
    error::CoreError,
    wallet::{SealedShare, WalletId, WalletInfo, WalletName, WordCount},
};

/// Status words the cards speak.
pub mod sw {
    use super::CoreError;

    pub const OK: u16 = 0x9000;
    /// Low nibble carries the attempts remaining.
    pub const WRONG_PIN_BASE: u16 = 0x63c0;
    pub const WALLET_LOCKED: u16 = 0x6983;
    pub const WALLET_NOT_FOUND: u16 = 0x6a82;

    pub fn wrong_pin(attempts_left: u8) -> u16 {
        WRONG_PIN_BASE | u16::from(attempts_left & 0x0f)
    }

    /// Map a non-OK status word to the core taxonomy.
    pub fn to_error(sw: u16) -> CoreError {
        match sw {
            s if s & 0xfff0 == WRONG_PIN_BASE => {
                let attempts_left = (s & 0x000f) as u8;
                if attempts_left == 0 {
                    CoreError::CardPinExhausted
                } else {
                    CoreError::CardWrongPin { attempts_left }
                }
            }
            WALLET_LOCKED => CoreError::CardLockedWallet,
            WALLET_NOT_FOUND => CoreError::WalletNotFound,
            other => CoreError::CardSwStatus(other),
        }
    }
}

/// The wallet record as a card stores it.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CardWalletRecord {
    pub id: WalletId,
    pub name: WalletName,
    pub info: WalletInfo,
    pub word_count: WordCount,
    pub share: SealedShare,
    /// `SHA256(SHA256(PIN))` when the wallet has a PIN.
    pub pin_double_hash: Option<[u8; 32]>,
}

/// One entry of a card's wallet list.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct WalletListEntry {
    pub id: WalletId,
    pub name: WalletName,
    pub info: WalletInfo,
    pub word_count: WordCount,
    pub locked: bool,
}

/// The PoW challenge as the card hands it out.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CardChallenge {
    pub target: [u8; 16],
    pub card_nonce: [u8; 16],
    pub time_to_unlock_secs: u32,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum CardRequest {
    /// Pairing handshake; the only plaintext exchange.
    Pair { device_random: [u8; 32] },
    WriteShare { wallet: CardWalletRecord },
    FetchShare {
        wallet_id: WalletId,
        pin_double_hash: Option<[u8; 32]>,
    },
    FetchWalletList,
    FetchChallenge { wallet_id: WalletId },
    UnlockWallet {
        wallet_id: WalletId,
        pin_double_hash: Option<[u8; 32]>,
        solution_nonce: [u8; 16],
    },
    DeleteShare {
        wallet_id: WalletId,
        pin_double_hash: Option<[u8; 32]>,
    },
    HealthCheck,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum CardResponseBody {
    /// Nothing beyond the status word.
    Done,
    Paired {
        card_random: [u8; 32],
        family_id: FamilyId,
    },
    Share(SealedShare),
    WalletList(Vec<WalletListEntry>),
    /// `None` means the wallet is no longer locked.
    Challenge(Option<CardChallenge>),
}

/// Every exchange yields a status word plus a body. The body is only
/// meaningful when `sw == sw::OK`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CardResponse {
    pub sw: u16,
    pub body: CardResponseBody,
}

impl CardResponse {
    pub fn ok(body: CardResponseBody) -> Self {
        Self { sw: sw::OK, body }
    }

    pub fn error(sw: u16) -> Self {
        Self {
            sw,
            body: CardResponseBody::Done,
        }
    }

    /// Split into the body or the mapped error.
    pub fn into_result(self) -> Result<CardResponseBody, CoreError> {
        if self.sw == sw::OK {
            Ok(self.body)
        } else {
            Err(sw::to_error(self.sw))
        }
    }
}

pub fn encode_request(request: &CardRequest) -> Vec<u8> {
    bcs::to_bytes(request).expect("card requests always serialize")
}

pub fn decode_request(bytes: &[u8]) -> Result<CardRequest, CoreError> {
    bcs::from_bytes(bytes).map_err(|_| CoreError::CardTransport)
}

pub fn encode_response(response: &CardResponse) -> Vec<u8> {
    bcs::to_bytes(response).expect("card responses always serialize")
}

pub fn decode_response(bytes: &[u8]) -> Result<CardResponse, CoreError> {
    bcs::from_bytes(bytes).map_err(|_| CoreError::CardTransport)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sw_mapping() {
        assert_eq!(
            sw::to_error(sw::wrong_pin(2)),
            CoreError::CardWrongPin { attempts_left: 2 }
        );
        assert_eq!(sw::to_error(sw::wrong_pin(0)), CoreError::CardPinExhausted);
        assert_eq!(sw::to_error(sw::WALLET_LOCKED), CoreError::CardLockedWallet);
        assert_eq!(
            sw::to_error(sw::WALLET_NOT_FOUND),
            CoreError::WalletNotFound
        );
        assert_eq!(sw::to_error(0x6f00), CoreError::CardSwStatus(0x6f00));
    }

    #[test]
    fn request_roundtrip() {
        let request = CardRequest::FetchShare {
            wallet_id: WalletId([9; 32]),
            pin_double_hash: Some([1; 32]),
        };
        let bytes = encode_request(&request);
        let decoded = decode_request(&bytes).unwrap();
        assert!(matches!(decoded, CardRequest::FetchShare { .. }));
    }

    #[test]
    fn response_into_result() {
        let ok = CardResponse::ok(CardResponseBody::Done);
        assert!(ok.into_result().is_ok());

        let err = CardResponse::error(sw::WALLET_LOCKED);
        assert_eq!(err.into_result(), Err(CoreError::CardLockedWallet));
    }
}
